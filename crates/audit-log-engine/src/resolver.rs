//! 规则解析器
//!
//! 给定方法标识和实际实现类型，计算适用的日志规则集合：
//! 合并直接声明、聚合声明、接口声明与桥接解析四个来源，按值去重，
//! 并以方法标识为键做进程级并发缓存。

use crate::error::{AuditError, Result};
use crate::models::{LogRule, MethodKey};
use crate::registry::TypeRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::instrument;

/// 规则解析器
///
/// 缓存说明：同一个键的首次并发访问允许各自计算，但读取方永远不会
/// 看到部分构造的条目；条目写入后不再失效，进程生命周期内有效。
pub struct RuleResolver {
    registry: Arc<TypeRegistry>,
    /// 方法标识 -> 已解析规则集
    rule_cache: DashMap<MethodKey, Arc<Vec<LogRule>>>,
    /// 方法 -> 对应接口方法（None 表示没有）
    interface_cache: DashMap<MethodKey, Option<MethodKey>>,
}

impl RuleResolver {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            rule_cache: DashMap::new(),
            interface_cache: DashMap::new(),
        }
    }

    /// 解析方法适用的规则集（有序、去重）
    ///
    /// 非公开方法解析为空集；规则校验失败（两个模板都为空）返回
    /// `AuditError::InvalidRule`，错误不会写入缓存。
    #[instrument(skip(self), fields(method = %method, target = target_type))]
    pub fn resolve(&self, method: &MethodKey, target_type: &str) -> Result<Arc<Vec<LogRule>>> {
        let cache_key = MethodKey::new(
            target_type,
            method.method_name.clone(),
            method.param_types.clone(),
        );

        if let Some(cached) = self.rule_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let rules = self.compute(method, target_type)?;
        for rule in &rules {
            if rule.is_blank() {
                return Err(AuditError::InvalidRule(format!(
                    "'{}' 上的规则必须至少设置 success_template 或 fail_template 之一",
                    cache_key
                )));
            }
        }

        let rules = Arc::new(rules);
        self.rule_cache.insert(cache_key, rules.clone());
        Ok(rules)
    }

    fn compute(&self, method: &MethodKey, target_type: &str) -> Result<Vec<LogRule>> {
        // 找到目标类型上最具体的覆盖声明；找不到视为未声明规则
        let Some((type_def, decl)) = self.registry.most_specific(method, target_type) else {
            return Ok(Vec::new());
        };
        // 非公开方法不允许声明规则
        if !decl.public {
            return Ok(Vec::new());
        }

        let canonical = self.registry.unwrap_bridge(type_def, decl);
        let canonical_key = MethodKey::new(
            type_def.name.clone(),
            canonical.name.clone(),
            canonical.param_types.clone(),
        );

        let mut rules: Vec<LogRule> = Vec::new();
        // 来源 1/2：最具体覆盖（桥接解析后）的直接声明与聚合声明
        push_dedup(&mut rules, &canonical.rules);
        push_dedup(&mut rules, &canonical.grouped_rules);

        // 来源 3/4：原方法与桥接解析后方法对应的接口声明
        for interface_key in [
            self.interface_method_cached(method),
            self.interface_method_cached(&canonical_key),
        ] {
            if let Some(interface_decl) = self.registry.method_decl(&interface_key) {
                push_dedup(&mut rules, &interface_decl.rules);
                push_dedup(&mut rules, &interface_decl.grouped_rules);
            }
        }

        Ok(rules)
    }

    /// 查找方法对应的接口方法并缓存；没有接口方法时返回原方法本身
    ///
    /// 并发首次访问时 `entry` 保证每个键至多一个条目可见。
    fn interface_method_cached(&self, method: &MethodKey) -> MethodKey {
        self.interface_cache
            .entry(method.clone())
            .or_insert_with(|| self.registry.interface_method(method))
            .clone()
            .unwrap_or_else(|| method.clone())
    }
}

fn push_dedup(rules: &mut Vec<LogRule>, source: &[LogRule]) {
    for rule in source {
        if !rules.contains(rule) {
            rules.push(rule.clone());
        }
    }
}
