//! 模板函数
//!
//! 函数通过 `#函数名{参数}` 语法在模板中调用，经注册表按名分发。
//! 内置 diff 函数比较对象前后快照并生成变更描述，宿主可按名注册自定义函数。

use crate::config::AuditLogConfig;
use crate::context::EvaluationContext;
use crate::error::{AuditError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 函数执行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionPhase {
    /// 业务方法执行前（返回值尚不可见）
    Before,
    /// 业务方法执行后
    After,
}

/// 模板函数接口
pub trait ParseFunction: Send + Sync {
    fn name(&self) -> &str;

    /// 是否需要在业务方法执行前先跑一次（如 diff 需要先取快照）
    fn execute_before(&self) -> bool {
        false
    }

    /// 执行函数
    ///
    /// `raw_call` 是模板中的完整调用文本（也是结果缓存和快照的键）。
    /// 返回 `Ok(None)` 表示本阶段没有可替换的结果，调用文本原样保留。
    fn apply(
        &self,
        phase: FunctionPhase,
        raw_call: &str,
        args: &[Value],
        ctx: &mut EvaluationContext,
    ) -> Result<Option<String>>;
}

/// 函数注册表
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn ParseFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建带内置函数的注册表（diff）
    pub fn with_defaults(config: &AuditLogConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DiffFunction::new(
            config.use_equals_paths.clone(),
            config.diff_log,
        )));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn ParseFunction>) {
        self.functions.insert(function.name().to_string(), function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ParseFunction>> {
        self.functions.get(name).cloned()
    }
}

/// 内置 diff 函数
///
/// 两参数形式直接比较前后两个值；单参数形式在执行前阶段按调用文本
/// 存快照，执行后阶段与快照比较。两值相等时返回空串（无变化标记）；
/// diff 模式关闭时对无变化的比较不做替换，让模板保持原文以触发抑制。
pub struct DiffFunction {
    /// 按整体相等比较的字段路径
    use_equals_paths: Vec<String>,
    diff_log: bool,
}

impl DiffFunction {
    pub const NAME: &'static str = "diff";

    pub fn new(use_equals_paths: Vec<String>, diff_log: bool) -> Self {
        Self {
            use_equals_paths,
            diff_log,
        }
    }

    fn render(&self, old: &Value, new: &Value) -> Option<String> {
        let mut old_flat = BTreeMap::new();
        let mut new_flat = BTreeMap::new();
        self.flatten(old, "", &mut old_flat);
        self.flatten(new, "", &mut new_flat);

        let mut segments = Vec::new();
        for (path, old_value) in &old_flat {
            match new_flat.get(path) {
                Some(new_value) if values_equal(old_value, new_value) => {}
                Some(new_value) => segments.push(format!(
                    "【{}】从【{}】修改为【{}】",
                    label(path),
                    render_value(old_value),
                    render_value(new_value)
                )),
                None => segments.push(format!(
                    "【{}】删除【{}】",
                    label(path),
                    render_value(old_value)
                )),
            }
        }
        for (path, new_value) in &new_flat {
            if !old_flat.contains_key(path) {
                segments.push(format!(
                    "【{}】新增【{}】",
                    label(path),
                    render_value(new_value)
                ));
            }
        }

        if segments.is_empty() {
            // 无变化：diff 模式开启时给出空标记，关闭时保持模板原文
            if self.diff_log {
                Some(String::new())
            } else {
                None
            }
        } else {
            Some(segments.join("；"))
        }
    }

    /// 将 JSON 对象展平为叶子路径；命中相等白名单的路径整体比较，不再下钻
    fn flatten(&self, value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
        if !prefix.is_empty() && self.use_equals_paths.iter().any(|p| p == prefix) {
            out.insert(prefix.to_string(), value.clone());
            return;
        }

        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    self.flatten(child, &path, out);
                }
            }
            _ => {
                out.insert(prefix.to_string(), value.clone());
            }
        }
    }
}

impl ParseFunction for DiffFunction {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute_before(&self) -> bool {
        true
    }

    fn apply(
        &self,
        phase: FunctionPhase,
        raw_call: &str,
        args: &[Value],
        ctx: &mut EvaluationContext,
    ) -> Result<Option<String>> {
        match (phase, args) {
            // 单参数：执行前取快照，执行后与快照比较
            (FunctionPhase::Before, [value]) => {
                ctx.put_snapshot(raw_call.to_string(), value.clone());
                Ok(None)
            }
            (FunctionPhase::After, [value]) => {
                let old = ctx.snapshot(raw_call).cloned().unwrap_or(Value::Null);
                Ok(self.render(&old, value))
            }
            (_, [old, new]) => Ok(self.render(old, new)),
            _ => Err(AuditError::Function {
                name: Self::NAME.to_string(),
                message: format!("需要 1 或 2 个参数，实际 {} 个", args.len()),
            }),
        }
    }
}

/// 叶子值相等判定：数值统一转浮点比较，避免 100 与 100.0 误报
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return (x - y).abs() < f64::EPSILON;
    }
    a == b
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn label(path: &str) -> &str {
    if path.is_empty() { "值" } else { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MethodCall, MethodKey};
    use serde_json::json;

    fn ctx() -> EvaluationContext {
        let call = MethodCall::new(
            MethodKey::new("OrderService", "update", ["i64"]),
            "OrderService",
            json!({}),
        );
        EvaluationContext::new(&call)
    }

    fn diff() -> DiffFunction {
        DiffFunction::new(Vec::new(), true)
    }

    #[test]
    fn test_diff_equal_returns_empty_marker() {
        let mut ctx = ctx();
        let result = diff()
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[json!({"name": "Alice"}), json!({"name": "Alice"})],
                &mut ctx,
            )
            .unwrap();
        assert_eq!(result, Some(String::new()));
    }

    #[test]
    fn test_diff_equal_without_diff_log_keeps_template() {
        let mut ctx = ctx();
        let function = DiffFunction::new(Vec::new(), false);
        let result = function
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[json!({"name": "Alice"}), json!({"name": "Alice"})],
                &mut ctx,
            )
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_diff_describes_changes() {
        let mut ctx = ctx();
        let result = diff()
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[
                    json!({"name": "Alice", "age": 20}),
                    json!({"name": "Bob", "age": 20, "city": "上海"}),
                ],
                &mut ctx,
            )
            .unwrap()
            .unwrap();

        assert!(result.contains("【name】从【Alice】修改为【Bob】"));
        assert!(result.contains("【city】新增【上海】"));
        assert!(!result.contains("age"));
    }

    #[test]
    fn test_diff_reports_removed_fields() {
        let mut ctx = ctx();
        let result = diff()
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[json!({"tag": "vip"}), json!({})],
                &mut ctx,
            )
            .unwrap()
            .unwrap();
        assert!(result.contains("【tag】删除【vip】"));
    }

    #[test]
    fn test_numeric_equality_tolerant() {
        let mut ctx = ctx();
        let result = diff()
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[json!({"amount": 100}), json!({"amount": 100.0})],
                &mut ctx,
            )
            .unwrap();
        assert_eq!(result, Some(String::new()));
    }

    #[test]
    fn test_use_equals_path_compares_whole_value() {
        let mut ctx = ctx();
        let function = DiffFunction::new(vec!["created_at".to_string()], true);
        let result = function
            .apply(
                FunctionPhase::After,
                "#diff{a,b}",
                &[
                    json!({"created_at": {"date": "2024-01-01", "zone": "UTC"}}),
                    json!({"created_at": {"date": "2024-01-02", "zone": "UTC"}}),
                ],
                &mut ctx,
            )
            .unwrap()
            .unwrap();

        // 整体比较：一条变更而不是逐字段两条
        assert!(result.starts_with("【created_at】从【"));
        assert!(!result.contains("；"));
    }

    #[test]
    fn test_single_arg_snapshot_flow() {
        let mut ctx = ctx();
        let function = diff();
        let raw = "#diff{#{order}}";

        // 执行前：取快照，不产生结果
        let before = function
            .apply(FunctionPhase::Before, raw, &[json!({"name": "old"})], &mut ctx)
            .unwrap();
        assert_eq!(before, None);

        // 执行后：与快照比较
        let after = function
            .apply(FunctionPhase::After, raw, &[json!({"name": "new"})], &mut ctx)
            .unwrap()
            .unwrap();
        assert!(after.contains("【name】从【old】修改为【new】"));
    }

    #[test]
    fn test_wrong_arity_is_error() {
        let mut ctx = ctx();
        let err = diff()
            .apply(FunctionPhase::After, "#diff{}", &[], &mut ctx)
            .unwrap_err();
        assert!(matches!(err, AuditError::Function { .. }));
    }

    #[test]
    fn test_registry_register_and_get() {
        struct Upper;
        impl ParseFunction for Upper {
            fn name(&self) -> &str {
                "upper"
            }
            fn apply(
                &self,
                _phase: FunctionPhase,
                _raw_call: &str,
                args: &[Value],
                _ctx: &mut EvaluationContext,
            ) -> Result<Option<String>> {
                Ok(Some(render_value(&args[0]).to_uppercase()))
            }
        }

        let mut registry = FunctionRegistry::with_defaults(&AuditLogConfig::default());
        registry.register(Arc::new(Upper));

        assert!(registry.get("diff").is_some());
        assert!(registry.get("upper").is_some());
        assert!(registry.get("missing").is_none());
    }
}
