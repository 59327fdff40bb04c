//! 类型层级注册表
//!
//! Rust 没有运行时反射，宿主在启动时把类型层级和方法上的规则声明注册进来，
//! 作为注解扫描的等价物。注册表构建完成后只读，整个进程生命周期内共享。

use crate::models::{LogRule, MethodKey};
use std::collections::HashMap;

/// 类型内部的方法签名（不含声明类型）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub name: String,
    pub param_types: Vec<String>,
}

impl MethodSig {
    pub fn new<I, S>(name: impl Into<String>, param_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            param_types: param_types.into_iter().map(Into::into).collect(),
        }
    }
}

/// 一个方法声明及其携带的规则
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub param_types: Vec<String>,
    pub public: bool,
    /// 直接声明的规则（可重复）
    pub rules: Vec<LogRule>,
    /// 通过聚合包装声明的规则组
    pub grouped_rules: Vec<LogRule>,
    /// 桥接方法指向的原始声明（泛型擦除场景；无泛型擦除时不用设置）
    pub bridge_of: Option<MethodSig>,
}

impl MethodDef {
    pub fn public<I, S>(name: impl Into<String>, param_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            param_types: param_types.into_iter().map(Into::into).collect(),
            public: true,
            rules: Vec::new(),
            grouped_rules: Vec::new(),
            bridge_of: None,
        }
    }

    pub fn private<I, S>(name: impl Into<String>, param_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut def = Self::public(name, param_types);
        def.public = false;
        def
    }

    pub fn rule(mut self, rule: LogRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_group(mut self, rules: impl IntoIterator<Item = LogRule>) -> Self {
        self.grouped_rules.extend(rules);
        self
    }

    pub fn bridge_of(mut self, sig: MethodSig) -> Self {
        self.bridge_of = Some(sig);
        self
    }

    fn matches(&self, name: &str, param_types: &[String]) -> bool {
        self.name == name && self.param_types == param_types
    }
}

/// 一个类型声明：父类、接口列表与方法集合
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    methods: Vec<MethodDef>,
}

impl TypeDef {
    /// 声明一个类
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            interfaces: Vec::new(),
            is_interface: false,
            methods: Vec::new(),
        }
    }

    /// 声明一个接口
    pub fn interface(name: impl Into<String>) -> Self {
        let mut def = Self::new(name);
        def.is_interface = true;
        def
    }

    pub fn extends(mut self, superclass: impl Into<String>) -> Self {
        self.superclass = Some(superclass.into());
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn method(mut self, method: MethodDef) -> Self {
        self.methods.push(method);
        self
    }

    fn find_method(&self, name: &str, param_types: &[String]) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.matches(name, param_types))
    }
}

/// 类型注册表
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDef>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, type_def: TypeDef) {
        self.types.insert(type_def.name.clone(), type_def);
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// 按方法键精确查找声明（不走层级）
    pub fn method_decl(&self, key: &MethodKey) -> Option<&MethodDef> {
        self.types
            .get(&key.type_name)?
            .find_method(&key.method_name, &key.param_types)
    }

    /// 在目标类型及其父类链上查找最具体的方法声明；
    /// 未找到时回退到方法键上的声明类型（方法可能声明在接口上）。
    pub fn most_specific(&self, method: &MethodKey, target_type: &str) -> Option<(&TypeDef, &MethodDef)> {
        let mut current = Some(target_type);
        while let Some(type_name) = current {
            let Some(type_def) = self.types.get(type_name) else {
                break;
            };
            if let Some(m) = type_def.find_method(&method.method_name, &method.param_types) {
                return Some((type_def, m));
            }
            current = type_def.superclass.as_deref();
        }

        // 回退：按声明类型直接查找
        let type_def = self.types.get(&method.type_name)?;
        let m = type_def.find_method(&method.method_name, &method.param_types)?;
        Some((type_def, m))
    }

    /// 桥接方法解析为其原始声明（同一类型内）；不是桥接方法则原样返回
    pub fn unwrap_bridge<'a>(
        &'a self,
        type_def: &'a TypeDef,
        method: &'a MethodDef,
    ) -> &'a MethodDef {
        match &method.bridge_of {
            Some(sig) => type_def
                .find_method(&sig.name, &sig.param_types)
                .unwrap_or(method),
            None => method,
        }
    }

    /// 查找方法对应的接口方法声明
    ///
    /// 仅当方法公开且声明类型本身不是接口时才查找：沿声明类型的接口列表
    /// 和父类链走，返回第一个签名匹配的接口方法。
    pub fn interface_method(&self, method: &MethodKey) -> Option<MethodKey> {
        let declaring = self.types.get(&method.type_name)?;
        let decl = declaring.find_method(&method.method_name, &method.param_types)?;
        if !decl.public || declaring.is_interface {
            return None;
        }

        let mut current = Some(declaring);
        while let Some(type_def) = current {
            for interface_name in &type_def.interfaces {
                if let Some(interface_def) = self.types.get(interface_name)
                    && interface_def
                        .find_method(&method.method_name, &method.param_types)
                        .is_some()
                {
                    return Some(MethodKey::new(
                        interface_name.clone(),
                        method.method_name.clone(),
                        method.param_types.clone(),
                    ));
                }
            }
            current = type_def.superclass.as_deref().and_then(|s| self.types.get(s));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.declare(
            TypeDef::interface("IOrderService").method(
                MethodDef::public("update_name", ["i64", "String"])
                    .rule(LogRule::builder().success("接口规则").build()),
            ),
        );
        registry.declare(
            TypeDef::new("BaseService").method(
                MethodDef::public("audit", ["String"])
                    .rule(LogRule::builder().success("父类规则").build()),
            ),
        );
        registry.declare(
            TypeDef::new("OrderService")
                .extends("BaseService")
                .implements("IOrderService")
                .method(
                    MethodDef::public("update_name", ["i64", "String"])
                        .rule(LogRule::builder().success("实现规则").build()),
                )
                .method(MethodDef::private("internal", ["i64"])),
        );
        registry
    }

    #[test]
    fn test_most_specific_on_concrete_type() {
        let registry = sample_registry();
        let key = MethodKey::new("IOrderService", "update_name", ["i64", "String"]);

        let (type_def, method) = registry.most_specific(&key, "OrderService").unwrap();
        assert_eq!(type_def.name, "OrderService");
        assert_eq!(method.rules[0].success_template, "实现规则");
    }

    #[test]
    fn test_most_specific_walks_superclass() {
        let registry = sample_registry();
        let key = MethodKey::new("OrderService", "audit", ["String"]);

        let (type_def, _) = registry.most_specific(&key, "OrderService").unwrap();
        assert_eq!(type_def.name, "BaseService");
    }

    #[test]
    fn test_interface_method_lookup() {
        let registry = sample_registry();
        let key = MethodKey::new("OrderService", "update_name", ["i64", "String"]);

        let interface = registry.interface_method(&key).unwrap();
        assert_eq!(interface.type_name, "IOrderService");
    }

    #[test]
    fn test_interface_method_not_found_for_interface_decl() {
        let registry = sample_registry();
        let key = MethodKey::new("IOrderService", "update_name", ["i64", "String"]);

        // 声明类型本身是接口，无需再查
        assert!(registry.interface_method(&key).is_none());
    }

    #[test]
    fn test_unwrap_bridge() {
        let mut registry = TypeRegistry::new();
        registry.declare(
            TypeDef::new("Repo")
                .method(
                    MethodDef::public("save", ["Object"])
                        .bridge_of(MethodSig::new("save", ["Order"])),
                )
                .method(
                    MethodDef::public("save", ["Order"])
                        .rule(LogRule::builder().success("保存订单").build()),
                ),
        );

        let type_def = registry.type_def("Repo").unwrap();
        let bridge = type_def.find_method("save", &["Object".to_string()]).unwrap();
        let canonical = registry.unwrap_bridge(type_def, bridge);
        assert_eq!(canonical.param_types, vec!["Order".to_string()]);
        assert_eq!(canonical.rules.len(), 1);
    }
}
