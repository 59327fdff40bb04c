//! 审计日志领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// 一条声明式日志规则
///
/// 所有字段均为表达式模板，空字符串表示未设置（与注解默认值一致）。
/// 约束：`success_template` 与 `fail_template` 至少一个非空，
/// 该约束在规则解析阶段校验，而不是在调用阶段。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRule {
    /// 业务调用成功时的日志模板
    #[serde(default)]
    pub success_template: String,
    /// 业务调用失败时的日志模板
    #[serde(default)]
    pub fail_template: String,
    #[serde(default)]
    pub biz_type: String,
    #[serde(default)]
    pub sub_biz_type: String,
    #[serde(default)]
    pub biz_no: String,
    #[serde(default)]
    pub extra: String,
    /// 操作人模板；为空时走外部 OperatorResolver
    #[serde(default)]
    pub operator_name: String,
    /// 布尔条件模板，求值为 false 时整条规则不触发
    #[serde(default)]
    pub condition: String,
    /// 成功条件模板，独立于是否抛错重新判定成功/失败
    #[serde(default)]
    pub success_condition: String,
}

impl LogRule {
    pub fn builder() -> LogRuleBuilder {
        LogRuleBuilder::default()
    }

    /// 两个模板是否都为空（规则完全无内容）
    pub fn is_blank(&self) -> bool {
        self.success_template.is_empty() && self.fail_template.is_empty()
    }
}

/// LogRule 构建器
#[derive(Debug, Default)]
pub struct LogRuleBuilder {
    rule: LogRule,
}

impl LogRuleBuilder {
    pub fn success(mut self, template: impl Into<String>) -> Self {
        self.rule.success_template = template.into();
        self
    }

    pub fn fail(mut self, template: impl Into<String>) -> Self {
        self.rule.fail_template = template.into();
        self
    }

    pub fn biz_type(mut self, template: impl Into<String>) -> Self {
        self.rule.biz_type = template.into();
        self
    }

    pub fn sub_biz_type(mut self, template: impl Into<String>) -> Self {
        self.rule.sub_biz_type = template.into();
        self
    }

    pub fn biz_no(mut self, template: impl Into<String>) -> Self {
        self.rule.biz_no = template.into();
        self
    }

    pub fn extra(mut self, template: impl Into<String>) -> Self {
        self.rule.extra = template.into();
        self
    }

    pub fn operator_name(mut self, template: impl Into<String>) -> Self {
        self.rule.operator_name = template.into();
        self
    }

    pub fn condition(mut self, template: impl Into<String>) -> Self {
        self.rule.condition = template.into();
        self
    }

    pub fn success_condition(mut self, template: impl Into<String>) -> Self {
        self.rule.success_condition = template.into();
        self
    }

    pub fn build(self) -> LogRule {
        self.rule
    }
}

/// 方法的稳定标识：声明类型 + 方法名 + 参数类型列表
///
/// 作为规则缓存和接口方法缓存的键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    pub type_name: String,
    pub method_name: String,
    pub param_types: Vec<String>,
}

impl MethodKey {
    pub fn new<I, S>(type_name: impl Into<String>, method_name: impl Into<String>, param_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            param_types: param_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}({})",
            self.type_name,
            self.method_name,
            self.param_types.join(", ")
        )
    }
}

/// 一次被拦截的方法调用
///
/// `args` 是以参数名为键的 JSON 对象；`caller_ip` 由宿主的请求层显式传入，
/// 取代原始实现里的线程级环境查找。
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub method: MethodKey,
    /// 实际实现类型（方法可能声明在接口上）
    pub target_type: String,
    pub args: Value,
    pub caller_ip: Option<String>,
}

impl MethodCall {
    pub fn new(method: MethodKey, target_type: impl Into<String>, args: Value) -> Self {
        Self {
            method,
            target_type: target_type.into(),
            args,
            caller_ip: None,
        }
    }

    pub fn with_caller_ip(mut self, ip: impl Into<String>) -> Self {
        self.caller_ip = Some(ip.into());
        self
    }
}

/// 单次调用的执行结果
///
/// 调用开始时创建，调用返回后写入一次，之后不再修改；
/// 仅在本次调用的管线内使用，不跨调用共享。
#[derive(Debug, Clone)]
pub struct MethodExecuteResult {
    pub method: MethodKey,
    pub target_type: String,
    pub args: Value,
    pub caller_ip: Option<String>,
    pub success: bool,
    /// 仅成功时存在
    pub ret: Option<Value>,
    /// 仅失败时存在
    pub error_msg: Option<String>,
}

impl MethodExecuteResult {
    pub fn started(call: &MethodCall) -> Self {
        Self {
            method: call.method.clone(),
            target_type: call.target_type.clone(),
            args: call.args.clone(),
            caller_ip: call.caller_ip.clone(),
            success: false,
            ret: None,
            error_msg: None,
        }
    }

    pub fn finish_success(&mut self, ret: Value) {
        self.success = true;
        self.ret = Some(ret);
    }

    pub fn finish_failure(&mut self, error_msg: impl Into<String>) {
        self.success = false;
        self.error_msg = Some(error_msg.into());
    }
}

/// 产生日志的代码位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeVariable {
    pub class_name: String,
    pub method_name: String,
}

/// 最终发出的审计记录
///
/// 每条触发的规则构造一次，交给外部 sink 后引擎不再持有。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub application_name: String,
    pub biz_type: String,
    pub sub_biz_type: String,
    pub biz_no: String,
    pub operator: String,
    pub extra: String,
    /// 解析后的日志正文
    pub action: String,
    pub fail: bool,
    pub create_time: DateTime<Utc>,
    pub code_variable: CodeVariable,
    pub ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_builder() {
        let rule = LogRule::builder()
            .success("user #{id} updated name to #{name}")
            .fail("update failed for #{id}")
            .biz_type("order")
            .biz_no("#{id}")
            .build();

        assert_eq!(rule.success_template, "user #{id} updated name to #{name}");
        assert_eq!(rule.biz_type, "order");
        assert!(rule.condition.is_empty());
        assert!(!rule.is_blank());
    }

    #[test]
    fn test_rule_equality_for_dedup() {
        let a = LogRule::builder().success("x").biz_no("#{id}").build();
        let b = LogRule::builder().success("x").biz_no("#{id}").build();
        let c = LogRule::builder().success("y").build();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_method_key_display() {
        let key = MethodKey::new("OrderService", "update_name", ["i64", "String"]);
        assert_eq!(key.to_string(), "OrderService#update_name(i64, String)");
    }

    #[test]
    fn test_execute_result_lifecycle() {
        let call = MethodCall::new(
            MethodKey::new("OrderService", "update_name", ["i64"]),
            "OrderService",
            json!({"id": 7}),
        );
        let mut result = MethodExecuteResult::started(&call);
        assert!(!result.success);
        assert!(result.ret.is_none());

        result.finish_success(json!(true));
        assert!(result.success);
        assert_eq!(result.ret, Some(json!(true)));
        assert!(result.error_msg.is_none());
    }

    #[test]
    fn test_rule_serde_roundtrip() {
        let rule = LogRule::builder()
            .success("创建订单 #{order_no}")
            .biz_type("order")
            .build();

        let json = serde_json::to_string(&rule).unwrap();
        let parsed: LogRule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);
    }
}
