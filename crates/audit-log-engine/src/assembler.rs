//! 审计记录组装
//!
//! 把一条规则的各模板解析结果拼装成最终的 `AuditRecord`：
//! 引擎负责补齐标识、应用名、时间戳和代码位置，其余字段来自模板求值。

use crate::models::{AuditRecord, CodeVariable, LogRule, MethodExecuteResult};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// 记录组装器
#[derive(Debug, Clone)]
pub struct RecordAssembler {
    app_name: String,
}

impl RecordAssembler {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    /// 组装一条审计记录
    ///
    /// `values` 是 模板 -> 解析结果 的映射；规则里未设置的模板（空串）
    /// 解析结果也是空串，这里直接取用不再特判。
    pub fn assemble(
        &self,
        rule: &LogRule,
        values: &HashMap<String, String>,
        action: String,
        operator: String,
        fail: bool,
        result: &MethodExecuteResult,
    ) -> AuditRecord {
        let resolved = |template: &str| values.get(template).cloned().unwrap_or_default();

        AuditRecord {
            id: Uuid::new_v4(),
            application_name: self.app_name.clone(),
            biz_type: resolved(&rule.biz_type),
            sub_biz_type: resolved(&rule.sub_biz_type),
            biz_no: resolved(&rule.biz_no),
            operator,
            extra: resolved(&rule.extra),
            action,
            fail,
            create_time: Utc::now(),
            code_variable: CodeVariable {
                class_name: result.method.type_name.clone(),
                method_name: result.method.method_name.clone(),
            },
            ip: result.caller_ip.clone().unwrap_or_default(),
        }
    }
}
