//! 外部服务接口
//!
//! 引擎只负责把审计记录组装出来，落地方式（数据库、消息队列、日志流）
//! 和操作人身份的获取由宿主实现这两个 trait 注入。

use crate::error::Result;
use crate::models::AuditRecord;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// 审计记录落地接口
///
/// 每条触发的规则调用一次；实现方的错误由管线按失败隔离策略处理，
/// 不应在实现里自行吞掉。
#[cfg_attr(test, mockall::automock)]
pub trait RecordSink: Send + Sync {
    fn save(&self, record: &AuditRecord) -> Result<()>;
}

/// 操作人解析接口
///
/// 规则未声明 operator_name 模板时由它提供当前操作人；
/// 返回空串视为解析失败，对应规则按配置错误处理。
#[cfg_attr(test, mockall::automock)]
pub trait OperatorResolver: Send + Sync {
    fn current_operator(&self) -> String;
}

/// 默认 sink：把审计记录写入结构化日志流
#[derive(Debug, Default)]
pub struct TracingRecordSink;

impl RecordSink for TracingRecordSink {
    fn save(&self, record: &AuditRecord) -> Result<()> {
        info!(
            id = %record.id,
            biz_type = %record.biz_type,
            sub_biz_type = %record.sub_biz_type,
            biz_no = %record.biz_no,
            operator = %record.operator,
            fail = record.fail,
            action = %record.action,
            "审计记录"
        );
        Ok(())
    }
}

/// 内存 sink，测试和演示用
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl RecordSink for MemoryRecordSink {
    fn save(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// 默认解析器：总是返回空串（未接入身份体系时规则必须自带 operator_name 模板）
#[derive(Debug, Default)]
pub struct EmptyOperatorResolver;

impl OperatorResolver for EmptyOperatorResolver {
    fn current_operator(&self) -> String {
        String::new()
    }
}

/// 固定操作人解析器，测试和单用户场景用
#[derive(Debug)]
pub struct FixedOperatorResolver {
    operator: String,
}

impl FixedOperatorResolver {
    pub fn new(operator: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
        }
    }
}

impl OperatorResolver for FixedOperatorResolver {
    fn current_operator(&self) -> String {
        self.operator.clone()
    }
}
