//! 审计日志引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    // ==================== 配置错误（单条规则级别，不影响业务调用） ====================
    #[error("无效的日志规则: {0}")]
    InvalidRule(String),

    #[error("操作人解析为空: {method}")]
    MissingOperator { method: String },

    // ==================== 解析 / 求值错误 ====================
    #[error("规则解析失败: {0}")]
    Resolution(String),

    #[error("模板求值失败: {0}")]
    Evaluation(String),

    #[error("函数执行失败: {name} - {message}")]
    Function { name: String, message: String },

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
