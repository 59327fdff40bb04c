//! 审计日志配置
//!
//! 支持配置文件加载与环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 审计日志引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct AuditLogConfig {
    /// 应用名，写入每条审计记录
    pub app_name: String,
    /// 规则处理失败时是否升级为调用方错误（默认吞掉并记日志）
    pub join_transaction: bool,
    /// diff 模板未产生任何变化时是否仍然发出记录
    pub diff_log: bool,
    /// diff 比较时按整体相等处理的字段路径（避免对不可变值类型逐字段报告）
    pub use_equals_paths: Vec<String>,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            app_name: "audit-log".to_string(),
            join_transaction: false,
            diff_log: true,
            use_equals_paths: Vec::new(),
        }
    }
}

impl AuditLogConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的覆盖先加载的同名配置项）：
    /// 1. 内置默认值
    /// 2. {CONFIG_DIR}/audit-log.toml（可选）
    /// 3. 环境变量（AUDIT_LOG_ 前缀，如 AUDIT_LOG_JOIN_TRANSACTION）
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("app_name", "audit-log")?
            .set_default("join_transaction", false)?
            .set_default("diff_log", true)?
            .set_default("use_equals_paths", Vec::<String>::new())?
            .add_source(File::from(Path::new(&config_dir).join("audit-log.toml")).required(false))
            .add_source(Environment::with_prefix("AUDIT_LOG").try_parsing(true));

        builder.build()?.try_deserialize()
    }
}
