//! 声明式审计日志引擎
//!
//! 以规则声明取代手写埋点，支持：
//! - 方法级日志规则声明与类型层级解析（接口、父类、聚合声明）
//! - 表达式模板求值（变量引用、命名函数、布尔条件折叠）
//! - 成功/失败双路径分类与内置 diff 变更描述
//! - 可插拔的记录落地与操作人解析

pub mod assembler;
pub mod config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod resolver;
pub mod service;

pub use assembler::RecordAssembler;
pub use config::AuditLogConfig;
pub use context::{CallVariables, ERR_MSG_KEY, EvaluationContext, RET_KEY, TARGET_KEY};
pub use error::{AuditError, Result};
pub use evaluator::TemplateEvaluator;
pub use functions::{DiffFunction, FunctionPhase, FunctionRegistry, ParseFunction};
pub use models::{
    AuditRecord, CodeVariable, LogRule, LogRuleBuilder, MethodCall, MethodExecuteResult, MethodKey,
};
pub use pipeline::AuditLogPipeline;
pub use registry::{MethodDef, MethodSig, TypeDef, TypeRegistry};
pub use resolver::RuleResolver;
pub use service::{
    EmptyOperatorResolver, FixedOperatorResolver, MemoryRecordSink, OperatorResolver, RecordSink,
    TracingRecordSink,
};
