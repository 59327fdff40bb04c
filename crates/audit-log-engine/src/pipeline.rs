//! 审计日志管线
//!
//! 包裹一次业务调用的完整流程：解析规则、执行前函数预求值、执行业务、
//! 写回结果变量、逐规则判定并发出审计记录。
//!
//! 失败隔离：调用前的所有失败（规则解析、前置函数）只记日志，业务照常执行；
//! 调用后的逐规则失败记日志后默认吞掉，仅在 join_transaction 开启时向调用方升级。

use crate::assembler::RecordAssembler;
use crate::config::AuditLogConfig;
use crate::context::{CallVariables, EvaluationContext};
use crate::error::AuditError;
use crate::evaluator::TemplateEvaluator;
use crate::functions::FunctionRegistry;
use crate::models::{LogRule, MethodCall, MethodExecuteResult};
use crate::registry::TypeRegistry;
use crate::resolver::RuleResolver;
use crate::service::{OperatorResolver, RecordSink};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{error, instrument, warn};

/// 审计日志管线
pub struct AuditLogPipeline {
    config: AuditLogConfig,
    resolver: RuleResolver,
    evaluator: TemplateEvaluator,
    assembler: RecordAssembler,
    sink: Arc<dyn RecordSink>,
    operator_resolver: Arc<dyn OperatorResolver>,
}

impl AuditLogPipeline {
    pub fn new(
        config: AuditLogConfig,
        registry: Arc<TypeRegistry>,
        sink: Arc<dyn RecordSink>,
        operator_resolver: Arc<dyn OperatorResolver>,
    ) -> Self {
        let functions = Arc::new(FunctionRegistry::with_defaults(&config));
        Self::with_functions(config, registry, functions, sink, operator_resolver)
    }

    /// 使用自定义函数注册表构建（注册表中需包含宿主自定义函数）
    pub fn with_functions(
        config: AuditLogConfig,
        registry: Arc<TypeRegistry>,
        functions: Arc<FunctionRegistry>,
        sink: Arc<dyn RecordSink>,
        operator_resolver: Arc<dyn OperatorResolver>,
    ) -> Self {
        Self {
            resolver: RuleResolver::new(registry),
            evaluator: TemplateEvaluator::new(functions),
            assembler: RecordAssembler::new(config.app_name.clone()),
            config,
            sink,
            operator_resolver,
        }
    }

    /// 包裹执行一次业务调用
    ///
    /// 外层 `Result` 是引擎自身的错误，仅在 join_transaction 开启且某条规则
    /// 处理失败时为 `Err`；内层是业务结果，引擎不改写。
    /// 业务闭包可通过 `CallVariables` 在执行期间发布变量供模板使用。
    #[instrument(skip(self, body), fields(method = %call.method, target = %call.target_type))]
    pub fn execute<T, E, F>(
        &self,
        call: MethodCall,
        body: F,
    ) -> Result<std::result::Result<T, E>, AuditError>
    where
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(&mut CallVariables) -> std::result::Result<T, E>,
    {
        // 调用前失败不阻断业务：解析失败按无规则处理
        let rules = match self.resolver.resolve(&call.method, &call.target_type) {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "规则解析失败，本次调用不记审计日志");
                Arc::new(Vec::new())
            }
        };

        let mut ctx = EvaluationContext::new(&call);
        let mut result = MethodExecuteResult::started(&call);

        if !rules.is_empty() {
            self.evaluator
                .process_before_functions(&before_templates(&rules), &mut ctx);
        }

        let mut variables = CallVariables::new();
        let outcome = body(&mut variables);
        ctx.merge_variables(variables);

        match &outcome {
            Ok(ret) => {
                let ret = match serde_json::to_value(ret) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "返回值序列化失败，模板中 _ret 不可用");
                        Value::Null
                    }
                };
                ctx.record_success(ret.clone());
                result.finish_success(ret);
            }
            Err(e) => {
                let msg = e.to_string();
                ctx.record_failure(&msg);
                result.finish_failure(msg);
            }
        }

        for rule in rules.iter() {
            if let Err(e) = self.emit_for_rule(rule, &mut ctx, &result) {
                error!(method = %result.method, error = %e, "审计日志规则处理失败");
                if self.config.join_transaction {
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }

    /// 处理单条规则：条件判定、成功/失败分类、模板求值、抑制判定、落地
    fn emit_for_rule(
        &self,
        rule: &LogRule,
        ctx: &mut EvaluationContext,
        result: &MethodExecuteResult,
    ) -> Result<(), AuditError> {
        // 条件求值结果（忽略大小写）以 false 结尾时整条规则不触发
        if !rule.condition.is_empty() {
            let condition = self.evaluator.process_one(&rule.condition, ctx)?;
            if condition.to_ascii_lowercase().ends_with("false") {
                return Ok(());
            }
        }

        let (action_template, fail) = if result.success {
            if rule.success_condition.is_empty() {
                (rule.success_template.as_str(), false)
            } else {
                // 成功条件不满足时按失败路径记录（匹配忽略大小写）
                let satisfied = self
                    .evaluator
                    .process_one(&rule.success_condition, ctx)?
                    .to_ascii_lowercase()
                    .ends_with("true");
                if satisfied {
                    (rule.success_template.as_str(), false)
                } else {
                    (rule.fail_template.as_str(), true)
                }
            }
        } else {
            (rule.fail_template.as_str(), true)
        };
        // 该路径没有模板，不记录
        if action_template.is_empty() {
            return Ok(());
        }

        let operator = if rule.operator_name.is_empty() {
            let operator = self.operator_resolver.current_operator();
            if operator.is_empty() {
                return Err(AuditError::MissingOperator {
                    method: result.method.to_string(),
                });
            }
            operator
        } else {
            self.evaluator.process_one(&rule.operator_name, ctx)?
        };

        let templates = vec![
            rule.biz_type.clone(),
            rule.sub_biz_type.clone(),
            rule.biz_no.clone(),
            rule.extra.clone(),
            action_template.to_string(),
        ];
        let values = self.evaluator.process(&templates, ctx)?;
        let action = values.get(action_template).cloned().unwrap_or_default();

        // 抑制：正文为空，或 diff 关闭时含函数调用的模板未发生任何替换（无变化）
        if action.is_empty() {
            return Ok(());
        }
        if !self.config.diff_log && action_template.contains('#') && action == action_template {
            return Ok(());
        }

        let record = self
            .assembler
            .assemble(rule, &values, action, operator, fail, result);
        self.sink.save(&record)
    }
}

/// 执行前阶段参与函数预求值的模板：成功路径上的五个字段
fn before_templates(rules: &[LogRule]) -> Vec<String> {
    let mut templates = Vec::with_capacity(rules.len() * 5);
    for rule in rules {
        templates.push(rule.biz_type.clone());
        templates.push(rule.biz_no.clone());
        templates.push(rule.sub_biz_type.clone());
        templates.push(rule.extra.clone());
        templates.push(rule.success_template.clone());
    }
    templates
}
