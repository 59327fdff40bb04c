//! 求值上下文
//!
//! 单次调用内模板表达式可见的变量作用域：参数、目标类型、返回值、错误信息，
//! 以及已计算的函数结果缓存和 diff 快照。调用结束即丢弃，不跨线程共享。

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

use crate::models::MethodCall;

/// 返回值在上下文中的变量名
pub const RET_KEY: &str = "_ret";
/// 错误信息在上下文中的变量名
pub const ERR_MSG_KEY: &str = "_err_msg";
/// 目标类型在上下文中的变量名
pub const TARGET_KEY: &str = "_target";

/// 单次调用的求值上下文
#[derive(Debug, Default)]
pub struct EvaluationContext {
    /// 变量根对象：参数名在顶层，另含 _target / _ret / _err_msg
    data: Value,
    /// 函数调用子表达式 -> 已计算结果（按完整调用文本为键）
    function_results: HashMap<String, String>,
    /// diff 函数的调用前快照
    snapshots: HashMap<String, Value>,
}

impl EvaluationContext {
    pub fn new(call: &MethodCall) -> Self {
        let mut root = match &call.args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                // 参数不是对象时无法按名寻址，整体挂在 _args 下
                let mut map = Map::new();
                map.insert("_args".to_string(), other.clone());
                map
            }
        };
        root.insert(TARGET_KEY.to_string(), Value::String(call.target_type.clone()));

        Self {
            data: Value::Object(root),
            function_results: HashMap::new(),
            snapshots: HashMap::new(),
        }
    }

    /// 获取字段值（支持点号分隔的路径，如 "order.amount" 或 "items.0.name"）
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;

        for part in path.split('.') {
            match current {
                Value::Object(map) => {
                    current = map.get(part)?;
                }
                Value::Array(arr) => {
                    let index: usize = part.parse().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// 将字段渲染为模板文本：字符串不带引号，null 与缺失渲染为空串
    pub fn render_field(&self, path: &str) -> String {
        match self.get_field(path) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// 调用成功后写入返回值
    pub fn record_success(&mut self, ret: Value) {
        if let Value::Object(map) = &mut self.data {
            map.insert(RET_KEY.to_string(), ret);
        }
    }

    /// 调用失败后写入错误信息
    pub fn record_failure(&mut self, error_msg: &str) {
        if let Value::Object(map) = &mut self.data {
            map.insert(ERR_MSG_KEY.to_string(), Value::String(error_msg.to_string()));
        }
    }

    /// 合并业务代码在调用期间发布的变量（同名覆盖参数）
    pub fn merge_variables(&mut self, variables: CallVariables) {
        if let Value::Object(map) = &mut self.data {
            for (key, value) in variables.into_inner() {
                map.insert(key, value);
            }
        }
    }

    pub fn function_result(&self, call_text: &str) -> Option<&String> {
        self.function_results.get(call_text)
    }

    pub fn put_function_result(&mut self, call_text: String, result: String) {
        self.function_results.insert(call_text, result);
    }

    pub fn snapshot(&self, key: &str) -> Option<&Value> {
        self.snapshots.get(key)
    }

    pub fn put_snapshot(&mut self, key: String, value: Value) {
        self.snapshots.insert(key, value);
    }
}

/// 业务闭包在调用期间发布变量的通道
///
/// 对应原始实现中业务代码向日志上下文塞变量的能力，
/// 单参数 diff 依赖它拿到“调用后”的对象状态。
#[derive(Debug, Default)]
pub struct CallVariables {
    variables: Map<String, Value>,
}

impl CallVariables {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布一个变量；序列化失败时记日志并忽略，不影响业务执行
    pub fn put(&mut self, name: impl Into<String>, value: impl serde::Serialize) {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.variables.insert(name, v);
            }
            Err(e) => {
                warn!(variable = %name, error = %e, "调用变量序列化失败，已忽略");
            }
        }
    }

    fn into_inner(self) -> Map<String, Value> {
        self.variables
    }
}
