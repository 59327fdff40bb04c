//! 模板求值器
//!
//! 解析表达式模板：`#{路径}` 变量引用替换为上下文中的值，`#函数名{参数}`
//! 经函数注册表分发执行，结果按完整调用文本缓存在上下文中（重复求值幂等）。
//! 完全替换后的文本若是 `左值 操作符 右值` 形式的简单比较，折叠为 "true"/"false"。

use crate::context::EvaluationContext;
use crate::error::Result;
use crate::functions::{FunctionPhase, FunctionRegistry};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// 模板中的一次函数调用
#[derive(Debug, Clone, PartialEq)]
struct FunctionCall {
    /// 在模板中的字节区间 [start, end)
    start: usize,
    end: usize,
    name: String,
    args_raw: String,
    /// 完整调用文本，如 `#diff{#{old}, #{new}}`
    raw: String,
}

/// 模板求值器
pub struct TemplateEvaluator {
    functions: Arc<FunctionRegistry>,
    var_regex: Regex,
    compare_regex: Regex,
}

impl TemplateEvaluator {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            functions,
            var_regex: Regex::new(r"#\{([^}]+)\}").unwrap(),
            compare_regex: Regex::new(
                r"^('[^']*'|[^\s<>=!]+)\s*(==|!=|>=|<=|>|<)\s*('[^']*'|[^\s<>=!]+)$",
            )
            .unwrap(),
        }
    }

    /// 批量求值，返回 模板 -> 解析结果 的映射（重复模板只求值一次）
    pub fn process(
        &self,
        templates: &[String],
        ctx: &mut EvaluationContext,
    ) -> Result<HashMap<String, String>> {
        let mut values = HashMap::new();
        for template in templates {
            if values.contains_key(template) {
                continue;
            }
            let resolved = self.process_one(template, ctx)?;
            values.insert(template.clone(), resolved);
        }
        Ok(values)
    }

    /// 求值单个模板
    pub fn process_one(&self, template: &str, ctx: &mut EvaluationContext) -> Result<String> {
        if template.is_empty() {
            return Ok(String::new());
        }
        let resolved = self.apply_template(template, ctx)?;
        Ok(self.fold_boolean(&resolved))
    }

    /// 执行前阶段：只跑声明了 execute_before 的函数并缓存结果
    ///
    /// 这里的失败不会影响业务调用，记日志后忽略；没有缓存结果的调用
    /// 在执行后阶段会重新求值或回退为模板原文。
    pub fn process_before_functions(&self, templates: &[String], ctx: &mut EvaluationContext) {
        for template in templates {
            for call in find_calls(template) {
                let Some(function) = self.functions.get(&call.name) else {
                    continue;
                };
                if !function.execute_before() || ctx.function_result(&call.raw).is_some() {
                    continue;
                }

                let args = self.resolve_args(&call.args_raw, ctx);
                match function.apply(FunctionPhase::Before, &call.raw, &args, ctx) {
                    Ok(Some(result)) => ctx.put_function_result(call.raw.clone(), result),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(call = %call.raw, error = %e, "执行前函数求值失败，已忽略");
                    }
                }
            }
        }
    }

    /// 单遍替换：函数调用缓存命中直接替换，否则执行后缓存，未注册或
    /// 本阶段无结果的调用保留原文；调用之外的普通文本做变量替换。
    /// 保留原文的调用内部不再做变量替换，模板可以原样存活。
    fn apply_template(&self, template: &str, ctx: &mut EvaluationContext) -> Result<String> {
        let calls = find_calls(template);
        if calls.is_empty() {
            return Ok(self.substitute_vars(template, ctx));
        }

        let mut out = String::new();
        let mut last = 0;
        for call in calls {
            out.push_str(&self.substitute_vars(&template[last..call.start], ctx));
            last = call.end;

            if let Some(cached) = ctx.function_result(&call.raw) {
                out.push_str(&cached.clone());
                continue;
            }
            let Some(function) = self.functions.get(&call.name) else {
                out.push_str(&call.raw);
                continue;
            };

            let args = self.resolve_args(&call.args_raw, ctx);
            match function.apply(FunctionPhase::After, &call.raw, &args, ctx)? {
                Some(result) => {
                    ctx.put_function_result(call.raw.clone(), result.clone());
                    out.push_str(&result);
                }
                // 本阶段无结果，保留原文
                None => out.push_str(&call.raw),
            }
        }
        out.push_str(&self.substitute_vars(&template[last..], ctx));
        Ok(out)
    }

    /// 解析函数参数：纯变量引用按原始类型传值，混合文本先替换变量再作为字符串
    ///
    /// 只在顶层逗号处分割，花括号内和单引号内的逗号属于参数本身。
    fn resolve_args(&self, args_raw: &str, ctx: &EvaluationContext) -> Vec<Value> {
        if args_raw.trim().is_empty() {
            return Vec::new();
        }

        split_args(args_raw)
            .into_iter()
            .map(|piece| {
                let piece = piece.trim();
                if let Some(caps) = self.var_regex.captures(piece)
                    && caps.get(0).map(|m| m.as_str()) == Some(piece)
                {
                    return ctx.get_field(&caps[1]).cloned().unwrap_or(Value::Null);
                }
                Value::String(self.substitute_vars(piece, ctx))
            })
            .collect()
    }

    fn substitute_vars(&self, text: &str, ctx: &EvaluationContext) -> String {
        self.var_regex
            .replace_all(text, |caps: &regex::Captures| ctx.render_field(&caps[1]))
            .into_owned()
    }

    /// 简单比较表达式折叠为 "true"/"false"；不满足形式则原样返回
    fn fold_boolean(&self, text: &str) -> String {
        let trimmed = text.trim();
        if let Some(caps) = self.compare_regex.captures(trimmed) {
            let lhs = parse_operand(&caps[1]);
            let rhs = parse_operand(&caps[3]);
            if let Some(result) = compare(&lhs, &caps[2], &rhs) {
                return result.to_string();
            }
        }
        text.to_string()
    }
}

/// 按顶层逗号分割参数列表（花括号按深度计数，单引号内原样保留）
fn split_args(args_raw: &str) -> Vec<&str> {
    let bytes = args_raw.as_bytes();
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\'' => in_quote = !in_quote,
            b'{' if !in_quote => depth += 1,
            b'}' if !in_quote => depth = depth.saturating_sub(1),
            b',' if !in_quote && depth == 0 => {
                pieces.push(&args_raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&args_raw[start..]);
    pieces
}

/// 扫描模板中的函数调用（`#名{...}`；`#{...}` 是变量引用，跳过）
fn find_calls(template: &str) -> Vec<FunctionCall> {
    let bytes = template.as_bytes();
    let mut calls = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'#' {
            i += 1;
            continue;
        }

        // 读函数名
        let name_start = i + 1;
        let mut j = name_start;
        while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
            j += 1;
        }
        if j == name_start || j >= bytes.len() || bytes[j] != b'{' {
            i += 1;
            continue;
        }

        // 找到配对的右花括号（参数里的 #{...} 也会正确计数）
        let mut depth = 1usize;
        let mut k = j + 1;
        while k < bytes.len() && depth > 0 {
            match bytes[k] {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
            k += 1;
        }
        if depth != 0 {
            // 花括号不配对，当作普通文本
            i += 1;
            continue;
        }

        calls.push(FunctionCall {
            start: i,
            end: k,
            name: template[name_start..j].to_string(),
            args_raw: template[j + 1..k - 1].to_string(),
            raw: template[i..k].to_string(),
        });
        i = k;
    }

    calls
}

fn parse_operand(token: &str) -> Value {
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Value::String(token[1..token.len() - 1].to_string());
    }
    serde_json::from_str(token).unwrap_or_else(|_| Value::String(token.to_string()))
}

fn compare(lhs: &Value, op: &str, rhs: &Value) -> Option<bool> {
    match op {
        "==" => Some(values_equal(lhs, rhs)),
        "!=" => Some(!values_equal(lhs, rhs)),
        _ => {
            let (a, b) = (as_f64(lhs)?, as_f64(rhs)?);
            match op {
                ">" => Some(a > b),
                ">=" => Some(a >= b),
                "<" => Some(a < b),
                "<=" => Some(a <= b),
                _ => None,
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return (x - y).abs() < f64::EPSILON;
    }
    a == b
}

/// 数值或数值字符串统一转浮点
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
