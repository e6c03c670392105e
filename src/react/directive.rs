//! 指令解析：把补全结果转成 ActionDirective
//!
//! 原生 function call 优先；否则从文本中提取 JSON（```json 块、``` 块，或从每个 '{' 起尝试解析，
//! 取第一个带 action 的对象）。
//! 任何格式问题都返回 DirectiveParse，由主循环作为下一轮的 Observation。

use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::llm::Completion;
use crate::tools::{CapabilityInput, COMPLETE_ACTION};

/// 模型给出的下一步动作
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDirective {
    /// 调用某个能力
    Invoke { action: String, input: CapabilityInput },
    /// 任务完成，output 为给用户的最终结果
    Complete { output: String },
}

impl ActionDirective {
    pub fn action(&self) -> &str {
        match self {
            ActionDirective::Invoke { action, .. } => action,
            ActionDirective::Complete { .. } => COMPLETE_ACTION,
        }
    }
}

/// 解析一次补全结果
pub fn parse_completion(completion: &Completion) -> Result<ActionDirective, AgentError> {
    match completion {
        Completion::FunctionCall {
            name,
            arguments_json,
        } => parse_function_call(name, arguments_json),
        Completion::Text(text) => parse_text(text),
    }
}

fn parse_function_call(name: &str, arguments_json: &str) -> Result<ActionDirective, AgentError> {
    let args = if arguments_json.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(arguments_json) {
            Ok(Value::Object(m)) => m,
            Ok(other) => {
                return Err(AgentError::DirectiveParse(format!(
                    "function arguments for '{}' must be a JSON object, got {}",
                    name, other
                )))
            }
            Err(e) => {
                return Err(AgentError::DirectiveParse(format!(
                    "{}: {}",
                    e, arguments_json
                )))
            }
        }
    };
    if name == COMPLETE_ACTION {
        let output = args.get("output").ok_or_else(|| {
            AgentError::DirectiveParse("'complete' call is missing \"output\"".to_string())
        })?;
        return Ok(ActionDirective::Complete {
            output: output_text(output),
        });
    }
    Ok(ActionDirective::Invoke {
        action: name.to_string(),
        input: args,
    })
}

/// 从文本中取出 JSON 片段
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let block = rest[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }
    if let Some(obj) = first_directive_object(trimmed) {
        return Some(obj);
    }
    // 都解析失败时仍返回大括号区间，让错误信息带上原始片段
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 依次从每个 '{' 起流式解析，优先返回含 action 的对象，其次返回第一个对象
fn first_directive_object(text: &str) -> Option<&str> {
    let mut first_object = None;
    for (i, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(m))) = stream.next() {
            let slice = &text[i..i + stream.byte_offset()];
            if m.contains_key("action") {
                return Some(slice);
            }
            first_object.get_or_insert(slice);
        }
    }
    first_object
}

fn parse_text(text: &str) -> Result<ActionDirective, AgentError> {
    let json_str = extract_json(text).ok_or_else(|| {
        AgentError::DirectiveParse(format!("no JSON object found in reply: {}", text.trim()))
    })?;
    let mut obj = match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Object(m)) => m,
        Ok(_) => {
            return Err(AgentError::DirectiveParse(format!(
                "directive must be a JSON object: {}",
                json_str
            )))
        }
        Err(e) => return Err(AgentError::DirectiveParse(format!("{}: {}", e, json_str))),
    };

    let action = match obj.get("action") {
        Some(Value::String(a)) if !a.trim().is_empty() => a.trim().to_string(),
        _ => {
            return Err(AgentError::DirectiveParse(format!(
                "missing \"action\" in {}",
                json_str
            )))
        }
    };

    if action == COMPLETE_ACTION {
        return match obj.get("output") {
            Some(v) if !v.is_null() => Ok(ActionDirective::Complete {
                output: output_text(v),
            }),
            _ => Err(AgentError::DirectiveParse(format!(
                "missing \"output\" for complete in {}",
                json_str
            ))),
        };
    }

    match obj.remove("input") {
        Some(Value::Object(input)) => Ok(ActionDirective::Invoke { action, input }),
        Some(Value::Null) | None => Err(AgentError::DirectiveParse(format!(
            "missing \"input\" for action '{}' in {}",
            action, json_str
        ))),
        Some(other) => Err(AgentError::DirectiveParse(format!(
            "\"input\" for action '{}' must be a JSON object, got {}",
            action, other
        ))),
    }
}

/// 字符串原样返回，其他 JSON 值取其文本形式
fn output_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
