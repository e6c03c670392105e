//! 能力描述与 Schema
//!
//! CapabilityDescriptor 描述一个能力的名称、简介、输入/输出字段；
//! 可渲染为 prompt 中的能力清单，也可转为 OpenAI 风格的函数定义（原生 function calling）。
//! 指令格式的 JSON Schema 由 schemars 自动生成，拼入 action prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 指令中表示「任务完成」的保留 action 名
pub const COMPLETE_ACTION: &str = "complete";

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    List,
    Object,
}

impl ParamType {
    /// 对应的 JSON Schema type
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::List => "array",
            ParamType::Object => "object",
        }
    }
}

/// 输入参数：默认必填，显式 optional 的除外
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    pub fn required(
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        kind: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// 输出字段
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
        }
    }
}

/// 能力描述（会话内不可变）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    /// 简介，建议 50 词以内，仅用于拼 prompt
    pub description: String,
    pub input_schema: Vec<ParamSpec>,
    pub output_schema: Vec<FieldSpec>,
}

impl CapabilityDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Vec::new(),
            output_schema: Vec::new(),
        }
    }

    pub fn input(mut self, param: ParamSpec) -> Self {
        self.input_schema.push(param);
        self
    }

    pub fn output(mut self, field: FieldSpec) -> Self {
        self.output_schema.push(field);
        self
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.input_schema.iter().filter(|p| p.required)
    }

    /// 转为函数定义：parameters 为 JSON Schema object
    pub fn to_function_schema(&self) -> FunctionSchema {
        let mut properties = Map::new();
        for p in &self.input_schema {
            properties.insert(
                p.name.clone(),
                json!({"type": p.kind.json_type(), "description": p.description}),
            );
        }
        let required: Vec<&str> = self.required_inputs().map(|p| p.name.as_str()).collect();
        FunctionSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// OpenAI 风格的函数定义
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 「任务完成」伪函数：原生 function calling 时模型通过它交付最终结果
pub fn complete_function_schema() -> FunctionSchema {
    FunctionSchema {
        name: COMPLETE_ACTION.to_string(),
        description: "Finish the objective and hand the final result to the user.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "output": {"type": "string", "description": "The final result for the user"}
            },
            "required": ["output"],
        }),
    }
}

/// 每个能力一行 JSON，拼入 prompt 的能力清单
pub fn render_descriptors(descriptors: &[CapabilityDescriptor]) -> String {
    descriptors
        .iter()
        .map(|d| serde_json::to_string(d).unwrap_or_else(|_| d.name.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 指令格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DirectiveFormat {
    /// 能力名（区分大小写），或 "complete" 表示任务完成
    pub action: String,
    /// 能力输入：字段名 -> 值；action 为能力名时必填
    pub input: Option<HashMap<String, Value>>,
    /// 最终结果；action 为 "complete" 时必填
    pub output: Option<String>,
}

/// 返回指令的 JSON Schema 字符串，可拼入 prompt
pub fn directive_schema_json() -> String {
    let schema = schema_for!(DirectiveFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
