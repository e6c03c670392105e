//! Echo 能力（测试与诊断用）

use async_trait::async_trait;

use crate::tools::schema::{CapabilityDescriptor, FieldSpec, ParamSpec, ParamType};
use crate::tools::{CapabilityInput, CapabilityOutput, CapabilityProvider};

/// Echo：原样返回 text
pub struct EchoProvider {
    descriptor: CapabilityDescriptor,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new("Echo", "Returns the given text unchanged.")
                .input(ParamSpec::required("text", ParamType::String, "The text to echo"))
                .output(FieldSpec::new("text", ParamType::String, "The same text")),
        }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for EchoProvider {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: CapabilityInput) -> Result<CapabilityOutput, String> {
        let text = input
            .get("text")
            .cloned()
            .ok_or_else(|| "missing text".to_string())?;
        let mut out = CapabilityOutput::new();
        out.insert("text".to_string(), text);
        Ok(out)
    }
}
