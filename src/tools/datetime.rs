//! DateProvider：提供当前日期与时间

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use serde_json::Value;

use crate::tools::schema::{CapabilityDescriptor, FieldSpec, ParamType};
use crate::tools::{CapabilityInput, CapabilityOutput, CapabilityProvider};

/// 无输入；输出 date (YYYY-MM-DD) 与 time (HH:MM:SS)
pub struct DateProvider {
    descriptor: CapabilityDescriptor,
    /// 固定时间（测试用）；None 时取本地时间
    fixed: Option<NaiveDateTime>,
}

impl DateProvider {
    pub fn new() -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(
                "DateProvider",
                "Provides the current local date and time.",
            )
            .output(FieldSpec::new("date", ParamType::String, "Today's date as YYYY-MM-DD"))
            .output(FieldSpec::new("time", ParamType::String, "The current time as HH:MM:SS")),
            fixed: None,
        }
    }

    pub fn at(moment: NaiveDateTime) -> Self {
        Self {
            fixed: Some(moment),
            ..Self::new()
        }
    }
}

impl Default for DateProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for DateProvider {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn run(&self, _input: CapabilityInput) -> Result<CapabilityOutput, String> {
        let now = self.fixed.unwrap_or_else(|| Local::now().naive_local());
        let mut out = CapabilityOutput::new();
        out.insert("date".into(), Value::String(now.format("%Y-%m-%d").to_string()));
        out.insert("time".into(), Value::String(now.format("%H:%M:%S").to_string()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_fixed_date() {
        let moment = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        let out = DateProvider::at(moment).run(CapabilityInput::new()).await.unwrap();
        assert_eq!(out["date"], "2024-01-01");
        assert_eq!(out["time"], "09:30:00");
    }

    #[test]
    fn test_takes_no_input() {
        let p = DateProvider::new();
        assert!(p.descriptor().input_schema.is_empty());
        assert!(p.validate_input(&CapabilityInput::new()).is_ok());
    }
}
