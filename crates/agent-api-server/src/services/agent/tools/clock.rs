use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use super::Tool;

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Gets the current date and time. Use this when you need to know what time it is now."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _input: Value) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn test_returns_utc_millis() {
        let out = ClockTool.invoke(json!({})).await;
        assert!(out.ends_with('Z'));
        // 2024-01-01T00:00:00.000Z
        assert_eq!(out.len(), 24);
        assert!(DateTime::parse_from_rfc3339(&out).is_ok());
    }
}
