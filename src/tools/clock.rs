//! Current-time tool with timezone support.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::traits::Tool;

const DEFAULT_TIMEZONE: &str = "Asia/Taipei";

pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current time in a specific timezone"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone name, e.g. Asia/Taipei"
                }
            }
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let timezone = args
            .get("timezone")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_TIMEZONE);
        let tz: Tz = timezone
            .parse()
            .map_err(|_| anyhow!("unknown timezone: {timezone}"))?;
        Ok(Utc::now()
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string())
    }
}
