//! Built-in tools registered at startup.

use std::fmt::Write;

use chrono::Utc;
use serde_json::{Value, json};

use parley_core::tools::Tool;
use parley_types::tool::{ToolError, ToolSpec};

/// Reports the current UTC time, optionally rendered with a strftime `format`.
pub struct CurrentTimeTool;

impl Tool for CurrentTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "current_time".to_string(),
            description: "Returns the current date and time in UTC.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": {
                    "format": {
                        "type": "string",
                        "description": "Optional strftime format, e.g. \"%Y-%m-%d %H:%M\"",
                    }
                },
            }),
        }
    }

    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let now = Utc::now();
        let mut out = json!({
            "utc": now.to_rfc3339(),
            "unix": now.timestamp(),
        });

        if let Some(format) = args.get("format").and_then(Value::as_str) {
            // Writing surfaces bad specifiers as fmt::Error instead of panicking.
            let mut formatted = String::new();
            write!(formatted, "{}", now.format(format)).map_err(|_| {
                ToolError::InvalidArguments(format!("invalid strftime format: {format}"))
            })?;
            out["formatted"] = Value::String(formatted);
        }
        Ok(out)
    }
}
