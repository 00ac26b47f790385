//! Output formatting for CLI

use bulwark_core::simulation::TimedEvent;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Table | OutputFormat::Text => {
            format!("{}", serde_json::to_value(data).unwrap_or_default())
        }
    }
}

/// One session notice as a table row
#[derive(Tabled)]
pub struct EventRow {
    #[tabled(rename = "t (ms)")]
    pub at_ms: u64,
    pub event: String,
    pub detail: String,
}

impl From<&TimedEvent> for EventRow {
    fn from(timed: &TimedEvent) -> Self {
        let mut value = serde_json::to_value(&timed.event).unwrap_or_default();
        let event = value
            .get("event")
            .and_then(|name| name.as_str())
            .unwrap_or("unknown")
            .to_string();
        if let Some(fields) = value.as_object_mut() {
            fields.remove("event");
        }
        let detail = match &value {
            serde_json::Value::Object(fields) if fields.is_empty() => String::new(),
            other => other.to_string(),
        };

        Self {
            at_ms: timed.at_ms,
            event,
            detail,
        }
    }
}

pub fn table(rows: Vec<EventRow>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}
