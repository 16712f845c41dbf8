//! Terminal/JSON rendering for CLI subcommands, grounded on the
//! `comfy-table`-based formatter used for RipTide's CLI output: array of
//! objects renders as a table, a bare object renders as a two-column
//! key/value table, anything else is pretty-printed JSON.

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn render<T: Serialize>(format: OutputFormat, data: &T) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
        }
        OutputFormat::Table => {
            let value = serde_json::to_value(data).unwrap_or(Value::Null);
            render_table(&value)
        }
    }
}

fn render_table(value: &Value) -> String {
    match value {
        Value::Array(items) => render_array(items),
        Value::Object(fields) => render_object(fields),
        other => other.to_string(),
    }
}

fn render_array(items: &[Value]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    if let Some(Value::Object(first)) = items.first() {
        let headers: Vec<String> = first.keys().cloned().collect();
        table.set_header(&headers);
        for item in items {
            if let Value::Object(obj) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| scalar_to_string(obj.get(h)))
                    .collect();
                table.add_row(row);
            }
        }
    } else {
        table.set_header(vec!["value"]);
        for item in items {
            table.add_row(vec![scalar_to_string(Some(item))]);
        }
    }

    table.to_string()
}

fn render_object(fields: &serde_json::Map<String, Value>) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["field", "value"]);
    for (key, value) in fields {
        table.add_row(vec![key.clone(), scalar_to_string(Some(value))]);
    }
    table.to_string()
}

fn scalar_to_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other @ (Value::Object(_) | Value::Array(_))) => {
            serde_json::to_string(other).unwrap_or_default()
        }
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_array_of_objects_as_table() {
        let rendered = render(OutputFormat::Table, &json!([{"id": "u-1", "status": "active"}]));
        assert!(rendered.contains("id"));
        assert!(rendered.contains("u-1"));
    }

    #[test]
    fn renders_empty_array_as_none() {
        let rendered = render(OutputFormat::Table, &Vec::<Value>::new());
        assert_eq!(rendered, "(none)");
    }

    #[test]
    fn json_format_round_trips() {
        let rendered = render(OutputFormat::Json, &json!({"a": 1}));
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed, json!({"a": 1}));
    }
}
