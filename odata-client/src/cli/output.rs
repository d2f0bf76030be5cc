//! Output formatting shared by the commands

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use serde_json::Value;

use odata_client::api::{BatchResponse, OperationResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    JsonCompact,
    Csv,
}

pub fn format_output(data: &Value, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(data).context("Failed to format JSON output"),
        OutputFormat::JsonCompact => serde_json::to_string(data).context("Failed to format JSON output"),
        OutputFormat::Csv => Ok(json_to_csv(data)),
    }
}

/// Convert JSON data to CSV; columns come from the first record
fn json_to_csv(data: &Value) -> String {
    match data {
        Value::Array(arr) => {
            let Some(Value::Object(first_obj)) = arr.first() else {
                return "No data\n".to_string();
            };
            let headers: Vec<&String> = first_obj.keys().collect();
            let mut csv = headers.iter().map(|h| csv_escape(h)).collect::<Vec<_>>().join(",");
            csv.push('\n');

            for item in arr {
                if let Value::Object(obj) = item {
                    let row: Vec<String> = headers
                        .iter()
                        .map(|h| csv_escape(&json_value_to_string(obj.get(*h).unwrap_or(&Value::Null))))
                        .collect();
                    csv.push_str(&row.join(","));
                    csv.push('\n');
                }
            }
            csv
        }
        Value::Object(obj) => {
            let mut csv = String::from("key,value\n");
            for (key, value) in obj {
                csv.push_str(&format!("{},{}\n", csv_escape(key), csv_escape(&json_value_to_string(value))));
            }
            csv
        }
        _ => format!("value\n{}\n", csv_escape(&json_value_to_string(data))),
    }
}

fn json_value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// One line per operation result
pub fn print_batch_response(response: &BatchResponse, show_bodies: bool) {
    for result in &response.results {
        print_operation_result(result, show_bodies);
    }
    println!();

    let failed = response.failed_results().len();
    let summary = format!("{} operations, {} failed", response.len(), failed);
    if failed == 0 {
        println!("{}", summary.bright_green());
    } else {
        println!("{}", summary.bright_red());
    }
}

fn print_operation_result(result: &OperationResult, show_bodies: bool) {
    let (symbol, status) = if result.success {
        ("✓".bright_green(), result.status_code.to_string().green())
    } else {
        ("✗".bright_red(), result.status_code.to_string().red())
    };
    println!("{} {} {}", symbol, result.operation_id.bold(), status);

    if let Some(conflict) = &result.conflict {
        println!(
            "    {} expected {}, server has {}",
            "ETag conflict:".yellow(),
            conflict.expected_etag.as_deref().unwrap_or("none"),
            conflict.current_etag.as_deref().unwrap_or("unknown")
        );
    } else if let Some(error) = &result.error {
        println!("    {}", error.dimmed());
    } else if show_bodies && !result.body.is_empty() {
        println!("    {}", result.body.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_from_records() {
        let csv = json_to_csv(&json!([
            {"Id": 1, "Name": "Pen, blue"},
            {"Id": 2, "Name": null}
        ]));
        assert_eq!(csv, "Id,Name\n1,\"Pen, blue\"\n2,null\n");
    }

    #[test]
    fn test_csv_edge_cases() {
        assert_eq!(json_to_csv(&json!([])), "No data\n");
        assert_eq!(json_to_csv(&json!({"a": "x\"y"})), "key,value\na,\"x\"\"y\"\n");
        assert_eq!(json_to_csv(&json!(3)), "value\n3\n");
    }
}
