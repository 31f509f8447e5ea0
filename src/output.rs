//! Rendering of query outcomes and listings for the terminal.

use crate::db::{QueryResult, TableEntry};
use crate::query::QueryOutcome;
use serde_json::{json, Value as JsonValue};

/// Formats a table as a string for display.
pub fn format_table(headers: &[String], rows: &[Vec<String>]) -> String {
    if headers.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let mut output = String::new();

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| pad(h, widths[i]))
        .collect();
    output.push_str(&header_line.join(" │ "));
    output.push('\n');

    let separator: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    output.push_str(&separator.join("─┼─"));
    output.push('\n');

    for row in rows {
        let row_line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| pad(cell, widths.get(i).copied().unwrap_or(0)))
            .collect();
        output.push_str(&row_line.join(" │ "));
        output.push('\n');
    }

    output.trim_end().to_string()
}

fn pad(cell: &str, width: usize) -> String {
    let len = cell.chars().count();
    let mut padded = cell.to_string();
    padded.extend(std::iter::repeat(' ').take(width.saturating_sub(len)));
    padded
}

/// Renders an outcome as the result grid (if any) followed by the status line.
pub fn render_text(outcome: &QueryOutcome) -> String {
    let status = outcome.status_line();
    match outcome.result() {
        Some(result) if result.kind.returns_rows() => {
            let headers: Vec<String> = result.column_names().into_iter().map(String::from).collect();
            let table = format_table(&headers, &result.text_rows());
            if table.is_empty() {
                status
            } else {
                format!("{table}\n\n{status}")
            }
        }
        _ => status,
    }
}

/// Renders an outcome as a JSON document.
pub fn render_json(outcome: &QueryOutcome) -> JsonValue {
    match outcome {
        QueryOutcome::Succeeded(result) => json!({
            "status": "succeeded",
            "message": outcome.status_line(),
            "result": result_json(result),
        }),
        QueryOutcome::Failed(message) => json!({
            "status": "failed",
            "message": message,
        }),
        QueryOutcome::Cancelled => json!({
            "status": "cancelled",
            "message": outcome.status_line(),
        }),
        QueryOutcome::TimedOut(after) => json!({
            "status": "timed_out",
            "message": outcome.status_line(),
            "timeout_ms": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn result_json(result: &QueryResult) -> JsonValue {
    let columns: Vec<JsonValue> = result
        .columns
        .iter()
        .map(|c| json!({ "name": c.name, "type": c.data_type }))
        .collect();
    json!({
        "columns": columns,
        "rows": result.text_rows(),
        "row_count": result.row_count,
        "elapsed_ms": u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
    })
}

/// Formats a table listing as `name  kind` lines.
pub fn format_tables(tables: &[TableEntry]) -> String {
    let headers = vec!["Name".to_string(), "Kind".to_string()];
    let rows: Vec<Vec<String>> = tables
        .iter()
        .map(|t| vec![t.to_string(), t.kind.to_string()])
        .collect();
    format_table(&headers, &rows)
}
