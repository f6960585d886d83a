//! Output formatting module
//!
//! Provides table and JSON output formatting for CLI commands.

use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

use ratewatch_core::{PollMode, PollingStatus, SessionWindow, UsageSnapshot};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Print data in the specified format
pub fn print_output<T>(data: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("No items found.");
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

// ============================================================================
// Snapshot rendering
// ============================================================================

/// One line of the snapshot table
#[derive(Debug, Serialize, Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl MetricRow {
    fn new(metric: &str, value: impl Into<String>) -> Self {
        Self {
            metric: metric.to_string(),
            value: value.into(),
        }
    }
}

/// Rows describing a snapshot
pub fn snapshot_rows(snapshot: &UsageSnapshot) -> Vec<MetricRow> {
    let mut rows = Vec::new();
    match snapshot.origin {
        PollMode::RemoteApi => {
            rows.push(MetricRow::new(
                "Requests",
                quota_cell(snapshot.requests_remaining, snapshot.requests_limit),
            ));
            rows.push(MetricRow::new(
                "Requests reset",
                snapshot.requests_reset.clone().unwrap_or_else(|| "-".to_string()),
            ));
            rows.push(MetricRow::new(
                "Tokens",
                quota_cell(snapshot.tokens_remaining, snapshot.tokens_limit),
            ));
            rows.push(MetricRow::new(
                "Tokens reset",
                snapshot.tokens_reset.clone().unwrap_or_else(|| "-".to_string()),
            ));
            if let Some(cost) = snapshot.request_tokens_cost {
                rows.push(MetricRow::new("Probe cost", format!("{} tokens", cost)));
            }
        }
        PollMode::LocalSession => {
            if let Some(window) = &snapshot.primary {
                rows.push(MetricRow::new("Session window", window_cell(window)));
            }
            if let Some(window) = &snapshot.secondary {
                rows.push(MetricRow::new("Weekly window", window_cell(window)));
            }
        }
    }
    rows.push(MetricRow::new("Fetched", local_time(snapshot.fetched_at)));
    rows
}

/// Rows describing the full engine status
pub fn status_rows(status: &PollingStatus) -> Vec<MetricRow> {
    let mut rows = vec![MetricRow::new("Mode", status.mode.to_string())];
    if let Some(email) = &status.account_email {
        rows.push(MetricRow::new("Account", email.clone()));
    }
    if let Some(snapshot) = &status.snapshot {
        rows.extend(snapshot_rows(snapshot));
    }
    if let Some(burn) = status.hourly_burn_percent {
        rows.push(MetricRow::new(
            "Hourly burn",
            format!("{:.2}%/h {}", burn, status.burn_trend.symbol()),
        ));
    }
    rows.push(MetricRow::new("Status", status.status_text.clone()));
    if let Some(error) = &status.error_text {
        rows.push(MetricRow::new("Error", error.red().to_string()));
    }
    rows
}

/// One-line summary used by `watch`
pub fn status_line(status: &PollingStatus) -> String {
    let usage = status
        .snapshot
        .as_ref()
        .and_then(|s| s.usage_percent())
        .map(percent_cell)
        .unwrap_or_else(|| "--".to_string());

    let mut line = format!("[{}] {} used", status.mode, usage);
    if let Some(burn) = status.hourly_burn_percent {
        line.push_str(&format!(", burn {:.2}%/h {}", burn, status.burn_trend.symbol()));
    }
    line.push_str(&format!(" | {}", status.status_text));
    if let Some(error) = &status.error_text {
        line.push_str(&format!(" | {}", error.red()));
    }
    line
}

fn quota_cell(remaining: Option<u64>, limit: Option<u64>) -> String {
    match (remaining, limit) {
        (Some(remaining), Some(limit)) if limit > 0 => {
            let used = (limit.saturating_sub(remaining)) as f64 / limit as f64 * 100.0;
            format!("{} / {} left ({})", remaining, limit, percent_cell(used))
        }
        (Some(remaining), _) => format!("{} left", remaining),
        _ => "-".to_string(),
    }
}

fn window_cell(window: &SessionWindow) -> String {
    let mut cell = window
        .used_percent
        .map(percent_cell)
        .unwrap_or_else(|| "-".to_string());
    if let Some(minutes) = window.window_minutes {
        cell.push_str(&format!(" of {}", window_length(minutes)));
    }
    if let Some(resets_at) = window.resets_at {
        cell.push_str(&format!(", resets {}", local_time(resets_at)));
    }
    cell
}

/// Window length in the largest whole unit, e.g. "5h" or "7d"
pub fn window_length(minutes: u64) -> String {
    if minutes >= 1440 && minutes % 1440 == 0 {
        format!("{}d", minutes / 1440)
    } else if minutes >= 60 && minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}

/// Percentage colored by level
fn percent_cell(percent: f64) -> String {
    let text = format!("{:.1}%", percent);
    if percent >= 90.0 {
        text.red().to_string()
    } else if percent >= 70.0 {
        text.yellow().to_string()
    } else {
        text.green().to_string()
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_window_length() {
        assert_eq!(window_length(300), "5h");
        assert_eq!(window_length(10080), "7d");
        assert_eq!(window_length(45), "45m");
        assert_eq!(window_length(90), "90m");
    }

    #[test]
    fn test_remote_snapshot_rows() {
        colored::control::set_override(false);
        let snapshot = UsageSnapshot {
            requests_limit: Some(200),
            requests_remaining: Some(150),
            tokens_limit: Some(1000),
            tokens_remaining: Some(100),
            tokens_reset: Some("6m0s".to_string()),
            request_tokens_cost: Some(24),
            ..UsageSnapshot::remote()
        };

        let rows = snapshot_rows(&snapshot);
        assert_eq!(rows[0].value, "150 / 200 left (25.0%)");
        assert_eq!(rows[1].value, "-");
        assert_eq!(rows[2].value, "100 / 1000 left (90.0%)");
        assert_eq!(rows[3].value, "6m0s");
        assert_eq!(rows[4].value, "24 tokens");
    }

    #[test]
    fn test_local_snapshot_rows() {
        colored::control::set_override(false);
        let snapshot = UsageSnapshot::local(
            Some(SessionWindow {
                used_percent: Some(42.0),
                window_minutes: Some(300),
                resets_at: None,
            }),
            None,
        );

        let rows = snapshot_rows(&snapshot);
        assert_eq!(rows[0].metric, "Session window");
        assert_eq!(rows[0].value, "42.0% of 5h");
        assert_eq!(rows[1].metric, "Fetched");
    }
}
