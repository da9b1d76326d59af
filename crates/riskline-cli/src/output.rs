//! Output formatting utilities.

use colored::Colorize;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use riskline_traits::batch::{BatchStatus, JobStatus};
use riskline_traits::{Availability, UnavailableReason};

use crate::cli::OutputFormat;

/// Formats and prints rows based on the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => print_table(data),
        OutputFormat::Json => print_json(data),
    }
}

/// Prints a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Prints data as a formatted table.
fn print_table<T: Tabled>(data: &[T]) -> anyhow::Result<()> {
    if data.is_empty() {
        println!("No results.");
        return Ok(());
    }
    println!("{}", render_table(data));
    Ok(())
}

/// Renders rows with the house style.
pub fn render_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string()
}

/// Prints an unavailable read in table mode.
pub fn print_unavailable(reason: UnavailableReason, detail: Option<&str>) {
    match detail {
        Some(detail) => print_warning(&format!("Not available: {} ({})", reason, detail)),
        None => print_warning(&format!("Not available: {}", reason)),
    }
}

/// Prints an availability-wrapped payload.
///
/// JSON output is the wire form with the `available` flag. Table output
/// hands the payload to `render`, or prints the reason.
pub fn print_availability<T: Serialize>(
    value: &Availability<T>,
    format: OutputFormat,
    render: impl FnOnce(&T) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    match (format, value) {
        (OutputFormat::Json, _) => print_json(value),
        (OutputFormat::Table, Availability::Available(data)) => render(data),
        (OutputFormat::Table, Availability::Unavailable { reason, detail }) => {
            print_unavailable(*reason, detail.as_deref());
            Ok(())
        }
    }
}

/// Formats a money amount with two decimals.
pub fn format_amount(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Formats a correlation or beta.
pub fn format_coefficient(value: f64) -> String {
    format!("{:.4}", value)
}

/// Batch status with a colour for the terminal.
pub fn colored_batch_status(status: BatchStatus) -> String {
    let label = status.to_string();
    match status {
        BatchStatus::Completed => label.green().to_string(),
        BatchStatus::CompletedWithFailures | BatchStatus::Cancelled => label.yellow().to_string(),
        BatchStatus::Failed => label.red().to_string(),
        BatchStatus::Running => label.cyan().to_string(),
    }
}

/// Job status with a colour for the terminal.
pub fn colored_job_status(status: JobStatus) -> String {
    let label = status.to_string();
    if status.is_failure() {
        label.red().to_string()
    } else if status == JobStatus::Success {
        label.green().to_string()
    } else {
        label.dimmed().to_string()
    }
}

/// Prints a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Prints an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Prints a warning message.
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message);
}

/// Prints an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

/// A key-value pair for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct KeyValue {
    #[tabled(rename = "Metric")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a key-value pair from a money amount.
    pub fn from_amount(key: impl Into<String>, value: Decimal) -> Self {
        Self::new(key, format_amount(value))
    }
}

/// Prints a header for a section.
pub fn print_header(title: &str) {
    println!("\n{}", title.bold().underline());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatters() {
        assert_eq!(format_amount(Decimal::new(123456, 3)), "123.46");
        assert_eq!(format_coefficient(-0.123456), "-0.1235");
    }

    #[test]
    fn test_render_table_contains_rows() {
        let rows = vec![
            KeyValue::new("Net Exposure", "1000.00"),
            KeyValue::from_amount("Gross Exposure", Decimal::new(25, 1)),
        ];
        let rendered = render_table(&rows);
        assert!(rendered.contains("Metric"));
        assert!(rendered.contains("Net Exposure"));
        assert!(rendered.contains("2.50"));
    }
}
