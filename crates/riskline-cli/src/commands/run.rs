//! Run command implementation.
//!
//! Runs the daily batch in the foreground. Ctrl-C requests cancellation;
//! the portfolio in progress finishes before the run stops.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tracing::warn;

use riskline_engine::{BatchRequest, BatchService, BatchSummary, EngineError};

use crate::cli::OutputFormat;
use crate::commands::{parse_date_or_today, portfolio_ids, Context};
use crate::output::{
    colored_batch_status, print_header, print_info, print_json, print_output, print_success,
    print_warning, KeyValue,
};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Calculation date (YYYY-MM-DD). Defaults to today.
    pub date: Option<String>,

    /// Restrict the run to these portfolios (repeatable)
    #[arg(short, long)]
    pub portfolio: Vec<String>,

    /// Run even if a completed run already covers the date
    #[arg(long)]
    pub force: bool,
}

/// A failed job row.
#[derive(Debug, Serialize, Tabled)]
struct FailureRow {
    #[tabled(rename = "Portfolio")]
    portfolio: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Execute the run command.
pub async fn execute(args: RunArgs, ctx: &Context) -> Result<()> {
    let date = parse_date_or_today(args.date.as_deref())?;
    let mut request = BatchRequest::for_date(date);
    if !args.portfolio.is_empty() {
        request = request.with_portfolios(portfolio_ids(&args.portfolio));
    }
    if args.force {
        request = request.forced();
    }

    let (_store, engine) = ctx.open_engine()?;
    if !ctx.quiet && ctx.format == OutputFormat::Table {
        print_info(&format!("Running batch for {}", date));
    }

    let run = engine.run_batch(request);
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                if let Some(id) = engine.cancel_batch().await? {
                    print_warning(&format!("Cancelling batch run {} after the current portfolio", id));
                }
            }
        }
    };

    match result {
        Ok(summary) => render_summary(&summary, ctx),
        Err(EngineError::AlreadyCompleted(id)) => {
            print_warning(&format!(
                "Batch run {} already completed for {}. Use --force to run again.",
                id, date
            ));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn render_summary(summary: &BatchSummary, ctx: &Context) -> Result<()> {
    if ctx.format == OutputFormat::Json {
        return print_json(summary);
    }

    print_header("Batch Run");
    print_output(&summary_rows(summary), ctx.format)?;

    if !summary.failed_jobs.is_empty() {
        print_header("Failed Jobs");
        let rows: Vec<FailureRow> = summary
            .failed_jobs
            .iter()
            .map(|job| FailureRow {
                portfolio: job.portfolio_id.to_string(),
                job: job.job_name.clone(),
                status: job.status.to_string(),
                category: job
                    .error_category
                    .map(|c| format!("{:?}", c))
                    .unwrap_or_default(),
                message: job.message.clone().unwrap_or_default(),
            })
            .collect();
        print_output(&rows, ctx.format)?;
    }

    if !ctx.quiet && summary.failed == 0 {
        print_success(&format!("Batch run {} finished", summary.batch_run_id));
    }
    Ok(())
}

fn summary_rows(summary: &BatchSummary) -> Vec<KeyValue> {
    let mut rows = vec![
        KeyValue::new("Run", summary.batch_run_id.to_string()),
        KeyValue::new("Date", summary.calculation_date.to_string()),
        KeyValue::new("Status", colored_batch_status(summary.status)),
        KeyValue::new("Jobs", summary.total_jobs.to_string()),
        KeyValue::new("Succeeded", summary.succeeded.to_string()),
        KeyValue::new("Insufficient Data", summary.insufficient_data.to_string()),
        KeyValue::new("Failed", summary.failed.to_string()),
        KeyValue::new("Skipped", summary.skipped.to_string()),
    ];
    if summary.cancelled_portfolios > 0 {
        rows.push(KeyValue::new(
            "Cancelled Portfolios",
            summary.cancelled_portfolios.to_string(),
        ));
    }
    if !summary.unrecorded_jobs.is_empty() {
        rows.push(KeyValue::new(
            "Unrecorded Results",
            summary.unrecorded_jobs.join(", "),
        ));
    }
    for (job, ms) in &summary.job_durations_ms {
        rows.push(KeyValue::new(format!("Time: {}", job), format!("{} ms", ms)));
    }
    rows.push(KeyValue::new("Duration", format!("{} ms", summary.duration_ms)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskline_traits::batch::BatchStatus;
    use riskline_traits::BatchRunId;
    use std::collections::BTreeMap;

    #[test]
    fn test_summary_rows() {
        let summary = BatchSummary {
            batch_run_id: BatchRunId::generate(),
            calculation_date: chrono::NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            status: BatchStatus::Cancelled,
            total_jobs: 10,
            succeeded: 5,
            insufficient_data: 1,
            failed: 0,
            skipped: 0,
            cancelled_portfolios: 1,
            job_durations_ms: BTreeMap::from([("correlations".to_string(), 12)]),
            failed_jobs: Vec::new(),
            unrecorded_jobs: Vec::new(),
            duration_ms: 40,
        };

        let rows = summary_rows(&summary);
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert!(keys.contains(&"Cancelled Portfolios"));
        assert!(keys.contains(&"Time: correlations"));
        assert_eq!(rows.last().unwrap().value, "40 ms");
    }
}
