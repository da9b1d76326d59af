//! Status command implementation.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use riskline_engine::{BatchService, BatchStatusView};
use riskline_traits::batch::BatchRun;
use riskline_traits::storage::PersistenceGateway;

use crate::cli::OutputFormat;
use crate::commands::{parse_date_or_today, parse_run_id, Context};
use crate::output::{
    colored_batch_status, colored_job_status, print_availability, print_header, print_json,
    print_output, KeyValue,
};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Batch run id. Without one, lists the runs recorded for --date.
    pub run_id: Option<String>,

    /// Calculation date to list runs for (YYYY-MM-DD). Defaults to today.
    #[arg(short, long, conflicts_with = "run_id")]
    pub date: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct RunRow {
    #[tabled(rename = "Run")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started_at: String,
    #[tabled(rename = "Portfolios")]
    portfolios: usize,
    #[tabled(rename = "Succeeded")]
    succeeded: usize,
    #[tabled(rename = "Failed")]
    failed: usize,
    #[tabled(rename = "Skipped")]
    skipped: usize,
}

impl From<&BatchRun> for RunRow {
    fn from(run: &BatchRun) -> Self {
        Self {
            id: run.id.to_string(),
            status: colored_batch_status(run.status),
            started_at: run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            portfolios: run.portfolio_ids.len(),
            succeeded: run.succeeded,
            failed: run.failed,
            skipped: run.skipped,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "Portfolio")]
    portfolio: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Rows")]
    rows: usize,
    #[tabled(rename = "Message")]
    message: String,
}

/// Execute the status command.
pub async fn execute(args: StatusArgs, ctx: &Context) -> Result<()> {
    match args.run_id {
        Some(raw) => show_run(&raw, ctx).await,
        None => list_runs(args.date.as_deref(), ctx).await,
    }
}

async fn show_run(raw: &str, ctx: &Context) -> Result<()> {
    let id = parse_run_id(raw)?;
    let (_store, engine) = ctx.open_engine()?;
    let status = engine.get_batch_status(&id).await?;

    print_availability(&status, ctx.format, |view| {
        print_header("Batch Run");
        print_output(&overview_rows(view), ctx.format)?;
        print_header("Jobs");
        let rows: Vec<JobRow> = view
            .jobs
            .iter()
            .map(|job| JobRow {
                portfolio: job.portfolio_id.to_string(),
                job: job.job_name.clone(),
                status: colored_job_status(job.status),
                attempts: job.attempts.map(|a| a.to_string()).unwrap_or_default(),
                rows: job.rows_written,
                message: job.message.clone().unwrap_or_default(),
            })
            .collect();
        print_output(&rows, ctx.format)
    })
}

async fn list_runs(date: Option<&str>, ctx: &Context) -> Result<()> {
    let date = parse_date_or_today(date)?;
    let store = ctx.open_store()?;
    let runs = store.list_batch_runs(date).await?;

    match ctx.format {
        OutputFormat::Json => print_json(&runs),
        OutputFormat::Table => {
            print_header(&format!("Batch Runs for {}", date));
            let rows: Vec<RunRow> = runs.iter().map(RunRow::from).collect();
            print_output(&rows, ctx.format)
        }
    }
}

fn overview_rows(view: &BatchStatusView) -> Vec<KeyValue> {
    let mut rows = vec![
        KeyValue::new("Run", view.batch_run_id.to_string()),
        KeyValue::new("Date", view.calculation_date.to_string()),
        KeyValue::new("Status", colored_batch_status(view.status)),
        KeyValue::new("Jobs", view.total_jobs.to_string()),
        KeyValue::new("Progress", format!("{:.1}%", view.progress_percent)),
        KeyValue::new("Started", view.started_at.to_rfc3339()),
    ];
    if let Some(finished) = view.finished_at {
        rows.push(KeyValue::new("Finished", finished.to_rfc3339()));
    }
    if view.cancel_requested {
        rows.push(KeyValue::new("Cancel Requested", "yes"));
    }
    if let Some(error) = &view.error {
        rows.push(KeyValue::new("Error", error.clone()));
    }
    rows
}
