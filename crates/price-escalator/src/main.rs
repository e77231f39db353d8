//! Price escalation CLI.
//!
//! ```bash
//! # Both indices for a month
//! price-escalator indices --year 2024 --month 10
//!
//! # Escalation between the month before the bid due date and the month
//! # before the bill date
//! price-escalator calculate --work-value 1000000 --bid-due-date 2022-04-15 --report-date 2024-11-05
//!
//! # Refresh the trailing window of primary-index months from the remote service
//! price-escalator refresh
//!
//! # Load seed records into the store
//! price-escalator seed --file data/seed_indices.json
//! ```
//!
//! Every command prints pretty JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use indexing::{base_period, current_period, load_seed, Period};
use price_escalator::telemetry::{self, MetricsReport};
use price_escalator::{BatchRefresher, IndexService, ServiceConfig};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file overriding the PRICE_ESCALATOR_* environment defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the primary and secondary index for one month
    Indices {
        #[arg(long)]
        year: i32,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
    },

    /// Compute the price escalation for a work value
    Calculate {
        /// Value of work done in the current period
        #[arg(long)]
        work_value: f64,

        /// Base period as YYYY-MM
        #[arg(long, conflicts_with = "bid_due_date", required_unless_present = "bid_due_date")]
        base: Option<Period>,

        /// Bid due date (YYYY-MM-DD); the base period is the month before it
        #[arg(long)]
        bid_due_date: Option<NaiveDate>,

        /// Current period as YYYY-MM
        #[arg(long, conflicts_with = "report_date", required_unless_present = "report_date")]
        current: Option<Period>,

        /// Report or invoice date (YYYY-MM-DD); the current period is the month before it
        #[arg(long)]
        report_date: Option<NaiveDate>,
    },

    /// Refresh primary-index values for last year and this year to date
    Refresh,

    /// Upsert records from a JSON seed file into the store
    Seed {
        #[arg(long, default_value = "data/seed_indices.json")]
        file: PathBuf,
    },

    /// Print the latest metrics report
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    let config = ServiceConfig::load(args.config.as_deref())?;

    let service = IndexService::from_config(&config).await?;

    match args.command {
        Command::Indices { year, month } => {
            let period = Period::new(year, month)?;
            print_json(&service.indices_for_month(period).await)?;
        }
        Command::Calculate {
            work_value,
            base,
            bid_due_date,
            current,
            report_date,
        } => {
            let base = pick_period(base, bid_due_date, base_period).context("Base period required")?;
            let current = pick_period(current, report_date, current_period)
                .context("Current period required")?;
            let report = service.calculate(work_value, base, current).await?;
            for warning in &report.warnings {
                warn!("{warning}");
            }
            print_json(&report)?;
        }
        Command::Refresh => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping refresh");
                    on_signal.cancel();
                }
            });

            let refresher = BatchRefresher::new(service.resolver().clone(), config.refresh_policy());
            let report = refresher.run(Local::now().date_naive(), &cancel).await;
            print_json(&report)?;
        }
        Command::Seed { file } => {
            let records = load_seed(&file)
                .with_context(|| format!("Failed to load seed file {}", file.display()))?;
            let written = service
                .import(records)
                .await
                .context("Failed to write seed records")?;
            print_json(&serde_json::json!({ "file": file, "written": written }))?;
        }
        // Reads the log only; appending this run's empty counters would mask it.
        Command::Metrics => return print_metrics(&config),
    }

    if let Some(path) = &config.metrics_log {
        telemetry::append_report(&MetricsReport::from(&service.metrics().snapshot()), path);
    }
    Ok(())
}

fn pick_period(
    explicit: Option<Period>,
    date: Option<NaiveDate>,
    from_date: fn(NaiveDate) -> Period,
) -> Option<Period> {
    explicit.or_else(|| date.map(from_date))
}

fn print_metrics(config: &ServiceConfig) -> Result<()> {
    let logged = match &config.metrics_log {
        Some(path) if path.exists() => telemetry::read_last_report(path)?,
        _ => None,
    };
    let report = match logged {
        Some(report) => report,
        None => MetricsReport::from(&indexing::Metrics::global().snapshot()),
    };
    print_json(&report)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
