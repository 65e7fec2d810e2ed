use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobclaw_adapters::SourceAdapter;
use jobclaw_core::CycleResult;
use jobclaw_sync::{build_scheduler, run_cycle_once_from_env, IngestionPipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "warn,jobclaw_core=info,jobclaw_storage=info,jobclaw_adapters=info,jobclaw_sync=info,jobclaw=info";

#[derive(Debug, Parser)]
#[command(name = "jobclaw")]
#[command(about = "JobClaw job ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle and print the summary.
    Run {
        /// Override the recency window for this cycle.
        #[arg(long)]
        window_hours: Option<u32>,
        /// Print the full cycle result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run cycles on the configured cron schedule until Ctrl-C.
    Watch,
    /// Show recent entries from the run history.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List the sources a cycle would fetch.
    Sources,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json = std::env::var("JOBCLAW_LOG_JSON").is_ok_and(|v| matches!(v.as_str(), "1" | "true"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

fn print_summary(result: &CycleResult) {
    println!(
        "cycle complete: fetched={} role={} region={} recent={} new={} sources_ok={} sources_failed={} duration={:.1}s",
        result.total_fetched,
        result.total_filtered,
        result.total_in_region,
        result.total_recent,
        result.total_new,
        result.sources_succeeded,
        result.sources_failed,
        result.duration_secs
    );
    for job in &result.new_records {
        println!("  + {} @ {} ({}) {}", job.title, job.company, job.location, job.url);
    }
    for err in &result.errors {
        eprintln!("  ! {err}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Run {
        window_hours: None,
        json: false,
    }) {
        Commands::Run { window_hours, json } => {
            let result = run_cycle_once_from_env(window_hours).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&result).context("serializing cycle result")?
                );
            } else {
                print_summary(&result);
            }
        }
        Commands::Watch => {
            let cron = config.scheduler_cron.clone();
            let pipeline = Arc::new(IngestionPipeline::new(config)?);
            let mut sched = build_scheduler(pipeline).await?;
            sched.start().await.context("starting scheduler")?;
            info!(%cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::History { limit } => {
            let pipeline = IngestionPipeline::new(config)?;
            let db = pipeline.store().load().await?;
            println!(
                "{} known jobs, last updated {}",
                db.jobs.len(),
                db.last_updated
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            let skip = db.run_history.len().saturating_sub(limit);
            for run in db.run_history.iter().skip(skip) {
                println!(
                    "{}  fetched={} filtered={} new={} ok={} failed={} {:.1}s",
                    run.timestamp.to_rfc3339(),
                    run.fetched_count,
                    run.filtered_count,
                    run.new_count,
                    run.succeeded,
                    run.failed,
                    run.duration_secs
                );
            }
        }
        Commands::Sources => {
            let pipeline = IngestionPipeline::new(config)?;
            let plan = pipeline.source_plan()?;
            for adapter in &plan.adapters {
                println!("{:<20} {}", adapter.source_id(), adapter.describe());
            }
            for rejected in &plan.rejected {
                println!("{:<20} {rejected}", "(skipped)");
            }
            println!("{} sources", plan.len());
        }
    }

    Ok(())
}
