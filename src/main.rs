//! speed-relay - scheduled school line speed reporting
//!
//! # Usage
//!
//! ```bash
//! # Run as a daemon on the configured daily slots
//! ./speed-relay --config relay_config.toml
//!
//! # One run right now, then exit
//! ./speed-relay --once --label manual
//!
//! # Measure and record only, nothing is posted
//! ./speed-relay --once --no-submit
//! ```
//!
//! # Environment Variables
//!
//! - `SPEED_RELAY_CONFIG`: Path to the config file (when `--config` is absent)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use speed_relay::config::RelayConfig;
use speed_relay::pipeline::{build_pipeline, start_daemon, RunOptions};
use speed_relay::scheduler::{DailyScheduler, SystemClock};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "speed-relay")]
#[command(about = "Scheduled internet speed measurement relay")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides SPEED_RELAY_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the CSV run log location
    #[arg(long, value_name = "PATH")]
    run_log: Option<PathBuf>,

    /// Run once immediately and exit instead of following the schedule
    #[arg(long)]
    once: bool,

    /// Schedule label recorded for a --once run
    #[arg(long, requires = "once")]
    label: Option<String>,

    /// Measure and record without posting to the form
    #[arg(long)]
    no_submit: bool,

    /// Operator note appended to the submitted notes
    #[arg(long)]
    note: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RelayConfig::load().context("Failed to load config")?,
    };
    if let Some(run_log) = args.run_log.clone() {
        config.storage.run_log = run_log;
    }

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let options = RunOptions {
        submit: !args.no_submit,
        note: args.note.clone(),
    };

    if args.once {
        let pipeline = build_pipeline(&config, options).context("Startup failed")?;
        let label = args.label.as_deref().unwrap_or("manual");
        let record = pipeline.run_once(label).await;
        info!(outcome = %record.outcome, log = %config.storage.run_log.display(), "Single run complete");
        if matches!(
            record.outcome,
            speed_relay::RunOutcome::Failure { .. } | speed_relay::RunOutcome::MeasurementFailed
        ) {
            anyhow::bail!("Run finished with {}", record.outcome);
        }
        return Ok(());
    }

    let (pipeline, _lock) = start_daemon(&config, options).context("Startup failed")?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  speed-relay | school {} | {}", pipeline.site().school_code, pipeline.site().school_name);
    for slot in &config.schedule {
        info!("  slot: {}", slot);
    }
    info!("  run log: {}", config.storage.run_log.display());
    if args.no_submit {
        info!("  mode: measure-only");
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let scheduler = DailyScheduler::new(config.schedule.clone(), SystemClock, pipeline);
    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    info!("speed-relay stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
