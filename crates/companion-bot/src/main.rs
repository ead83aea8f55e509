use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use companion_agent::pipeline::context::MessageContext;
use companion_core::config::CompanionConfig;
use companion_core::secrets;
use companion_scheduler::SchedulerEngine;
use companion_telegram::TelegramAdapter;

mod app;
mod jobs;

/// How often the TTL sweeps run.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "companionbot", about = "Personal LLM companion over Telegram")]
struct Cli {
    /// Path to companionbot.toml (default: ~/.companionbot/companionbot.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion=info,companion_bot=info".into()),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("fatal: {e}");
        // Exit 1: misconfiguration (missing secrets, bad config, unreadable state).
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CompanionConfig::load(cli.config.as_deref())?;
    let telegram_token = secrets::require(secrets::TELEGRAM_TOKEN)?;

    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    let state = app::AppState::build(config, outbound_tx)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    jobs::ensure_default_jobs(&state);

    // Scheduler: tick loop + fired-job delivery.
    let (fired_tx, fired_rx) = mpsc::channel(32);
    let engine = SchedulerEngine::new(state.jobs_arc(), fired_tx);
    tokio::spawn(engine.run(shutdown_rx.clone()));
    tokio::spawn(jobs::run_job_delivery(
        Arc::clone(&state),
        fired_rx,
        state.config().scheduler.worker_pool_size,
    ));

    // Periodic sweeps: idle sessions, finished/stuck agents, dead processes.
    {
        let state = Arc::clone(&state);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        state.sessions().evict_idle();
                        state.agents().cleanup();
                        state.processes().reap_finished();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    info!(
        home = %state.config().home_dir.display(),
        "companionbot starting"
    );

    let adapter = TelegramAdapter::new(&telegram_token, Arc::clone(&state));
    tokio::select! {
        _ = adapter.run(outbound_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}
