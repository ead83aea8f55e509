//! Scheduler-fired job delivery: dispatch payloads under a bounded worker
//! pool, routing through the same per-chat queue as user turns.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

use companion_agent::pipeline::context::MessageContext;
use companion_agent::pipeline::process::process_text_turn;
use companion_core::types::Outbound;
use companion_scheduler::types::{Job, JobPayload, Schedule};
use companion_telegram::TelegramAppContext;

use crate::app::AppState;

/// Hourly heartbeat poll; the handler only speaks up past the idle threshold.
const HEARTBEAT_INTERVAL_MS: i64 = 60 * 60 * 1000;

/// Create the standing heartbeat and daily-briefing jobs for every
/// configured chat, skipping ones that already exist.
pub fn ensure_default_jobs(state: &Arc<AppState>) {
    let briefing_cron = state.config().scheduler.briefing_cron.clone();
    for &chat_id in &state.config().telegram.allowed_chats {
        let existing = state.jobs().list_for_chat(chat_id);

        if !existing.iter().any(|j| j.name == "heartbeat") {
            let job = Job::new(
                chat_id,
                "heartbeat",
                Schedule::Every {
                    interval_ms: HEARTBEAT_INTERVAL_MS,
                    start_ms: None,
                },
                JobPayload::Heartbeat,
            );
            if let Err(e) = state.jobs().add(job) {
                warn!(chat_id, error = %e, "failed to create heartbeat job");
            }
        }

        if !existing.iter().any(|j| j.name == "daily-briefing") {
            let job = Job::new(
                chat_id,
                "daily-briefing",
                Schedule::Cron {
                    expr: briefing_cron.clone(),
                },
                JobPayload::DailyBriefing,
            );
            if let Err(e) = state.jobs().add(job) {
                warn!(chat_id, error = %e, "failed to create daily-briefing job");
            }
        }
    }
}

/// Drain fired jobs until the channel closes.
pub async fn run_job_delivery(
    state: Arc<AppState>,
    mut fired_rx: mpsc::Receiver<Job>,
    worker_pool_size: usize,
) {
    let pool = Arc::new(Semaphore::new(worker_pool_size.max(1)));
    info!(workers = worker_pool_size, "job delivery loop started");

    while let Some(job) = fired_rx.recv().await {
        let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
            break;
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            run_job(state, job).await;
            drop(permit);
        });
    }
    warn!("job delivery loop ended (channel closed)");
}

async fn run_job(state: Arc<AppState>, job: Job) {
    info!(job_id = %job.id, chat_id = job.chat_id, "delivering job");
    let outbound = state.outbound();

    match &job.payload {
        JobPayload::Reminder { message } => {
            let _ = outbound
                .send(Outbound {
                    chat_id: job.chat_id,
                    text: format!("⏰ {message}"),
                })
                .await;
        }

        JobPayload::Heartbeat => {
            let idle_minutes = state.config().scheduler.heartbeat_idle_minutes as i64;
            let quiet = match state.sessions().last_accessed(job.chat_id) {
                Some(at) => (Utc::now() - at).num_minutes() >= idle_minutes,
                // No resident session: nothing recent to follow up on.
                None => false,
            };
            if quiet {
                agent_turn(
                    &state,
                    job.chat_id,
                    "It has been quiet for a while. Send the user a short, warm \
                     check-in — reference something recent if you remember one.",
                )
                .await;
            }
        }

        JobPayload::DailyBriefing => {
            agent_turn(
                &state,
                job.chat_id,
                "Give the user their morning briefing: greet them, recap \
                 anything scheduled or pending from memory, and ask one \
                 useful question about the day.",
            )
            .await;
        }

        JobPayload::AgentTurn { prompt } => {
            agent_turn(&state, job.chat_id, prompt).await;
        }
    }
}

/// Post a synthesized user message into the chat's pipeline — same queue
/// as real user turns — and deliver the reply.
async fn agent_turn(state: &Arc<AppState>, chat_id: i64, prompt: &str) {
    let lock = state.chat_queues().lock_for(chat_id);
    let _turn = lock.lock().await;

    let reply = process_text_turn(state, chat_id, prompt, None).await;
    let _ = state
        .outbound()
        .send(Outbound {
            chat_id,
            text: reply,
        })
        .await;
}
