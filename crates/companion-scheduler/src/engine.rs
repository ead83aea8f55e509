//! Scheduler tick loop.
//!
//! One ticker fires every minute; due jobs are forwarded over a bounded
//! channel to the delivery side (which runs them under a worker pool) and
//! marked executed immediately. At-least-once: a job is marked before its
//! payload is known to have been applied, and missed ticks collapse into a
//! single firing after restart (the store recomputes `next_run` on load).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::store::JobStore;
use crate::types::Job;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct SchedulerEngine {
    store: Arc<JobStore>,
    fired_tx: mpsc::Sender<Job>,
}

impl SchedulerEngine {
    pub fn new(store: Arc<JobStore>, fired_tx: mpsc::Sender<Job>) -> Self {
        Self { store, fired_tx }
    }

    /// Main loop. Ticks every minute until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire every due job once.
    pub async fn tick(&self) {
        let now = Utc::now().timestamp_millis();
        let due = self.store.due(now);
        if due.is_empty() {
            return;
        }

        for job in due {
            info!(job_id = %job.id, name = %job.name, run = job.run_count + 1, "job due");

            if let Err(e) = self.store.mark_executed(&job.id, now) {
                error!(job_id = %job.id, error = %e, "mark_executed failed");
                continue;
            }

            // Bounded channel: if delivery is saturated, wait rather than
            // drop — the store has already recorded the run.
            if self.fired_tx.send(job.clone()).await.is_err() {
                warn!(job_id = %job.id, "delivery channel closed — job fired but not delivered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobPayload, Schedule};

    fn store_at(dir: &tempfile::TempDir) -> Arc<JobStore> {
        Arc::new(JobStore::load(dir.path().join("cron-jobs.json"), chrono_tz::UTC).unwrap())
    }

    #[tokio::test]
    async fn tick_fires_due_jobs_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let at = Utc::now().timestamp_millis() + 10;
        let job = store
            .add(Job::new(
                9,
                "soon",
                Schedule::At { at_ms: at },
                JobPayload::Reminder {
                    message: "now!".to_string(),
                },
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::channel(8);
        let engine = SchedulerEngine::new(Arc::clone(&store), tx);
        engine.tick().await;

        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.id, job.id);
        // One-shot: disabled after the fire, so the next tick is silent.
        engine.tick().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tick_skips_disabled_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let at = Utc::now().timestamp_millis() + 10;
        let job = store
            .add(Job::new(
                9,
                "soon",
                Schedule::At { at_ms: at },
                JobPayload::Heartbeat,
            ))
            .unwrap();
        store.set_enabled(&job.id, false).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::channel(8);
        SchedulerEngine::new(store, tx).tick().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn recurring_job_is_marked_and_rescheduled() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let now = Utc::now().timestamp_millis();
        let job = store
            .add(Job::new(
                9,
                "pulse",
                Schedule::Every {
                    interval_ms: 60_000,
                    start_ms: Some(now - 30_000),
                },
                JobPayload::Heartbeat,
            ))
            .unwrap();

        // Force the next_run into the past, then tick.
        let mut forced = store.get(&job.id).unwrap();
        forced.next_run = Some(now - 1);
        store.update(forced).unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        SchedulerEngine::new(Arc::clone(&store), tx).tick().await;

        assert!(rx.try_recv().is_ok());
        let j = store.get(&job.id).unwrap();
        assert_eq!(j.run_count, 1);
        assert!(j.enabled);
        assert!(j.next_run.unwrap() > now);
    }
}
