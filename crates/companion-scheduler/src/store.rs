//! Persistent job store — a single versioned JSON file, rewritten
//! atomically (temp file + rename) on every mutation. All writes funnel
//! through this one struct; readers get snapshots.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cron::CronExpr;
use crate::error::{Result, SchedulerError};
use crate::types::{Job, Schedule};

const STORE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct VersionedJobs {
    version: u32,
    jobs: Vec<Job>,
}

pub struct JobStore {
    path: PathBuf,
    default_tz: Tz,
    jobs: Mutex<Vec<Job>>,
}

impl JobStore {
    /// Load the store from disk, recovering job state for a fresh process:
    /// every surviving job gets a freshly computed `next_run` (missed cron
    /// fires collapse into one), and one-shot jobs whose time has passed are
    /// dropped.
    pub fn load(path: PathBuf, default_tz: Tz) -> Result<Self> {
        let mut jobs: Vec<Job> = match std::fs::read_to_string(&path) {
            Ok(content) => {
                let versioned: VersionedJobs = serde_json::from_str(&content)?;
                if versioned.version != STORE_VERSION {
                    return Err(SchedulerError::Store(format!(
                        "unsupported job store version {}",
                        versioned.version
                    )));
                }
                versioned.jobs
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now().timestamp_millis();
        let before = jobs.len();
        jobs.retain(|job| match &job.schedule {
            Schedule::At { at_ms } => *at_ms > now || !job.enabled,
            _ => true,
        });
        let dropped = before - jobs.len();
        if dropped > 0 {
            info!(dropped, "expired one-shot jobs dropped on startup");
        }

        for job in &mut jobs {
            if job.enabled {
                let next = compute_next_run(job, now, default_tz);
                job.next_run = next;
                if next.is_none() {
                    job.enabled = false;
                }
            }
        }

        let store = Self {
            path,
            default_tz,
            jobs: Mutex::new(jobs),
        };
        store.save()?;
        Ok(store)
    }

    /// Add a job. `next_run` is computed here; one-shot jobs in the past are
    /// rejected.
    pub fn add(&self, mut job: Job) -> Result<Job> {
        let now = Utc::now().timestamp_millis();

        if let Schedule::Cron { expr } = &job.schedule {
            // Validate eagerly so the error reaches the caller, not the tick loop.
            CronExpr::parse(expr)?;
        }
        if let Some(tz) = &job.timezone {
            tz.parse::<Tz>()
                .map_err(|_| SchedulerError::InvalidTimezone(tz.clone()))?;
        }

        job.next_run = compute_next_run(&job, now, self.default_tz);
        if job.next_run.is_none() {
            return Err(SchedulerError::InvalidSchedule(
                "schedule has no future occurrence".to_string(),
            ));
        }

        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        self.save_locked(&jobs)?;
        info!(job_id = %job.id, name = %job.name, "job added");
        Ok(job)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        self.save_locked(&jobs)?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    /// Replace a job record wholesale (matched by id).
    pub fn update(&self, updated: Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == updated.id) {
            Some(slot) => {
                *slot = updated;
                self.save_locked(&jobs)
            }
            None => Err(SchedulerError::JobNotFound { id: updated.id }),
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let default_tz = self.default_tz;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                job.enabled = enabled;
                if enabled {
                    let now = Utc::now().timestamp_millis();
                    let next = compute_next_run(job, now, default_tz);
                    job.next_run = next;
                    if next.is_none() {
                        job.enabled = false;
                    }
                }
                self.save_locked(&jobs)
            }
            None => Err(SchedulerError::JobNotFound { id: id.to_string() }),
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    /// Snapshot of every job.
    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn list_for_chat(&self, chat_id: i64) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.chat_id == chat_id)
            .cloned()
            .collect()
    }

    /// Enabled jobs whose `next_run` has arrived.
    pub fn due(&self, now_ms: i64) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.enabled && j.next_run.is_some_and(|n| n <= now_ms))
            .cloned()
            .collect()
    }

    /// Record a firing: bump `run_count`, set `last_run`, recompute
    /// `next_run`, and auto-disable exhausted jobs.
    pub fn mark_executed(&self, id: &str, now_ms: i64) -> Result<()> {
        let default_tz = self.default_tz;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        };

        job.run_count += 1;
        job.last_run = Some(now_ms);

        let exhausted = job.max_runs.is_some_and(|m| job.run_count >= m);
        let next = if exhausted {
            None
        } else {
            compute_next_run(job, now_ms, default_tz)
        };
        job.next_run = next;
        if next.is_none() {
            job.enabled = false;
        }

        self.save_locked(&jobs)
    }

    // --- persistence --------------------------------------------------------

    fn save(&self) -> Result<()> {
        let jobs = self.jobs.lock().unwrap();
        self.save_locked(&jobs)
    }

    /// Write the whole store atomically: serialize to a temp file in the
    /// same directory, then rename over the target.
    fn save_locked(&self, jobs: &[Job]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let versioned = VersionedJobs {
            version: STORE_VERSION,
            jobs: jobs.to_vec(),
        };
        let body = serde_json::to_string_pretty(&versioned)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            warn!(error = %e, "job store rename failed");
            return Err(e.into());
        }
        Ok(())
    }
}

/// Next firing instant (epoch ms) for a job, strictly after `now_ms`.
pub fn compute_next_run(job: &Job, now_ms: i64, default_tz: Tz) -> Option<i64> {
    match &job.schedule {
        Schedule::At { at_ms } => (*at_ms > now_ms).then_some(*at_ms),

        Schedule::Every {
            interval_ms,
            start_ms,
        } => {
            if *interval_ms <= 0 {
                return None;
            }
            let start = start_ms.unwrap_or_else(|| job.created_at.timestamp_millis());
            if start > now_ms {
                return Some(start);
            }
            let elapsed_intervals = (now_ms - start) / interval_ms;
            Some(start + (elapsed_intervals + 1) * interval_ms)
        }

        Schedule::Cron { expr } => {
            let cron = CronExpr::parse(expr).ok()?;
            let tz: Tz = job
                .timezone
                .as_deref()
                .and_then(|t| t.parse().ok())
                .unwrap_or(default_tz);
            let after = chrono::DateTime::from_timestamp_millis(now_ms)?;
            cron.next_after(after, tz).map(|dt| dt.timestamp_millis())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPayload;
    use chrono::Timelike;

    fn store_at(dir: &tempfile::TempDir) -> JobStore {
        JobStore::load(dir.path().join("cron-jobs.json"), chrono_tz::UTC).unwrap()
    }

    fn reminder(chat_id: i64, schedule: Schedule) -> Job {
        Job::new(
            chat_id,
            "reminder",
            schedule,
            JobPayload::Reminder {
                message: "ping".to_string(),
            },
        )
    }

    #[test]
    fn add_persists_and_reload_finds_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let future = Utc::now().timestamp_millis() + 3_600_000;
        let job = store.add(reminder(42, Schedule::At { at_ms: future })).unwrap();

        let reloaded = store_at(&dir);
        let found = reloaded.get(&job.id).unwrap();
        assert_eq!(found.chat_id, 42);
        assert_eq!(found.next_run, Some(future));
        assert!(matches!(found.payload, JobPayload::Reminder { .. }));
    }

    #[test]
    fn store_file_is_versioned_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let future = Utc::now().timestamp_millis() + 10_000;
        store.add(reminder(1, Schedule::At { at_ms: future })).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("cron-jobs.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], 1);
        assert!(value["jobs"].is_array());
    }

    #[test]
    fn past_one_shot_is_rejected_on_add() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let past = Utc::now().timestamp_millis() - 1000;
        assert!(store.add(reminder(1, Schedule::At { at_ms: past })).is_err());
    }

    #[test]
    fn past_one_shot_is_dropped_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let soon = Utc::now().timestamp_millis() + 50;
        let job = store.add(reminder(1, Schedule::At { at_ms: soon })).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(100));
        let reloaded = store_at(&dir);
        assert!(reloaded.get(&job.id).is_none());
    }

    #[test]
    fn every_job_resumes_next_interval_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let now = Utc::now().timestamp_millis();
        // Started five minutes ago with a 60s interval.
        let job = store
            .add(reminder(
                1,
                Schedule::Every {
                    interval_ms: 60_000,
                    start_ms: Some(now - 300_000),
                },
            ))
            .unwrap();

        let reloaded = store_at(&dir);
        let next = reloaded.get(&job.id).unwrap().next_run.unwrap();
        let now = Utc::now().timestamp_millis();
        // One upcoming fire within the next interval — not five backlogged.
        assert!(next > now, "next_run must be in the future");
        assert!(next <= now + 60_000, "next_run more than one interval away");
    }

    #[test]
    fn mark_executed_advances_and_respects_max_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let mut job = reminder(
            1,
            Schedule::Every {
                interval_ms: 60_000,
                start_ms: None,
            },
        );
        job.max_runs = Some(2);
        let job = store.add(job).unwrap();
        let now = Utc::now().timestamp_millis();

        store.mark_executed(&job.id, now).unwrap();
        let j = store.get(&job.id).unwrap();
        assert_eq!(j.run_count, 1);
        assert_eq!(j.last_run, Some(now));
        assert!(j.enabled);
        assert!(j.next_run.unwrap() > now, "next_run strictly after last_run");

        store.mark_executed(&job.id, now + 60_000).unwrap();
        let j = store.get(&job.id).unwrap();
        assert_eq!(j.run_count, 2);
        assert!(!j.enabled, "job auto-disables at max_runs");
        assert!(j.next_run.is_none());
    }

    #[test]
    fn one_shot_disables_after_firing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let at = Utc::now().timestamp_millis() + 1000;
        let job = store.add(reminder(1, Schedule::At { at_ms: at })).unwrap();

        store.mark_executed(&job.id, at).unwrap();
        let j = store.get(&job.id).unwrap();
        assert!(!j.enabled);
        assert!(j.next_run.is_none());
    }

    #[test]
    fn due_filters_on_enabled_and_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let now = Utc::now().timestamp_millis();
        let soon = store.add(reminder(1, Schedule::At { at_ms: now + 100 })).unwrap();
        let later = store.add(reminder(1, Schedule::At { at_ms: now + 99_999 })).unwrap();

        let due = store.due(now + 200);
        assert!(due.iter().any(|j| j.id == soon.id));
        assert!(!due.iter().any(|j| j.id == later.id));

        store.set_enabled(&soon.id, false).unwrap();
        assert!(store.due(now + 200).is_empty());
    }

    #[test]
    fn invalid_cron_rejected_at_add() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let result = store.add(reminder(
            1,
            Schedule::Cron {
                expr: "not a cron".to_string(),
            },
        ));
        assert!(result.is_err());
    }

    #[test]
    fn invalid_timezone_rejected_at_add() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let mut job = reminder(
            1,
            Schedule::Cron {
                expr: "0 9 * * *".to_string(),
            },
        );
        job.timezone = Some("Mars/Olympus".to_string());
        assert!(store.add(job).is_err());
    }

    #[test]
    fn cron_next_run_respects_job_timezone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        let mut job = reminder(
            7,
            Schedule::Cron {
                expr: "0 9 * * *".to_string(),
            },
        );
        job.timezone = Some("Asia/Seoul".to_string());
        let job = store.add(job).unwrap();

        let next = store.get(&job.id).unwrap().next_run.unwrap();
        let dt = chrono::DateTime::from_timestamp_millis(next).unwrap();
        let seoul: Tz = "Asia/Seoul".parse().unwrap();
        assert_eq!(dt.with_timezone(&seoul).hour(), 9);
    }

    #[test]
    fn remove_missing_job_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(&dir);
        assert!(matches!(
            store.remove("nope"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }
}
