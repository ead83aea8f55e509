use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when and how often a job should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire once at the given epoch-milliseconds instant; disabled after.
    At { at_ms: i64 },

    /// Fire every `interval_ms`, phase-anchored at `start_ms` (defaults to
    /// creation time).
    Every {
        interval_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_ms: Option<i64>,
    },

    /// Five-field POSIX cron expression, evaluated in the job's timezone.
    Cron { expr: String },
}

/// What a fired job does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    /// Deliver a fixed reminder text to the chat.
    Reminder { message: String },
    /// Proactive check-in when the chat has been idle.
    Heartbeat,
    /// Morning briefing turn.
    DailyBriefing,
    /// Post a synthesized user message into the chat's LLM pipeline.
    AgentTurn { prompt: String },
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub chat_id: i64,
    pub name: String,
    pub schedule: Schedule,
    pub payload: JobPayload,
    pub enabled: bool,
    /// IANA timezone for cron evaluation. `None` falls back to the
    /// scheduler-wide default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Epoch ms of the most recent firing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<i64>,
    /// Epoch ms of the next planned firing; `None` when exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<i64>,
    pub run_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u32>,
}

impl Job {
    pub fn new(chat_id: i64, name: &str, schedule: Schedule, payload: JobPayload) -> Self {
        Self {
            id: short_id(),
            chat_id,
            name: name.to_string(),
            schedule,
            payload,
            enabled: true,
            timezone: None,
            created_at: Utc::now(),
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: None,
        }
    }
}

/// Short opaque id — 8 hex chars from a v4 UUID.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_serializes_with_kind_tag() {
        let s = Schedule::At { at_ms: 1000 };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["kind"], "at");
        assert_eq!(json["at_ms"], 1000);
    }

    #[test]
    fn every_omits_missing_start() {
        let s = Schedule::Every {
            interval_ms: 60_000,
            start_ms: None,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("start_ms").is_none());
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = Job::new(
            42,
            "tea time",
            Schedule::Cron {
                expr: "0 9 * * MON".to_string(),
            },
            JobPayload::Reminder {
                message: "tea!".to_string(),
            },
        );
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.chat_id, 42);
        assert!(matches!(back.payload, JobPayload::Reminder { .. }));
    }

    #[test]
    fn short_ids_are_short_and_distinct() {
        let a = short_id();
        let b = short_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }
}
