//! `schedule` tool — reminders and recurring jobs through the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use companion_scheduler::types::{Job, JobPayload, Schedule};

use crate::pipeline::context::MessageContext;

use super::{Tool, ToolCtx, ToolResult};

pub struct ScheduleTool<C: MessageContext + 'static> {
    ctx: Arc<C>,
}

impl<C: MessageContext + 'static> ScheduleTool<C> {
    pub fn new(ctx: Arc<C>) -> Self {
        Self { ctx }
    }

    fn parse_schedule(input: &Value) -> Result<Schedule, String> {
        if let Some(expr) = input.get("cron").and_then(|v| v.as_str()) {
            return Ok(Schedule::Cron {
                expr: expr.to_string(),
            });
        }
        if let Some(secs) = input.get("every_seconds").and_then(|v| v.as_i64()) {
            if secs <= 0 {
                return Err("every_seconds must be positive".to_string());
            }
            return Ok(Schedule::Every {
                interval_ms: secs * 1000,
                start_ms: None,
            });
        }
        if let Some(at) = input.get("at").and_then(|v| v.as_str()) {
            let dt = chrono::DateTime::parse_from_rfc3339(at)
                .map_err(|e| format!("invalid 'at' datetime: {e}"))?;
            return Ok(Schedule::At {
                at_ms: dt.timestamp_millis(),
            });
        }
        if let Some(secs) = input.get("in_seconds").and_then(|v| v.as_i64()) {
            if secs <= 0 {
                return Err("in_seconds must be positive".to_string());
            }
            return Ok(Schedule::At {
                at_ms: Utc::now().timestamp_millis() + secs * 1000,
            });
        }
        Err("one of 'at', 'in_seconds', 'every_seconds', or 'cron' is required".to_string())
    }
}

#[async_trait]
impl<C: MessageContext + 'static> Tool for ScheduleTool<C> {
    fn name(&self) -> &str {
        "schedule"
    }

    fn description(&self) -> &str {
        "ALWAYS use this when the user asks to be reminded or wants something \
         to happen at or around a future time — this is a real persistent \
         timer. Actions: 'add' (one of: at=RFC3339, in_seconds=N, \
         every_seconds=N, cron='m h dom mon dow'), 'list', 'cancel' by job_id."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "list", "cancel"] },
                "message": { "type": "string", "description": "Reminder text to deliver. Required for add." },
                "at": { "type": "string", "description": "RFC3339 datetime for a one-shot reminder." },
                "in_seconds": { "type": "integer", "description": "One-shot reminder this many seconds from now." },
                "every_seconds": { "type": "integer", "description": "Recurring reminder interval." },
                "cron": { "type": "string", "description": "Five-field cron expression (evaluated in the configured timezone)." },
                "timezone": { "type": "string", "description": "IANA timezone override for cron (e.g. 'Asia/Seoul')." },
                "max_runs": { "type": "integer", "description": "Auto-disable after this many firings." },
                "job_id": { "type": "string", "description": "Required for cancel." }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, input: Value) -> ToolResult {
        let action = input.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "add" => {
                let Some(message) = input.get("message").and_then(|v| v.as_str()) else {
                    return ToolResult::error("'message' is required for add");
                };
                let schedule = match Self::parse_schedule(&input) {
                    Ok(s) => s,
                    Err(e) => return ToolResult::error(e),
                };

                let mut job = Job::new(
                    ctx.chat_id,
                    "reminder",
                    schedule,
                    JobPayload::Reminder {
                        message: message.to_string(),
                    },
                );
                job.timezone = input
                    .get("timezone")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                job.max_runs = input
                    .get("max_runs")
                    .and_then(|v| v.as_u64())
                    .map(|v| v as u32);

                match self.ctx.jobs().add(job) {
                    Ok(job) => ToolResult::success(format!(
                        "Scheduled. Job id: {} — next run at {}",
                        job.id,
                        job.next_run
                            .and_then(chrono::DateTime::from_timestamp_millis)
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_else(|| "unknown".to_string()),
                    )),
                    Err(e) => ToolResult::error(format!("scheduling failed: {e}")),
                }
            }
            "list" => {
                let jobs = self.ctx.jobs().list_for_chat(ctx.chat_id);
                if jobs.is_empty() {
                    return ToolResult::success("No scheduled jobs for this chat.");
                }
                let lines: Vec<String> = jobs
                    .iter()
                    .map(|j| {
                        format!(
                            "- {} | {} | {} | next: {} | runs: {}",
                            j.id,
                            j.name,
                            if j.enabled { "enabled" } else { "disabled" },
                            j.next_run
                                .and_then(chrono::DateTime::from_timestamp_millis)
                                .map(|dt| dt.to_rfc3339())
                                .unwrap_or_else(|| "—".to_string()),
                            j.run_count,
                        )
                    })
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            "cancel" => {
                let Some(id) = input.get("job_id").and_then(|v| v.as_str()) else {
                    return ToolResult::error("job_id is required for cancel");
                };
                match self.ctx.jobs().remove(id) {
                    Ok(()) => ToolResult::success(format!("Job {id} cancelled.")),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }
            other => ToolResult::error(format!("unknown action '{other}'")),
        }
    }
}
