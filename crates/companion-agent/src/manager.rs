//! Background agent manager.
//!
//! Agents are fire-and-forget LLM calls scoped to a chat, bounded globally
//! and per chat. Cancellation sets the status under the monitor *before*
//! firing the abort token, so a cancelled agent can never race a successful
//! delivery. A periodic sweep cancels stuck agents and purges finished ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use companion_core::types::{ChatId, Outbound};
use companion_core::CompanionError;
use companion_scheduler::types::short_id;

use crate::provider::{ChatRequest, LlmProvider};
use crate::retry::{send_with_retry, RetryPolicy};

const SUB_AGENT_SYSTEM_PROMPT: &str = "You are a background task agent. Complete the task you \
    are given thoroughly and reply with the final result only — no preamble, no questions. \
    If the task cannot be completed, say exactly what is missing.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

struct AgentRecord {
    id: String,
    task: String,
    chat_id: ChatId,
    status: AgentStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    result: Option<String>,
    error: Option<String>,
    cancel: CancellationToken,
}

/// Public snapshot of one agent.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub id: String,
    pub task: String,
    pub chat_id: ChatId,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl AgentRecord {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            task: self.task.clone(),
            chat_id: self.chat_id,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

pub struct AgentManager {
    agents: Mutex<HashMap<String, AgentRecord>>,
    provider: Arc<dyn LlmProvider>,
    outbound: mpsc::Sender<Outbound>,
    model: String,
    retry: RetryPolicy,
    max_global: usize,
    max_per_chat: usize,
    ttl: Duration,
}

impl AgentManager {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        outbound: mpsc::Sender<Outbound>,
        model: String,
        retry: RetryPolicy,
        max_global: usize,
        max_per_chat: usize,
        ttl_minutes: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents: Mutex::new(HashMap::new()),
            provider,
            outbound,
            model,
            retry,
            max_global,
            max_per_chat,
            ttl: Duration::minutes(ttl_minutes as i64),
        })
    }

    /// Start a background agent for `chat_id`. Rejects when the chat already
    /// has its full quota of running agents; evicts the oldest agent when
    /// the global cap is reached.
    pub fn spawn(self: &Arc<Self>, task: &str, chat_id: ChatId) -> Result<String, CompanionError> {
        let id = short_id();
        let token = CancellationToken::new();

        let evicted_token = {
            let mut agents = self.agents.lock().unwrap();

            let running_for_chat = agents
                .values()
                .filter(|a| a.chat_id == chat_id && a.status == AgentStatus::Running)
                .count();
            if running_for_chat >= self.max_per_chat {
                return Err(CompanionError::QuotaExceeded(format!(
                    "this chat already has {running_for_chat} background tasks running"
                )));
            }

            let mut evicted = None;
            if agents.len() >= self.max_global {
                let oldest = agents
                    .values()
                    .min_by_key(|a| a.created_at)
                    .map(|a| a.id.clone());
                if let Some(old_id) = oldest {
                    if let Some(mut old) = agents.remove(&old_id) {
                        if old.status == AgentStatus::Running {
                            old.status = AgentStatus::Cancelled;
                            evicted = Some(old.cancel.clone());
                        }
                        info!(agent_id = %old_id, "oldest agent evicted for capacity");
                    }
                }
            }

            agents.insert(
                id.clone(),
                AgentRecord {
                    id: id.clone(),
                    task: task.to_string(),
                    chat_id,
                    status: AgentStatus::Running,
                    created_at: Utc::now(),
                    completed_at: None,
                    result: None,
                    error: None,
                    cancel: token.clone(),
                },
            );
            evicted
        };

        // Fire the eviction signal only after releasing the monitor.
        if let Some(t) = evicted_token {
            t.cancel();
        }

        let manager = Arc::clone(self);
        let id2 = id.clone();
        let task2 = task.to_string();
        tokio::spawn(async move {
            manager.run_agent(id2, task2, chat_id, token).await;
        });

        info!(agent_id = %id, chat_id, "agent spawned");
        Ok(id)
    }

    async fn run_agent(&self, id: String, task: String, chat_id: ChatId, token: CancellationToken) {
        let mut req = ChatRequest::new(self.model.clone(), 4096);
        req.system = Some(SUB_AGENT_SYSTEM_PROMPT.to_string());
        req.push_text("user", &task);

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                // Status was already set by the canceller.
                info!(agent_id = %id, "agent aborted");
                return;
            }
            result = send_with_retry(self.provider.as_ref(), &req, self.retry) => result,
        };

        let delivery = {
            let mut agents = self.agents.lock().unwrap();
            let Some(record) = agents.get_mut(&id) else {
                return;
            };
            if record.status != AgentStatus::Running {
                // Cancelled between response arrival and here — drop the result.
                None
            } else {
                record.completed_at = Some(Utc::now());
                match outcome {
                    Ok(resp) => {
                        record.status = AgentStatus::Completed;
                        record.result = Some(resp.content.clone());
                        Some(format!(
                            "Background task `{id}` finished:\n{}",
                            resp.content
                        ))
                    }
                    Err(e) => {
                        record.status = AgentStatus::Failed;
                        record.error = Some(e.to_string());
                        Some(format!("Background task `{id}` failed: {e}"))
                    }
                }
            }
        };

        if let Some(text) = delivery {
            if self
                .outbound
                .send(Outbound { chat_id, text })
                .await
                .is_err()
            {
                warn!(agent_id = %id, "outbound channel closed, agent result dropped");
            }
        }
    }

    /// Cancel a running agent. Status flips to `Cancelled` while holding the
    /// monitor; the abort token fires after it is released.
    pub fn cancel(&self, id: &str) -> Result<(), CompanionError> {
        let token = {
            let mut agents = self.agents.lock().unwrap();
            let record = agents.get_mut(id).ok_or_else(|| CompanionError::NotFound {
                what: "agent",
                id: id.to_string(),
            })?;
            if record.status != AgentStatus::Running {
                return Err(CompanionError::InvalidInput(format!(
                    "agent {id} is not running ({})",
                    record.status
                )));
            }
            record.status = AgentStatus::Cancelled;
            record.completed_at = Some(Utc::now());
            record.cancel.clone()
        };
        token.cancel();
        info!(agent_id = %id, "agent cancelled");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<AgentInfo> {
        self.agents.lock().unwrap().get(id).map(|a| a.info())
    }

    pub fn list_for_chat(&self, chat_id: ChatId) -> Vec<AgentInfo> {
        let mut list: Vec<AgentInfo> = self
            .agents
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.chat_id == chat_id)
            .map(|a| a.info())
            .collect();
        list.sort_by_key(|a| a.created_at);
        list
    }

    pub fn running_count(&self, chat_id: ChatId) -> usize {
        self.agents
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.chat_id == chat_id && a.status == AgentStatus::Running)
            .count()
    }

    /// Periodic sweep: cancel agents running longer than the TTL and purge
    /// agents that finished more than a TTL ago.
    pub fn cleanup(&self) {
        let now = Utc::now();
        let stuck_tokens: Vec<CancellationToken> = {
            let mut agents = self.agents.lock().unwrap();

            let mut tokens = Vec::new();
            for record in agents.values_mut() {
                if record.status == AgentStatus::Running && now - record.created_at > self.ttl {
                    warn!(agent_id = %record.id, "stuck agent cancelled by sweep");
                    record.status = AgentStatus::Cancelled;
                    record.completed_at = Some(now);
                    tokens.push(record.cancel.clone());
                }
            }

            agents.retain(|_, record| match record.completed_at {
                Some(done) => now - done <= self.ttl,
                None => true,
            });

            tokens
        };

        for token in stuck_tokens {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptStep, ScriptedProvider};

    fn manager_with(
        provider: ScriptedProvider,
        max_global: usize,
        max_per_chat: usize,
    ) -> (Arc<AgentManager>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let manager = AgentManager::new(
            Arc::new(provider),
            tx,
            "scripted-model".to_string(),
            RetryPolicy::new(0, 1),
            max_global,
            max_per_chat,
            30,
        );
        (manager, rx)
    }

    #[tokio::test]
    async fn completed_agent_delivers_result_to_chat() {
        let provider = ScriptedProvider::always(ScriptStep::Text("done: 42".to_string()));
        let (manager, mut rx) = manager_with(provider, 10, 3);

        let id = manager.spawn("compute the answer", 7).unwrap();
        let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(delivered.chat_id, 7);
        assert!(delivered.text.contains("done: 42"));

        let info = manager.get(&id).unwrap();
        assert_eq!(info.status, AgentStatus::Completed);
        assert_eq!(info.result.as_deref(), Some("done: 42"));
    }

    #[tokio::test]
    async fn failed_agent_reports_error() {
        let provider = ScriptedProvider::always(ScriptStep::ApiError(400, "bad".to_string()));
        let (manager, mut rx) = manager_with(provider, 10, 3);

        let id = manager.spawn("doomed", 7).unwrap();
        let delivered = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(delivered.text.contains("failed"));
        assert_eq!(manager.get(&id).unwrap().status, AgentStatus::Failed);
    }

    #[tokio::test]
    async fn per_chat_cap_rejects_fourth_agent() {
        // Slow provider: rate-limited forever with long delays never resolves
        // within the test, keeping agents in Running state.
        let provider = ScriptedProvider::always(ScriptStep::Hang);
        let (manager, _rx) = manager_with(provider, 10, 3);

        for _ in 0..3 {
            manager.spawn("task", 42).unwrap();
        }
        assert_eq!(manager.running_count(42), 3);

        let err = manager.spawn("one too many", 42).unwrap_err();
        assert!(matches!(err, CompanionError::QuotaExceeded(_)));
        // Global eviction must not fire for the per-chat case.
        assert_eq!(manager.running_count(42), 3);
    }

    #[tokio::test]
    async fn global_cap_evicts_oldest() {
        let provider = ScriptedProvider::always(ScriptStep::Hang);
        let (manager, _rx) = manager_with(provider, 2, 3);

        let first = manager.spawn("a", 1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let _second = manager.spawn("b", 2).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let _third = manager.spawn("c", 3).unwrap();

        // First agent was evicted to stay under the global cap of 2.
        assert!(manager.get(&first).is_none());
    }

    #[tokio::test]
    async fn cancel_sets_status_before_abort() {
        let provider = ScriptedProvider::always(ScriptStep::Hang);
        let (manager, mut rx) = manager_with(provider, 10, 3);

        let id = manager.spawn("long task", 5).unwrap();
        manager.cancel(&id).unwrap();

        let info = manager.get(&id).unwrap();
        assert_eq!(info.status, AgentStatus::Cancelled);
        assert!(info.completed_at.is_some());

        // No stale delivery arrives for the cancelled agent.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_unknown_agent_is_not_found() {
        let provider = ScriptedProvider::always(ScriptStep::Text("x".to_string()));
        let (manager, _rx) = manager_with(provider, 10, 3);
        assert!(matches!(
            manager.cancel("missing"),
            Err(CompanionError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_purges_finished_agents() {
        let provider = ScriptedProvider::always(ScriptStep::Text("ok".to_string()));
        let (tx, _rx) = mpsc::channel(16);
        let manager = AgentManager::new(
            Arc::new(provider),
            tx,
            "m".to_string(),
            RetryPolicy::new(0, 1),
            10,
            3,
            0, // zero TTL: everything finished is immediately stale
        );

        let id = manager.spawn("quick", 1).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(manager.get(&id).unwrap().status, AgentStatus::Completed);

        manager.cleanup();
        assert!(manager.get(&id).is_none());
    }
}
