//! Application state — the one place all singletons are wired together.

use std::sync::Arc;

use tokio::sync::mpsc;

use companion_agent::anthropic::AnthropicProvider;
use companion_agent::health::HealthCounters;
use companion_agent::manager::AgentManager;
use companion_agent::pipeline::context::MessageContext;
use companion_agent::provider::LlmProvider;
use companion_agent::retry::RetryPolicy;
use companion_agent::tools::command::ProcessManager;
use companion_agent::tools::pathsafe::PathPolicy;
use companion_core::config::CompanionConfig;
use companion_core::model::ModelTier;
use companion_core::types::Outbound;
use companion_core::{secrets, CompanionError};
use companion_memory::{FtsIndex, HashEmbedder, HybridSearch, VectorStore};
use companion_scheduler::JobStore;
use companion_sessions::{SessionLog, SessionStore};
use companion_telegram::{ChatQueues, PendingResets, TelegramAppContext};
use companion_workspace::Workspace;

pub struct AppState {
    provider: Arc<AnthropicProvider>,
    sessions: SessionStore,
    memory: HybridSearch,
    workspace: Workspace,
    jobs: Arc<JobStore>,
    agents: Arc<AgentManager>,
    processes: Arc<ProcessManager>,
    policy: Arc<PathPolicy>,
    health: HealthCounters,
    config: CompanionConfig,
    http: reqwest::Client,
    search_key: Option<Arc<String>>,
    chat_queues: ChatQueues,
    pending_resets: PendingResets,
    outbound_tx: mpsc::Sender<Outbound>,
}

impl AppState {
    /// Wire up every subsystem. Fails on missing required secrets or an
    /// unreadable persistent store — both misconfigurations.
    pub fn build(
        config: CompanionConfig,
        outbound_tx: mpsc::Sender<Outbound>,
    ) -> Result<Arc<Self>, CompanionError> {
        std::fs::create_dir_all(&config.home_dir)?;

        let api_key = secrets::require(secrets::ANTHROPIC_API_KEY)?;
        let provider = Arc::new(AnthropicProvider::new(
            api_key,
            Some(config.anthropic.base_url.clone()),
        ));

        let sessions = SessionStore::new(
            SessionLog::new(config.sessions_dir()),
            config.limits.clone(),
        );

        let fts = FtsIndex::open(&config.fts_index_path())
            .map_err(|e| CompanionError::Persistence(e.to_string()))?;
        let memory = HybridSearch::new(
            fts,
            VectorStore::new(Arc::new(HashEmbedder::new())),
            config.search.vector_weight,
            config.search.keyword_weight,
            config.search.min_vector_score,
        );

        let workspace = Workspace::new(config.home_dir.clone());

        let default_tz: chrono_tz::Tz = config
            .scheduler
            .timezone
            .parse()
            .map_err(|_| CompanionError::Config(format!(
                "invalid scheduler timezone '{}'",
                config.scheduler.timezone
            )))?;
        let jobs = Arc::new(
            JobStore::load(config.jobs_path(), default_tz)
                .map_err(|e| CompanionError::Persistence(e.to_string()))?,
        );

        let retry = RetryPolicy::new(config.limits.max_retries, config.limits.base_retry_delay_ms);
        let agents = AgentManager::new(
            Arc::clone(&provider) as Arc<dyn LlmProvider>,
            outbound_tx.clone(),
            ModelTier::Sonnet.api_id().to_string(),
            retry,
            config.limits.max_concurrent_agents,
            config.limits.max_agents_per_chat,
            config.limits.agent_ttl_minutes,
        );

        let state = Arc::new(Self {
            provider,
            sessions,
            memory,
            workspace,
            jobs,
            agents,
            processes: Arc::new(ProcessManager::new()),
            policy: Arc::new(PathPolicy::new(config.home_dir.clone())),
            health: HealthCounters::new(),
            http: reqwest::Client::new(),
            search_key: secrets::resolve(secrets::BRAVE_API_KEY).map(Arc::new),
            chat_queues: ChatQueues::new(),
            pending_resets: PendingResets::new(),
            outbound_tx,
            config,
        });

        // Warm the keyword index from the workspace memory files; the vector
        // side rebuilds lazily on first query.
        let docs = state.workspace.memory_documents();
        if let Err(e) = state.memory.reindex_all(&docs) {
            tracing::warn!(error = %e, "startup memory reindex failed");
        }

        Ok(state)
    }

    pub fn jobs_arc(&self) -> Arc<JobStore> {
        Arc::clone(&self.jobs)
    }

    pub fn outbound(&self) -> mpsc::Sender<Outbound> {
        self.outbound_tx.clone()
    }
}

impl MessageContext for AppState {
    fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }
    fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
    fn memory(&self) -> &HybridSearch {
        &self.memory
    }
    fn workspace(&self) -> &Workspace {
        &self.workspace
    }
    fn jobs(&self) -> &JobStore {
        &self.jobs
    }
    fn agents(&self) -> &Arc<AgentManager> {
        &self.agents
    }
    fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }
    fn path_policy(&self) -> &Arc<PathPolicy> {
        &self.policy
    }
    fn health(&self) -> &HealthCounters {
        &self.health
    }
    fn config(&self) -> &CompanionConfig {
        &self.config
    }
    fn http(&self) -> &reqwest::Client {
        &self.http
    }
    fn search_key(&self) -> Option<Arc<String>> {
        self.search_key.clone()
    }
}

impl TelegramAppContext for AppState {
    fn chat_queues(&self) -> &ChatQueues {
        &self.chat_queues
    }
    fn pending_resets(&self) -> &PendingResets {
        &self.pending_resets
    }
}
