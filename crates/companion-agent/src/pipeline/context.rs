//! Shared context interface between the message pipeline and its host.
//!
//! The composition root (the bot binary) implements this once; the pipeline
//! and the tools stay transport-agnostic. Defined here to avoid circular
//! dependencies: the transport crate depends on `companion-agent`, which
//! depends only on the state crates.

use companion_core::config::CompanionConfig;
use companion_memory::HybridSearch;
use companion_scheduler::JobStore;
use companion_sessions::SessionStore;
use companion_workspace::Workspace;

use crate::health::HealthCounters;
use crate::manager::AgentManager;
use crate::provider::LlmProvider;
use crate::tools::command::ProcessManager;
use crate::tools::pathsafe::PathPolicy;

pub trait MessageContext: Send + Sync {
    fn provider(&self) -> &dyn LlmProvider;
    fn sessions(&self) -> &SessionStore;
    fn memory(&self) -> &HybridSearch;
    fn workspace(&self) -> &Workspace;
    fn jobs(&self) -> &JobStore;
    fn agents(&self) -> &std::sync::Arc<AgentManager>;
    fn processes(&self) -> &std::sync::Arc<ProcessManager>;
    fn path_policy(&self) -> &std::sync::Arc<PathPolicy>;
    fn health(&self) -> &HealthCounters;
    fn config(&self) -> &CompanionConfig;
    fn http(&self) -> &reqwest::Client;
    /// Brave search key, when configured.
    fn search_key(&self) -> Option<std::sync::Arc<String>>;
}
