use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (companionbot.toml + COMPANIONBOT_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// Home directory for all persisted state. Defaults to `~/.companionbot`.
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Chat ids allowed to talk to the bot. Empty = allow all.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    /// Minimum milliseconds between streaming message edits.
    #[serde(default = "default_edit_interval_ms")]
    pub edit_interval_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            allowed_chats: Vec::new(),
            edit_interval_ms: default_edit_interval_ms(),
        }
    }
}

/// Resource bounds. Every limit from the concurrency model is a field here
/// so deployments can tune them without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u64,
    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,
    #[serde(default = "default_max_pinned_tokens")]
    pub max_pinned_tokens: usize,
    #[serde(default = "default_summary_threshold_tokens")]
    pub summary_threshold_tokens: usize,
    #[serde(default = "default_min_recent")]
    pub min_recent: usize,
    #[serde(default = "default_max_summary_chunks")]
    pub max_summary_chunks: usize,
    #[serde(default = "default_max_history_load")]
    pub max_history_load: usize,
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    #[serde(default = "default_max_agents_per_chat")]
    pub max_agents_per_chat: usize,
    #[serde(default = "default_agent_ttl_minutes")]
    pub agent_ttl_minutes: u64,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    #[serde(default = "default_tool_result_max_chars")]
    pub tool_result_max_chars: usize,
    #[serde(default = "default_max_urls_per_turn")]
    pub max_urls_per_turn: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            session_ttl_hours: default_session_ttl_hours(),
            max_history_tokens: default_max_history_tokens(),
            max_pinned_tokens: default_max_pinned_tokens(),
            summary_threshold_tokens: default_summary_threshold_tokens(),
            min_recent: default_min_recent(),
            max_summary_chunks: default_max_summary_chunks(),
            max_history_load: default_max_history_load(),
            max_concurrent_agents: default_max_concurrent_agents(),
            max_agents_per_chat: default_max_agents_per_chat(),
            agent_ttl_minutes: default_agent_ttl_minutes(),
            max_tool_iterations: default_max_tool_iterations(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            tool_result_max_chars: default_tool_result_max_chars(),
            max_urls_per_turn: default_max_urls_per_turn(),
            max_image_bytes: default_max_image_bytes(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default timezone for cron jobs that don't specify one.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Cron expression for the daily briefing job.
    #[serde(default = "default_briefing_cron")]
    pub briefing_cron: String,
    /// Idle minutes before the heartbeat posts a proactive check-in.
    #[serde(default = "default_heartbeat_idle_minutes")]
    pub heartbeat_idle_minutes: u64,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            briefing_cron: default_briefing_cron(),
            heartbeat_idle_minutes: default_heartbeat_idle_minutes(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_min_vector_score")]
    pub min_vector_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            min_vector_score: default_min_vector_score(),
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            anthropic: AnthropicConfig::default(),
            telegram: TelegramConfig::default(),
            limits: Limits::default(),
            scheduler: SchedulerConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl CompanionConfig {
    /// Load config from a TOML file with COMPANIONBOT_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then
    /// `~/.companionbot/companionbot.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(|| default_home_dir().join("companionbot.toml"));

        let config: CompanionConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COMPANIONBOT_").split("_"))
            .extract()
            .map_err(|e| crate::error::CompanionError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home_dir.join("sessions")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.home_dir.join("memory")
    }

    pub fn fts_index_path(&self) -> PathBuf {
        self.memory_dir().join(".fts-index.db")
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.home_dir.join("cron-jobs.json")
    }
}

fn default_home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".companionbot")
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_edit_interval_ms() -> u64 {
    1500
}
fn default_max_sessions() -> usize {
    100
}
fn default_session_ttl_hours() -> u64 {
    24
}
fn default_max_history_tokens() -> usize {
    50_000
}
fn default_max_pinned_tokens() -> usize {
    4096
}
fn default_summary_threshold_tokens() -> usize {
    40_000
}
fn default_min_recent() -> usize {
    6
}
fn default_max_summary_chunks() -> usize {
    10
}
fn default_max_history_load() -> usize {
    50
}
fn default_max_concurrent_agents() -> usize {
    10
}
fn default_max_agents_per_chat() -> usize {
    3
}
fn default_agent_ttl_minutes() -> u64 {
    30
}
fn default_max_tool_iterations() -> usize {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_retry_delay_ms() -> u64 {
    1000
}
fn default_tool_result_max_chars() -> usize {
    10_000
}
fn default_max_urls_per_turn() -> usize {
    3
}
fn default_max_image_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_command_timeout_secs() -> u64 {
    30
}
fn default_timezone() -> String {
    "Asia/Seoul".to_string()
}
fn default_briefing_cron() -> String {
    "0 9 * * *".to_string()
}
fn default_heartbeat_idle_minutes() -> u64 {
    180
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_vector_weight() -> f32 {
    0.6
}
fn default_keyword_weight() -> f32 {
    0.4
}
fn default_min_vector_score() -> f32 {
    0.0
}
