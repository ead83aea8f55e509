//! Tool registry — assembles the canonical tool list for a turn.

use std::sync::Arc;

use crate::pipeline::context::MessageContext;
use crate::provider::ToolDefinition;

use super::agent_tools::{AgentStatusTool, SpawnAgentTool};
use super::command::{ProcessesTool, RunCommandTool};
use super::files::{EditFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
use super::memory_tools::{PinContextTool, SaveMemoryTool, SearchMemoryTool};
use super::schedule_tool::ScheduleTool;
use super::web::{WebFetchTool, WebSearchTool};
use super::{to_definitions, Tool};

/// Build the full tool list for one turn.
pub fn build_tools<C: MessageContext + 'static>(ctx: Arc<C>) -> Vec<Box<dyn Tool>> {
    let policy = Arc::clone(ctx.path_policy());
    let processes = Arc::clone(ctx.processes());
    let timeout = ctx.config().limits.command_timeout_secs;
    let http = ctx.http().clone();
    let search_key = ctx.search_key();

    vec![
        Box::new(ReadFileTool::new(Arc::clone(&policy))),
        Box::new(WriteFileTool::new(Arc::clone(&policy))),
        Box::new(EditFileTool::new(Arc::clone(&policy))),
        Box::new(ListFilesTool::new(policy)),
        Box::new(RunCommandTool::new(Arc::clone(&processes), timeout)),
        Box::new(ProcessesTool::new(processes)),
        Box::new(WebFetchTool::new(http.clone())),
        Box::new(WebSearchTool::new(http, search_key)),
        Box::new(SaveMemoryTool::new(Arc::clone(&ctx))),
        Box::new(SearchMemoryTool::new(Arc::clone(&ctx))),
        Box::new(PinContextTool::new(Arc::clone(&ctx))),
        Box::new(SpawnAgentTool::new(Arc::clone(&ctx))),
        Box::new(AgentStatusTool::new(Arc::clone(&ctx))),
        Box::new(ScheduleTool::new(ctx)),
    ]
}

/// Convert a tool list to API-level definitions for the LLM request.
pub fn tool_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    to_definitions(tools)
}

/// Names and descriptions for the prompt's tool section.
pub fn tool_catalog(tools: &[Box<dyn Tool>]) -> Vec<(String, String)> {
    tools
        .iter()
        .map(|t| (t.name().to_string(), t.description().to_string()))
        .collect()
}
