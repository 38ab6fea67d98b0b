//! Local collaborators for running definitions without a fleet
//!
//! Agents and tools echo what they were asked to do, which is enough to
//! exercise a definition's topology, guards and data flow.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workflow_engine::{AgentExecutor, CollaboratorResult, ToolInvoker};
use workflow_types::AgentId;

/// Agent executor that replies with the task it received
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoAgent;

#[async_trait]
impl AgentExecutor for EchoAgent {
    async fn invoke(
        &self,
        agent: &AgentId,
        payload: Value,
        _deadline: Option<Instant>,
        _cancel: CancellationToken,
    ) -> CollaboratorResult {
        tracing::info!(agent = %agent, task = %payload["task"], "Echo agent invoked");
        Ok(json!({
            "agent": agent,
            "task": payload["task"],
            "input": payload["input"],
        }))
    }
}

/// Tool invoker that replies with the call it received
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTool;

#[async_trait]
impl ToolInvoker for EchoTool {
    async fn call(
        &self,
        tool: &str,
        function: &str,
        params: Value,
        _deadline: Option<Instant>,
        _cancel: CancellationToken,
    ) -> CollaboratorResult {
        tracing::info!(tool, function, "Echo tool called");
        Ok(json!({
            "tool": tool,
            "function": function,
            "params": params,
        }))
    }
}
