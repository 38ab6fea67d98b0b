//! Executors that delegate to external collaborators

use super::{StepContext, StepOutcome};
use crate::collaborators::{AgentExecutor, ToolInvoker, WebhookClient};
use serde_json::json;
use std::collections::BTreeMap;
use workflow_types::{ErrorKind, HttpMethod, RoleId, StepError};

/// Invoke the agent bound to `role` with `{task, input, role, attempt}`
pub async fn agent_task(
    agents: &dyn AgentExecutor,
    role: &RoleId,
    task: &str,
    ctx: &StepContext,
) -> StepOutcome {
    let agent = ctx.role_bindings.get(role).ok_or_else(|| {
        StepError::new(
            ErrorKind::Validation,
            format!("role '{}' has no bound agent", role),
        )
    })?;

    let payload = json!({
        "task": task,
        "input": ctx.input,
        "role": role,
        "attempt": ctx.attempt,
    });

    tracing::debug!(
        execution_id = %ctx.execution_id,
        step_id = %ctx.step_id,
        agent = %agent,
        attempt = ctx.attempt,
        "Invoking agent"
    );

    agents
        .invoke(agent, payload, ctx.deadline, ctx.cancel.clone())
        .await
        .map_err(StepError::from)
}

/// Call `tool.function` with the step input as parameters
pub async fn tool_call(
    tools: &dyn ToolInvoker,
    tool: &str,
    function: &str,
    ctx: &StepContext,
) -> StepOutcome {
    tracing::debug!(
        execution_id = %ctx.execution_id,
        step_id = %ctx.step_id,
        tool,
        function,
        "Calling tool"
    );

    tools
        .call(tool, function, ctx.input.clone(), ctx.deadline, ctx.cancel.clone())
        .await
        .map_err(StepError::from)
}

/// Send the step input to `url`; the output is the response body
pub async fn webhook(
    client: &dyn WebhookClient,
    method: HttpMethod,
    url: &str,
    headers: &BTreeMap<String, String>,
    ctx: &StepContext,
) -> StepOutcome {
    tracing::debug!(
        execution_id = %ctx.execution_id,
        step_id = %ctx.step_id,
        %method,
        url,
        "Sending webhook"
    );

    client
        .send(method, url, headers, &ctx.input)
        .await
        .map_err(StepError::from)
}
