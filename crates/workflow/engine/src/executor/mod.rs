//! Step executors
//!
//! One executor per [`StepKind`], selected by an exhaustive match in
//! [`StepDispatcher::execute`]. Executors receive a [`StepContext`]
//! captured at dispatch time and return the step output or a
//! [`StepError`]. Retries and timeouts wrap the dispatcher in
//! [`retry::run_step`].

pub mod pure;
pub mod remote;
pub mod retry;
pub mod script;
pub mod suspend;

use crate::collaborators::{AgentExecutor, ToolInvoker, WebhookClient};
use crate::graph::CompiledGraph;
use crate::human::HumanInputHub;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workflow_types::{AgentId, ExecutionId, RoleId, StepError, StepId, StepKind, StepSpec};

pub use retry::run_step;

/// Result of one step execution
pub type StepOutcome = Result<Value, StepError>;

/// Reported by running steps to their execution's scheduler
#[derive(Debug)]
pub enum StepEvent {
    /// A human-input step is parked on its signal
    Waiting { step: StepId, generation: u64 },
    /// The step finished, successfully or not, after `attempts` attempts
    Finished {
        step: StepId,
        generation: u64,
        attempts: u32,
        outcome: StepOutcome,
    },
}

/// Everything an executor may look at
#[derive(Debug, Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    pub step_id: StepId,
    /// Dispatch generation; events carry it so stale reports can be discarded
    pub generation: u64,
    pub input: Value,
    /// Expression scope: variables, step outputs, `input` and `iteration`
    pub scope: Value,
    pub role_bindings: Arc<BTreeMap<RoleId, AgentId>>,
    /// 1-based attempt number
    pub attempt: u32,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    pub graph: Arc<CompiledGraph>,
    events: Option<mpsc::UnboundedSender<StepEvent>>,
}

impl StepContext {
    pub fn new(
        execution_id: ExecutionId,
        step_id: StepId,
        input: Value,
        scope: Value,
        graph: Arc<CompiledGraph>,
    ) -> Self {
        Self {
            execution_id,
            step_id,
            generation: 0,
            input,
            scope,
            role_bindings: Arc::new(BTreeMap::new()),
            attempt: 1,
            deadline: None,
            cancel: CancellationToken::new(),
            graph,
            events: None,
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_role_bindings(mut self, bindings: Arc<BTreeMap<RoleId, AgentId>>) -> Self {
        self.role_bindings = bindings;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<StepEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Tell the scheduler this step is parked on an external signal
    pub fn notify_waiting(&self) {
        if let Some(events) = &self.events {
            let _ = events.send(StepEvent::Waiting {
                step: self.step_id.clone(),
                generation: self.generation,
            });
        }
    }

    /// Report the final outcome to the scheduler
    pub fn report(&self, attempts: u32, outcome: StepOutcome) {
        if let Some(events) = &self.events {
            // the scheduler may already be gone after a terminal transition
            let _ = events.send(StepEvent::Finished {
                step: self.step_id.clone(),
                generation: self.generation,
                attempts,
                outcome,
            });
        }
    }

    /// Scope extended with extra top-level bindings
    pub fn scope_with(&self, extra: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        let mut scope = match &self.scope {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in extra {
            scope.insert(key.to_string(), value);
        }
        Value::Object(scope)
    }
}

/// Routes each step kind to its executor
pub struct StepDispatcher {
    agents: Arc<dyn AgentExecutor>,
    tools: Arc<dyn ToolInvoker>,
    webhooks: Arc<dyn WebhookClient>,
    human: HumanInputHub,
}

impl StepDispatcher {
    pub fn new(
        agents: Arc<dyn AgentExecutor>,
        tools: Arc<dyn ToolInvoker>,
        webhooks: Arc<dyn WebhookClient>,
        human: HumanInputHub,
    ) -> Self {
        Self {
            agents,
            tools,
            webhooks,
            human,
        }
    }

    pub fn human(&self) -> &HumanInputHub {
        &self.human
    }

    /// Run one attempt of `step`
    pub async fn execute(&self, step: &StepSpec, ctx: &StepContext) -> StepOutcome {
        match &step.kind {
            StepKind::AgentTask { role, task } => {
                remote::agent_task(self.agents.as_ref(), role, task, ctx).await
            }
            StepKind::ToolCall { tool, function } => {
                remote::tool_call(self.tools.as_ref(), tool, function, ctx).await
            }
            StepKind::Condition { expression } => pure::condition(expression, ctx),
            StepKind::Loop { items, map } => pure::map_items(items, map.as_deref(), ctx),
            StepKind::ParallelGroup => Ok(ctx.input.clone()),
            StepKind::Wait { duration_ms } => suspend::wait(*duration_ms, ctx).await,
            StepKind::Webhook {
                url,
                method,
                headers,
            } => remote::webhook(self.webhooks.as_ref(), *method, url, headers, ctx).await,
            StepKind::Script { command, args } => script::run(command, args, ctx).await,
            StepKind::HumanInput { prompt } => suspend::human_input(&self.human, prompt, ctx).await,
            StepKind::DataTransform { transform } => pure::transform(transform, ctx),
        }
    }
}
