//! Workflow Engine: the main entry point
//!
//! The engine owns the definition registry, the capability registry and
//! one scheduler actor per live execution. It:
//! 1. Registers and compiles workflow definitions
//! 2. Binds roles to agents and starts executions
//! 3. Answers status queries and waits
//! 4. Cancels executions and delivers human input
//! 5. Recovers executions from their latest checkpoint
//!
//! Callers never touch the snapshot directly; the scheduler publishes a
//! status view after every checkpoint and the engine hands out copies.

use crate::capability_registry::CapabilityRegistry;
use crate::collaborators::{
    AgentExecutor, HttpWebhookClient, ToolInvoker, Unconfigured, WebhookClient,
};
use crate::config::{EngineConfig, StorageConfig};
use crate::definition_registry::{DefinitionRegistry, RegisteredDefinition};
use crate::executor::StepDispatcher;
use crate::graph::CompiledGraph;
use crate::human::HumanInputHub;
use crate::scheduler::{ExecutionServices, Scheduler};
use crate::store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use workflow_types::{
    AgentId, ExecutionId, ExecutionSnapshot, ExecutionStatus, RoleId, StepId, WorkflowDefinition,
    WorkflowDefinitionId, WorkflowError, WorkflowResult,
};

/// Live view of one execution held by the engine
struct ExecutionHandle {
    status: watch::Receiver<ExecutionStatus>,
    cancel: CancellationToken,
}

/// Builder for [`WorkflowEngine`]
///
/// Collaborators left unset fall back to stand-ins that fail every call
/// (agents, tools), a reqwest client (webhooks) and the store named by
/// the storage configuration.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    agents: Option<Arc<dyn AgentExecutor>>,
    tools: Option<Arc<dyn ToolInvoker>>,
    webhooks: Option<Arc<dyn WebhookClient>>,
    store: Option<Arc<dyn CheckpointStore>>,
    capabilities: Option<Arc<CapabilityRegistry>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_agent_executor(mut self, agents: Arc<dyn AgentExecutor>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_tool_invoker(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_webhook_client(mut self, webhooks: Arc<dyn WebhookClient>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share a capability registry with other components
    pub fn with_capabilities(mut self, capabilities: Arc<CapabilityRegistry>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let store: Arc<dyn CheckpointStore> = match (self.store, &self.config.storage) {
            (Some(store), _) => store,
            (None, StorageConfig::Memory) => Arc::new(InMemoryCheckpointStore::new()),
            (None, StorageConfig::File { path }) => Arc::new(FileCheckpointStore::new(path)),
        };

        let human = HumanInputHub::new();
        let dispatcher = StepDispatcher::new(
            self.agents.unwrap_or_else(|| Arc::new(Unconfigured)),
            self.tools.unwrap_or_else(|| Arc::new(Unconfigured)),
            self.webhooks
                .unwrap_or_else(|| Arc::new(HttpWebhookClient::new())),
            human.clone(),
        );

        let services = ExecutionServices {
            dispatcher: Arc::new(dispatcher),
            store,
            admission: Arc::new(Semaphore::new(
                self.config.scheduler.max_concurrent_steps.max(1),
            )),
            config: self.config.scheduler.clone(),
            checkpoint_keep: self.config.retention.checkpoint_keep,
        };

        WorkflowEngine {
            capabilities: self.capabilities.unwrap_or_default(),
            definitions: RwLock::new(DefinitionRegistry::new()),
            executions: DashMap::new(),
            human,
            services,
            config: self.config,
        }
    }
}

/// The workflow engine
pub struct WorkflowEngine {
    config: EngineConfig,
    capabilities: Arc<CapabilityRegistry>,
    definitions: RwLock<DefinitionRegistry>,
    services: ExecutionServices,
    human: HumanInputHub,
    executions: DashMap<ExecutionId, ExecutionHandle>,
}

impl WorkflowEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Agents and their advertised capabilities
    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.services.store
    }

    // ── Definitions ──────────────────────────────────────────────────

    /// Validate, compile and register a definition
    pub async fn register_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        self.definitions.write().await.register(definition)
    }

    pub async fn definition(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Arc<WorkflowDefinition>> {
        Ok(self.registered(id).await?.definition)
    }

    /// Compiled graph of a registered definition
    pub async fn graph(&self, id: &WorkflowDefinitionId) -> WorkflowResult<Arc<CompiledGraph>> {
        Ok(self.registered(id).await?.graph)
    }

    pub async fn definition_count(&self) -> usize {
        self.definitions.read().await.count()
    }

    async fn registered(&self, id: &WorkflowDefinitionId) -> WorkflowResult<RegisteredDefinition> {
        self.definitions.read().await.get(id).cloned()
    }

    // ── Execution lifecycle ──────────────────────────────────────────

    /// Start an execution of a registered definition
    ///
    /// Variables are checked against the definition's schema and roles
    /// are bound before anything runs; either failing rejects the
    /// submission. Returns once the first checkpoint is written.
    pub async fn submit(
        &self,
        definition_id: &WorkflowDefinitionId,
        vars: Map<String, Value>,
        bindings: BTreeMap<RoleId, AgentId>,
    ) -> WorkflowResult<ExecutionId> {
        let RegisteredDefinition { definition, graph } = self.registered(definition_id).await?;

        let vars = definition.resolve_variables(vars)?;
        let role_bindings = self.capabilities.bind_roles(
            &definition.roles,
            &bindings,
            &definition.roles_in_use(),
        )?;

        let execution_id = ExecutionId::generate();
        let mut snapshot = ExecutionSnapshot::new(
            execution_id.clone(),
            definition.id.clone(),
            graph.steps.keys(),
            graph.edge_count(),
            vars,
            role_bindings,
        );

        let budget = definition
            .max_duration_secs
            .map(std::time::Duration::from_secs)
            .or_else(|| self.config.scheduler.default_execution_timeout());
        if let Some(budget) = budget.and_then(|b| chrono::Duration::from_std(b).ok()) {
            snapshot = snapshot.with_deadline(Utc::now() + budget);
        }

        let mut scheduler = Scheduler::new(
            snapshot,
            graph,
            self.services.clone(),
            CancellationToken::new(),
        );
        scheduler.start().await?;

        tracing::info!(
            execution_id = %execution_id,
            definition = %definition_id,
            "Execution submitted"
        );
        self.spawn(scheduler);
        Ok(execution_id)
    }

    fn spawn(&self, scheduler: Scheduler) {
        let execution_id = scheduler.snapshot().execution_id.clone();
        let handle = ExecutionHandle {
            status: scheduler.subscribe(),
            cancel: scheduler.cancel_token(),
        };
        self.executions.insert(execution_id, handle);
        tokio::spawn(scheduler.run());
    }

    /// Current status of an execution
    ///
    /// Executions no longer held in memory are answered from their latest
    /// checkpoint.
    pub async fn status(&self, execution: &ExecutionId) -> WorkflowResult<ExecutionStatus> {
        if let Some(handle) = self.executions.get(execution) {
            return Ok(handle.status.borrow().clone());
        }
        self.services
            .store
            .load_latest_checkpoint(execution)
            .await
            .map_err(|e| WorkflowError::Persistence(e.to_string()))?
            .map(|checkpoint| checkpoint.snapshot.status())
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.clone()))
    }

    /// Wait until an execution reaches a terminal state
    pub async fn wait(&self, execution: &ExecutionId) -> WorkflowResult<ExecutionStatus> {
        let receiver = self
            .executions
            .get(execution)
            .map(|handle| handle.status.clone());
        let Some(mut rx) = receiver else {
            // Only finished executions outlive their in-memory handle
            let status = self.status(execution).await?;
            return match status.is_terminal() {
                true => Ok(status),
                false => Err(WorkflowError::ExecutionNotFound(execution.clone())),
            };
        };

        let reached = rx
            .wait_for(|status| status.is_terminal())
            .await
            .map(|status| status.clone());
        // Scheduler gone; its last published view is final
        Ok(reached.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// Request cancellation; cancelling a finished execution is a no-op
    pub fn cancel(&self, execution: &ExecutionId) -> WorkflowResult<()> {
        let handle = self
            .executions
            .get(execution)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.clone()))?;
        if !handle.status.borrow().is_terminal() {
            tracing::info!(execution_id = %execution, "Cancellation requested");
            handle.cancel.cancel();
        }
        Ok(())
    }

    /// Deliver a value to a step parked on human input
    pub fn supply_human_input(
        &self,
        execution: &ExecutionId,
        step: &StepId,
        value: Value,
    ) -> WorkflowResult<()> {
        if !self.executions.contains_key(execution) {
            return Err(WorkflowError::ExecutionNotFound(execution.clone()));
        }
        self.human.supply(execution, step, value)
    }

    /// Whether a step is currently parked on human input
    pub fn is_waiting_for_input(&self, execution: &ExecutionId, step: &StepId) -> bool {
        self.human.is_waiting(execution, step)
    }

    /// Resume an execution from its latest checkpoint
    ///
    /// Succeeded steps keep their outputs and are not re-run; steps that
    /// were in flight are dispatched again. Recovering an execution that
    /// is already running here is a no-op.
    pub async fn recover(&self, execution: &ExecutionId) -> WorkflowResult<()> {
        if let Some(handle) = self.executions.get(execution) {
            if !handle.status.borrow().is_terminal() {
                return Ok(());
            }
        }

        let checkpoint = self
            .services
            .store
            .load_latest_checkpoint(execution)
            .await
            .map_err(|e| WorkflowError::Persistence(e.to_string()))?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.clone()))?;
        let snapshot = checkpoint.snapshot;

        if snapshot.is_terminal() {
            let (_, status) = watch::channel(snapshot.status());
            self.executions.insert(
                execution.clone(),
                ExecutionHandle {
                    status,
                    cancel: CancellationToken::new(),
                },
            );
            return Ok(());
        }

        let graph = self.registered(&snapshot.definition_id).await?.graph;
        let mut scheduler = Scheduler::new(
            snapshot,
            graph,
            self.services.clone(),
            CancellationToken::new(),
        );
        scheduler.resume();

        tracing::info!(
            execution_id = %execution,
            sequence = checkpoint.sequence,
            "Execution recovered"
        );
        self.spawn(scheduler);
        Ok(())
    }

    /// Drop terminal executions older than the retention window
    ///
    /// Their newest checkpoint stays in the store so status queries keep
    /// working. Returns how many executions were dropped.
    pub async fn purge_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention.retention())
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let cutoff = Utc::now() - retention;

        let expired: Vec<ExecutionId> = self
            .executions
            .iter()
            .filter(|entry| {
                let status = entry.status.borrow();
                status.is_terminal() && status.finished_at.map(|at| at <= cutoff).unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for execution in &expired {
            self.executions.remove(execution);
            if let Err(e) = self.services.store.prune(execution, 1).await {
                tracing::warn!(execution_id = %execution, error = %e, "Checkpoint pruning failed");
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Purged expired executions");
        }
        expired.len()
    }

    /// Status of every execution held in memory, in ID order
    pub fn list_executions(&self) -> Vec<ExecutionStatus> {
        let mut out: Vec<ExecutionStatus> = self
            .executions
            .iter()
            .map(|entry| entry.status.borrow().clone())
            .collect();
        out.sort_by(|a, b| a.execution_id.cmp(&b.execution_id));
        out
    }

    /// Executions still running
    pub fn active_count(&self) -> usize {
        self.executions
            .iter()
            .filter(|entry| !entry.status.borrow().is_terminal())
            .count()
    }
}
