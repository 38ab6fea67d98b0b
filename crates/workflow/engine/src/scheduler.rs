//! Graph scheduler
//!
//! One [`Scheduler`] actor drives one execution. It owns the execution
//! snapshot outright, so ready-set mutation is single-threaded; step work
//! runs on spawned tasks that report back over a channel. Every durable
//! transition is checkpointed before further steps are dispatched.
//!
//! Readiness is derived from edge traversal state:
//!
//! - a step completing resolves its outgoing edges to `taken` or `skipped`
//! - a `wait_for_all` step is ready once every inbound forward edge is
//!   resolved and at least one was taken
//! - a `wait_for_first_success` step is ready on the first taken edge;
//!   the sources of its unresolved edges are cancelled
//! - a step whose inbound edges all resolved without any taken is skipped,
//!   and its own outgoing edges are skipped in turn

use crate::config::SchedulerConfig;
use crate::executor::{run_step, StepContext, StepDispatcher, StepEvent, StepOutcome};
use crate::graph::CompiledGraph;
use crate::store::CheckpointStore;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use workflow_types::{
    AgentId, Checkpoint, EdgeKind, EdgeState, ErrorKind, ExecutionFailure, ExecutionSnapshot,
    ExecutionState, ExecutionStatus, FailurePolicy, JoinPolicy, RoleId, StepError, StepId,
    StepSpec, StepStatus, WorkflowError, WorkflowResult,
};

/// Shared services every execution of an engine uses
#[derive(Clone)]
pub struct ExecutionServices {
    pub dispatcher: Arc<StepDispatcher>,
    pub store: Arc<dyn CheckpointStore>,
    /// Engine-wide admission for running steps
    pub admission: Arc<Semaphore>,
    pub config: SchedulerConfig,
    /// Checkpoints kept once the execution is terminal
    pub checkpoint_keep: usize,
}

/// Where a successful step sends control
enum Route {
    /// Re-enter the loop closed by this loop-back edge
    Loop(usize),
    /// Resolve forward edges
    Forward(Vec<(usize, EdgeState)>),
}

struct InFlight {
    generation: u64,
    input: Value,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
}

/// Actor driving a single execution to a terminal state
pub struct Scheduler {
    snapshot: ExecutionSnapshot,
    graph: Arc<CompiledGraph>,
    services: ExecutionServices,
    bindings: Arc<BTreeMap<RoleId, AgentId>>,
    cancel: CancellationToken,
    status: watch::Sender<ExecutionStatus>,
    events_tx: mpsc::UnboundedSender<StepEvent>,
    events_rx: mpsc::UnboundedReceiver<StepEvent>,
    in_flight: HashMap<StepId, InFlight>,
}

impl Scheduler {
    pub fn new(
        snapshot: ExecutionSnapshot,
        graph: Arc<CompiledGraph>,
        services: ExecutionServices,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(snapshot.status());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let bindings = Arc::new(snapshot.role_bindings.clone());
        Self {
            snapshot,
            graph,
            services,
            bindings,
            cancel,
            status,
            events_tx,
            events_rx,
            in_flight: HashMap::new(),
        }
    }

    /// Receiver of status updates, published after every checkpoint
    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.status.subscribe()
    }

    /// Token that cancels the whole execution
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn snapshot(&self) -> &ExecutionSnapshot {
        &self.snapshot
    }

    /// Mark the entry step ready and write the first checkpoint
    pub async fn start(&mut self) -> WorkflowResult<()> {
        let entry = self.graph.entry.clone();
        self.snapshot.advance(&entry, StepStatus::Ready)?;
        self.persist()
            .await
            .map_err(|failure| WorkflowError::Persistence(failure.message))
    }

    /// Prepare a snapshot loaded from a checkpoint for another run
    ///
    /// Steps that were running or waiting go back to ready under a new
    /// generation; nothing already succeeded is touched.
    pub fn resume(&mut self) -> Vec<StepId> {
        let requeued = self.snapshot.requeue_in_flight();
        if !requeued.is_empty() {
            info!(
                execution_id = %self.snapshot.execution_id,
                steps = requeued.len(),
                "Requeued in-flight steps"
            );
        }
        requeued
    }

    /// Run until the execution is terminal; returns the final status
    #[instrument(skip(self), fields(execution_id = %self.snapshot.execution_id))]
    pub async fn run(mut self) -> ExecutionStatus {
        let deadline = self.deadline();
        let cancel = self.cancel.clone();
        debug!(steps = self.graph.step_count(), "Scheduler started");

        while !self.snapshot.is_terminal() {
            if let Err(failure) = self.dispatch_ready().await {
                self.abort(failure);
                break;
            }
            if self.snapshot.is_terminal() {
                break;
            }
            if self.in_flight.is_empty() && self.next_ready().is_none() {
                self.complete();
                break;
            }

            let blocked = self.admission_blocked();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => self.cancel_all(),
                _ = sleep_until(deadline) => {
                    self.abort(ExecutionFailure::execution(
                        ErrorKind::Timeout,
                        "execution exceeded its time budget",
                    ));
                }
                Some(event) = self.events_rx.recv() => {
                    if let Err(failure) = self.handle_event(event).await {
                        self.abort(failure);
                    }
                }
                permit = self.services.admission.clone().acquire_owned(), if blocked => {
                    if let Ok(permit) = permit {
                        if let Err(failure) = self.dispatch_next(permit).await {
                            self.abort(failure);
                        }
                    }
                }
            }
        }

        self.finalize().await
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn limit(&self) -> usize {
        self.services.config.max_concurrent_steps_per_execution.max(1)
    }

    fn next_ready(&self) -> Option<StepId> {
        self.snapshot
            .steps
            .iter()
            .find(|(id, s)| s.status == StepStatus::Ready && !self.in_flight.contains_key(*id))
            .map(|(id, _)| id.clone())
    }

    /// Ready work exists and only the engine-wide ceiling holds it back
    fn admission_blocked(&self) -> bool {
        self.in_flight.len() < self.limit() && self.next_ready().is_some()
    }

    async fn dispatch_ready(&mut self) -> Result<(), ExecutionFailure> {
        while self.in_flight.len() < self.limit() && !self.snapshot.is_terminal() {
            if self.next_ready().is_none() {
                break;
            }
            let Ok(permit) = self.services.admission.clone().try_acquire_owned() else {
                break;
            };
            self.dispatch_next(permit).await?;
        }
        Ok(())
    }

    async fn dispatch_next(&mut self, permit: OwnedSemaphorePermit) -> Result<(), ExecutionFailure> {
        match self.next_ready() {
            Some(id) => self.dispatch(id, permit).await,
            None => Ok(()),
        }
    }

    async fn dispatch(&mut self, id: StepId, permit: OwnedSemaphorePermit) -> Result<(), ExecutionFailure> {
        let spec = self
            .graph
            .step(&id)
            .cloned()
            .ok_or_else(|| internal(WorkflowError::StepNotFound(id.clone())))?;

        let input = match self.input_for(&id, &spec) {
            Ok(input) => input,
            Err(error) => {
                drop(permit);
                self.snapshot
                    .advance(&id, StepStatus::Running)
                    .map_err(internal)?;
                self.fail_step(&id, error, Value::Null);
                self.propagate();
                return self.persist().await;
            }
        };

        self.snapshot
            .advance(&id, StepStatus::Running)
            .map_err(internal)?;
        let generation = self.snapshot.step(&id).map(|s| s.generation).unwrap_or(0);
        let token = self.cancel.child_token();
        self.in_flight.insert(
            id.clone(),
            InFlight {
                generation,
                input: input.clone(),
                token: token.clone(),
                _permit: permit,
            },
        );
        self.persist().await?;

        let scope = self.scope(&id, Some(&input), None);
        let ctx = StepContext::new(
            self.snapshot.execution_id.clone(),
            id.clone(),
            input,
            scope,
            self.graph.clone(),
        )
        .with_generation(generation)
        .with_role_bindings(self.bindings.clone())
        .with_cancel(token)
        .with_events(self.events_tx.clone());

        debug!(step_id = %id, kind = spec.kind.name(), generation, "Step dispatched");

        let dispatcher = self.services.dispatcher.clone();
        let default_timeout = self.services.config.default_step_timeout();
        let reporter = ctx.clone();
        let work = tokio::spawn(async move {
            run_step(&dispatcher, &spec, ctx, default_timeout).await
        });
        tokio::spawn(supervise(work, reporter));
        Ok(())
    }

    /// Input captured for a step at dispatch time
    ///
    /// Loop and branch re-entry supply their own input. Otherwise the
    /// step's input expression decides; without one a step receives the
    /// output of its single taken predecessor, an object of all taken
    /// predecessors' outputs, or the `input` variable at the entry.
    fn input_for(&self, id: &StepId, spec: &StepSpec) -> Result<Value, StepError> {
        if let Some(input) = self.snapshot.step(id).and_then(|s| s.reentry_input.clone()) {
            return Ok(input);
        }

        if let Some(expression) = &spec.input {
            let scope = self.scope(id, None, None);
            return self
                .graph
                .evaluate(expression, &scope)
                .map_err(|e| StepError::expression(format!("input of '{}': {}", id, e)));
        }

        let sources: BTreeSet<&StepId> = self
            .graph
            .forward_inbound(id)
            .filter(|&i| self.snapshot.edges[i] == EdgeState::Taken)
            .map(|i| &self.graph.edge(i).from)
            .collect();

        Ok(match sources.len() {
            0 => self
                .snapshot
                .vars
                .get("input")
                .cloned()
                .unwrap_or_else(|| Value::Object(self.snapshot.vars.clone())),
            1 => sources
                .iter()
                .next()
                .and_then(|src| self.snapshot.outputs.get(*src))
                .cloned()
                .unwrap_or(Value::Null),
            _ => Value::Object(
                sources
                    .into_iter()
                    .map(|src| {
                        let out = self.snapshot.outputs.get(src).cloned().unwrap_or(Value::Null);
                        (src.0.clone(), out)
                    })
                    .collect(),
            ),
        })
    }

    /// Expression scope: variables at top level plus `vars`, `steps`,
    /// `iteration` and, when known, `input` and `output`
    fn scope(&self, id: &StepId, input: Option<&Value>, output: Option<&Value>) -> Value {
        let mut scope: Map<String, Value> = self.snapshot.vars.clone();
        scope.insert("vars".into(), Value::Object(self.snapshot.vars.clone()));
        scope.insert("steps".into(), self.snapshot.outputs_object());
        scope.insert("iteration".into(), json!(self.iteration_of(id)));
        if let Some(input) = input {
            scope.insert("input".into(), input.clone());
        }
        if let Some(output) = output {
            scope.insert("output".into(), output.clone());
        }
        Value::Object(scope)
    }

    /// Current iteration of the innermost loop containing `id`, 1 outside loops
    fn iteration_of(&self, id: &StepId) -> u32 {
        self.graph
            .loop_bodies
            .iter()
            .filter(|(_, body)| body.contains(id))
            .min_by_key(|(_, body)| body.len())
            .and_then(|(idx, _)| {
                let head = &self.graph.edge(*idx).to;
                self.snapshot.iterations.get(head).copied()
            })
            .unwrap_or(1)
    }

    // ── Completion ───────────────────────────────────────────────────

    async fn handle_event(&mut self, event: StepEvent) -> Result<(), ExecutionFailure> {
        match event {
            StepEvent::Waiting { step, generation } => {
                if !self.is_current(&step, generation) {
                    return Ok(());
                }
                if self.snapshot.status_of(&step) == Some(StepStatus::Running) {
                    self.snapshot
                        .advance(&step, StepStatus::Waiting)
                        .map_err(internal)?;
                    info!(step_id = %step, "Step waiting for input");
                    self.persist().await?;
                }
            }
            StepEvent::Finished {
                step,
                generation,
                attempts,
                outcome,
            } => {
                if !self.is_current(&step, generation) {
                    debug!(step_id = %step, generation, "Discarding stale completion");
                    return Ok(());
                }
                let Some(flight) = self.in_flight.remove(&step) else {
                    return Ok(());
                };
                if let Ok(state) = self.snapshot.step_mut(&step) {
                    state.attempts = attempts;
                }

                match outcome {
                    Ok(output) => self.succeed(&step, output, flight.input),
                    Err(error) => self.fail_step(&step, error, flight.input),
                }
                self.propagate();
                self.persist().await?;
            }
        }
        Ok(())
    }

    fn is_current(&self, step: &StepId, generation: u64) -> bool {
        self.in_flight
            .get(step)
            .map(|f| f.generation == generation)
            .unwrap_or(false)
    }

    fn succeed(&mut self, id: &StepId, output: Value, input: Value) {
        let route = match self.plan_route(id, &output) {
            Ok(route) => route,
            Err(error) => return self.fail_step(id, error, input),
        };

        let output_var = self.graph.step(id).and_then(|s| s.output.clone());
        self.set_status(id, StepStatus::Succeeded);
        self.snapshot
            .bind_output(id, output.clone(), output_var.as_deref());
        if self.graph.terminals.contains(id) {
            self.snapshot.output = Some(output.clone());
        }
        info!(step_id = %id, "Step succeeded");

        match route {
            Route::Loop(edge) => self.reenter(edge, output),
            Route::Forward(resolutions) => {
                for (idx, state) in resolutions {
                    self.snapshot.edges[idx] = state;
                }
            }
        }
    }

    /// Decide where control goes after `id` produced `output`
    ///
    /// Loop-back edges are considered first. Conditional edges require
    /// exactly one true guard.
    fn plan_route(&self, id: &StepId, output: &Value) -> Result<Route, StepError> {
        let scope = self.scope(id, None, Some(output));
        let guard_error =
            |guard: &str, e: workflow_dsl::DslError| StepError::expression(format!("guard '{}': {}", guard, e));

        for idx in self.graph.loop_backs(id) {
            let edge = self.graph.edge(idx);
            let EdgeKind::LoopBack {
                guard,
                max_iterations,
            } = &edge.kind
            else {
                continue;
            };
            let done = self.snapshot.iterations.get(&edge.to).copied().unwrap_or(1);
            if done >= *max_iterations {
                continue;
            }
            if self
                .graph
                .evaluate_bool(guard, &scope)
                .map_err(|e| guard_error(guard, e))?
            {
                return Ok(Route::Loop(idx));
            }
        }

        let mut resolutions = Vec::new();
        let mut guarded = 0;
        let mut passed = 0;
        for idx in self.graph.forward_outbound(id) {
            match &self.graph.edge(idx).kind {
                EdgeKind::Conditional { guard } => {
                    guarded += 1;
                    let open = self
                        .graph
                        .evaluate_bool(guard, &scope)
                        .map_err(|e| guard_error(guard, e))?;
                    if open {
                        passed += 1;
                    }
                    let state = if open { EdgeState::Taken } else { EdgeState::Skipped };
                    resolutions.push((idx, state));
                }
                _ => resolutions.push((idx, EdgeState::Taken)),
            }
        }

        if guarded > 0 && passed != 1 {
            return Err(StepError::ambiguous(format!(
                "{} of {} branch guards are true",
                passed, guarded
            )));
        }
        Ok(Route::Forward(resolutions))
    }

    /// Reset the loop body closed by `edge` and make its head ready again
    fn reenter(&mut self, edge: usize, output: Value) {
        let graph = self.graph.clone();
        let head = graph.edge(edge).to.clone();
        let body = graph.loop_body(edge).cloned().unwrap_or_default();

        for id in &body {
            if let Some(flight) = self.in_flight.remove(id) {
                flight.token.cancel();
            }
        }
        self.snapshot.reset_for_loop(body.iter());
        for (idx, e) in graph.edges.iter().enumerate() {
            if !e.is_loop_back() && body.contains(&e.from) && body.contains(&e.to) {
                self.snapshot.edges[idx] = EdgeState::Pending;
            }
        }

        let iteration = {
            let count = self.snapshot.iterations.entry(head.clone()).or_insert(1);
            *count += 1;
            *count
        };
        self.set_status(&head, StepStatus::Ready);
        if let Ok(state) = self.snapshot.step_mut(&head) {
            state.reentry_input = Some(output);
        }
        info!(step_id = %head, iteration, "Loop re-entered");
    }

    /// Apply the failure policy of a step that ended in error
    fn fail_step(&mut self, id: &StepId, error: StepError, input: Value) {
        let spec = self.graph.step(id).cloned();
        let policy = spec.as_ref().map(|s| s.on_failure.clone()).unwrap_or_default();
        let final_status = if error.kind == ErrorKind::Cancelled {
            StepStatus::Cancelled
        } else {
            StepStatus::Failed
        };
        if let Ok(state) = self.snapshot.step_mut(id) {
            state.error = Some(error.clone());
        }

        match policy {
            FailurePolicy::Skip => {
                warn!(step_id = %id, error = %error, "Step failed, skipping");
                self.set_status(id, StepStatus::Skipped);
                let output_var = spec.and_then(|s| s.output);
                self.snapshot
                    .bind_output(id, Value::Null, output_var.as_deref());
                let resolutions: Vec<(usize, EdgeState)> = self
                    .graph
                    .forward_outbound(id)
                    .map(|i| match self.graph.edge(i).kind {
                        EdgeKind::Conditional { .. } => (i, EdgeState::Skipped),
                        _ => (i, EdgeState::Taken),
                    })
                    .collect();
                for (idx, state) in resolutions {
                    self.snapshot.edges[idx] = state;
                }
            }
            FailurePolicy::Branch(target)
                if self.snapshot.status_of(&target) == Some(StepStatus::Pending) =>
            {
                warn!(step_id = %id, target = %target, error = %error, "Step failed, branching");
                self.set_status(id, final_status);
                self.skip_outbound(id);
                self.set_status(&target, StepStatus::Ready);
                if let Ok(state) = self.snapshot.step_mut(&target) {
                    state.reentry_input = Some(json!({"error": error, "input": input}));
                }
            }
            _ => {
                error!(step_id = %id, error = %error, "Step failed, aborting execution");
                self.set_status(id, final_status);
                self.abort(ExecutionFailure::at_step(id.clone(), &error));
            }
        }
    }

    /// Resolve readiness of pending steps until nothing changes
    fn propagate(&mut self) {
        if self.snapshot.is_terminal() {
            return;
        }
        let graph = self.graph.clone();
        loop {
            let mut changed = false;
            for id in self.snapshot.steps_with(StepStatus::Pending) {
                let inbound: Vec<usize> = graph.forward_inbound(&id).collect();
                if inbound.is_empty() {
                    continue;
                }
                let taken = inbound
                    .iter()
                    .any(|&i| self.snapshot.edges[i] == EdgeState::Taken);
                let resolved = inbound.iter().all(|&i| self.snapshot.edges[i].is_resolved());
                let join = graph.step(&id).map(|s| s.join).unwrap_or_default();

                match join {
                    JoinPolicy::WaitForFirstSuccess if taken => {
                        self.set_status(&id, StepStatus::Ready);
                        for &i in &inbound {
                            if self.snapshot.edges[i] == EdgeState::Pending {
                                self.snapshot.edges[i] = EdgeState::Skipped;
                                let sibling = graph.edge(i).from.clone();
                                self.cancel_step(&sibling);
                            }
                        }
                    }
                    JoinPolicy::WaitForAll if resolved && taken => {
                        self.set_status(&id, StepStatus::Ready);
                    }
                    _ if resolved => {
                        debug!(step_id = %id, "No inbound edge taken, skipping");
                        self.set_status(&id, StepStatus::Skipped);
                        self.skip_outbound(&id);
                    }
                    _ => continue,
                }
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    fn skip_outbound(&mut self, id: &StepId) {
        let outbound: Vec<usize> = self.graph.forward_outbound(id).collect();
        for idx in outbound {
            if self.snapshot.edges[idx] == EdgeState::Pending {
                self.snapshot.edges[idx] = EdgeState::Skipped;
            }
        }
    }

    /// Cancel one step that lost a first-success race
    fn cancel_step(&mut self, id: &StepId) {
        if let Some(flight) = self.in_flight.remove(id) {
            flight.token.cancel();
        }
        if matches!(self.snapshot.status_of(id), Some(s) if !s.is_terminal()) {
            self.set_status(id, StepStatus::Cancelled);
            if let Ok(state) = self.snapshot.step_mut(id) {
                state.error = Some(StepError::cancelled());
            }
            self.skip_outbound(id);
            debug!(step_id = %id, "Sibling cancelled");
        }
    }

    fn set_status(&mut self, id: &StepId, status: StepStatus) {
        if let Err(e) = self.snapshot.advance(id, status) {
            warn!(step_id = %id, error = %e, "Ignoring illegal status change");
        }
    }

    // ── Terminal transitions ─────────────────────────────────────────

    /// Stop in-flight work and cancel every step that has not finished
    fn cancel_outstanding(&mut self) {
        for (_, flight) in self.in_flight.drain() {
            flight.token.cancel();
        }
        let open: Vec<StepId> = self
            .snapshot
            .steps
            .iter()
            .filter(|(_, s)| !s.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for id in open {
            self.set_status(&id, StepStatus::Cancelled);
        }
    }

    fn abort(&mut self, failure: ExecutionFailure) {
        if self.snapshot.is_terminal() {
            return;
        }
        error!(
            kind = %failure.kind,
            step_id = ?failure.step_id,
            message = %failure.message,
            "Execution failed"
        );
        self.cancel_outstanding();
        self.snapshot.finish(ExecutionState::Failed, Some(failure));
    }

    fn cancel_all(&mut self) {
        if self.snapshot.is_terminal() {
            return;
        }
        info!("Execution cancelled");
        self.cancel_outstanding();
        self.snapshot.finish(ExecutionState::Cancelled, None);
    }

    fn complete(&mut self) {
        for id in self.snapshot.steps_with(StepStatus::Pending) {
            self.set_status(&id, StepStatus::Skipped);
        }
        info!("Execution completed");
        self.snapshot.finish(ExecutionState::Completed, None);
    }

    // ── Persistence ──────────────────────────────────────────────────

    async fn persist(&mut self) -> Result<(), ExecutionFailure> {
        self.snapshot.sequence += 1;
        let checkpoint = Checkpoint::capture(&self.snapshot);
        let saved = self.services.store.save_checkpoint(&checkpoint).await;
        self.publish();
        saved.map_err(|e| {
            error!(sequence = checkpoint.sequence, error = %e, "Checkpoint write failed");
            ExecutionFailure::execution(ErrorKind::Persistence, e.to_string())
        })
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot.status());
    }

    async fn finalize(mut self) -> ExecutionStatus {
        if self.persist().await.is_ok() {
            let keep = self.services.checkpoint_keep.max(1);
            if let Err(e) = self
                .services
                .store
                .prune(&self.snapshot.execution_id, keep)
                .await
            {
                warn!(error = %e, "Checkpoint pruning failed");
            }
        }
        self.publish();
        self.snapshot.status()
    }

    fn deadline(&self) -> Option<Instant> {
        self.snapshot.deadline.map(|at| {
            let remaining = (at - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
            Instant::now() + remaining
        })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Report a step task's result, turning a panic into an executor error
///
/// Every dispatch produces exactly one `Finished` event under its
/// generation, so the scheduler never waits on a task that died.
async fn supervise(work: JoinHandle<(u32, StepOutcome)>, reporter: StepContext) {
    match work.await {
        Ok((attempts, outcome)) => reporter.report(attempts, outcome),
        Err(e) => {
            let error = if e.is_panic() {
                error!(step_id = %reporter.step_id, "Step task panicked");
                StepError::executor(format!("step '{}' panicked", reporter.step_id))
            } else {
                StepError::cancelled()
            };
            reporter.report(reporter.attempt, Err(error));
        }
    }
}

fn internal(err: WorkflowError) -> ExecutionFailure {
    ExecutionFailure::execution(ErrorKind::Executor, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HttpWebhookClient, Unconfigured};
    use crate::compiler::PatternCompiler;
    use crate::human::HumanInputHub;
    use crate::store::InMemoryCheckpointStore;
    use workflow_types::{
        ConditionalBranch, Edge, ExecutionId, Pattern, Transform, WorkflowDefinition,
    };

    fn services(store: Arc<InMemoryCheckpointStore>) -> ExecutionServices {
        ExecutionServices {
            dispatcher: Arc::new(StepDispatcher::new(
                Arc::new(Unconfigured),
                Arc::new(Unconfigured),
                Arc::new(HttpWebhookClient::new()),
                HumanInputHub::new(),
            )),
            store,
            admission: Arc::new(Semaphore::new(8)),
            config: SchedulerConfig::default(),
            checkpoint_keep: 100,
        }
    }

    fn scheduler_for(def: &WorkflowDefinition, vars: Value) -> (Scheduler, Arc<InMemoryCheckpointStore>) {
        let graph = Arc::new(PatternCompiler::compile(def).unwrap());
        let vars = match vars {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let snapshot = ExecutionSnapshot::new(
            ExecutionId::new("exec-1"),
            def.id.clone(),
            graph.steps.keys(),
            graph.edge_count(),
            vars,
            BTreeMap::new(),
        );
        let store = Arc::new(InMemoryCheckpointStore::new());
        let scheduler = Scheduler::new(snapshot, graph, services(store.clone()), CancellationToken::new());
        (scheduler, store)
    }

    fn expr(id: &str, expression: &str) -> StepSpec {
        StepSpec::transform(
            id,
            Transform::Expression {
                expression: expression.into(),
            },
        )
    }

    #[tokio::test]
    async fn test_sequential_pure_steps() {
        let def = WorkflowDefinition::new("seq", Pattern::Sequential)
            .with_step(expr("a", "input + 1"))
            .with_step(expr("b", "input + 1"))
            .with_step(expr("c", "input + 1"));
        let (mut scheduler, store) = scheduler_for(&def, json!({"input": 1}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Completed);
        assert_eq!(status.output, Some(json!(4)));
        let sequences = store.list_checkpoints(&ExecutionId::new("exec-1")).await.unwrap();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_conditional_dead_path_skipped() {
        let def = WorkflowDefinition::new(
            "cond",
            Pattern::Conditional {
                decision: StepId::new("route"),
                branches: vec![
                    ConditionalBranch::new("output > 10", "big"),
                    ConditionalBranch::new("output <= 10", "small"),
                ],
                join: Some(StepId::new("done")),
            },
        )
        .with_step(expr("route", "size"))
        .with_step(expr("big", "'big'"))
        .with_step(expr("small", "'small'"))
        .with_step(StepSpec::transform("done", Transform::Identity));

        let (mut scheduler, _) = scheduler_for(&def, json!({"size": 3}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Completed);
        assert_eq!(status.step_status("big"), Some(StepStatus::Skipped));
        assert_eq!(status.step_status("small"), Some(StepStatus::Succeeded));
        assert_eq!(status.output, Some(json!("small")));
    }

    #[tokio::test]
    async fn test_ambiguous_guards_fail_decision() {
        let def = WorkflowDefinition::new(
            "cond",
            Pattern::Conditional {
                decision: StepId::new("route"),
                branches: vec![
                    ConditionalBranch::new("true", "left"),
                    ConditionalBranch::new("output == 1", "right"),
                ],
                join: None,
            },
        )
        .with_step(expr("route", "1"))
        .with_step(expr("left", "'l'"))
        .with_step(expr("right", "'r'"));

        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Failed);
        let failure = status.failure.clone().unwrap();
        assert_eq!(failure.kind, ErrorKind::AmbiguousBranch);
        assert_eq!(failure.step_id, Some(StepId::new("route")));
        assert_eq!(status.step_status("left"), Some(StepStatus::Cancelled));
        assert_eq!(status.step_status("right"), Some(StepStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_loop_back_counts_iterations() {
        let def = WorkflowDefinition::new(
            "loop",
            Pattern::Graph {
                entry: StepId::new("start"),
                edges: vec![
                    Edge::sequential("start", "inc"),
                    Edge::loop_back("inc", "inc", "output < 10", 5),
                ],
            },
        )
        .with_step(expr("start", "0"))
        .with_step(expr("inc", "input + 1"));

        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        // bounded by max_iterations, not by the guard
        assert_eq!(status.state, ExecutionState::Completed);
        assert_eq!(status.output, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_skip_policy_continues() {
        let def = WorkflowDefinition::new("skip", Pattern::Sequential)
            .with_step(expr("a", "missing_var").with_failure_policy(FailurePolicy::Skip))
            .with_step(expr("b", "'after'"));

        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Completed);
        assert_eq!(status.step_status("a"), Some(StepStatus::Skipped));
        assert_eq!(status.output, Some(json!("after")));
    }

    #[tokio::test]
    async fn test_branch_policy_redirects() {
        let def = WorkflowDefinition::new(
            "branch",
            Pattern::Graph {
                entry: StepId::new("risky"),
                edges: vec![Edge::sequential("risky", "next")],
            },
        )
        .with_step(
            expr("risky", "missing_var")
                .with_failure_policy(FailurePolicy::Branch(StepId::new("fallback"))),
        )
        .with_step(expr("next", "'unreached'"))
        .with_step(expr("fallback", "input.error.kind"));

        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Completed);
        assert_eq!(status.step_status("risky"), Some(StepStatus::Failed));
        assert_eq!(status.step_status("next"), Some(StepStatus::Skipped));
        assert_eq!(status.output, Some(json!("expression")));
    }

    #[tokio::test]
    async fn test_failed_input_binding_fails_step() {
        let def = WorkflowDefinition::new("bind", Pattern::Sequential)
            .with_step(expr("a", "1").with_input("missing_var.field"))
            .with_step(expr("b", "2"));

        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        scheduler.start().await.unwrap();
        let status = scheduler.run().await;

        assert_eq!(status.state, ExecutionState::Failed);
        assert_eq!(status.step_status("a"), Some(StepStatus::Failed));
        assert_eq!(status.step_status("b"), Some(StepStatus::Cancelled));
        let failure = status.failure.clone().unwrap();
        assert_eq!(failure.kind, ErrorKind::Expression);
        assert_eq!(failure.step_id, Some(StepId::new("a")));
    }

    #[tokio::test]
    async fn test_resume_requeues_running_steps() {
        let def = WorkflowDefinition::new("seq", Pattern::Sequential)
            .with_step(expr("a", "1"))
            .with_step(expr("b", "2"));
        let (mut scheduler, _) = scheduler_for(&def, json!({}));
        for status in [StepStatus::Ready, StepStatus::Running] {
            scheduler.snapshot.advance(&StepId::new("a"), status).unwrap();
        }

        let requeued = scheduler.resume();
        assert_eq!(requeued, vec![StepId::new("a")]);
        assert_eq!(
            scheduler.snapshot().status_of(&StepId::new("a")),
            Some(StepStatus::Ready)
        );
    }
}
