//! Normalized execution graph
//!
//! Every pattern compiles down to the same shape: a set of steps, a list
//! of typed edges, one entry step and the set of terminal steps. The
//! scheduler only ever walks a [`CompiledGraph`]; it never looks at the
//! declared pattern again.
//!
//! Edges are addressed by their index in `edges`. The execution snapshot
//! stores one traversal state per index, so edge order is part of the
//! graph's identity and compilation keeps it stable.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use workflow_dsl::{DslError, DslResult, Expression};
use workflow_types::{
    Edge, EdgeKind, FailurePolicy, StepId, StepSpec, WorkflowDefinitionId, WorkflowError,
    WorkflowResult,
};

/// A validated, immutable execution graph
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledGraph {
    pub definition_id: WorkflowDefinitionId,
    /// Name of the pattern this graph was compiled from
    pub pattern: String,
    pub steps: BTreeMap<StepId, StepSpec>,
    pub edges: Vec<Edge>,
    pub entry: StepId,
    /// Steps without outgoing forward edges
    pub terminals: BTreeSet<StepId>,
    /// Steps reset when a loop-back edge fires, keyed by edge index
    pub loop_bodies: BTreeMap<usize, BTreeSet<StepId>>,

    #[serde(skip)]
    inbound: BTreeMap<StepId, Vec<usize>>,
    #[serde(skip)]
    outbound: BTreeMap<StepId, Vec<usize>>,
    #[serde(skip)]
    expressions: BTreeMap<String, Expression>,
}

impl CompiledGraph {
    /// Build and validate a graph
    ///
    /// Rejects duplicate steps or edges, dangling edge endpoints, cycles
    /// that do not go through a loop-back edge, steps unreachable from the
    /// entry, loop-backs to non-ancestors, unknown branch targets and
    /// expressions that do not parse.
    pub fn new(
        definition_id: WorkflowDefinitionId,
        pattern: impl Into<String>,
        steps: Vec<StepSpec>,
        edges: Vec<Edge>,
        entry: StepId,
    ) -> WorkflowResult<Self> {
        let mut step_map = BTreeMap::new();
        for step in steps {
            let id = step.id.clone();
            if step_map.insert(id.clone(), step).is_some() {
                return Err(WorkflowError::DuplicateStepId(id));
            }
        }

        if !step_map.contains_key(&entry) {
            return Err(WorkflowError::StepNotFound(entry));
        }

        let mut inbound: BTreeMap<StepId, Vec<usize>> =
            step_map.keys().map(|id| (id.clone(), Vec::new())).collect();
        let mut outbound = inbound.clone();
        let mut seen = BTreeSet::new();

        for (idx, edge) in edges.iter().enumerate() {
            for endpoint in [&edge.from, &edge.to] {
                if !step_map.contains_key(endpoint) {
                    return Err(WorkflowError::StepNotFound(endpoint.clone()));
                }
            }
            if !seen.insert((edge.from.clone(), edge.to.clone())) {
                return Err(WorkflowError::DuplicateEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
            outbound.entry(edge.from.clone()).or_default().push(idx);
            inbound.entry(edge.to.clone()).or_default().push(idx);
        }

        let mut graph = Self {
            definition_id,
            pattern: pattern.into(),
            steps: step_map,
            edges,
            entry,
            terminals: BTreeSet::new(),
            loop_bodies: BTreeMap::new(),
            inbound,
            outbound,
            expressions: BTreeMap::new(),
        };

        graph.check_entry()?;
        graph.check_acyclic()?;
        graph.check_branch_targets()?;
        graph.check_reachable()?;
        graph.check_conditional_fan_out()?;
        graph.compute_loop_bodies()?;
        graph.compile_expressions()?;

        graph.terminals = graph
            .steps
            .keys()
            .filter(|id| graph.forward_outbound(id).next().is_none())
            .cloned()
            .collect();

        Ok(graph)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn step(&self, id: &StepId) -> Option<&StepSpec> {
        self.steps.get(id)
    }

    pub fn edge(&self, idx: usize) -> &Edge {
        &self.edges[idx]
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Indices of all edges entering `id`
    pub fn inbound(&self, id: &StepId) -> &[usize] {
        self.inbound.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices of all edges leaving `id`
    pub fn outbound(&self, id: &StepId) -> &[usize] {
        self.outbound.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inbound edges other than loop-backs
    pub fn forward_inbound<'a>(&'a self, id: &StepId) -> impl Iterator<Item = usize> + 'a {
        self.inbound(id)
            .iter()
            .copied()
            .filter(move |&i| !self.edges[i].is_loop_back())
    }

    /// Outbound edges other than loop-backs
    pub fn forward_outbound<'a>(&'a self, id: &StepId) -> impl Iterator<Item = usize> + 'a {
        self.outbound(id)
            .iter()
            .copied()
            .filter(move |&i| !self.edges[i].is_loop_back())
    }

    /// Outbound loop-back edges
    pub fn loop_backs<'a>(&'a self, id: &StepId) -> impl Iterator<Item = usize> + 'a {
        self.outbound(id)
            .iter()
            .copied()
            .filter(move |&i| self.edges[i].is_loop_back())
    }

    pub fn loop_body(&self, edge_idx: usize) -> Option<&BTreeSet<StepId>> {
        self.loop_bodies.get(&edge_idx)
    }

    /// Evaluate expression source against `scope`, reusing the parse done at compile time
    pub fn evaluate(&self, source: &str, scope: &Value) -> DslResult<Value> {
        match self.expressions.get(source) {
            Some(expr) => expr.evaluate(scope),
            None => Expression::parse(source)?.evaluate(scope),
        }
    }

    pub fn evaluate_bool(&self, source: &str, scope: &Value) -> DslResult<bool> {
        self.evaluate(source, scope).map(|v| workflow_dsl::truthy(&v))
    }

    // ── Validation ───────────────────────────────────────────────────

    fn check_entry(&self) -> WorkflowResult<()> {
        if self.forward_inbound(&self.entry).next().is_some() {
            return Err(WorkflowError::ValidationError(format!(
                "Entry step '{}' has inbound edges",
                self.entry
            )));
        }
        Ok(())
    }

    /// Kahn's algorithm over forward edges
    fn check_acyclic(&self) -> WorkflowResult<()> {
        let mut indegree: BTreeMap<&StepId, usize> = self
            .steps
            .keys()
            .map(|id| (id, self.forward_inbound(id).count()))
            .collect();
        let mut queue: VecDeque<&StepId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for idx in self.forward_outbound(id) {
                let to = &self.edges[idx].to;
                if let Some(d) = indegree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(to);
                    }
                }
            }
        }

        if visited < self.steps.len() {
            let on_cycle = indegree
                .into_iter()
                .find(|(_, d)| *d > 0)
                .map(|(id, _)| id.clone())
                .unwrap_or_else(|| self.entry.clone());
            return Err(WorkflowError::CyclicGraph(on_cycle));
        }
        Ok(())
    }

    fn check_branch_targets(&self) -> WorkflowResult<()> {
        for step in self.steps.values() {
            if let FailurePolicy::Branch(target) = &step.on_failure {
                if !self.steps.contains_key(target) {
                    return Err(WorkflowError::ValidationError(format!(
                        "Step '{}' branches to unknown step '{}'",
                        step.id, target
                    )));
                }
                if target == &step.id {
                    return Err(WorkflowError::ValidationError(format!(
                        "Step '{}' branches to itself",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every step must be reachable from the entry through forward edges
    /// or failure branches
    fn check_reachable(&self) -> WorkflowResult<()> {
        let mut reached = BTreeSet::new();
        let mut queue = VecDeque::from([&self.entry]);
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            queue.extend(self.forward_outbound(id).map(|i| &self.edges[i].to));
            if let Some(FailurePolicy::Branch(target)) = self.steps.get(id).map(|s| &s.on_failure) {
                queue.push_back(target);
            }
        }

        match self.steps.keys().find(|id| !reached.contains(id)) {
            Some(unreached) => Err(WorkflowError::UnreachableStep(unreached.clone())),
            None => Ok(()),
        }
    }

    /// A step's forward edges are either all conditional or none are
    fn check_conditional_fan_out(&self) -> WorkflowResult<()> {
        for id in self.steps.keys() {
            let kinds: Vec<bool> = self
                .forward_outbound(id)
                .map(|i| matches!(self.edges[i].kind, EdgeKind::Conditional { .. }))
                .collect();
            if kinds.iter().any(|c| *c) && !kinds.iter().all(|c| *c) {
                return Err(WorkflowError::ValidationError(format!(
                    "Step '{}' mixes conditional and unconditional edges",
                    id
                )));
            }
        }
        Ok(())
    }

    fn compute_loop_bodies(&mut self) -> WorkflowResult<()> {
        let mut bodies = BTreeMap::new();
        for (idx, edge) in self.edges.iter().enumerate() {
            if !edge.is_loop_back() {
                continue;
            }
            let downstream = self.reach(&edge.to, true);
            if !downstream.contains(&edge.from) {
                return Err(WorkflowError::ValidationError(format!(
                    "Loop-back edge {} -> {} does not target an ancestor",
                    edge.from, edge.to
                )));
            }
            let upstream = self.reach(&edge.from, false);
            let body: BTreeSet<StepId> = downstream.intersection(&upstream).cloned().collect();
            bodies.insert(idx, body);
        }
        self.loop_bodies = bodies;
        Ok(())
    }

    /// Steps reachable from `start` over forward edges, including `start`
    fn reach(&self, start: &StepId, forward: bool) -> BTreeSet<StepId> {
        let mut out = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !out.insert(id.clone()) {
                continue;
            }
            if forward {
                queue.extend(self.forward_outbound(&id).map(|i| self.edges[i].to.clone()));
            } else {
                queue.extend(self.forward_inbound(&id).map(|i| self.edges[i].from.clone()));
            }
        }
        out
    }

    fn compile_expressions(&mut self) -> WorkflowResult<()> {
        let mut sources: Vec<(String, String)> = Vec::new();
        for step in self.steps.values() {
            if let Some(input) = &step.input {
                sources.push((format!("step '{}' input", step.id), input.clone()));
            }
            for (field, source) in step.kind.expressions() {
                sources.push((format!("step '{}' {}", step.id, field), source.to_string()));
            }
        }
        for edge in &self.edges {
            if let Some(guard) = edge.guard() {
                sources.push((format!("edge {} -> {} guard", edge.from, edge.to), guard.to_string()));
            }
        }

        for (location, source) in sources {
            if self.expressions.contains_key(&source) {
                continue;
            }
            let expr = Expression::parse(source.clone()).map_err(|e: DslError| {
                WorkflowError::InvalidExpression {
                    location,
                    message: e.to_string(),
                }
            })?;
            self.expressions.insert(source, expr);
        }
        Ok(())
    }
}
