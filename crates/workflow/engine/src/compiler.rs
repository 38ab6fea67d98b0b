//! Pattern compilers
//!
//! Translates the declared [`Pattern`] of a definition into a
//! [`CompiledGraph`]. Some patterns synthesize helper steps; their ids
//! start with a double underscore so they cannot collide with the usual
//! naming of declared steps (a collision is still reported as a duplicate).

use crate::graph::CompiledGraph;
use workflow_types::{
    ConditionalBranch, Edge, JoinPolicy, Pattern, StepId, StepSpec, Transform, WorkflowDefinition,
    WorkflowError, WorkflowResult,
};

/// Synthesized fan-out step of a parallel pattern
pub const FAN_OUT_STEP: &str = "__fan_out";
/// Synthesized join step of a parallel pattern
pub const JOIN_STEP: &str = "__join";
/// Synthesized round marker of a competitive pattern
pub const ROUND_STEP: &str = "__round";

/// Steps, edges and entry produced by one pattern
struct Layout {
    steps: Vec<StepSpec>,
    edges: Vec<Edge>,
    entry: StepId,
}

/// Compiles workflow definitions into execution graphs
pub struct PatternCompiler;

impl PatternCompiler {
    /// Validate a definition and compile it to a graph
    ///
    /// Compilation is deterministic: the same definition always yields the
    /// same steps and edges in the same order.
    pub fn compile(definition: &WorkflowDefinition) -> WorkflowResult<CompiledGraph> {
        definition.validate()?;

        let steps = definition.steps.clone();
        let layout = match &definition.pattern {
            Pattern::Sequential => chain(steps),
            Pattern::Handoff => handoff(steps),
            Pattern::Parallel {
                join_policy,
                fan_out,
                join,
            } => parallel(steps, *join_policy, fan_out.as_ref(), join.as_ref())?,
            Pattern::SelfFeedback {
                step,
                max_iterations,
                quality_gate,
            } => self_feedback(steps, step, *max_iterations, quality_gate)?,
            Pattern::PartnerFeedback {
                producer,
                reviewer,
                max_iterations,
                accept,
            } => partner_feedback(steps, producer, reviewer, *max_iterations, accept)?,
            Pattern::Conditional {
                decision,
                branches,
                join,
            } => conditional(steps, decision, branches, join.as_ref())?,
            Pattern::Competitive {
                competitors,
                moderator,
                rounds,
            } => competitive(steps, competitors, moderator, *rounds)?,
            Pattern::HumanLoop {
                checkpoints,
                prompt,
                timeout_ms,
            } => human_loop(steps, checkpoints, prompt.as_deref(), *timeout_ms)?,
            Pattern::Graph { entry, edges } => Layout {
                steps,
                edges: edges.clone(),
                entry: entry.clone(),
            },
        };

        let graph = CompiledGraph::new(
            definition.id.clone(),
            definition.pattern.name(),
            layout.steps,
            layout.edges,
            layout.entry,
        )?;

        tracing::debug!(
            definition_id = %definition.id,
            pattern = definition.pattern.name(),
            steps = graph.step_count(),
            edges = graph.edge_count(),
            "Workflow compiled"
        );
        Ok(graph)
    }
}

// ── Pattern layouts ──────────────────────────────────────────────────

fn sequential_edges(steps: &[StepSpec]) -> Vec<Edge> {
    steps
        .windows(2)
        .map(|pair| Edge::sequential(pair[0].id.0.clone(), pair[1].id.0.clone()))
        .collect()
}

fn chain(steps: Vec<StepSpec>) -> Layout {
    let edges = sequential_edges(&steps);
    let entry = steps
        .first()
        .map(|s| s.id.clone())
        .unwrap_or_else(|| StepId::new(""));
    Layout {
        steps,
        edges,
        entry,
    }
}

fn handoff(mut steps: Vec<StepSpec>) -> Layout {
    for i in 1..steps.len() {
        let prev = steps[i - 1].id.clone();
        let step = &mut steps[i];
        if step.input.is_none() {
            step.input = Some(format!(
                "{{from: '{}', output: steps['{}']}}",
                prev, prev
            ));
        }
    }
    chain(steps)
}

/// Remove `id` from `steps`, returning it
fn take_step(steps: &mut Vec<StepSpec>, id: &StepId) -> WorkflowResult<StepSpec> {
    let pos = steps
        .iter()
        .position(|s| &s.id == id)
        .ok_or_else(|| WorkflowError::StepNotFound(id.clone()))?;
    Ok(steps.remove(pos))
}

fn parallel(
    mut steps: Vec<StepSpec>,
    join_policy: JoinPolicy,
    fan_out: Option<&StepId>,
    join: Option<&StepId>,
) -> WorkflowResult<Layout> {
    let fan_out = match fan_out {
        Some(id) => take_step(&mut steps, id)?,
        None => StepSpec::passthrough(FAN_OUT_STEP),
    };
    let join = match join {
        Some(id) => take_step(&mut steps, id)?,
        None => StepSpec::transform(
            JOIN_STEP,
            Transform::Collect {
                from: steps.iter().map(|s| s.id.clone()).collect(),
            },
        ),
    }
    .with_join(join_policy);

    if steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "Parallel pattern needs at least one branch step".into(),
        ));
    }

    let mut edges = Vec::with_capacity(steps.len() * 2);
    for branch in &steps {
        edges.push(Edge::sequential(fan_out.id.0.clone(), branch.id.0.clone()));
    }
    for branch in &steps {
        edges.push(Edge::parallel(branch.id.0.clone(), join.id.0.clone()));
    }

    let entry = fan_out.id.clone();
    let mut all = Vec::with_capacity(steps.len() + 2);
    all.push(fan_out);
    all.extend(steps);
    all.push(join);

    Ok(Layout {
        steps: all,
        edges,
        entry,
    })
}

fn check_bound(what: &str, bound: u32) -> WorkflowResult<()> {
    if bound == 0 {
        return Err(WorkflowError::ValidationError(format!(
            "{} must be at least 1",
            what
        )));
    }
    Ok(())
}

fn self_feedback(
    steps: Vec<StepSpec>,
    step: &StepId,
    max_iterations: u32,
    quality_gate: &str,
) -> WorkflowResult<Layout> {
    check_bound("max_iterations", max_iterations)?;
    if !steps.iter().any(|s| &s.id == step) {
        return Err(WorkflowError::StepNotFound(step.clone()));
    }

    let mut layout = chain(steps);
    layout.edges.push(Edge::loop_back(
        step.0.clone(),
        step.0.clone(),
        format!("not ({})", quality_gate),
        max_iterations,
    ));
    Ok(layout)
}

fn partner_feedback(
    mut steps: Vec<StepSpec>,
    producer: &StepId,
    reviewer: &StepId,
    max_iterations: u32,
    accept: &str,
) -> WorkflowResult<Layout> {
    check_bound("max_iterations", max_iterations)?;
    if producer == reviewer {
        return Err(WorkflowError::ValidationError(
            "Producer and reviewer must be different steps".into(),
        ));
    }

    let producer_step = take_step(&mut steps, producer)?;
    let reviewer_step = take_step(&mut steps, reviewer)?;
    let mut ordered = vec![producer_step, reviewer_step];
    ordered.extend(steps);

    let mut layout = chain(ordered);
    layout.edges.push(Edge::loop_back(
        reviewer.0.clone(),
        producer.0.clone(),
        format!("not ({})", accept),
        max_iterations,
    ));
    Ok(layout)
}

fn conditional(
    steps: Vec<StepSpec>,
    decision: &StepId,
    branches: &[ConditionalBranch],
    join: Option<&StepId>,
) -> WorkflowResult<Layout> {
    if branches.len() < 2 {
        return Err(WorkflowError::ValidationError(
            "Conditional pattern needs at least two branches".into(),
        ));
    }
    if !steps.iter().any(|s| &s.id == decision) {
        return Err(WorkflowError::StepNotFound(decision.clone()));
    }

    let mut edges = Vec::new();
    for branch in branches {
        if &branch.target == decision || Some(&branch.target) == join {
            return Err(WorkflowError::ValidationError(format!(
                "Branch target '{}' must be a separate step",
                branch.target
            )));
        }
        edges.push(Edge::conditional(
            decision.0.clone(),
            branch.target.0.clone(),
            branch.guard.clone(),
        ));
    }
    if let Some(join) = join {
        for branch in branches {
            edges.push(Edge::sequential(branch.target.0.clone(), join.0.clone()));
        }
    }

    Ok(Layout {
        steps,
        edges,
        entry: decision.clone(),
    })
}

fn competitive(
    mut steps: Vec<StepSpec>,
    competitors: &[StepId],
    moderator: &StepId,
    rounds: u32,
) -> WorkflowResult<Layout> {
    check_bound("rounds", rounds)?;
    if competitors.is_empty() {
        return Err(WorkflowError::ValidationError(
            "Competitive pattern needs at least one competitor".into(),
        ));
    }

    let round = StepSpec::passthrough(ROUND_STEP);
    let mut contenders = Vec::with_capacity(competitors.len());
    for id in competitors {
        contenders.push(take_step(&mut steps, id)?);
    }
    let moderator_step = take_step(&mut steps, moderator)?;

    let mut edges = Vec::new();
    for c in &contenders {
        edges.push(Edge::sequential(ROUND_STEP, c.id.0.clone()));
    }
    for c in &contenders {
        edges.push(Edge::parallel(c.id.0.clone(), moderator.0.clone()));
    }
    edges.push(Edge::loop_back(moderator.0.clone(), ROUND_STEP, "true", rounds));

    // Remaining steps run after the final round
    let mut tail = vec![moderator_step];
    tail.extend(steps);
    edges.extend(sequential_edges(&tail));

    let mut all = vec![round];
    all.extend(contenders);
    all.extend(tail);

    Ok(Layout {
        steps: all,
        edges,
        entry: StepId::new(ROUND_STEP),
    })
}

fn human_loop(
    steps: Vec<StepSpec>,
    checkpoints: &[StepId],
    prompt: Option<&str>,
    timeout_ms: Option<u64>,
) -> WorkflowResult<Layout> {
    for id in checkpoints {
        if !steps.iter().any(|s| &s.id == id) {
            return Err(WorkflowError::StepNotFound(id.clone()));
        }
    }

    let mut out = Vec::with_capacity(steps.len() + checkpoints.len());
    for step in steps {
        let review = checkpoints.contains(&step.id).then(|| {
            let text = prompt
                .map(str::to_string)
                .unwrap_or_else(|| format!("Review output of step '{}'", step.id));
            let review = StepSpec::human(format!("{}__review", step.id), text);
            match timeout_ms {
                Some(ms) => review.with_timeout_ms(ms),
                None => review,
            }
        });
        out.push(step);
        out.extend(review);
    }

    Ok(chain(out))
}
