//! Workflow definitions: immutable templates for executions
//!
//! A WorkflowDefinition names a pattern, the steps that pattern
//! coordinates, the agent roles those steps require, and the variable
//! schema a caller must satisfy when starting a run.
//!
//! Definitions are never mutated once registered. To change one, register
//! a new version under the same name.

use crate::{Edge, StepId, StepKind, StepSpec, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named role slot declared by a definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a concrete agent registered with the capability registry
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// An immutable workflow template
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    #[serde(default = "WorkflowDefinitionId::generate")]
    pub id: WorkflowDefinitionId,
    /// Human-readable name, shared by every version
    pub name: String,
    /// Description of what this workflow accomplishes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Version under `name`; assigned by the registry
    #[serde(default = "default_version")]
    pub version: u32,
    /// The declared topology
    pub pattern: Pattern,
    /// Roles that steps bind to
    #[serde(default)]
    pub roles: Vec<AgentRole>,
    /// Variables a caller supplies at submission
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    /// Step specifications, in declaration order
    pub steps: Vec<StepSpec>,
    /// Wall-clock budget for a whole execution (seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    /// When this definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Create an empty definition for a pattern
    pub fn new(name: impl Into<String>, pattern: Pattern) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            version: 1,
            pattern,
            roles: Vec::new(),
            variables: Vec::new(),
            steps: Vec::new(),
            max_duration_secs: None,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = WorkflowDefinitionId::new(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_max_duration(mut self, secs: u64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_variable(mut self, variable: VariableSpec) -> Self {
        self.variables.push(variable);
        self
    }

    /// Append a step without checking for duplicates; [`validate`](Self::validate) catches them
    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a step, rejecting duplicate IDs
    pub fn add_step(&mut self, step: StepSpec) -> WorkflowResult<()> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(WorkflowError::DuplicateStepId(step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Get a step by ID
    pub fn get_step(&self, id: &StepId) -> Option<&StepSpec> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Get a declared role by ID
    pub fn get_role(&self, id: &RoleId) -> Option<&AgentRole> {
        self.roles.iter().find(|r| &r.role_id == id)
    }

    /// Total number of declared steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Structural checks that do not need the compiled graph
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::ValidationError(
                "Workflow must have at least one step".into(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.0.is_empty() {
                return Err(WorkflowError::ValidationError("Step ID must not be empty".into()));
            }
            if !seen.insert(&step.id) {
                return Err(WorkflowError::DuplicateStepId(step.id.clone()));
            }
        }

        let mut roles = HashSet::new();
        for role in &self.roles {
            if !roles.insert(&role.role_id) {
                return Err(WorkflowError::ValidationError(format!(
                    "Duplicate role: {}",
                    role.role_id
                )));
            }
        }

        for step in &self.steps {
            if let StepKind::AgentTask { role, .. } = &step.kind {
                if !roles.contains(role) {
                    return Err(WorkflowError::UndeclaredRole {
                        step: step.id.clone(),
                        role: role.clone(),
                    });
                }
            }
        }

        let mut names = HashSet::new();
        for var in &self.variables {
            if !names.insert(var.name.as_str()) {
                return Err(WorkflowError::ValidationError(format!(
                    "Duplicate variable: {}",
                    var.name
                )));
            }
        }

        Ok(())
    }

    /// Apply the variable schema to caller-supplied variables
    ///
    /// Declared defaults fill missing optional variables. Undeclared
    /// variables pass through untouched.
    pub fn resolve_variables(&self, supplied: Map<String, Value>) -> WorkflowResult<Map<String, Value>> {
        let mut vars = supplied;
        for spec in &self.variables {
            if vars.contains_key(&spec.name) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    vars.insert(spec.name.clone(), default.clone());
                }
                None if spec.required => {
                    return Err(WorkflowError::MissingVariable(spec.name.clone()));
                }
                None => {}
            }
        }
        Ok(vars)
    }

    /// Roles referenced by at least one agent task
    pub fn roles_in_use(&self) -> BTreeSet<RoleId> {
        self.steps
            .iter()
            .filter_map(|s| match &s.kind {
                StepKind::AgentTask { role, .. } => Some(role.clone()),
                _ => None,
            })
            .collect()
    }
}

// ── Pattern ──────────────────────────────────────────────────────────

/// How a join step treats its parallel siblings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Ready once every inbound edge is resolved
    #[default]
    WaitForAll,
    /// Ready on the first sibling success; the rest are cancelled
    WaitForFirstSuccess,
}

/// One guarded outgoing branch of a conditional pattern
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub guard: String,
    pub target: StepId,
}

impl ConditionalBranch {
    pub fn new(guard: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            guard: guard.into(),
            target: StepId::new(target),
        }
    }
}

/// The declared topology of a workflow
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pattern {
    /// Steps chained in declaration order
    Sequential,
    /// Sequential chain where each step receives `{from, output}` of its predecessor
    Handoff,
    /// Fan-out to sibling steps converging on a join
    Parallel {
        #[serde(default)]
        join_policy: JoinPolicy,
        /// Declared fan-out step; synthesized when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fan_out: Option<StepId>,
        /// Declared join step; a collect transform is synthesized when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        join: Option<StepId>,
    },
    /// A step re-run on its own output until a quality gate passes
    SelfFeedback {
        step: StepId,
        max_iterations: u32,
        quality_gate: String,
    },
    /// Producer and reviewer alternating until the reviewer accepts
    PartnerFeedback {
        producer: StepId,
        reviewer: StepId,
        max_iterations: u32,
        accept: String,
    },
    /// A decision step whose outcome selects exactly one branch
    Conditional {
        decision: StepId,
        branches: Vec<ConditionalBranch>,
        /// Optional step that runs after whichever branch was taken
        #[serde(default, skip_serializing_if = "Option::is_none")]
        join: Option<StepId>,
    },
    /// Competitors run in parallel rounds, each scored by a moderator
    Competitive {
        competitors: Vec<StepId>,
        moderator: StepId,
        rounds: u32,
    },
    /// Sequential chain with a human checkpoint after selected steps
    HumanLoop {
        checkpoints: Vec<StepId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// Caller-declared graph
    Graph { entry: StepId, edges: Vec<Edge> },
}

impl Pattern {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Handoff => "handoff",
            Self::Parallel { .. } => "parallel",
            Self::SelfFeedback { .. } => "self_feedback",
            Self::PartnerFeedback { .. } => "partner_feedback",
            Self::Conditional { .. } => "conditional",
            Self::Competitive { .. } => "competitive",
            Self::HumanLoop { .. } => "human_loop",
            Self::Graph { .. } => "graph",
        }
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Roles and variables ──────────────────────────────────────────────

/// A role declared in a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    #[serde(alias = "role")]
    pub role_id: RoleId,
    /// Capabilities the bound agent must advertise
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl AgentRole {
    pub fn new(role_id: impl Into<String>) -> Self {
        Self {
            role_id: RoleId::new(role_id),
            capabilities: BTreeSet::new(),
            description: String::new(),
        }
    }

    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// One entry of the variable schema
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl VariableSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
            description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_review_workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("Review", Pattern::Sequential)
            .with_description("Draft then review")
            .with_role(AgentRole::new("writer").requires("write"))
            .with_role(AgentRole::new("reviewer").requires("review"))
            .with_variable(VariableSpec::required("topic"))
            .with_variable(VariableSpec::optional("tone", json!("neutral")))
            .with_step(StepSpec::agent("draft", "writer", "Write a draft"))
            .with_step(StepSpec::agent("review", "reviewer", "Review the draft"))
    }

    #[test]
    fn test_validate_valid_definition() {
        let def = make_review_workflow();
        assert!(def.validate().is_ok());
        assert_eq!(def.step_count(), 2);
        assert_eq!(def.roles_in_use().len(), 2);
    }

    #[test]
    fn test_validate_empty_definition() {
        let def = WorkflowDefinition::new("Empty", Pattern::Sequential);
        assert!(matches!(def.validate(), Err(WorkflowError::ValidationError(_))));
    }

    #[test]
    fn test_duplicate_step_id() {
        let mut def = WorkflowDefinition::new("Dup", Pattern::Sequential);
        def.add_step(StepSpec::passthrough("a")).unwrap();
        let result = def.add_step(StepSpec::passthrough("a"));
        assert!(matches!(result, Err(WorkflowError::DuplicateStepId(_))));

        let unchecked = WorkflowDefinition::new("Dup", Pattern::Sequential)
            .with_step(StepSpec::passthrough("a"))
            .with_step(StepSpec::passthrough("a"));
        assert!(matches!(
            unchecked.validate(),
            Err(WorkflowError::DuplicateStepId(_))
        ));
    }

    #[test]
    fn test_undeclared_role() {
        let def = WorkflowDefinition::new("Roles", Pattern::Sequential)
            .with_step(StepSpec::agent("a", "ghost", "haunt"));
        assert!(matches!(
            def.validate(),
            Err(WorkflowError::UndeclaredRole { .. })
        ));
    }

    #[test]
    fn test_resolve_variables() {
        let def = make_review_workflow();

        let mut supplied = Map::new();
        supplied.insert("topic".into(), json!("rust"));
        let vars = def.resolve_variables(supplied).unwrap();
        assert_eq!(vars["topic"], json!("rust"));
        assert_eq!(vars["tone"], json!("neutral"));

        let missing = def.resolve_variables(Map::new());
        assert!(matches!(missing, Err(WorkflowError::MissingVariable(name)) if name == "topic"));
    }

    #[test]
    fn test_definition_from_yaml() {
        let yaml = r#"
name: triage
pattern:
  type: conditional
  decision: classify
  branches:
    - guard: "output == 'bug'"
      target: fix
    - guard: "output != 'bug'"
      target: answer
roles:
  - role: support
    capabilities: [triage]
steps:
  - id: classify
    kind: { type: agent_task, role: support, task: classify }
  - id: fix
    kind: { type: tool_call, tool: tracker, function: open_issue }
  - id: answer
    kind: { type: agent_task, role: support, task: answer }
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.version, 1);
        assert_eq!(def.pattern.name(), "conditional");
        assert!(def.get_role(&RoleId::new("support")).is_some());
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_definition_id() {
        let id = WorkflowDefinitionId::generate();
        assert!(!id.0.is_empty());
        assert_ne!(id, WorkflowDefinitionId::generate());

        let named = WorkflowDefinitionId::new("my-workflow");
        assert_eq!(format!("{}", named), "my-workflow");
    }
}
