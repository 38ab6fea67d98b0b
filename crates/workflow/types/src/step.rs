//! Steps: the units of work in a compiled graph
//!
//! Every step has exactly one [`StepKind`]. The kind set is closed; the
//! engine dispatches on it with an exhaustive match.

use crate::{JoinPolicy, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Upper bound on a single backoff delay
const MAX_BACKOFF_MS: u64 = 300_000;

/// Unique identifier for a step within a definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Step Kind ────────────────────────────────────────────────────────

/// HTTP method used by webhook steps
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
        }
    }
}

/// Data transforms that need no collaborator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Transform {
    /// Output equals input
    Identity,
    /// Output is an expression evaluated over the step scope
    Expression { expression: String },
    /// Output is an object of the named steps' outputs
    Collect { from: Vec<StepId> },
}

/// The ten step kinds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Delegate to the agent bound to `role`
    AgentTask { role: RoleId, task: String },
    /// Invoke `tool.function` with the step input as parameters
    ToolCall { tool: String, function: String },
    /// Evaluate a boolean expression
    Condition { expression: String },
    /// Map an expression over the array produced by `items`
    Loop {
        items: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        map: Option<String>,
    },
    /// Fan-out marker; passes its input through
    ParallelGroup,
    /// Sleep, then pass the input through
    Wait { duration_ms: u64 },
    /// Send the step input to an HTTP endpoint
    Webhook {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    /// Run a local process with the input JSON on stdin
    Script {
        command: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    /// Park until an external signal supplies a value
    HumanInput { prompt: String },
    /// Reshape data already in the context
    DataTransform { transform: Transform },
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentTask { .. } => "agent_task",
            Self::ToolCall { .. } => "tool_call",
            Self::Condition { .. } => "condition",
            Self::Loop { .. } => "loop",
            Self::ParallelGroup => "parallel_group",
            Self::Wait { .. } => "wait",
            Self::Webhook { .. } => "webhook",
            Self::Script { .. } => "script",
            Self::HumanInput { .. } => "human_input",
            Self::DataTransform { .. } => "data_transform",
        }
    }

    /// Kinds that evaluate expressions and never perform I/O
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::Condition { .. }
                | Self::Loop { .. }
                | Self::ParallelGroup
                | Self::DataTransform { .. }
        )
    }

    /// Expression sources embedded in this kind, labelled by field
    pub fn expressions(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Condition { expression } => vec![("expression", expression.as_str())],
            Self::Loop { items, map } => {
                let mut out = vec![("items", items.as_str())];
                if let Some(map) = map {
                    out.push(("map", map.as_str()));
                }
                out
            }
            Self::DataTransform {
                transform: Transform::Expression { expression },
            } => vec![("transform", expression.as_str())],
            _ => Vec::new(),
        }
    }
}

// ── Policies ─────────────────────────────────────────────────────────

/// Backoff strategy between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

/// Retry policy for retryable step failures
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            backoff: Backoff::Fixed,
        }
    }

    pub fn exponential(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            backoff: Backoff::Exponential,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following failed attempt number `failed` (1-based)
    pub fn delay_after(&self, failed: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.backoff_ms,
            Backoff::Exponential => {
                let shift = failed.saturating_sub(1).min(20);
                self.backoff_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(ms.min(MAX_BACKOFF_MS))
    }
}

/// What happens when a step reaches terminal failure
///
/// Serialized as `abort`, `skip` or `branch:<stepId>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailurePolicy {
    /// Fail the whole execution
    #[default]
    Abort,
    /// Treat the step as vacuously succeeded with a null output
    Skip,
    /// Redirect successor evaluation to an alternate step
    Branch(StepId),
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => match other.strip_prefix("branch:") {
                Some(target) if !target.is_empty() => Ok(Self::Branch(StepId::new(target))),
                _ => Err(format!("unknown failure policy '{}'", other)),
            },
        }
    }
}

impl TryFrom<String> for FailurePolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FailurePolicy> for String {
    fn from(policy: FailurePolicy) -> Self {
        policy.to_string()
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Skip => write!(f, "skip"),
            Self::Branch(target) => write!(f, "branch:{}", target),
        }
    }
}

// ── Step Spec ────────────────────────────────────────────────────────

/// A step specification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    pub id: StepId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub kind: StepKind,
    /// Input binding expression; the default input rules apply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Context variable the output is additionally bound to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt timeout; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Readiness rule over parallel-sibling inbound edges
    #[serde(default)]
    pub join: JoinPolicy,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: StepId::new(id),
            name: String::new(),
            kind,
            input: None,
            output: None,
            retry: RetryPolicy::none(),
            timeout_ms: None,
            on_failure: FailurePolicy::Abort,
            join: JoinPolicy::WaitForAll,
        }
    }

    /// An agent task bound to `role`
    pub fn agent(id: impl Into<String>, role: impl Into<String>, task: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::AgentTask {
                role: RoleId::new(role),
                task: task.into(),
            },
        )
    }

    /// A tool call
    pub fn tool(id: impl Into<String>, tool: impl Into<String>, function: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::ToolCall {
                tool: tool.into(),
                function: function.into(),
            },
        )
    }

    /// A boolean condition
    pub fn condition(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::Condition {
                expression: expression.into(),
            },
        )
    }

    /// A parallel-group marker that passes its input through
    pub fn passthrough(id: impl Into<String>) -> Self {
        Self::new(id, StepKind::ParallelGroup)
    }

    pub fn wait(id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(id, StepKind::Wait { duration_ms })
    }

    pub fn human(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            id,
            StepKind::HumanInput {
                prompt: prompt.into(),
            },
        )
    }

    pub fn transform(id: impl Into<String>, transform: Transform) -> Self {
        Self::new(id, StepKind::DataTransform { transform })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, expression: impl Into<String>) -> Self {
        self.input = Some(expression.into());
        self
    }

    pub fn with_output(mut self, var: impl Into<String>) -> Self {
        self.output = Some(var.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
