//! Typed edges between steps
//!
//! Sequential and parallel-sibling edges are unconditional. Conditional
//! edges carry a guard evaluated when their source completes. Loop-back
//! edges re-enter an earlier step while their guard holds and the loop's
//! iteration bound has not been reached; they never count toward
//! readiness.

use crate::StepId;
use serde::{Deserialize, Serialize};

/// An edge in the compiled graph
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: StepId,
    pub to: StepId,
    #[serde(default)]
    pub kind: EdgeKind,
}

impl Edge {
    pub fn sequential(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::with_kind(from, to, EdgeKind::Sequential)
    }

    pub fn parallel(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::with_kind(from, to, EdgeKind::ParallelSibling)
    }

    pub fn conditional(
        from: impl Into<String>,
        to: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            from,
            to,
            EdgeKind::Conditional {
                guard: guard.into(),
            },
        )
    }

    pub fn loop_back(
        from: impl Into<String>,
        to: impl Into<String>,
        guard: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        Self::with_kind(
            from,
            to,
            EdgeKind::LoopBack {
                guard: guard.into(),
                max_iterations,
            },
        )
    }

    pub fn with_kind(from: impl Into<String>, to: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            from: StepId::new(from),
            to: StepId::new(to),
            kind,
        }
    }

    pub fn is_loop_back(&self) -> bool {
        matches!(self.kind, EdgeKind::LoopBack { .. })
    }

    pub fn guard(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::Conditional { guard } | EdgeKind::LoopBack { guard, .. } => {
                Some(guard.as_str())
            }
            _ => None,
        }
    }
}

/// Edge types
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Sequential,
    /// No ordering among siblings; they converge on a common join
    ParallelSibling,
    Conditional {
        guard: String,
    },
    LoopBack {
        guard: String,
        max_iterations: u32,
    },
}

impl EdgeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::ParallelSibling => "parallel_sibling",
            Self::Conditional { .. } => "conditional",
            Self::LoopBack { .. } => "loop_back",
        }
    }
}

/// Traversal state of an edge within one execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeState {
    #[default]
    Pending,
    Taken,
    Skipped,
}

impl EdgeState {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_constructors() {
        let seq = Edge::sequential("a", "b");
        assert_eq!(seq.kind, EdgeKind::Sequential);
        assert!(seq.guard().is_none());

        let cond = Edge::conditional("d", "x", "output > 3");
        assert_eq!(cond.guard(), Some("output > 3"));

        let back = Edge::loop_back("r", "p", "not output.accepted", 3);
        assert!(back.is_loop_back());
        assert_eq!(back.kind.name(), "loop_back");
    }

    #[test]
    fn test_edge_serde_default_kind() {
        let edge: Edge = serde_json::from_str(r#"{"from": "a", "to": "b"}"#).unwrap();
        assert_eq!(edge, Edge::sequential("a", "b"));

        let looped: Edge = serde_json::from_str(
            r#"{"from": "b", "to": "a", "kind": {"type": "loop_back", "guard": "true", "max_iterations": 2}}"#,
        )
        .unwrap();
        assert!(looped.is_loop_back());
    }

    #[test]
    fn test_edge_state() {
        assert!(!EdgeState::Pending.is_resolved());
        assert!(EdgeState::Taken.is_resolved());
        assert!(EdgeState::Skipped.is_resolved());
    }
}
