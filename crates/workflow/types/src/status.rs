//! Step and execution status

use serde::{Deserialize, Serialize};

/// Status of one step within an execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Ready,
    Running,
    /// Sub-state of running: parked on an external signal
    Waiting,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    /// Position in the forward-only order; waiting shares running's rank
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Running | Self::Waiting => 2,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Cancelled => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 3
    }

    /// Dispatched and not yet reported
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }

    /// Whether `next` is a legal move from `self`
    ///
    /// Work runs `pending → ready → running → terminal`, with `waiting`
    /// inside `running`. A step that never ran may only be skipped or
    /// cancelled. Loop re-entry and recovery reset steps outside this table.
    pub fn can_advance_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Ready | Skipped | Cancelled)
                | (Ready, Running | Skipped | Cancelled)
                | (Running, Waiting | Succeeded | Failed | Skipped | Cancelled)
                | (Waiting, Succeeded | Failed | Skipped | Cancelled)
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of an execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Pending),
            Just(StepStatus::Ready),
            Just(StepStatus::Running),
            Just(StepStatus::Waiting),
            Just(StepStatus::Succeeded),
            Just(StepStatus::Failed),
            Just(StepStatus::Skipped),
            Just(StepStatus::Cancelled),
        ]
    }

    #[test]
    fn test_forward_transitions() {
        use StepStatus::*;
        assert!(Pending.can_advance_to(Ready));
        assert!(Ready.can_advance_to(Running));
        assert!(Running.can_advance_to(Waiting));
        assert!(Waiting.can_advance_to(Succeeded));
        assert!(Pending.can_advance_to(Cancelled));
        assert!(Pending.can_advance_to(Skipped));

        assert!(!Pending.can_advance_to(Running));
        assert!(!Pending.can_advance_to(Succeeded));
        assert!(!Ready.can_advance_to(Failed));
        assert!(!Ready.can_advance_to(Succeeded));
        assert!(!Ready.can_advance_to(Pending));
        assert!(!Waiting.can_advance_to(Running));
        assert!(!Succeeded.can_advance_to(Failed));
        assert!(!Cancelled.can_advance_to(Running));
    }

    #[test]
    fn test_terminal_states() {
        assert!(StepStatus::Skipped.is_terminal());
        assert!(!StepStatus::Waiting.is_terminal());
        assert!(StepStatus::Waiting.is_in_flight());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
    }

    proptest! {
        /// Legal moves never lower a step's rank, and only a step that
        /// ran can succeed or fail.
        #[test]
        fn legal_moves_never_regress(moves in proptest::collection::vec(arb_status(), 0..32)) {
            let mut current = StepStatus::Pending;
            let mut ran = false;
            for next in moves {
                if current.can_advance_to(next) {
                    prop_assert!(next.rank() >= current.rank());
                    prop_assert!(next.rank() <= current.rank() + 1 || next.is_terminal());
                    if matches!(next, StepStatus::Succeeded | StepStatus::Failed) {
                        prop_assert!(current.is_in_flight());
                    }
                    if next == StepStatus::Running {
                        prop_assert_eq!(current, StepStatus::Ready);
                    }
                    ran |= next.is_in_flight();
                    current = next;
                }
            }
            if matches!(current, StepStatus::Succeeded | StepStatus::Failed) {
                prop_assert!(ran);
            }
            if current.is_terminal() {
                for next in [StepStatus::Pending, StepStatus::Ready, StepStatus::Running] {
                    prop_assert!(!current.can_advance_to(next));
                }
            }
        }
    }
}
