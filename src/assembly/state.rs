//! Assembly run state machine
//!
//! IDLE → PREPARING → WRITING → DONE, with PREPARING and WRITING able to
//! end in FAILED.

use serde::{Deserialize, Serialize};

use crate::error::{AssemblyError, AssemblyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssemblyState {
    /// Created, nothing done yet
    Idle,
    /// Building the tree in memory
    Preparing,
    /// Persisting the prepared tree
    Writing,
    /// Tree written completely
    Done,
    /// Preparing or writing failed
    Failed,
}

impl AssemblyState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssemblyState::Done | AssemblyState::Failed)
    }

    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: AssemblyState) -> bool {
        matches!(
            (self, target),
            (AssemblyState::Idle, AssemblyState::Preparing)
                | (AssemblyState::Preparing, AssemblyState::Writing)
                | (AssemblyState::Preparing, AssemblyState::Failed)
                | (AssemblyState::Writing, AssemblyState::Done)
                | (AssemblyState::Writing, AssemblyState::Failed)
        )
    }

    /// The state after moving to `target`, or an error if not allowed.
    pub fn transition(self, target: AssemblyState) -> AssemblyResult<AssemblyState> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(AssemblyError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}
