//! Per-group phase state machine.
//!
//! `Draining → Verifying → Deploying → Restoring → Done`, with an absorbing
//! `Failed(phase)` reachable from every non-terminal state. A failed group
//! never advances, so nodes drained before the failure stay out of the load
//! balancer.

use crate::core::types::PhaseKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Draining,
    Verifying,
    Deploying,
    Restoring,
    Done,
    Failed(PhaseKind),
}

impl GroupState {
    pub fn initial() -> Self {
        Self::Draining
    }

    /// Phase to run in this state, or `None` once terminal.
    pub fn phase(self) -> Option<PhaseKind> {
        match self {
            Self::Draining => Some(PhaseKind::Draining),
            Self::Verifying => Some(PhaseKind::Verifying),
            Self::Deploying => Some(PhaseKind::Deploying),
            Self::Restoring => Some(PhaseKind::Restoring),
            Self::Done | Self::Failed(_) => None,
        }
    }

    /// Transition after the current phase reports its outcome.
    ///
    /// Terminal states are absorbing.
    pub fn advance(self, phase_succeeded: bool) -> Self {
        let Some(phase) = self.phase() else {
            return self;
        };
        if !phase_succeeded {
            return Self::Failed(phase);
        }
        match self {
            Self::Draining => Self::Verifying,
            Self::Verifying => Self::Deploying,
            Self::Deploying => Self::Restoring,
            Self::Restoring => Self::Done,
            Self::Done | Self::Failed(_) => self,
        }
    }
}
