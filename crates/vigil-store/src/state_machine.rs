//! Record lifecycle state machine with validated transitions.
//!
//! inbox-of-work -> pending-approval | approved | rejected
//! pending-approval -> approved | rejected
//! approved -> done | failed

use vigil_core::error::{Result, VigilError};
use vigil_core::types::LifecycleState;

/// States reachable from `from` in one move.
pub fn allowed_targets(from: LifecycleState) -> &'static [LifecycleState] {
    use LifecycleState::*;
    match from {
        Inbox => &[PendingApproval, Approved, Rejected],
        PendingApproval => &[Approved, Rejected],
        Approved => &[Done, Failed],
        Rejected | Done | Failed => &[],
    }
}

/// Validate that a state transition is allowed.
pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<()> {
    if allowed_targets(from).contains(&to) {
        Ok(())
    } else {
        Err(VigilError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
