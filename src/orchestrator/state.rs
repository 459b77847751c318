//! Workflow progress

use std::fmt;

/// How far the workflow got. Ordered: later stages compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkflowState {
    /// Nothing connected yet
    Unauthenticated,
    /// Logged in to the login host
    LoggedInPrimary,
    /// Allocation command sent
    AllocationRequested,
    /// Jupyter started, banner not seen yet
    ServiceLaunching,
    /// Banner seen, address known
    ServiceReady,
    /// Second connection logged in
    LoggedInSecondary,
    /// Port forward running
    TunnelEstablished,
    /// Terminal handed to the remote shell
    Interactive,
    /// Cleaned up
    Closed,
}

impl WorkflowState {
    /// Move forward to `next`. Skipping ahead is allowed (the launch
    /// fallback jumps from `ServiceLaunching` to `Interactive`); going back
    /// or leaving `Closed` is not. Returns whether the state changed.
    pub fn advance(&mut self, next: WorkflowState) -> bool {
        if next <= *self {
            return false;
        }
        *self = next;
        true
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        let mut state = WorkflowState::Unauthenticated;
        assert!(state.advance(WorkflowState::LoggedInPrimary));
        assert!(!state.advance(WorkflowState::Unauthenticated));
        assert_eq!(state, WorkflowState::LoggedInPrimary);
    }

    #[test]
    fn test_launch_fallback_skips_to_interactive() {
        let mut state = WorkflowState::ServiceLaunching;
        assert!(state.advance(WorkflowState::Interactive));
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = WorkflowState::AllocationRequested;
        assert!(state.advance(WorkflowState::Closed));
        assert!(!state.advance(WorkflowState::Interactive));
        assert!(!state.advance(WorkflowState::Closed));
    }
}
