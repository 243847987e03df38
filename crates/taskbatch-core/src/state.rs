/// Lifecycle of one command within a batch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Pending,
    CacheHit,
    Executing,
    Succeeded,
    /// Read output stored for later identical reads.
    Cached,
    /// Write finished and the cache was cleared.
    InvalidatingThenDone,
    Failed,
    AwaitingDecision,
    /// Failed and the remaining queue was abandoned.
    Aborted,
}

impl CommandState {
    pub fn can_transition_to(self, next: CommandState) -> bool {
        use CommandState::*;
        matches!(
            (self, next),
            (Pending, CacheHit)
                | (Pending, Executing)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Succeeded, Cached)
                | (Succeeded, InvalidatingThenDone)
                | (Failed, AwaitingDecision)
                | (AwaitingDecision, Failed)
                | (AwaitingDecision, Aborted)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::CommandState::*;

    #[test]
    fn happy_paths_are_legal() {
        assert!(Pending.can_transition_to(CacheHit));
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Succeeded));
        assert!(Succeeded.can_transition_to(Cached));
        assert!(Succeeded.can_transition_to(InvalidatingThenDone));
    }

    #[test]
    fn failure_paths_go_through_a_decision() {
        assert!(Executing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(AwaitingDecision));
        assert!(AwaitingDecision.can_transition_to(Aborted));
        assert!(AwaitingDecision.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Aborted));
    }

    #[test]
    fn terminal_states_do_not_restart() {
        for state in [CacheHit, Cached, InvalidatingThenDone, Aborted] {
            assert!(!state.can_transition_to(Executing));
            assert!(!state.can_transition_to(Pending));
        }
    }
}
