use serde::{Deserialize, Serialize};

use duka_core::types::Journey;

/// Conversation lifecycle within one turn and across turns.
///
/// The router is a pure function over these variants; there is no string
/// status to drift out of sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Classifying,
    Clarifying,
    Executing { journey: Journey },
    Formatting,
    AwaitingCustomer,
    Handoff,
    Closed,
}

impl TurnState {
    /// Legal transitions. Escalation (`→ Handoff`) and close (`→ Closed`)
    /// are allowed from anywhere.
    pub fn can_transition_to(&self, next: TurnState) -> bool {
        if matches!(next, TurnState::Handoff | TurnState::Closed) {
            return true;
        }
        matches!(
            (self, next),
            (TurnState::Idle, TurnState::Classifying)
                | (TurnState::AwaitingCustomer, TurnState::Classifying)
                | (TurnState::Classifying, TurnState::Clarifying)
                | (TurnState::Classifying, TurnState::Executing { .. })
                | (TurnState::Clarifying, TurnState::AwaitingCustomer)
                | (TurnState::Executing { .. }, TurnState::Formatting)
                | (TurnState::Formatting, TurnState::AwaitingCustomer)
                | (TurnState::Handoff, TurnState::AwaitingCustomer)
        )
    }

    /// While in handoff the pipeline must not classify or execute.
    pub fn pipeline_suspended(&self) -> bool {
        matches!(self, TurnState::Handoff | TurnState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let executing = TurnState::Executing {
            journey: Journey::Sales,
        };
        assert!(TurnState::Idle.can_transition_to(TurnState::Classifying));
        assert!(TurnState::Classifying.can_transition_to(executing));
        assert!(executing.can_transition_to(TurnState::Formatting));
        assert!(TurnState::Formatting.can_transition_to(TurnState::AwaitingCustomer));
        assert!(TurnState::AwaitingCustomer.can_transition_to(TurnState::Classifying));
    }

    #[test]
    fn clarify_path() {
        assert!(TurnState::Classifying.can_transition_to(TurnState::Clarifying));
        assert!(TurnState::Clarifying.can_transition_to(TurnState::AwaitingCustomer));
    }

    #[test]
    fn handoff_and_close_from_anywhere() {
        for s in [
            TurnState::Idle,
            TurnState::Classifying,
            TurnState::Clarifying,
            TurnState::Formatting,
            TurnState::AwaitingCustomer,
        ] {
            assert!(s.can_transition_to(TurnState::Handoff));
            assert!(s.can_transition_to(TurnState::Closed));
        }
    }

    #[test]
    fn illegal_jumps_rejected() {
        assert!(!TurnState::Idle.can_transition_to(TurnState::Formatting));
        assert!(!TurnState::Clarifying.can_transition_to(TurnState::Executing {
            journey: Journey::Sales
        }));
    }

    #[test]
    fn handoff_suspends_pipeline() {
        assert!(TurnState::Handoff.pipeline_suspended());
        assert!(TurnState::Closed.pipeline_suspended());
        assert!(!TurnState::AwaitingCustomer.pipeline_suspended());
    }
}
