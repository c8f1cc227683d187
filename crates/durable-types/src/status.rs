use serde::{Deserialize, Serialize};

/// An operation's lifecycle status: `STARTED -> (READY <-> PENDING)* ->
/// terminal`, never revisited once terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Started,
    Ready,
    Pending,
    Succeeded,
    Failed,
    TimedOut,
    Stopped,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Stopped | Self::Cancelled
        )
    }

    /// Whether `self -> next` is a legal single-step transition under the
    /// monotone status invariant. Terminal states have no outgoing edges;
    /// `Started` may move to `Ready`, `Pending`, or directly to a terminal
    /// state (a step that fails without ever reporting `READY`/`PENDING`);
    /// `Ready`/`Pending` may flip between each other or move to terminal.
    pub fn can_transition_to(&self, next: &OperationStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match self {
            Self::Started => true,
            Self::Ready | Self::Pending => !matches!(next, Self::Started),
            _ => unreachable!("terminal handled above"),
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "STARTED",
            Self::Ready => "READY",
            Self::Pending => "PENDING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Stopped => "STOPPED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [
            OperationStatus::Succeeded,
            OperationStatus::Failed,
            OperationStatus::TimedOut,
            OperationStatus::Stopped,
            OperationStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(&OperationStatus::Ready));
        }
    }

    #[test]
    fn ready_and_pending_flip_freely() {
        assert!(OperationStatus::Ready.can_transition_to(&OperationStatus::Pending));
        assert!(OperationStatus::Pending.can_transition_to(&OperationStatus::Ready));
        assert!(!OperationStatus::Ready.can_transition_to(&OperationStatus::Started));
    }

    #[test]
    fn started_can_reach_any_non_started() {
        assert!(OperationStatus::Started.can_transition_to(&OperationStatus::Ready));
        assert!(OperationStatus::Started.can_transition_to(&OperationStatus::Succeeded));
    }
}
