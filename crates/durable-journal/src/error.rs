use durable_types::{OperationId, OperationKind, OperationStatus};

/// Describes a specific operation-log invariant violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalViolation {
    /// Invariant 3: an operation attempted an illegal status transition
    /// (e.g. leaving a terminal state, or `Ready`/`Pending` -> `Started`).
    IllegalTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },
    /// Invariant 5: a child-context operation's id does not extend its
    /// parent's id as a strict prefix.
    ChildPrefixMismatch {
        child_id: OperationId,
        parent_id: OperationId,
    },
    /// Invariant 2: replay produced a `(kind, name)` pair that does not
    /// match what the stored log recorded for this id — a non-deterministic
    /// execution.
    NonDeterministicExecution {
        id: OperationId,
        expected_kind: OperationKind,
        expected_name: Option<String>,
        actual_kind: OperationKind,
        actual_name: Option<String>,
    },
}

impl std::fmt::Display for JournalViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IllegalTransition { id, from, to } => {
                write!(f, "operation {id} made illegal transition {from} -> {to}")
            }
            Self::ChildPrefixMismatch {
                child_id,
                parent_id,
            } => write!(
                f,
                "operation {child_id} is not a descendant of its parent context {parent_id}"
            ),
            Self::NonDeterministicExecution {
                id,
                expected_kind,
                expected_name,
                actual_kind,
                actual_name,
            } => write!(
                f,
                "operation {id}: replay expected ({expected_kind}, {expected_name:?}) but code produced ({actual_kind}, {actual_name:?})"
            ),
        }
    }
}

/// Errors produced by journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal is empty")]
    EmptyJournal,
    #[error("invariant violation: {0}")]
    InvariantViolation(JournalViolation),
}
