//! Operation-log invariant checking.
//!
//! Two modes, splitting hot-path from diagnostic validation:
//! - **Incremental** ([`InvariantState::check_transition`]): O(1) per
//!   status update, called from the execution manager's checkpoint
//!   callback before a snapshot overwrites the store.
//! - **Batch** ([`validate_operations`]): O(n) full scan over a page of
//!   operations, for offline log inspection and recovery diagnostics.

use std::collections::HashMap;

use durable_types::{Operation, OperationId, OperationStatus};

use crate::error::JournalViolation;

/// Accumulated last-known status per operation id, enough to validate the
/// next transition without rescanning the whole log.
#[derive(Clone, Debug, Default)]
pub struct InvariantState {
    last_status: HashMap<OperationId, OperationStatus>,
}

impl InvariantState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `id`'s transition to `next`, then record it. A first-seen
    /// id has no prior status and any status is accepted as its opener.
    pub fn check_transition(
        &mut self,
        id: &OperationId,
        next: OperationStatus,
    ) -> Result<(), JournalViolation> {
        if let Some(&prev) = self.last_status.get(id) {
            if !prev.can_transition_to(&next) {
                return Err(JournalViolation::IllegalTransition {
                    id: id.clone(),
                    from: prev,
                    to: next,
                });
            }
        }
        self.last_status.insert(id.clone(), next);
        Ok(())
    }

    pub fn status_of(&self, id: &OperationId) -> Option<OperationStatus> {
        self.last_status.get(id).copied()
    }
}

/// Invariant 5: a child-context operation's id must strictly extend its
/// parent's id.
pub fn check_child_prefix(operation: &Operation) -> Result<(), JournalViolation> {
    if let Some(parent_id) = &operation.parent_id
        && !operation.id.is_descendant_of(parent_id)
    {
        return Err(JournalViolation::ChildPrefixMismatch {
            child_id: operation.id.clone(),
            parent_id: parent_id.clone(),
        });
    }
    Ok(())
}

/// Batch-validate an ordered slice of operation snapshots (e.g. a full
/// `GetExecutionState` page sequence), collecting every violation rather
/// than stopping at the first one. Used for diagnostics, not the hot
/// append path.
pub fn validate_operations(operations: &[Operation]) -> Vec<JournalViolation> {
    let mut state = InvariantState::new();
    let mut violations = Vec::new();

    for op in operations {
        if let Err(v) = check_child_prefix(op) {
            violations.push(v);
        }
        if let Err(v) = state.check_transition(&op.id, op.status) {
            violations.push(v);
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use durable_types::{OperationDetails, OperationKind};

    fn mk_op(
        id: &str,
        parent: Option<&str>,
        status: OperationStatus,
        kind: OperationKind,
    ) -> Operation {
        let details = match kind {
            OperationKind::Step => OperationDetails::Step {
                result: None,
                error: None,
            },
            OperationKind::Context => OperationDetails::Context {
                result: None,
                error: None,
                replay_children: false,
            },
            _ => OperationDetails::Step {
                result: None,
                error: None,
            },
        };
        Operation {
            id: id.parse().unwrap(),
            name: Some("op".to_string()),
            parent_id: parent.map(|p| p.parse().unwrap()),
            status,
            attempt: 0,
            details,
        }
    }

    #[test]
    fn first_seen_id_accepts_any_opening_status() {
        let mut state = InvariantState::new();
        let id: OperationId = "1".parse().unwrap();
        assert!(state.check_transition(&id, OperationStatus::Started).is_ok());
    }

    #[test]
    fn terminal_status_cannot_transition_further() {
        let mut state = InvariantState::new();
        let id: OperationId = "1".parse().unwrap();
        state.check_transition(&id, OperationStatus::Succeeded).unwrap();
        let err = state
            .check_transition(&id, OperationStatus::Ready)
            .unwrap_err();
        assert_eq!(
            err,
            JournalViolation::IllegalTransition {
                id,
                from: OperationStatus::Succeeded,
                to: OperationStatus::Ready,
            }
        );
    }

    #[test]
    fn ready_pending_oscillation_is_legal() {
        let mut state = InvariantState::new();
        let id: OperationId = "1".parse().unwrap();
        state.check_transition(&id, OperationStatus::Started).unwrap();
        state.check_transition(&id, OperationStatus::Pending).unwrap();
        state.check_transition(&id, OperationStatus::Ready).unwrap();
        state.check_transition(&id, OperationStatus::Pending).unwrap();
        assert!(state.check_transition(&id, OperationStatus::Succeeded).is_ok());
    }

    #[test]
    fn child_prefix_mismatch_is_detected() {
        let op = mk_op("2-1", Some("1"), OperationStatus::Started, OperationKind::Step);
        let err = check_child_prefix(&op).unwrap_err();
        assert!(matches!(err, JournalViolation::ChildPrefixMismatch { .. }));
    }

    #[test]
    fn child_prefix_match_passes() {
        let op = mk_op("1-1", Some("1"), OperationStatus::Started, OperationKind::Step);
        assert!(check_child_prefix(&op).is_ok());
    }

    #[test]
    fn validate_operations_collects_multiple_violations() {
        let ops = vec![
            mk_op("1", None, OperationStatus::Succeeded, OperationKind::Step),
            mk_op("1", None, OperationStatus::Ready, OperationKind::Step),
            mk_op("3-1", Some("2"), OperationStatus::Started, OperationKind::Step),
        ];
        let violations = validate_operations(&ops);
        assert_eq!(violations.len(), 2);
    }
}
