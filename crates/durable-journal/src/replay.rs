//! Replay-mode tracking and non-determinism detection.

use std::sync::atomic::{AtomicBool, Ordering};

use durable_types::{Operation, OperationId, OperationKind};

use crate::error::JournalViolation;

/// Tracks whether the current execution is replaying a persisted log or
/// has caught up to live execution. One-way: once flipped to execution
/// mode, it never flips back: a thread that stops seeing stored operations
/// for its ids is in execution mode for the remainder of the run.
#[derive(Debug, Default)]
pub struct ReplayModeTracker {
    in_execution_mode: AtomicBool,
}

impl ReplayModeTracker {
    /// `starts_in_replay` is true whenever the loaded log is non-empty;
    /// an empty log means there is nothing to replay against.
    pub fn new(starts_in_replay: bool) -> Self {
        Self {
            in_execution_mode: AtomicBool::new(!starts_in_replay),
        }
    }

    pub fn is_replaying(&self) -> bool {
        !self.in_execution_mode.load(Ordering::Acquire)
    }

    /// Called each time a lookup for the next operation id comes back
    /// empty or non-terminal. Flips the tracker to execution mode; a
    /// no-op once already flipped.
    pub fn observe_lookup(&self, found: Option<&Operation>) {
        let still_replaying = found.is_some_and(|op| op.is_terminal());
        if !still_replaying {
            self.in_execution_mode.store(true, Ordering::Release);
        }
    }
}

/// Invariant 2: compare the `(kind, name)` the code is about to produce
/// against what the stored snapshot recorded for this id. A mismatch means
/// the code took a different path than last time and the execution is
/// unrecoverable. A missing snapshot is not a violation — it means this id
/// hasn't been seen before, i.e. first execution.
pub fn validate_replay(
    id: &OperationId,
    expected_kind: OperationKind,
    expected_name: Option<&str>,
    stored: Option<&Operation>,
) -> Result<(), JournalViolation> {
    let Some(stored) = stored else {
        return Ok(());
    };
    let (actual_kind, actual_name) = stored.identity();
    if actual_kind != expected_kind || actual_name != expected_name {
        return Err(JournalViolation::NonDeterministicExecution {
            id: id.clone(),
            expected_kind,
            expected_name: expected_name.map(str::to_string),
            actual_kind,
            actual_name: actual_name.map(str::to_string),
        });
    }
    Ok(())
}

/// A child context's replay flag is initialized by asking the execution
/// manager whether any operation in the store has this context's id as
/// parent. True means the context (or something inside it) has run before
/// and is being replayed.
pub fn any_child_of<'a>(
    operations: impl IntoIterator<Item = &'a Operation>,
    context_id: &OperationId,
) -> bool {
    operations
        .into_iter()
        .any(|op| op.parent_id.as_ref() == Some(context_id))
}
