/// Poll cadence for operations whose terminal status is driven entirely
/// by the backend (steps waiting out of PENDING, waits, callbacks, and a
/// chained invoke's subsequent polls once past the first).
pub const DEFAULT_POLL_MS: u64 = 200;

/// Guard added on top of a chained invoke's configured timeout for the
/// first poll delay.
pub const INVOKE_TIMEOUT_GUARD_MS: u64 = 25;

/// Results above this size are not checkpointed as a child-context
/// payload; instead `replay_children=true` tells future replays to
/// re-run the child to reconstruct the value.
pub const MAX_CHILD_RESULT_BYTES: usize = 256 * 1024;
