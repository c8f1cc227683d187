pub mod error;
pub mod invariants;
pub mod replay;

pub use error::{JournalError, JournalViolation};
pub use invariants::{check_child_prefix, validate_operations, InvariantState};
pub use replay::{any_child_of, validate_replay, ReplayModeTracker};
