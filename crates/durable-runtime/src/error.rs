use durable_journal::JournalViolation;
use durable_types::{ErrorObject, ExecutionError};

/// Errors a user-facing call through [`crate::context::DurableContext`] can
/// raise. `Suspend` is a crate-internal sentinel: it is raised on whichever
/// thread loses the suspension race in `deregister` and must never escape a
/// public `Result` returned from `execute()` — the executor intercepts it in
/// `run_until_complete_or_suspend` and reports PENDING instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("step failed: {0}")]
    StepFailed(ErrorObject),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("step interrupted by process termination while STARTED")]
    StepInterrupted,
    #[error("invoke failed: {0}")]
    InvokeFailed(ErrorObject),
    #[error("invoke timed out: {0}")]
    InvokeTimedOut(ErrorObject),
    #[error("invoke stopped: {0}")]
    InvokeStopped(ErrorObject),
    #[error("invoke exception: {0}")]
    InvokeException(ErrorObject),
    #[error("callback failed: {0}")]
    CallbackFailed(ErrorObject),
    #[error("callback timed out: {0}")]
    CallbackTimedOut,
    #[error("child context failed: {0}")]
    ChildContextFailed(ErrorObject),
    #[error("handler failed: {0}")]
    HandlerFailed(ErrorObject),
    #[error("non-deterministic execution: {0}")]
    NonDeterministicExecution(JournalViolation),
    #[error("illegal operation: {0}")]
    IllegalOperation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("serialization error: {0}")]
    SerDes(ExecutionError),
    #[error("execution suspended")]
    Suspend,
    #[error("unrecoverable error: {0}")]
    Unrecoverable(String),
}

impl RuntimeError {
    /// `Unrecoverable` always short-circuits retry/suspend handling and
    /// terminates the execution outright.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable(_) | Self::NonDeterministicExecution(_))
    }

    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend)
    }

    /// Flatten into the wire `ErrorObject` shape (§4.G.1/§6), preserving
    /// the original object for variants that already carry one instead of
    /// collapsing everything through `Display`. Shared by the executor's
    /// FAILED outcome and a failed child context's checkpointed error.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Self::StepFailed(e)
            | Self::InvokeFailed(e)
            | Self::InvokeTimedOut(e)
            | Self::InvokeStopped(e)
            | Self::InvokeException(e)
            | Self::CallbackFailed(e)
            | Self::ChildContextFailed(e)
            | Self::HandlerFailed(e) => e.clone(),
            Self::SerDes(e) => ErrorObject::from_execution_error(e),
            other => ErrorObject::new("RuntimeError", other.to_string()),
        }
    }
}

impl From<JournalViolation> for RuntimeError {
    fn from(v: JournalViolation) -> Self {
        Self::NonDeterministicExecution(v)
    }
}

impl From<ExecutionError> for RuntimeError {
    fn from(e: ExecutionError) -> Self {
        Self::SerDes(e)
    }
}
