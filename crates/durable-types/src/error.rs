use std::fmt;

use serde::{Deserialize, Serialize};

use crate::payload::Payload;

/// Canonical category for an execution or invocation failure.
///
/// Intentionally coarse-grained: used for retry-policy decisions and for
/// observability dimensions in logs, not for exhaustive error matching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// User function threw; ordinary application failure.
    UserError,
    /// AT_MOST_ONCE semantics found an interrupted STARTED record.
    StepInterrupted,
    /// Terminal outcome of a chained invoke or callback.
    Timeout,
    Stopped,
    /// Operation was intentionally cancelled.
    Cancelled,
    /// Replay found a `(kind, name)` mismatch against code.
    Nondeterminism,
    /// Structural misuse (nested operation in a step, missing store entry).
    IllegalOperation,
    /// Payload or exception could not be round-tripped.
    SerDes,
    /// Catch-all for runtime-internal failures with no dedicated kind.
    Uncategorized,
}

/// Structured failure payload used both for `FAIL`/`RETRY` updates and for
/// the final `FAILED` invocation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)?;
        if let Some(ref detail) = self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// The wire shape of a failure: `{type, message, data?, stack_trace[]}`.
/// `data` carries the serialized original exception when the `SerDes`
/// supports type-tagged payloads; `stack_trace` is a list of
/// `"class|method|file|line"` tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub error_type: String,
    pub message: String,
    pub data: Option<Payload>,
    pub stack_trace: Vec<String>,
}

impl ErrorObject {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            data: None,
            stack_trace: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }

    pub fn from_execution_error(err: &ExecutionError) -> Self {
        Self::new(format!("{:?}", err.kind), err.message.clone())
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}
