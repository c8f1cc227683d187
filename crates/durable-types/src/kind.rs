use serde::{Deserialize, Serialize};

/// The kind of an [`crate::operation::Operation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Execution,
    Step,
    Wait,
    ChainedInvoke,
    Callback,
    Context,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Execution => "EXECUTION",
            Self::Step => "STEP",
            Self::Wait => "WAIT",
            Self::ChainedInvoke => "CHAINED_INVOKE",
            Self::Callback => "CALLBACK",
            Self::Context => "CONTEXT",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
