use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorObject;
use crate::id::OperationId;
use crate::kind::OperationKind;
use crate::payload::Payload;
use crate::status::OperationStatus;

/// Kind-specific payload carried by an [`Operation`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OperationDetails {
    Execution {
        input_payload: Payload,
    },
    Step {
        result: Option<Payload>,
        error: Option<ErrorObject>,
    },
    Wait {
        scheduled_end_timestamp: Option<DateTime<Utc>>,
    },
    ChainedInvoke {
        function_name: String,
        result: Option<Payload>,
        error: Option<ErrorObject>,
    },
    Callback {
        callback_id: Option<String>,
        result: Option<Payload>,
        error: Option<ErrorObject>,
    },
    Context {
        result: Option<Payload>,
        error: Option<ErrorObject>,
        replay_children: bool,
    },
}

impl OperationDetails {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Execution { .. } => OperationKind::Execution,
            Self::Step { .. } => OperationKind::Step,
            Self::Wait { .. } => OperationKind::Wait,
            Self::ChainedInvoke { .. } => OperationKind::ChainedInvoke,
            Self::Callback { .. } => OperationKind::Callback,
            Self::Context { .. } => OperationKind::Context,
        }
    }
}

/// A single log entry: the fundamental unit tracked by the execution
/// manager's operation store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub name: Option<String>,
    pub parent_id: Option<OperationId>,
    pub status: OperationStatus,
    /// Meaningful for STEP; zero for other kinds.
    pub attempt: u32,
    pub details: OperationDetails,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        self.details.kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `(kind, name)` used by the non-determinism check in `validate_replay`.
    pub fn identity(&self) -> (OperationKind, Option<&str>) {
        (self.kind(), self.name.as_deref())
    }
}
