pub mod error;
pub mod id;
pub mod kind;
pub mod operation;
pub mod payload;
pub mod retry;
pub mod serde_codec;
pub mod status;
pub mod update;

pub use error::{ErrorKind, ErrorObject, ExecutionError};
pub use id::{IdError, OperationId, MAX_CALL_DEPTH};
pub use kind::OperationKind;
pub use operation::{Operation, OperationDetails};
pub use payload::{Codec, Payload};
pub use retry::{ExponentialBackoff, FixedDelay, Jitter, NoRetry, RetryDecision, RetryPolicy};
pub use serde_codec::{JsonSerDes, SerDes};
pub use status::OperationStatus;
pub use update::{
    CallbackUpdateOptions, ChainedInvokeUpdateOptions, ContextUpdateOptions, OperationUpdate,
    OperationUpdateBuilder, StepUpdateOptions, UpdateAction, WaitUpdateOptions,
};
