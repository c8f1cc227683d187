//! The client-side durable execution runtime: the checkpoint batcher, the
//! execution manager, the five operation-kind state machines, the
//! user-facing context, and the top-level executor.

pub mod batcher;
pub mod constants;
pub mod context;
pub mod error;
pub mod executor;
pub mod manager;
pub mod operation;

pub use batcher::{CheckpointBatcher, CheckpointConsumer};
pub use context::{AsyncHandle, CallbackHandle, DurableContext};
pub use error::RuntimeError;
pub use executor::{execute, Invocation, InvocationOutcome, RuntimeConfig};
pub use manager::{ExecutionManager, OperationObserver, ThreadId, ThreadKind};
pub use operation::{
    Callback, CallbackConfig, ChildContext, DispatchKind, Invoke, InvokeConfig, Step, StepConfig,
    StepSemantics, Wait,
};
