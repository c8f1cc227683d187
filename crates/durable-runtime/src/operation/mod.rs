pub mod base;
pub mod callback;
pub mod child_context;
pub mod invoke;
pub mod step;
pub mod wait;

pub use base::BaseOperation;
pub use callback::{Callback, CallbackConfig};
pub use child_context::{ChildContext, DispatchKind};
pub use invoke::{Invoke, InvokeConfig};
pub use step::{Step, StepConfig, StepSemantics};
pub use wait::Wait;
