pub mod client;
pub mod error;
pub mod http;
pub mod model;

pub use client::BackendClient;
pub use error::BackendError;
pub use http::HttpBackendClient;
pub use model::{
    CheckpointRequest, CheckpointResponse, GetExecutionStateRequest, GetExecutionStateResponse,
    OperationPage,
};
