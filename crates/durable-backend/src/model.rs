//! Wire types for the two backend RPCs.
//!
//! The route shape (`POST {base_url}/executions/{arn}/checkpoint` and
//! `.../state`) is an implementation choice behind [`crate::client::BackendClient`];
//! only the request/response bodies below are load-bearing.

use durable_types::{Operation, OperationUpdate};
use serde::{Deserialize, Serialize};

/// `Checkpoint(arn, token, updates[]) -> (new_token, new_state?)`.
#[derive(Clone, Debug, Serialize)]
pub struct CheckpointRequest {
    pub execution_arn: String,
    pub token: String,
    pub updates: Vec<OperationUpdate>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CheckpointResponse {
    pub new_token: String,
    pub new_state: Option<OperationPage>,
}

/// `GetExecutionState(arn, token, marker) -> (operations[], next_marker)`.
#[derive(Clone, Debug, Serialize)]
pub struct GetExecutionStateRequest {
    pub execution_arn: String,
    pub token: String,
    pub marker: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetExecutionStateResponse {
    #[serde(flatten)]
    pub page: OperationPage,
}

/// A page of the operation log plus an opaque continuation marker. `None`
/// means this was the last page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OperationPage {
    pub operations: Vec<Operation>,
    pub next_marker: Option<String>,
}
