use async_trait::async_trait;
use durable_types::OperationUpdate;

use crate::error::BackendError;
use crate::model::OperationPage;

/// The client side of the two backend RPCs. The durable store, the host
/// runtime's invocation dispatch, and the backend's wire protocol are all
/// external collaborators; only this trait's shape is fixed here.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// `Checkpoint(arn, token, updates[]) -> (new_token, new_state?)`.
    /// Idempotent under `token`; the returned token is never older than
    /// the one submitted.
    async fn checkpoint(
        &self,
        execution_arn: &str,
        token: &str,
        updates: Vec<OperationUpdate>,
    ) -> Result<(String, Option<OperationPage>), BackendError>;

    /// `GetExecutionState(arn, token, marker) -> (operations[], next_marker)`.
    async fn get_execution_state(
        &self,
        execution_arn: &str,
        token: &str,
        marker: Option<&str>,
    ) -> Result<OperationPage, BackendError>;
}
