use async_trait::async_trait;
use durable_types::OperationUpdate;

use crate::client::BackendClient;
use crate::error::BackendError;
use crate::model::{
    CheckpointRequest, CheckpointResponse, GetExecutionStateRequest, GetExecutionStateResponse,
    OperationPage,
};

/// `reqwest`-backed [`BackendClient`], POSTing JSON bodies to a
/// caller-supplied base URL. This is one concrete wire convention behind
/// the trait, not the only legal one — only the trait's interface is
/// load-bearing.
#[derive(Clone, Debug)]
pub struct HttpBackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn checkpoint_url(&self, execution_arn: &str) -> String {
        format!("{}/executions/{}/checkpoint", self.base_url, execution_arn)
    }

    fn state_url(&self, execution_arn: &str) -> String {
        format!("{}/executions/{}/state", self.base_url, execution_arn)
    }
}

/// A non-2xx response in the 408/429/5xx range is transient; anything
/// else (4xx other than 408/429, or a malformed body) is permanent.
fn classify_status(status: reqwest::StatusCode, body: String) -> BackendError {
    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        BackendError::Transient(format!("{status}: {body}"))
    } else {
        BackendError::Permanent(format!("{status}: {body}"))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn checkpoint(
        &self,
        execution_arn: &str,
        token: &str,
        updates: Vec<OperationUpdate>,
    ) -> Result<(String, Option<OperationPage>), BackendError> {
        let request = CheckpointRequest {
            execution_arn: execution_arn.to_string(),
            token: token.to_string(),
            updates,
        };

        let response = self
            .client
            .post(self.checkpoint_url(execution_arn))
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: CheckpointResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Permanent(e.to_string()))?;
        Ok((body.new_token, body.new_state))
    }

    async fn get_execution_state(
        &self,
        execution_arn: &str,
        token: &str,
        marker: Option<&str>,
    ) -> Result<OperationPage, BackendError> {
        let request = GetExecutionStateRequest {
            execution_arn: execution_arn.to_string(),
            token: token.to_string(),
            marker: marker.map(str::to_string),
        };

        let response = self
            .client
            .post(self.state_url(execution_arn))
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: GetExecutionStateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Permanent(e.to_string()))?;
        Ok(body.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_url_joins_base_and_arn() {
        let client = HttpBackendClient::new("https://backend.internal");
        assert_eq!(
            client.checkpoint_url("exec-1"),
            "https://backend.internal/executions/exec-1/checkpoint"
        );
    }

    #[test]
    fn state_url_joins_base_and_arn() {
        let client = HttpBackendClient::new("https://backend.internal");
        assert_eq!(
            client.state_url("exec-1"),
            "https://backend.internal/executions/exec-1/state"
        );
    }

    #[test]
    fn server_errors_classify_as_transient() {
        let err = classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(err.is_transient());
    }

    #[test]
    fn bad_request_classifies_as_permanent() {
        let err = classify_status(reqwest::StatusCode::BAD_REQUEST, "bad arn".into());
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limit_classifies_as_transient() {
        let err = classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(err.is_transient());
    }
}
