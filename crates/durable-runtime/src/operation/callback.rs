//! Callback operation state machine.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use durable_backend::BackendClient;
use durable_types::{
    CallbackUpdateOptions, ErrorObject, Operation, OperationDetails, OperationId, OperationKind,
    OperationStatus, SerDes, UpdateAction,
};

use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, ThreadId, ThreadKind};
use crate::operation::base::BaseOperation;

#[derive(Clone, Debug, Default)]
pub struct CallbackConfig {
    pub timeout_seconds: Option<u32>,
    pub heartbeat_timeout_seconds: Option<u32>,
}

pub struct Callback<C: BackendClient + 'static, S: SerDes + Clone + 'static> {
    base: BaseOperation<C>,
    config: CallbackConfig,
    serdes: S,
    callback_id: StdMutex<Option<String>>,
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static> Callback<C, S> {
    pub fn new(
        id: OperationId,
        name: String,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
        config: CallbackConfig,
        serdes: S,
    ) -> Self {
        Self {
            base: BaseOperation::new(id, Some(name), OperationKind::Callback, parent_id, manager),
            config,
            serdes,
            callback_id: StdMutex::new(None),
        }
    }

    /// Published once `run`'s dispatch phase has resolved the backend-assigned
    /// id, so user code can persist or forward it while still awaiting the
    /// result.
    pub fn callback_id(&self) -> Option<String> {
        self.callback_id.lock().expect("callback id mutex poisoned").clone()
    }

    pub async fn run<T>(&self, thread_id: &ThreadId) -> Result<T, RuntimeError>
    where
        T: serde::de::DeserializeOwned,
    {
        let stored = self.base.get_operation();
        self.base.validate_replay(stored.as_ref())?;

        let final_op = match stored {
            None => {
                if self.base.manager.should_log() {
                    tracing::debug!(
                        operation_id = %self.base.id,
                        operation_name = ?self.base.name,
                        "callback started"
                    );
                }
                let update = self
                    .base
                    .builder(UpdateAction::Start)
                    .callback_options(CallbackUpdateOptions {
                        timeout_seconds: self.config.timeout_seconds,
                        heartbeat_timeout_seconds: self.config.heartbeat_timeout_seconds,
                    })
                    .build();
                self.base.send_update(update).await?;
                if let Some(op) = self.base.get_operation() {
                    self.adopt_callback_id(&op);
                }
                self.poll_until_terminal(thread_id).await?
            }
            Some(op) if op.is_terminal() => op,
            Some(op) => {
                self.adopt_callback_id(&op);
                self.poll_until_terminal(thread_id).await?
            }
        };

        self.resolve(final_op)
    }

    fn adopt_callback_id(&self, op: &durable_types::Operation) {
        if let OperationDetails::Callback { callback_id, .. } = &op.details {
            *self.callback_id.lock().expect("callback id mutex poisoned") = callback_id.clone();
        }
    }

    async fn poll_until_terminal(&self, thread_id: &ThreadId) -> Result<durable_types::Operation, RuntimeError> {
        self.base
            .park_until(
                thread_id,
                ThreadKind::Context,
                Duration::from_millis(self.base.manager.poll_interval_ms()),
                |op| op.is_terminal(),
            )
            .await
    }

    fn resolve<T: serde::de::DeserializeOwned>(&self, op: durable_types::Operation) -> Result<T, RuntimeError> {
        let OperationDetails::Callback { result, error, .. } = &op.details else {
            return Err(RuntimeError::Unrecoverable("not a callback snapshot".to_string()));
        };
        match op.status {
            OperationStatus::Succeeded => {
                let payload = result
                    .as_ref()
                    .ok_or_else(|| RuntimeError::Unrecoverable("missing callback result payload".to_string()))?;
                self.serdes.deserialize(payload).map_err(RuntimeError::from)
            }
            OperationStatus::Failed => Err(RuntimeError::CallbackFailed(
                error.clone().unwrap_or_else(|| ErrorObject::new("Unknown", "callback failed")),
            )),
            OperationStatus::TimedOut => Err(RuntimeError::CallbackTimedOut),
            other => Err(RuntimeError::IllegalOperation(format!(
                "callback resolved in unexpected terminal status {other:?}"
            ))),
        }
    }
}
