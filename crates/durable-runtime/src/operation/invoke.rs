//! Chained invoke operation state machine.

use std::sync::Arc;
use std::time::Duration;

use durable_backend::BackendClient;
use durable_types::{
    ChainedInvokeUpdateOptions, ErrorObject, Operation, OperationDetails, OperationId,
    OperationKind, OperationStatus, SerDes, UpdateAction,
};

use crate::constants::INVOKE_TIMEOUT_GUARD_MS;
use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, ThreadId, ThreadKind};
use crate::operation::base::BaseOperation;

#[derive(Clone, Debug, Default)]
pub struct InvokeConfig {
    pub timeout_seconds: Option<u32>,
    pub tenant_id: Option<String>,
}

pub struct Invoke<C: BackendClient + 'static, S: SerDes + Clone + 'static> {
    base: BaseOperation<C>,
    function_name: String,
    config: InvokeConfig,
    serdes: S,
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static> Invoke<C, S> {
    pub fn new(
        id: OperationId,
        name: String,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
        function_name: String,
        config: InvokeConfig,
        serdes: S,
    ) -> Self {
        Self {
            base: BaseOperation::new(id, Some(name), OperationKind::ChainedInvoke, parent_id, manager),
            function_name,
            config,
            serdes,
        }
    }

    pub async fn run<P, T>(&self, thread_id: &ThreadId, payload: &P) -> Result<T, RuntimeError>
    where
        P: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let stored = self.base.get_operation();
        self.base.validate_replay(stored.as_ref())?;

        let first_poll_delay = Duration::from_millis(
            self.config
                .timeout_seconds
                .map(|t| t as u64 * 1000 + INVOKE_TIMEOUT_GUARD_MS)
                .unwrap_or(INVOKE_TIMEOUT_GUARD_MS),
        );

        let final_op = match stored {
            None => {
                if self.base.manager.should_log() {
                    tracing::debug!(
                        operation_id = %self.base.id,
                        operation_name = ?self.base.name,
                        function_name = %self.function_name,
                        "chained invoke started"
                    );
                }
                let serialized = self.serdes.serialize(payload).map_err(RuntimeError::from)?;
                let update = self
                    .base
                    .builder(UpdateAction::Start)
                    .payload(serialized)
                    .chained_invoke_options(ChainedInvokeUpdateOptions {
                        function_name: Some(self.function_name.clone()),
                        tenant_id: self.config.tenant_id.clone(),
                    })
                    .build();
                self.base.send_update(update).await?;
                self.poll_until_terminal(thread_id, first_poll_delay).await?
            }
            Some(op) if op.is_terminal() => op,
            Some(_started) => self.poll_until_terminal(thread_id, first_poll_delay).await?,
        };

        if self.base.manager.should_log() {
            tracing::debug!(operation_id = %self.base.id, status = ?final_op.status, "chained invoke terminal");
        }
        self.resolve(final_op)
    }

    async fn poll_until_terminal(
        &self,
        thread_id: &ThreadId,
        first_delay: Duration,
    ) -> Result<durable_types::Operation, RuntimeError> {
        self.base
            .park_until(thread_id, ThreadKind::Context, first_delay, |op| op.is_terminal())
            .await
    }

    fn resolve<T: serde::de::DeserializeOwned>(&self, op: durable_types::Operation) -> Result<T, RuntimeError> {
        let OperationDetails::ChainedInvoke { result, error, .. } = &op.details else {
            return Err(RuntimeError::Unrecoverable("not a chained-invoke snapshot".to_string()));
        };
        match op.status {
            OperationStatus::Succeeded => {
                let payload = result
                    .as_ref()
                    .ok_or_else(|| RuntimeError::Unrecoverable("missing invoke result payload".to_string()))?;
                self.serdes.deserialize(payload).map_err(RuntimeError::from)
            }
            OperationStatus::Failed => Err(RuntimeError::InvokeFailed(
                error.clone().unwrap_or_else(|| ErrorObject::new("Unknown", "invoke failed")),
            )),
            OperationStatus::TimedOut => Err(RuntimeError::InvokeTimedOut(
                error.clone().unwrap_or_else(|| ErrorObject::new("Timeout", "invoke timed out")),
            )),
            OperationStatus::Stopped => Err(RuntimeError::InvokeStopped(
                error.clone().unwrap_or_else(|| ErrorObject::new("Stopped", "invoke stopped")),
            )),
            other => Err(RuntimeError::InvokeException(ErrorObject::new(
                "InvokeException",
                format!("unexpected terminal status {other:?}"),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use durable_backend::{BackendError, OperationPage};
    use durable_types::JsonSerDes;
    use std::sync::Mutex as StdMutex;

    struct EchoBackend {
        store: StdMutex<std::collections::HashMap<OperationId, Operation>>,
        /// Status assigned the moment a chained invoke is started; tests
        /// that exercise polling flip this after construction.
        resolve_as: StdMutex<OperationStatus>,
    }

    impl EchoBackend {
        fn new(resolve_as: OperationStatus) -> Self {
            Self {
                store: StdMutex::new(std::collections::HashMap::new()),
                resolve_as: StdMutex::new(resolve_as),
            }
        }
    }

    #[async_trait]
    impl BackendClient for EchoBackend {
        async fn checkpoint(
            &self,
            _execution_arn: &str,
            _token: &str,
            updates: Vec<durable_types::OperationUpdate>,
        ) -> Result<(String, Option<OperationPage>), BackendError> {
            let mut store = self.store.lock().unwrap();
            let mut operations = Vec::new();
            for update in updates {
                let op = Operation {
                    id: update.id.clone(),
                    name: update.name.clone(),
                    parent_id: update.parent_id.clone(),
                    status: OperationStatus::Started,
                    attempt: 0,
                    details: OperationDetails::ChainedInvoke {
                        function_name: update
                            .chained_invoke_options
                            .as_ref()
                            .and_then(|o| o.function_name.clone())
                            .unwrap_or_default(),
                        result: None,
                        error: None,
                    },
                };
                store.insert(update.id.clone(), op.clone());
                operations.push(op);
            }
            Ok((
                "token-next".to_string(),
                Some(OperationPage {
                    operations,
                    next_marker: None,
                }),
            ))
        }

        async fn get_execution_state(
            &self,
            _execution_arn: &str,
            _token: &str,
            _marker: Option<&str>,
        ) -> Result<OperationPage, BackendError> {
            let status = *self.resolve_as.lock().unwrap();
            if status == OperationStatus::Started {
                return Ok(OperationPage::default());
            }
            let mut store = self.store.lock().unwrap();
            let operations: Vec<Operation> = store
                .values_mut()
                .map(|op| {
                    op.status = status;
                    if let OperationDetails::ChainedInvoke { result, .. } = &mut op.details {
                        if status == OperationStatus::Succeeded {
                            *result = Some(JsonSerDes.serialize(&99u32).unwrap());
                        }
                    }
                    op.clone()
                })
                .collect();
            Ok(OperationPage {
                operations,
                next_marker: None,
            })
        }
    }

    fn mk_manager(backend: Arc<EchoBackend>) -> Arc<ExecutionManager<EchoBackend>> {
        ExecutionManager::new(backend, "exec-1", "token-0", vec![])
    }

    #[tokio::test]
    async fn a_successful_invoke_returns_the_deserialized_result() {
        let backend = Arc::new(EchoBackend::new(OperationStatus::Succeeded));
        let manager = mk_manager(backend);
        // A keepalive thread keeps the active set non-empty while the
        // caller's own thread deregisters to park, so the park resolves
        // against a real poll round-trip instead of raising Suspend.
        manager.register_thread(ThreadId::root());
        let caller = ThreadId::context(&OperationId::root(1));
        manager.register_thread(caller.clone());
        let invoke: Invoke<EchoBackend, JsonSerDes> = Invoke::new(
            OperationId::root(1),
            "call-downstream".to_string(),
            None,
            manager,
            "downstream-fn".to_string(),
            InvokeConfig::default(),
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = invoke.run(&caller, &"payload").await;
        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn a_timed_out_invoke_surfaces_invoke_timed_out() {
        let backend = Arc::new(EchoBackend::new(OperationStatus::TimedOut));
        let manager = mk_manager(backend);
        manager.register_thread(ThreadId::root());
        let caller = ThreadId::context(&OperationId::root(1));
        manager.register_thread(caller.clone());
        let invoke: Invoke<EchoBackend, JsonSerDes> = Invoke::new(
            OperationId::root(1),
            "call-downstream".to_string(),
            None,
            manager,
            "downstream-fn".to_string(),
            InvokeConfig::default(),
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = invoke.run(&caller, &"payload").await;
        assert!(matches!(result, Err(RuntimeError::InvokeTimedOut(_))));
    }
}
