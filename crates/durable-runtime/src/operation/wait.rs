//! Wait operation state machine. The backend owns the timer entirely; the
//! client only polls at the computed cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use durable_backend::BackendClient;
use durable_types::{OperationDetails, OperationId, OperationKind, OperationStatus, WaitUpdateOptions, UpdateAction};

use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, ThreadId, ThreadKind};
use crate::operation::base::BaseOperation;

pub struct Wait<C: BackendClient + 'static> {
    base: BaseOperation<C>,
    duration_seconds: u32,
}

impl<C: BackendClient + 'static> Wait<C> {
    /// A wait of exactly 1 second is accepted; 0 is rejected with an
    /// argument error rather than silently clamped up.
    pub fn new(
        id: OperationId,
        name: String,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
        duration_seconds: u32,
    ) -> Result<Self, RuntimeError> {
        if duration_seconds < 1 {
            return Err(RuntimeError::InvalidArgument(format!(
                "wait duration must be >= 1 second, got {duration_seconds}"
            )));
        }
        Ok(Self {
            base: BaseOperation::new(id, Some(name), OperationKind::Wait, parent_id, manager),
            duration_seconds,
        })
    }

    pub async fn run(&self, thread_id: &ThreadId) -> Result<(), RuntimeError> {
        let stored = self.base.get_operation();
        self.base.validate_replay(stored.as_ref())?;

        match stored {
            None => {
                if self.base.manager.should_log() {
                    tracing::debug!(
                        operation_id = %self.base.id,
                        operation_name = ?self.base.name,
                        duration_seconds = self.duration_seconds,
                        "wait started"
                    );
                }
                let update = self
                    .base
                    .builder(UpdateAction::Start)
                    .wait_options(WaitUpdateOptions {
                        wait_seconds: Some(self.duration_seconds),
                    })
                    .build();
                self.base.send_update(update).await?;
                self.park_until_succeeded(thread_id, self.full_duration()).await
            }
            Some(op) if op.status == OperationStatus::Succeeded => {
                self.base.mark_already_completed(op);
                Ok(())
            }
            Some(op) => {
                let remaining = self.remaining_from(&op);
                self.park_until_succeeded(thread_id, remaining).await
            }
        }
    }

    fn full_duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds as u64)
    }

    fn remaining_from(&self, op: &durable_types::Operation) -> Duration {
        if let OperationDetails::Wait {
            scheduled_end_timestamp: Some(end),
        } = &op.details
        {
            let now = Utc::now();
            if *end > now {
                return (*end - now).to_std().unwrap_or_else(|_| self.full_duration());
            }
            return Duration::ZERO;
        }
        self.full_duration()
    }

    /// The backend owns the wait's timer; the client only needs to park
    /// the calling thread (suspending the process if nothing else is
    /// active) until a delivered snapshot reports `SUCCEEDED`.
    async fn park_until_succeeded(
        &self,
        thread_id: &ThreadId,
        initial_delay: Duration,
    ) -> Result<(), RuntimeError> {
        self.base
            .park_until(thread_id, ThreadKind::Context, initial_delay, |op| {
                op.status == OperationStatus::Succeeded
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use durable_backend::{BackendError, OperationPage};
    use durable_types::Operation;
    use std::sync::Mutex as StdMutex;

    struct EchoBackend {
        store: StdMutex<std::collections::HashMap<OperationId, Operation>>,
        resolved: StdMutex<bool>,
    }

    impl EchoBackend {
        fn new() -> Self {
            Self {
                store: StdMutex::new(std::collections::HashMap::new()),
                resolved: StdMutex::new(false),
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
                    details: OperationDetails::Wait {
                        scheduled_end_timestamp: None,
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
            if !*self.resolved.lock().unwrap() {
                return Ok(OperationPage::default());
            }
            let mut store = self.store.lock().unwrap();
            let operations: Vec<Operation> = store
                .values_mut()
                .map(|op| {
                    op.status = OperationStatus::Succeeded;
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

    #[test]
    fn a_zero_second_wait_is_rejected_as_an_invalid_argument() {
        let backend = Arc::new(EchoBackend::new());
        let manager = mk_manager(backend);
        let result = Wait::new(OperationId::root(1), "pause".to_string(), None, manager, 0);
        assert!(matches!(result, Err(RuntimeError::InvalidArgument(_))));
    }

    #[test]
    fn a_one_second_wait_is_accepted() {
        let backend = Arc::new(EchoBackend::new());
        let manager = mk_manager(backend);
        let result = Wait::new(OperationId::root(1), "pause".to_string(), None, manager, 1);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn a_wait_resolves_once_the_backend_reports_succeeded() {
        let backend = Arc::new(EchoBackend::new());
        let manager = mk_manager(backend.clone());
        manager.register_thread(ThreadId::root());
        let caller = ThreadId::context(&OperationId::root(1));
        manager.register_thread(caller.clone());
        let wait: Wait<EchoBackend> =
            Wait::new(OperationId::root(1), "pause".to_string(), None, manager, 10).unwrap();

        *backend.resolved.lock().unwrap() = true;
        wait.run(&caller).await.unwrap();
    }

    #[tokio::test]
    async fn a_terminal_stored_snapshot_short_circuits_without_polling() {
        let backend = Arc::new(EchoBackend::new());
        let manager = mk_manager(backend);
        let caller = ThreadId::root();
        manager.register_thread(caller.clone());
        let wait: Wait<EchoBackend> = Wait::new(
            OperationId::root(1),
            "pause".to_string(),
            None,
            manager.clone(),
            10,
        )
        .unwrap();
        manager.apply_checkpoint(&[Operation {
            id: OperationId::root(1),
            name: Some("pause".to_string()),
            parent_id: None,
            status: OperationStatus::Succeeded,
            attempt: 0,
            details: OperationDetails::Wait {
                scheduled_end_timestamp: None,
            },
        }]);
        wait.run(&caller).await.unwrap();
    }
}
