//! Step operation state machine.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use durable_backend::BackendClient;
use durable_types::{
    ErrorKind, ErrorObject, ExecutionError, Operation, OperationDetails, OperationId,
    OperationKind, OperationStatus, RetryDecision, RetryPolicy, SerDes, StepUpdateOptions,
    UpdateAction,
};

use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, ThreadId, ThreadKind};
use crate::operation::base::BaseOperation;

/// `AT_LEAST_ONCE_PER_RETRY` re-runs the body on an interrupted STARTED;
/// `AT_MOST_ONCE_PER_RETRY` instead synthesizes a `StepInterrupted` error
/// and routes it through ordinary failure handling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepSemantics {
    AtLeastOncePerRetry,
    AtMostOncePerRetry,
}

impl Default for StepSemantics {
    fn default() -> Self {
        Self::AtLeastOncePerRetry
    }
}

pub struct StepConfig {
    pub retry_policy: Arc<dyn RetryPolicy>,
    pub semantics: StepSemantics,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            retry_policy: Arc::new(durable_types::ExponentialBackoff::default()),
            semantics: StepSemantics::default(),
        }
    }
}

/// A pending failure waiting to go through retry-policy logic, either
/// produced by the user body throwing or synthesized on an interrupted
/// STARTED record under AT_MOST_ONCE semantics.
enum BodyOutcome<T> {
    Ran(Result<T, ExecutionError>),
    SynthesizedFailure(ExecutionError),
}

pub struct Step<C: BackendClient + 'static, S: SerDes + Clone + 'static> {
    base: BaseOperation<C>,
    config: StepConfig,
    serdes: S,
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static> Step<C, S> {
    pub fn new(
        id: OperationId,
        name: String,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
        config: StepConfig,
        serdes: S,
    ) -> Self {
        Self {
            base: BaseOperation::new(id, Some(name), OperationKind::Step, parent_id, manager),
            config,
            serdes,
        }
    }

    /// Runs the whole step to completion: dispatch per the stored
    /// snapshot, execute the body (with retries), checkpoint, and
    /// deserialize the final result. Folds `execute()`+`get()` into one
    /// call since the calling site owns both halves for the common
    /// synchronous `step()` API.
    pub async fn run<F, Fut, T>(&self, thread_id: &ThreadId, body: F) -> Result<T, RuntimeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let stored = self.base.get_operation();
        self.base.validate_replay(stored.as_ref())?;

        let final_op = match stored {
            None => self.run_loop(thread_id, &body, 0, None).await?,
            Some(op) if op.is_terminal() => op,
            Some(op) => match op.status {
                OperationStatus::Started if self.config.semantics == StepSemantics::AtMostOncePerRetry => {
                    let error = ExecutionError::new(
                        ErrorKind::StepInterrupted,
                        "step interrupted while STARTED",
                    );
                    self.run_loop(thread_id, &body, op.attempt + 1, Some(error)).await?
                }
                OperationStatus::Started => self.run_loop(thread_id, &body, op.attempt, None).await?,
                OperationStatus::Pending => {
                    self.poll_until_ready(thread_id).await?;
                    let attempt = self.base.get_operation().map(|o| o.attempt).unwrap_or(op.attempt);
                    self.run_loop(thread_id, &body, attempt, None).await?
                }
                OperationStatus::Ready => self.run_loop(thread_id, &body, op.attempt, None).await?,
                _ => op,
            },
        };

        self.resolve(final_op)
    }

    /// Park the calling (context) thread until this step's stored status
    /// leaves `PENDING` — used both while waiting out a retry delay and
    /// when resuming replay against a `PENDING` snapshot. Suspension-safe
    /// via [`BaseOperation::park_until`].
    async fn poll_until_ready(&self, thread_id: &ThreadId) -> Result<(), RuntimeError> {
        self.base
            .park_until(
                thread_id,
                ThreadKind::Context,
                Duration::from_millis(self.base.manager.poll_interval_ms()),
                |op| op.status != OperationStatus::Pending,
            )
            .await?;
        Ok(())
    }

    /// Drives attempts until the step reaches a terminal status.
    /// `seeded_failure`, if present, is handled as attempt `attempt`'s
    /// outcome without invoking `body` (the AT_MOST_ONCE interrupted-STARTED
    /// case) — every subsequent attempt runs the body normally.
    async fn run_loop<F, Fut, T>(
        &self,
        thread_id: &ThreadId,
        body: &F,
        mut attempt: u32,
        seeded_failure: Option<ExecutionError>,
    ) -> Result<Operation, RuntimeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
        T: serde::Serialize,
    {
        let mut outcome = match seeded_failure {
            Some(error) => BodyOutcome::SynthesizedFailure(error),
            None => BodyOutcome::Ran(self.invoke_body(body, attempt).await),
        };

        loop {
            match outcome {
                BodyOutcome::Ran(Ok(result)) => {
                    if self.base.manager.should_log() {
                        tracing::debug!(operation_id = %self.base.id, attempt, "step succeeded");
                    }
                    let payload = self.serdes.serialize(&result).map_err(RuntimeError::from)?;
                    let update = self
                        .base
                        .builder(UpdateAction::Succeed)
                        .payload(payload)
                        .build();
                    self.base.send_update(update).await?;
                    return self.synthesize_terminal(OperationStatus::Succeeded);
                }
                BodyOutcome::Ran(Err(error)) | BodyOutcome::SynthesizedFailure(error) => {
                    if error.kind == ErrorKind::StepInterrupted {
                        if self.base.manager.should_log() {
                            tracing::warn!(operation_id = %self.base.id, attempt, "step interrupted");
                        }
                        let update = self
                            .base
                            .builder(UpdateAction::Fail)
                            .error(ErrorObject::from_execution_error(&error))
                            .build();
                        self.base.send_update(update).await?;
                        return self.synthesize_terminal(OperationStatus::Failed);
                    }

                    let jitter_seed = attempt as u64;
                    match self.config.retry_policy.decide(&error, attempt, jitter_seed) {
                        RetryDecision::Retry { delay_seconds } => {
                            if self.base.manager.should_log() {
                                tracing::warn!(
                                    operation_id = %self.base.id,
                                    attempt,
                                    delay_seconds,
                                    error = %error,
                                    "step retrying"
                                );
                            }
                            let update = self
                                .base
                                .builder(UpdateAction::Retry)
                                .error(ErrorObject::from_execution_error(&error))
                                .step_options(StepUpdateOptions {
                                    next_attempt_delay_seconds: Some(delay_seconds),
                                })
                                .build();
                            self.base.send_update(update).await?;
                            self.poll_until_ready(thread_id).await?;
                            attempt += 1;
                            outcome = BodyOutcome::Ran(self.invoke_body(body, attempt).await);
                        }
                        RetryDecision::Fail => {
                            if self.base.manager.should_log() {
                                tracing::warn!(operation_id = %self.base.id, attempt, error = %error, "step failed");
                            }
                            let update = self
                                .base
                                .builder(UpdateAction::Fail)
                                .error(ErrorObject::from_execution_error(&error))
                                .build();
                            self.base.send_update(update).await?;
                            return self.synthesize_terminal(OperationStatus::Failed);
                        }
                    }
                }
            }
        }
    }

    /// Emits `START` the first time this id has no stored record, then
    /// invokes the user function. Under AT_MOST_ONCE semantics START is
    /// awaited before the body runs; under AT_LEAST_ONCE it is
    /// fire-and-forget.
    async fn invoke_body<F, Fut, T>(&self, body: &F, attempt: u32) -> Result<T, ExecutionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        if self.base.get_operation().is_none() {
            if self.base.manager.should_log() {
                tracing::debug!(
                    operation_id = %self.base.id,
                    operation_name = ?self.base.name,
                    attempt,
                    "step started"
                );
            }
            let start = self.base.builder(UpdateAction::Start).build();
            match self.config.semantics {
                StepSemantics::AtMostOncePerRetry => {
                    let _ = self.base.send_update(start).await;
                }
                StepSemantics::AtLeastOncePerRetry => {
                    self.base.send_update_async(start).await;
                }
            }
        }

        // Body runs on its own logical thread: this is what keeps the
        // active set non-empty while the caller's thread is itself mid
        // `poll_until_ready`/parked elsewhere.
        // Step bodies never nest operations, so the thread only ever
        // deregisters on its own way out — here, unconditionally.
        let step_thread = ThreadId::step(&self.base.id);
        self.base.manager.register_thread(step_thread.clone());
        let result = body().await;
        let _ = self.base.manager.deregister_thread(&step_thread);
        result
    }

    fn synthesize_terminal(&self, status: OperationStatus) -> Result<Operation, RuntimeError> {
        self.base
            .get_operation()
            .map(|mut op| {
                op.status = status;
                op
            })
            .ok_or_else(|| RuntimeError::Unrecoverable("step snapshot missing after checkpoint".to_string()))
    }

    fn resolve<T: serde::de::DeserializeOwned>(&self, op: Operation) -> Result<T, RuntimeError> {
        match op.status {
            OperationStatus::Succeeded => {
                let OperationDetails::Step { result, .. } = &op.details else {
                    return Err(RuntimeError::Unrecoverable("not a step snapshot".to_string()));
                };
                let payload = result
                    .as_ref()
                    .ok_or_else(|| RuntimeError::Unrecoverable("missing step result payload".to_string()))?;
                self.serdes.deserialize(payload).map_err(RuntimeError::from)
            }
            OperationStatus::Failed => {
                let OperationDetails::Step { error, .. } = &op.details else {
                    return Err(RuntimeError::Unrecoverable("not a step snapshot".to_string()));
                };
                let error = error
                    .clone()
                    .unwrap_or_else(|| ErrorObject::new("Unknown", "step failed with no error object"));
                if error.error_type == format!("{:?}", ErrorKind::StepInterrupted) {
                    Err(RuntimeError::StepInterrupted)
                } else {
                    Err(RuntimeError::StepFailed(error))
                }
            }
            other => Err(RuntimeError::Unrecoverable(format!(
                "step resolved in unexpected status {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use durable_backend::{BackendError, OperationPage};
    use durable_types::{JsonSerDes, NoRetry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct EchoBackend {
        store: StdMutex<std::collections::HashMap<OperationId, Operation>>,
        checkpoints: AtomicUsize,
    }

    impl EchoBackend {
        fn new() -> Self {
            Self {
                store: StdMutex::new(std::collections::HashMap::new()),
                checkpoints: AtomicUsize::new(0),
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
            self.checkpoints.fetch_add(1, Ordering::SeqCst);
            let mut store = self.store.lock().unwrap();
            let mut operations = Vec::new();
            for update in updates {
                let existing = store.get(&update.id).cloned();
                let attempt = existing.as_ref().map(|o| o.attempt).unwrap_or(0);
                let (status, next_attempt, details) = match update.action {
                    UpdateAction::Start => (
                        OperationStatus::Started,
                        attempt,
                        OperationDetails::Step {
                            result: None,
                            error: None,
                        },
                    ),
                    UpdateAction::Succeed => (
                        OperationStatus::Succeeded,
                        attempt,
                        OperationDetails::Step {
                            result: update.payload.clone(),
                            error: None,
                        },
                    ),
                    UpdateAction::Fail => (
                        OperationStatus::Failed,
                        attempt,
                        OperationDetails::Step {
                            result: None,
                            error: update.error.clone(),
                        },
                    ),
                    UpdateAction::Retry => (
                        OperationStatus::Ready,
                        attempt + 1,
                        OperationDetails::Step {
                            result: None,
                            error: update.error.clone(),
                        },
                    ),
                };
                let op = Operation {
                    id: update.id.clone(),
                    name: update.name.clone(),
                    parent_id: update.parent_id.clone(),
                    status,
                    attempt: next_attempt,
                    details,
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
            Ok(OperationPage::default())
        }
    }

    fn mk_manager() -> Arc<ExecutionManager<EchoBackend>> {
        let backend = Arc::new(EchoBackend::new());
        ExecutionManager::new(backend, "exec-1", "token-0", vec![])
    }

    #[tokio::test]
    async fn a_successful_step_checkpoints_start_and_succeed() {
        let manager = mk_manager();
        let caller = ThreadId::root();
        manager.register_thread(caller.clone());
        let step: Step<EchoBackend, JsonSerDes> = Step::new(
            OperationId::root(1),
            "fetch".to_string(),
            None,
            manager,
            StepConfig::default(),
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = step.run(&caller, || async { Ok(42u32) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn a_failing_step_with_no_retry_policy_surfaces_step_failed() {
        let manager = mk_manager();
        let caller = ThreadId::root();
        manager.register_thread(caller.clone());
        let config = StepConfig {
            retry_policy: Arc::new(NoRetry),
            semantics: StepSemantics::AtLeastOncePerRetry,
        };
        let step: Step<EchoBackend, JsonSerDes> = Step::new(
            OperationId::root(1),
            "fetch".to_string(),
            None,
            manager,
            config,
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = step
            .run(&caller, || async { Err(ExecutionError::new(ErrorKind::UserError, "boom")) })
            .await;
        assert!(matches!(result, Err(RuntimeError::StepFailed(_))));
    }

    #[tokio::test]
    async fn a_step_that_succeeds_after_one_retry_returns_the_result() {
        let manager = mk_manager();
        let caller = ThreadId::root();
        manager.register_thread(caller.clone());
        let attempts = AtomicUsize::new(0);
        let step: Step<EchoBackend, JsonSerDes> = Step::new(
            OperationId::root(1),
            "fetch".to_string(),
            None,
            manager,
            StepConfig::default(),
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = step
            .run(&caller, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ExecutionError::new(ErrorKind::UserError, "transient"))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn a_terminal_stored_snapshot_short_circuits_the_body() {
        let manager = mk_manager();
        let caller = ThreadId::root();
        manager.register_thread(caller.clone());
        // First run completes the step.
        let step: Step<EchoBackend, JsonSerDes> = Step::new(
            OperationId::root(1),
            "fetch".to_string(),
            None,
            manager.clone(),
            StepConfig::default(),
            JsonSerDes,
        );
        step.run(&caller, || async { Ok(1u32) }).await.unwrap();

        // Replaying against the same manager/store must not re-invoke body.
        let ran_again = AtomicUsize::new(0);
        let step2: Step<EchoBackend, JsonSerDes> = Step::new(
            OperationId::root(1),
            "fetch".to_string(),
            None,
            manager,
            StepConfig::default(),
            JsonSerDes,
        );
        let result: Result<u32, RuntimeError> = step2
            .run(&caller, || {
                ran_again.fetch_add(1, Ordering::SeqCst);
                async { Ok(99u32) }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(ran_again.load(Ordering::SeqCst), 0);
    }
}
