//! Child context operation state machine.
//!
//! Unlike the other four kinds, a child context's body is not a leaf
//! computation: it is a user closure that itself mints and drives further
//! operations through a nested [`crate::context::DurableContext`]. The
//! state machine here only owns the START/SUCCEED/FAIL bookkeeping and
//! the 256 KiB large-result indirection; the nested context construction
//! lives in `context.rs`, which is this module's only caller.

use std::sync::Arc;

use durable_backend::BackendClient;
use durable_types::{
    ContextUpdateOptions, ErrorObject, Operation, OperationDetails, OperationId, OperationKind,
    OperationStatus, SerDes, UpdateAction,
};

use tracing::debug;

use crate::constants::MAX_CHILD_RESULT_BYTES;
use crate::error::RuntimeError;
use crate::manager::ExecutionManager;
use crate::operation::base::BaseOperation;

pub struct ChildContext<C: BackendClient + 'static, S: SerDes + Clone + 'static> {
    base: BaseOperation<C>,
    serdes: S,
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static> ChildContext<C, S> {
    pub fn new(
        id: OperationId,
        name: String,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
        serdes: S,
    ) -> Self {
        Self {
            base: BaseOperation::new(id, Some(name), OperationKind::Context, parent_id, manager),
            serdes,
        }
    }

    pub fn id(&self) -> &OperationId {
        &self.base.id
    }

    /// Whether this child must re-run its body to reconstruct a result
    /// that was too large to checkpoint the first time. `None` when the
    /// body has never run to completion at all.
    pub fn dispatch_kind(&self) -> Result<DispatchKind, RuntimeError> {
        let stored = self.base.get_operation();
        self.base.validate_replay(stored.as_ref())?;

        Ok(match stored {
            None => DispatchKind::RunAndCheckpoint,
            Some(op) if op.status == OperationStatus::Failed => DispatchKind::AlreadyCompleted(op),
            Some(op) => {
                let OperationDetails::Context { replay_children, .. } = &op.details else {
                    return Err(RuntimeError::Unrecoverable("not a context snapshot".to_string()));
                };
                if op.status == OperationStatus::Succeeded && *replay_children {
                    DispatchKind::ReconstructOnly
                } else if op.status == OperationStatus::Succeeded {
                    DispatchKind::AlreadyCompleted(op)
                } else {
                    DispatchKind::RunAndCheckpoint
                }
            }
        })
    }

    /// Emit `START` if this is the first execution. Fire-and-forget: a
    /// child-context START does not need to be confirmed before the body
    /// runs.
    pub async fn start_if_absent(&self) {
        if self.base.get_operation().is_none() {
            if self.base.manager.should_log() {
                debug!(context_id = %self.base.id, context_name = ?self.base.name, "child context started");
            }
            let update = self.base.builder(UpdateAction::Start).build();
            self.base.send_update_async(update).await;
        }
    }

    /// Checkpoint a successful run. `< 256 KiB` serialized results are
    /// carried inline; larger ones are stashed behind `replay_children`.
    pub async fn succeed<T: serde::Serialize>(&self, result: &T) -> Result<(), RuntimeError> {
        let serialized = self.serdes.serialize(result).map_err(RuntimeError::from)?;
        let update = if serialized.len() < MAX_CHILD_RESULT_BYTES {
            self.base.builder(UpdateAction::Succeed).payload(serialized).build()
        } else {
            if self.base.manager.should_log() {
                debug!(context_id = %self.base.id, bytes = serialized.len(), "child context result exceeds inline threshold");
            }
            self.base
                .builder(UpdateAction::Succeed)
                .payload(durable_types::Payload::new(Vec::new(), durable_types::Codec::Json))
                .context_options(ContextUpdateOptions { replay_children: true })
                .build()
        };
        self.base.send_update(update).await
    }

    pub async fn fail(&self, error: ErrorObject) -> Result<(), RuntimeError> {
        let update = self.base.builder(UpdateAction::Fail).error(error).build();
        self.base.send_update(update).await
    }

    /// `get()`: deserialize a checkpointed success, or surface the
    /// terminal failure, mirroring a step's `resolve`.
    pub fn resolve<T: serde::de::DeserializeOwned>(&self, op: &Operation) -> Result<Option<T>, RuntimeError> {
        let OperationDetails::Context { result, error, replay_children } = &op.details else {
            return Err(RuntimeError::Unrecoverable("not a context snapshot".to_string()));
        };
        match op.status {
            OperationStatus::Succeeded => {
                if *replay_children {
                    // Caller must re-run the body; no checkpointed value exists.
                    return Ok(None);
                }
                let payload = result
                    .as_ref()
                    .ok_or_else(|| RuntimeError::Unrecoverable("missing child context result payload".to_string()))?;
                self.serdes.deserialize(payload).map(Some).map_err(RuntimeError::from)
            }
            OperationStatus::Failed => Err(RuntimeError::ChildContextFailed(
                error.clone().unwrap_or_else(|| ErrorObject::new("Unknown", "child context failed")),
            )),
            other => Err(RuntimeError::Unrecoverable(format!(
                "child context resolved in unexpected status {other:?}"
            ))),
        }
    }
}

/// What the caller in `context.rs` must do to drive this child context to
/// a result.
pub enum DispatchKind {
    /// Absent or `STARTED`: run the body, then checkpoint the outcome.
    RunAndCheckpoint,
    /// `SUCCEEDED` with `replay_children=true`: run the body again purely
    /// to reconstruct the return value; do not checkpoint again.
    ReconstructOnly,
    /// Already resolved (`SUCCEEDED` without `replay_children`, or
    /// `FAILED`): skip the body, resolve directly from the stored op.
    AlreadyCompleted(Operation),
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
    }

    impl EchoBackend {
        fn new() -> Self {
            Self {
                store: StdMutex::new(std::collections::HashMap::new()),
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
                let op = match update.action {
                    UpdateAction::Start => Operation {
                        id: update.id.clone(),
                        name: update.name.clone(),
                        parent_id: update.parent_id.clone(),
                        status: OperationStatus::Started,
                        attempt: 0,
                        details: OperationDetails::Context {
                            result: None,
                            error: None,
                            replay_children: false,
                        },
                    },
                    UpdateAction::Succeed => Operation {
                        id: update.id.clone(),
                        name: update.name.clone(),
                        parent_id: update.parent_id.clone(),
                        status: OperationStatus::Succeeded,
                        attempt: 0,
                        details: OperationDetails::Context {
                            result: update.payload.clone(),
                            error: None,
                            replay_children: update
                                .context_options
                                .as_ref()
                                .map(|o| o.replay_children)
                                .unwrap_or(false),
                        },
                    },
                    UpdateAction::Fail => Operation {
                        id: update.id.clone(),
                        name: update.name.clone(),
                        parent_id: update.parent_id.clone(),
                        status: OperationStatus::Failed,
                        attempt: 0,
                        details: OperationDetails::Context {
                            result: None,
                            error: update.error.clone(),
                            replay_children: false,
                        },
                    },
                    UpdateAction::Retry => unreachable!("context never retries"),
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
    async fn an_absent_child_context_dispatches_run_and_checkpoint() {
        let manager = mk_manager();
        let ctx: ChildContext<EchoBackend, JsonSerDes> =
            ChildContext::new(OperationId::root(1), "do-thing".to_string(), None, manager, JsonSerDes);
        assert!(matches!(ctx.dispatch_kind().unwrap(), DispatchKind::RunAndCheckpoint));
    }

    #[tokio::test]
    async fn a_small_result_is_checkpointed_inline() {
        let manager = mk_manager();
        let ctx: ChildContext<EchoBackend, JsonSerDes> =
            ChildContext::new(OperationId::root(1), "do-thing".to_string(), None, manager, JsonSerDes);
        ctx.start_if_absent().await;
        ctx.succeed(&"small result".to_string()).await.unwrap();
        let op = ctx.base.get_operation().unwrap();
        let result: Option<String> = ctx.resolve(&op).unwrap();
        assert_eq!(result.as_deref(), Some("small result"));
    }

    #[tokio::test]
    async fn a_result_over_the_threshold_sets_replay_children_and_withholds_the_value() {
        let manager = mk_manager();
        let ctx: ChildContext<EchoBackend, JsonSerDes> =
            ChildContext::new(OperationId::root(1), "do-thing".to_string(), None, manager, JsonSerDes);
        ctx.start_if_absent().await;
        let huge = "x".repeat(MAX_CHILD_RESULT_BYTES + 10);
        ctx.succeed(&huge).await.unwrap();
        let op = ctx.base.get_operation().unwrap();
        let result: Option<String> = ctx.resolve(&op).unwrap();
        assert_eq!(result, None);
        assert!(matches!(ctx.dispatch_kind().unwrap(), DispatchKind::ReconstructOnly));
    }

    #[tokio::test]
    async fn a_failed_child_context_surfaces_child_context_failed() {
        let manager = mk_manager();
        let ctx: ChildContext<EchoBackend, JsonSerDes> =
            ChildContext::new(OperationId::root(1), "do-thing".to_string(), None, manager, JsonSerDes);
        ctx.start_if_absent().await;
        ctx.fail(ErrorObject::new("Boom", "it broke")).await.unwrap();
        let op = ctx.base.get_operation().unwrap();
        let result: Result<Option<String>, RuntimeError> = ctx.resolve(&op);
        assert!(matches!(result, Err(RuntimeError::ChildContextFailed(_))));
    }
}
