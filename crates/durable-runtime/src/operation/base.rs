//! Shared operation lifecycle. Every operation kind (step, wait, chained
//! invoke, callback, child context) is built on top of a [`BaseOperation`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use durable_backend::BackendClient;
use durable_types::{Operation, OperationId, OperationKind, OperationUpdate, OperationUpdateBuilder, UpdateAction};
use tokio::sync::Notify;

use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, OperationObserver, ThreadId, ThreadKind};

/// A repeatable wake primitive fed by every checkpoint delivery for one
/// operation id. Backs [`BaseOperation::park_until`], which needs to wake
/// on intermediate snapshots (e.g. `PENDING` -> `READY`), not only on a
/// final terminal one.
struct DeliveryWatch {
    id: OperationId,
    latest: Mutex<Option<Operation>>,
    notify: Notify,
}

impl OperationObserver for DeliveryWatch {
    fn id(&self) -> &OperationId {
        &self.id
    }

    fn on_checkpoint_complete(&self, op: &Operation) {
        *self.latest.lock().expect("delivery watch poisoned") = Some(op.clone());
        self.notify.notify_waiters();
    }
}

/// Shared state every operation kind embeds: id/name/kind/parent and a
/// handle back to the execution manager.
pub struct BaseOperation<C: BackendClient + 'static> {
    pub id: OperationId,
    pub name: Option<String>,
    pub kind: OperationKind,
    pub parent_id: Option<OperationId>,
    pub manager: Arc<ExecutionManager<C>>,
}

impl<C: BackendClient + 'static> BaseOperation<C> {
    pub fn new(
        id: OperationId,
        name: Option<String>,
        kind: OperationKind,
        parent_id: Option<OperationId>,
        manager: Arc<ExecutionManager<C>>,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            parent_id,
            manager,
        }
    }

    /// Store lookup via the execution manager, flipping replay mode.
    pub fn get_operation(&self) -> Option<Operation> {
        self.manager.get_operation(&self.id)
    }

    /// A stored terminal snapshot resolves directly; every caller already
    /// has the `Operation` it needs in hand, so there is nothing further
    /// to do here beyond naming the no-op for parity with the other
    /// dispatch arms (absent / STARTED / PENDING).
    pub fn mark_already_completed(&self, _op: Operation) {}

    /// Compare the stored snapshot's `(kind, name)` against this
    /// operation's own; on mismatch, terminate the execution.
    pub fn validate_replay(&self, stored: Option<&Operation>) -> Result<(), RuntimeError> {
        match durable_journal::validate_replay(&self.id, self.kind, self.name.as_deref(), stored) {
            Ok(()) => Ok(()),
            Err(violation) => {
                self.manager
                    .terminate(RuntimeError::NonDeterministicExecution(violation.clone()));
                Err(RuntimeError::from(violation))
            }
        }
    }

    pub fn builder(&self, action: UpdateAction) -> OperationUpdateBuilder {
        OperationUpdate::builder(action, self.id.clone(), self.kind)
            .parent_id(self.parent_id.clone())
            .name(self.name.clone())
    }

    /// Fire-and-forget submission: the returned receiver may be dropped
    /// without awaiting it.
    pub async fn send_update_async(&self, update: OperationUpdate) {
        let _ = self.manager.submit_update(update).await;
    }

    /// Submit and block until the backend confirms the write.
    pub async fn send_update(&self, update: OperationUpdate) -> Result<(), RuntimeError> {
        let rx = self.manager.submit_update(update).await;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Suspend),
        }
    }

    /// Park the calling logical thread until the latest delivered
    /// snapshot for this operation satisfies `done`, driving the backend
    /// round-trip at `poll_delay` cadence (then the manager's configured
    /// poll interval thereafter). This is the suspension-safe alternative to blocking
    /// directly on a poll future: `thread_id` is deregistered for the
    /// duration — a thread voluntarily parking deregisters itself — so an
    /// empty active-thread set correctly raises `Suspend` instead of the
    /// process blocking in-memory for real wall-clock time.
    ///
    /// Used by Wait/Invoke/Callback, and by a Step's PENDING/RETRY poll
    /// phases — never by a Step's own body execution, which runs inline
    /// on the calling thread.
    pub async fn park_until(
        &self,
        thread_id: &ThreadId,
        thread_kind: ThreadKind,
        poll_delay: Duration,
        mut done: impl FnMut(&Operation) -> bool,
    ) -> Result<Operation, RuntimeError> {
        if thread_kind == ThreadKind::Step {
            return Err(RuntimeError::IllegalOperation(
                "nested operations are forbidden inside a step body".to_string(),
            ));
        }

        if let Some(op) = self.get_operation() {
            if done(&op) {
                return Ok(op);
            }
        }

        let watch = Arc::new(DeliveryWatch {
            id: self.id.clone(),
            latest: Mutex::new(None),
            notify: Notify::new(),
        });
        self.manager.register_observer(watch.clone());

        let stop = Arc::new(AtomicBool::new(false));
        {
            let manager = Arc::clone(&self.manager);
            let id = self.id.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                let mut delay = poll_delay;
                loop {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    let rx = manager.poll_operation(id.clone(), delay).await;
                    if rx.await.is_err() {
                        return;
                    }
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    delay = Duration::from_millis(manager.poll_interval_ms());
                }
            });
        }

        let deregistered = self.manager.deregister_thread(thread_id);
        if let Err(error) = deregistered {
            stop.store(true, Ordering::Release);
            self.manager.deregister_observer(&self.id);
            return Err(error);
        }

        let result = loop {
            let current = watch.latest.lock().expect("delivery watch poisoned").clone();
            if let Some(op) = current {
                if done(&op) {
                    break op;
                }
            }
            watch.notify.notified().await;
        };

        stop.store(true, Ordering::Release);
        self.manager.deregister_observer(&self.id);
        self.manager.register_thread(thread_id.clone());

        Ok(result)
    }
}
