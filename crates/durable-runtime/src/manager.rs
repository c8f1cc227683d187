//! The execution manager: single entry point for the operation store, the
//! thread registry, replay-mode tracking, and suspension.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use durable_backend::BackendClient;
use durable_journal::{check_child_prefix, InvariantState, ReplayModeTracker};
use durable_types::{Operation, OperationId, OperationUpdate};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::batcher::CheckpointBatcher;
use crate::constants::DEFAULT_POLL_MS;
use crate::error::RuntimeError;

/// Whether the calling logical thread is inside a step body. Steps may
/// not nest further operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadKind {
    Context,
    Step,
}

/// A registered logical thread, by name rather than OS thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn root() -> Self {
        Self("Root".to_string())
    }

    pub fn step(operation_id: &OperationId) -> Self {
        Self(format!("{operation_id}-step"))
    }

    pub fn context(operation_id: &OperationId) -> Self {
        Self(format!("{operation_id}-context"))
    }
}

/// Notified when a registered operation receives a fresh snapshot from
/// the backend. Implemented by `BaseOperation`.
pub trait OperationObserver: Send + Sync {
    fn id(&self) -> &OperationId;
    fn on_checkpoint_complete(&self, op: &Operation);
}

struct Registry {
    threads: HashSet<ThreadId>,
    observers: HashMap<OperationId, Arc<dyn OperationObserver>>,
    suspend_tx: Option<oneshot::Sender<RuntimeError>>,
    settled: bool,
}

/// The single entry point for log state and coordination. Generic over the
/// backend client so tests can substitute a fake.
pub struct ExecutionManager<C: BackendClient + 'static> {
    store: Mutex<HashMap<OperationId, Operation>>,
    registry: Mutex<Registry>,
    replay: ReplayModeTracker,
    batcher: Arc<CheckpointBatcher<C>>,
    suspend_signal: AsyncMutex<Option<oneshot::Receiver<RuntimeError>>>,
    invariants: Mutex<InvariantState>,
    /// Whether log calls routed through [`Self::should_log`] are suppressed
    /// while `replay.is_replaying()` is true. Defaults to suppressing (spec
    /// §6 Observability), configurable by the executor from `RuntimeConfig`.
    suppress_replay_logs: AtomicBool,
    /// Cadence `BaseOperation::park_until` falls back to once its caller's
    /// own initial delay has elapsed. Configurable by the executor from
    /// `RuntimeConfig`; defaults to [`DEFAULT_POLL_MS`].
    poll_interval_ms: std::sync::atomic::AtomicU64,
}

impl<C: BackendClient + 'static> ExecutionManager<C> {
    /// Construct from the invocation's initial page, owning its own
    /// checkpoint batcher. Replay mode starts true iff the log contains
    /// more than the EXECUTION seed operation.
    ///
    /// Uses `Arc::new_cyclic` because the batcher needs a consumer handle
    /// back to this manager before the manager itself exists; the
    /// consumer only upgrades its `Weak` reference once a checkpoint
    /// actually arrives, by which point construction has completed.
    pub fn new(
        client: Arc<C>,
        execution_arn: impl Into<String>,
        initial_token: impl Into<String>,
        initial_operations: Vec<Operation>,
    ) -> Arc<Self> {
        let starts_in_replay = initial_operations.len() > 1;
        let mut store = HashMap::new();
        let mut invariants = InvariantState::new();
        for op in initial_operations {
            // Priming: a first-seen id accepts any opening status, so this
            // just seeds the tracker with where the log already stood.
            let _ = invariants.check_transition(&op.id, op.status);
            store.insert(op.id.clone(), op);
        }
        let (suspend_tx, suspend_rx) = oneshot::channel();

        Arc::new_cyclic(|weak: &Weak<ExecutionManager<C>>| {
            let consumer: Arc<dyn crate::batcher::CheckpointConsumer> =
                Arc::new(WeakConsumer(weak.clone()));
            let batcher = CheckpointBatcher::new(client, execution_arn, initial_token, consumer);
            Self {
                store: Mutex::new(store),
                registry: Mutex::new(Registry {
                    threads: HashSet::new(),
                    observers: HashMap::new(),
                    suspend_tx: Some(suspend_tx),
                    settled: false,
                }),
                replay: ReplayModeTracker::new(starts_in_replay),
                batcher,
                suspend_signal: AsyncMutex::new(Some(suspend_rx)),
                invariants: Mutex::new(invariants),
                suppress_replay_logs: AtomicBool::new(true),
                poll_interval_ms: std::sync::atomic::AtomicU64::new(DEFAULT_POLL_MS),
            }
        })
    }

    pub fn batcher(&self) -> &Arc<CheckpointBatcher<C>> {
        &self.batcher
    }

    pub fn is_replaying(&self) -> bool {
        self.replay.is_replaying()
    }

    /// Set by the executor from `RuntimeConfig::suppress_replay_logs`.
    pub fn configure_logging(&self, suppress_replay_logs: bool) {
        self.suppress_replay_logs.store(suppress_replay_logs, Ordering::Relaxed);
    }

    /// Whether an operation-level log call should actually emit: false
    /// while replaying if replay-log suppression is enabled, true
    /// otherwise. Guards call sites in the operation state machines rather
    /// than routing through a hand-rolled thread-local MDC layer.
    pub fn should_log(&self) -> bool {
        !(self.is_replaying() && self.suppress_replay_logs.load(Ordering::Relaxed))
    }

    /// Set by the executor from `RuntimeConfig`'s batching and poll-cadence
    /// knobs. Forwarded to the batcher for the batch-size bounds; the poll
    /// interval is read directly off this manager by `BaseOperation::park_until`.
    pub fn configure_batching(&self, max_item_count: usize, max_batch_size_bytes: usize, poll_interval_ms: u64) {
        self.batcher.configure_batch_bounds(max_item_count, max_batch_size_bytes);
        self.poll_interval_ms.store(poll_interval_ms, Ordering::Relaxed);
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms.load(Ordering::Relaxed)
    }

    /// Store lookup via the execution manager, flipping replay mode as a
    /// side effect of observing the result.
    pub fn get_operation(&self, id: &OperationId) -> Option<Operation> {
        let store = self.store.lock().expect("store mutex poisoned");
        let found = store.get(id).cloned();
        self.replay.observe_lookup(found.as_ref());
        found
    }

    /// Whether any operation in the store has `context_id` as parent — the
    /// per-context replay flag.
    pub fn any_child_of(&self, context_id: &OperationId) -> bool {
        let store = self.store.lock().expect("store mutex poisoned");
        durable_journal::any_child_of(store.values(), context_id)
    }

    pub fn register_observer(&self, observer: Arc<dyn OperationObserver>) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        registry.observers.insert(observer.id().clone(), observer);
    }

    pub fn deregister_observer(&self, id: &OperationId) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        registry.observers.remove(id);
    }

    /// Idempotent: registering an already-registered thread is a no-op.
    pub fn register_thread(&self, thread_id: ThreadId) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        registry.threads.insert(thread_id);
    }

    /// Remove `thread_id`; if the active set becomes empty and the
    /// execution hasn't already been settled, mark for suspension and
    /// raise the `Suspend` sentinel on the caller.
    pub fn deregister_thread(&self, thread_id: &ThreadId) -> Result<(), RuntimeError> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        registry.threads.remove(thread_id);
        if registry.threads.is_empty() && !registry.settled {
            registry.settled = true;
            if let Some(tx) = registry.suspend_tx.take() {
                let _ = tx.send(RuntimeError::Suspend);
            }
            return Err(RuntimeError::Suspend);
        }
        Ok(())
    }

    /// One of the two ways to complete the exception signal (the other
    /// is `terminate`). One-shot and idempotent.
    pub fn suspend(&self) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if !registry.settled {
            registry.settled = true;
            if let Some(tx) = registry.suspend_tx.take() {
                let _ = tx.send(RuntimeError::Suspend);
            }
        }
    }

    pub fn terminate(&self, error: RuntimeError) {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if !registry.settled {
            registry.settled = true;
            if let Some(tx) = registry.suspend_tx.take() {
                let _ = tx.send(error);
            }
        }
    }

    /// Overwrite the store with freshly delivered operations and notify
    /// their matching registered observers. Wired as the batcher's
    /// `CheckpointConsumer` hook.
    ///
    /// Every delivered snapshot is checked for monotone status progression
    /// and a well-formed child-id prefix before it overwrites the store; a
    /// violation here means the backend itself served a log that could not
    /// have been produced by this runtime, so it terminates the execution
    /// the same way a non-deterministic replay does.
    pub fn apply_checkpoint(&self, operations: &[Operation]) {
        let observers: Vec<Arc<dyn OperationObserver>> = {
            let mut store = self.store.lock().expect("store mutex poisoned");
            let mut invariants = self.invariants.lock().expect("invariants mutex poisoned");
            let registry = self.registry.lock().expect("registry mutex poisoned");
            let mut notify = Vec::new();
            for op in operations {
                if let Err(violation) = check_child_prefix(op) {
                    drop(registry);
                    drop(invariants);
                    drop(store);
                    self.terminate(RuntimeError::NonDeterministicExecution(violation));
                    return;
                }
                if let Err(violation) = invariants.check_transition(&op.id, op.status) {
                    drop(registry);
                    drop(invariants);
                    drop(store);
                    self.terminate(RuntimeError::NonDeterministicExecution(violation));
                    return;
                }
                store.insert(op.id.clone(), op.clone());
                if let Some(observer) = registry.observers.get(&op.id) {
                    notify.push(Arc::clone(observer));
                }
            }
            notify
        };
        for (op, observer) in operations.iter().zip(observers) {
            observer.on_checkpoint_complete(op);
        }
    }

    pub async fn submit_update(
        &self,
        update: OperationUpdate,
    ) -> oneshot::Receiver<Result<(), RuntimeError>> {
        self.batcher.submit(Some(update), Duration::ZERO).await
    }

    pub async fn poll_operation(
        &self,
        id: OperationId,
        delay: Duration,
    ) -> oneshot::Receiver<Result<(), RuntimeError>> {
        self.batcher.poll(id, delay).await
    }

    /// `run_until_complete_or_suspend`: race `user_future` against the
    /// internal exception signal; first to complete wins.
    pub async fn run_until_complete_or_suspend<F, T>(&self, user_future: F) -> Result<T, RuntimeError>
    where
        F: std::future::Future<Output = Result<T, RuntimeError>>,
    {
        let mut guard = self.suspend_signal.lock().await;
        let signal = guard.take().expect("suspend signal consumed twice");
        tokio::select! {
            result = user_future => result,
            signal_result = signal => {
                match signal_result {
                    Ok(error) => Err(error),
                    Err(_) => Err(RuntimeError::Suspend),
                }
            }
        }
    }

    /// Shut down the batcher: completes any in-flight round-trip and
    /// fails remaining pollers.
    pub async fn shutdown(&self) {
        self.batcher.shutdown().await;
    }
}

/// Glue: forwards the batcher's deliveries back into the manager without
/// the batcher needing to own a strong reference to it (which would be a
/// cycle — the manager owns the batcher).
struct WeakConsumer<C: BackendClient + 'static>(Weak<ExecutionManager<C>>);

impl<C: BackendClient + 'static> crate::batcher::CheckpointConsumer for WeakConsumer<C> {
    fn on_operations(&self, operations: &[Operation]) {
        if let Some(manager) = self.0.upgrade() {
            manager.apply_checkpoint(operations);
        }
    }
}
