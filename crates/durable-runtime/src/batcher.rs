//! The checkpoint batcher: the sole writer to the backend. Queues updates,
//! coalesces them into size/count-bounded batches, and drives the
//! `Checkpoint`/`GetExecutionState` round-trip.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use durable_backend::{BackendClient, BackendError, OperationPage};
use durable_types::{Operation, OperationId, OperationUpdate};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::RuntimeError;

/// Default batch bounds.
pub const MAX_ITEM_COUNT: usize = 100;
pub const MAX_BATCH_SIZE_BYTES: usize = 750 * 1024;

/// Transient backend failures surface as a distinct, retryable error
/// instead of aborting the invocation; only a permanent failure (or a
/// rejected checkpoint token) is unrecoverable.
fn backend_error_to_runtime(error: &BackendError) -> RuntimeError {
    if error.is_transient() {
        RuntimeError::BackendUnavailable(error.to_string())
    } else {
        RuntimeError::Unrecoverable(error.to_string())
    }
}

/// Invoked with every operation delivered by a confirmed round-trip, in
/// delivery order. Implemented by [`crate::manager::ExecutionManager`].
pub trait CheckpointConsumer: Send + Sync {
    fn on_operations(&self, operations: &[Operation]);
}

struct QueueEntry {
    update: Option<OperationUpdate>,
    completion: oneshot::Sender<Result<(), RuntimeError>>,
}

struct BatcherState {
    token: String,
    queue: VecDeque<QueueEntry>,
    pollers: HashMap<OperationId, Vec<oneshot::Sender<Result<(), RuntimeError>>>>,
    shut_down: bool,
}

/// FIFO batcher that coalesces `submit`/`poll` requests into `Checkpoint`
/// round-trips. Cloneable handle backed by an `Arc`; the `round_trip`
/// mutex enforces at most one in-flight round-trip.
pub struct CheckpointBatcher<C: BackendClient> {
    client: Arc<C>,
    execution_arn: String,
    consumer: Arc<dyn CheckpointConsumer>,
    state: Mutex<BatcherState>,
    round_trip: Mutex<()>,
    max_item_count: AtomicUsize,
    max_batch_size_bytes: AtomicUsize,
}

impl<C: BackendClient + 'static> CheckpointBatcher<C> {
    pub fn new(
        client: Arc<C>,
        execution_arn: impl Into<String>,
        initial_token: impl Into<String>,
        consumer: Arc<dyn CheckpointConsumer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            execution_arn: execution_arn.into(),
            consumer,
            state: Mutex::new(BatcherState {
                token: initial_token.into(),
                queue: VecDeque::new(),
                pollers: HashMap::new(),
                shut_down: false,
            }),
            round_trip: Mutex::new(()),
            max_item_count: AtomicUsize::new(MAX_ITEM_COUNT),
            max_batch_size_bytes: AtomicUsize::new(MAX_BATCH_SIZE_BYTES),
        })
    }

    /// Override the batch bounds set at construction. Exposed so the
    /// executor can wire `RuntimeConfig`'s batching knobs through; safe to
    /// call at any time, including from a dispatch already in flight,
    /// since only the next batch assembly reads the new values.
    pub fn configure_batch_bounds(&self, max_item_count: usize, max_batch_size_bytes: usize) {
        self.max_item_count.store(max_item_count, Ordering::Relaxed);
        self.max_batch_size_bytes.store(max_batch_size_bytes, Ordering::Relaxed);
    }

    /// `submit(update, delay) -> future`. `update = None` is a tick
    /// request used internally by `poll` to force a round-trip without
    /// delivering any update of its own.
    pub async fn submit(
        self: &Arc<Self>,
        update: Option<OperationUpdate>,
        delay: Duration,
    ) -> oneshot::Receiver<Result<(), RuntimeError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.shut_down {
                let _ = tx.send(Err(RuntimeError::Suspend));
                return rx;
            }
            state.queue.push_back(QueueEntry {
                update,
                completion: tx,
            });
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            this.dispatch().await;
        });
        rx
    }

    /// `poll(operation_id, delay) -> future`: register a future under the
    /// id and submit a tick request with `delay`. Completes once a
    /// round-trip delivers an updated snapshot for `operation_id`.
    pub async fn poll(
        self: &Arc<Self>,
        operation_id: OperationId,
        delay: Duration,
    ) -> oneshot::Receiver<Result<(), RuntimeError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.shut_down {
                let _ = tx.send(Err(RuntimeError::Suspend));
                return rx;
            }
            state.pollers.entry(operation_id).or_default().push(tx);
        }
        let this = Arc::clone(self);
        let (tick_tx, _tick_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.queue.push_back(QueueEntry {
                update: None,
                completion: tick_tx,
            });
        }
        tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            this.dispatch().await;
        });
        rx
    }

    /// Drain the current queue up to the size/count bounds and run one
    /// round-trip. Serialized by `round_trip`: a dispatch that arrives
    /// while another is in flight simply waits its turn and then drains
    /// whatever remains, so no submitted entry is ever stranded.
    async fn dispatch(self: &Arc<Self>) {
        let _guard = self.round_trip.lock().await;

        let (updates, entries, had_pollers) = {
            let mut state = self.state.lock().await;
            let had_pollers = !state.pollers.is_empty();
            let mut updates = Vec::new();
            let mut entries = Vec::new();
            let mut bytes = 0usize;
            let max_item_count = self.max_item_count.load(Ordering::Relaxed);
            let max_batch_size_bytes = self.max_batch_size_bytes.load(Ordering::Relaxed);

            while let Some(front) = state.queue.front() {
                if let Some(u) = &front.update {
                    let size = u.approx_wire_size();
                    if !updates.is_empty()
                        && (updates.len() >= max_item_count || bytes + size > max_batch_size_bytes)
                    {
                        break;
                    }
                    bytes += size;
                }
                let entry = state.queue.pop_front().expect("front just peeked");
                if let Some(u) = &entry.update {
                    updates.push(u.clone());
                }
                entries.push(entry);
            }
            (updates, entries, had_pollers)
        };

        if updates.is_empty() && !had_pollers {
            for entry in entries {
                let _ = entry.completion.send(Ok(()));
            }
            return;
        }

        let token = {
            let state = self.state.lock().await;
            state.token.clone()
        };

        debug!(execution_arn = %self.execution_arn, batch_len = updates.len(), "checkpointing");
        let result = self
            .client
            .checkpoint(&self.execution_arn, &token, updates)
            .await;

        match result {
            Ok((new_token, new_state)) => {
                let mut all_operations = Vec::new();
                let mut next_marker = None;
                if let Some(p) = new_state {
                    all_operations.extend(p.operations);
                    next_marker = p.next_marker;
                }
                let mut page_error = None;
                while let Some(marker) = next_marker.take() {
                    match self
                        .client
                        .get_execution_state(&self.execution_arn, &new_token, Some(&marker))
                        .await
                    {
                        Ok(page) => {
                            all_operations.extend(page.operations);
                            next_marker = page.next_marker;
                        }
                        Err(e) => {
                            warn!(error = %e, "failed pulling remaining execution state pages");
                            page_error = Some(backend_error_to_runtime(&e));
                            break;
                        }
                    }
                }

                if let Some(error) = page_error {
                    // The round-trip itself succeeded and moved the token
                    // forward, but the snapshot is incomplete: handing the
                    // partial page to the consumer would desync replay state
                    // without ever surfacing an error, so every queued entry
                    // is failed instead of completed, forcing a fresh
                    // dispatch on the next submit/poll.
                    let mut state = self.state.lock().await;
                    state.token = new_token;
                    drop(state);
                    for entry in entries {
                        let _ = entry.completion.send(Err(error.clone()));
                    }
                    return;
                }

                {
                    let mut state = self.state.lock().await;
                    state.token = new_token;
                }

                self.consumer.on_operations(&all_operations);

                {
                    let mut state = self.state.lock().await;
                    for op in &all_operations {
                        if let Some(waiters) = state.pollers.remove(&op.id) {
                            for waiter in waiters {
                                let _ = waiter.send(Ok(()));
                            }
                        }
                    }
                }

                for entry in entries {
                    let _ = entry.completion.send(Ok(()));
                }
            }
            Err(e) => {
                let error = backend_error_to_runtime(&e);
                for entry in entries {
                    let _ = entry.completion.send(Err(error.clone()));
                }
            }
        }
    }

    /// Fail all registered pollers and drain remaining submitters with a
    /// cancellation error, then wait for any in-flight round-trip to
    /// finish. Idempotent.
    pub async fn shutdown(self: &Arc<Self>) {
        let _guard = self.round_trip.lock().await;
        let mut state = self.state.lock().await;
        state.shut_down = true;
        for (_, waiters) in state.pollers.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(RuntimeError::Suspend));
            }
        }
        for entry in state.queue.drain(..) {
            let _ = entry.completion.send(Err(RuntimeError::Suspend));
        }
    }
}
