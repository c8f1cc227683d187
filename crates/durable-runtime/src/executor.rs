//! Top-level driver: one `execute` call per invocation.

use std::future::Future;
use std::sync::Arc;

use durable_backend::{BackendClient, OperationPage};
use durable_types::{ErrorObject, Operation, OperationDetails, OperationKind, SerDes};

use tracing::{debug, warn, Instrument};

use crate::batcher::{MAX_BATCH_SIZE_BYTES, MAX_ITEM_COUNT};
use crate::constants::DEFAULT_POLL_MS;
use crate::context::DurableContext;
use crate::error::RuntimeError;
use crate::manager::ExecutionManager;

/// Ambient tuning knobs that don't change the protocol, only its pacing:
/// the checkpoint batcher's batching window and the poll cadence
/// operations fall back to while parked. Exists so embedding code has one
/// place to reach for without threading individual constants through
/// every call.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum number of updates coalesced into one `Checkpoint`
    /// round-trip.
    pub max_batch_item_count: usize,
    /// Maximum approximate wire size, in bytes, of one coalesced batch.
    pub max_batch_size_bytes: usize,
    /// Cadence, in milliseconds, a parked operation polls the backend at
    /// once its caller's own initial delay (a retry backoff, an
    /// invoke timeout guard) has elapsed.
    pub poll_interval_ms: u64,
    /// Whether operation-level log calls are suppressed while the
    /// execution is replaying, to avoid re-emitting duplicates of
    /// everything the prior invocation already logged (spec §6
    /// Observability). Configurable; on by default.
    pub suppress_replay_logs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_batch_item_count: MAX_ITEM_COUNT,
            max_batch_size_bytes: MAX_BATCH_SIZE_BYTES,
            poll_interval_ms: DEFAULT_POLL_MS,
            suppress_replay_logs: true,
        }
    }
}

/// One invocation's parsed input.
pub struct Invocation {
    pub execution_arn: String,
    pub checkpoint_token: String,
    pub initial_operations: Vec<Operation>,
}

/// One invocation's result.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Pending,
    Success(String),
    Failed(ErrorObject),
}

/// Fetch every remaining page of the initial execution state before the
/// execution manager is constructed from it.
async fn drain_pages<C: BackendClient>(
    client: &C,
    execution_arn: &str,
    token: &str,
    first_page: OperationPage,
) -> Result<Vec<Operation>, RuntimeError> {
    let mut operations = first_page.operations;
    let mut marker = first_page.next_marker;
    while let Some(next) = marker.take() {
        let page = client
            .get_execution_state(execution_arn, token, Some(&next))
            .await
            .map_err(|e| RuntimeError::Unrecoverable(format!("failed to page execution state: {e}")))?;
        operations.extend(page.operations);
        marker = page.next_marker;
    }
    Ok(operations)
}

/// Drives one invocation to completion.
pub async fn execute<C, S, F, Fut, I, O>(
    client: Arc<C>,
    invocation: Invocation,
    serdes: S,
    config: RuntimeConfig,
    handler: F,
) -> InvocationOutcome
where
    C: BackendClient + 'static,
    S: SerDes + Clone + 'static,
    F: FnOnce(DurableContext<C, S>, I) -> Fut,
    Fut: Future<Output = Result<O, RuntimeError>>,
    I: serde::de::DeserializeOwned,
    O: serde::Serialize,
{
    // MDC-equivalent: every log call made while driving this invocation
    // (including ones nested deep in the operation state machines) picks
    // up `durable_execution_arn`/`request_id` as structured span fields
    // rather than a hand-rolled thread-local MDC layer.
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "durable_execution",
        durable_execution_arn = %invocation.execution_arn,
        request_id = %request_id,
    );
    async move {
        match execute_inner(client, invocation, serdes, config, handler).await {
            Ok(outcome) => outcome,
            Err(RuntimeError::Suspend) => InvocationOutcome::Pending,
            Err(error) if error.is_unrecoverable() => {
                InvocationOutcome::Failed(ErrorObject::new("Unrecoverable", error.to_string()))
            }
            Err(error) => InvocationOutcome::Failed(error.to_error_object()),
        }
    }
    .instrument(span)
    .await
}

async fn execute_inner<C, S, F, Fut, I, O>(
    client: Arc<C>,
    invocation: Invocation,
    serdes: S,
    config: RuntimeConfig,
    handler: F,
) -> Result<InvocationOutcome, RuntimeError>
where
    C: BackendClient + 'static,
    S: SerDes + Clone + 'static,
    F: FnOnce(DurableContext<C, S>, I) -> Fut,
    Fut: Future<Output = Result<O, RuntimeError>>,
    I: serde::de::DeserializeOwned,
    O: serde::Serialize,
{
    // The first operation must exist and be EXECUTION.
    let seed = invocation
        .initial_operations
        .first()
        .cloned()
        .ok_or_else(|| RuntimeError::Unrecoverable("initial execution state has no operations".to_string()))?;
    if seed.kind() != OperationKind::Execution {
        return Err(RuntimeError::Unrecoverable(format!(
            "expected the first operation to be EXECUTION, got {:?}",
            seed.kind()
        )));
    }
    let OperationDetails::Execution { ref input_payload } = seed.details else {
        return Err(RuntimeError::Unrecoverable("EXECUTION operation missing input payload".to_string()));
    };

    // Construct the execution manager, pulling every remaining page.
    let first_page = OperationPage {
        operations: invocation.initial_operations,
        next_marker: None,
    };
    let all_operations = drain_pages(client.as_ref(), &invocation.execution_arn, &invocation.checkpoint_token, first_page).await?;
    debug!(execution_arn = %invocation.execution_arn, operations = all_operations.len(), "resumed execution state");
    let manager = ExecutionManager::new(client, &invocation.execution_arn, &invocation.checkpoint_token, all_operations);
    manager.configure_logging(config.suppress_replay_logs);
    manager.configure_batching(config.max_batch_item_count, config.max_batch_size_bytes, config.poll_interval_ms);

    // Extract the user input.
    let input: I = serdes.deserialize(input_payload).map_err(RuntimeError::from)?;

    // Construct the root context, registering the Root thread.
    let context = DurableContext::root(Arc::clone(&manager), serdes.clone());

    // Dispatch the handler on the current task and race it against the
    // suspend signal. `durable-runtime` leans on tokio's cooperative
    // scheduler rather than a dedicated worker handle: the handler future
    // is driven inline by `run_until_complete_or_suspend`.
    let context_for_handler = context.clone();
    let user_future = async move {
        let result = handler(context_for_handler, input).await;
        // The root thread completing is one of the suspension points.
        // Finishing here — after the handler returns either way — means a
        // handler that throws still frees the root thread.
        let finished = context.finish_root();
        match result {
            Ok(value) => {
                finished?;
                Ok(value)
            }
            // Suspend/Unrecoverable are the runtime's own sentinels, not a
            // handler-level failure — forward them unwrapped so the match
            // below still recognizes them.
            Err(error) if error.is_suspend() || error.is_unrecoverable() => {
                let _ = finished;
                Err(error)
            }
            Err(error) => {
                let _ = finished;
                Err(RuntimeError::HandlerFailed(error.to_error_object()))
            }
        }
    };

    let outcome = manager.run_until_complete_or_suspend(user_future).await;

    // Drain the manager regardless of how the race above resolved.
    manager.shutdown().await;

    match outcome {
        Ok(value) => {
            let payload = serdes.serialize(&value).map_err(RuntimeError::from)?;
            debug!(execution_arn = %invocation.execution_arn, "execution succeeded");
            Ok(InvocationOutcome::Success(
                String::from_utf8_lossy(&payload.bytes).into_owned(),
            ))
        }
        Err(RuntimeError::Suspend) => {
            debug!(execution_arn = %invocation.execution_arn, "execution suspended");
            Ok(InvocationOutcome::Pending)
        }
        Err(error) if error.is_unrecoverable() => {
            warn!(execution_arn = %invocation.execution_arn, error = %error, "execution terminated");
            Err(error)
        }
        Err(error) => Ok(InvocationOutcome::Failed(error.to_error_object())),
    }
}
