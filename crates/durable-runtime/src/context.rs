//! The user-facing entry point. A `DurableContext` is
//! what a handler body actually touches: it mints ids, carries this
//! context's own replay flag, and exposes the five operation kinds as
//! plain async methods (plus `_async` variants that hand back a
//! background handle).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use durable_backend::BackendClient;
use durable_types::{ExecutionError, OperationId, SerDes};
use tracing::debug;

use crate::error::RuntimeError;
use crate::manager::{ExecutionManager, ThreadId, ThreadKind};
use crate::operation::{Callback, CallbackConfig, ChildContext, DispatchKind, Invoke, InvokeConfig, Step, StepConfig, Wait};

/// The user's only entry point into the runtime.
///
/// Cloning a `DurableContext` shares the same id counter as its source —
/// concurrent `_async` calls issued from clones of the same logical
/// context still mint strictly increasing ids, matching "deterministic
/// when called in identical code order" for the synchronous case while
/// still supporting fan-out.
#[derive(Clone)]
pub struct DurableContext<C: BackendClient + 'static, S: SerDes + Clone + 'static> {
    manager: Arc<ExecutionManager<C>>,
    context_id: Option<OperationId>,
    counter: Arc<AtomicU64>,
    serdes: S,
}

/// A handle to an operation dispatched on a background task via an
/// `_async` method. Awaiting it joins the task and propagates its result;
/// dropping it without awaiting simply abandons the join (the operation
/// itself still runs to completion and checkpoints normally).
pub struct AsyncHandle<T> {
    handle: tokio::task::JoinHandle<Result<T, RuntimeError>>,
}

impl<T> AsyncHandle<T> {
    pub async fn get(self) -> Result<T, RuntimeError> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Unrecoverable("background operation task panicked".to_string())),
        }
    }
}

/// An in-flight callback's handle: `callback_id()` resolves synchronously
/// once the callback's START round-trip lands, well before the
/// callback itself settles.
pub struct CallbackHandle<C: BackendClient + 'static, S: SerDes + Clone + 'static, T> {
    callback: Arc<Callback<C, S>>,
    handle: tokio::task::JoinHandle<Result<T, RuntimeError>>,
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static, T> CallbackHandle<C, S, T> {
    pub fn callback_id(&self) -> Option<String> {
        self.callback.callback_id()
    }

    pub async fn get(self) -> Result<T, RuntimeError> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Unrecoverable("background callback task panicked".to_string())),
        }
    }
}

impl<C: BackendClient + 'static, S: SerDes + Clone + 'static> DurableContext<C, S> {
    /// The root context for one invocation. Registers the `"Root"`
    /// thread; the executor is responsible for deregistering it via
    /// [`Self::finish_root`] once the handler returns or throws.
    pub fn root(manager: Arc<ExecutionManager<C>>, serdes: S) -> Self {
        manager.register_thread(ThreadId::root());
        Self {
            manager,
            context_id: None,
            counter: Arc::new(AtomicU64::new(0)),
            serdes,
        }
    }

    pub fn finish_root(&self) -> Result<(), RuntimeError> {
        self.manager.deregister_thread(&ThreadId::root())
    }

    fn child(manager: Arc<ExecutionManager<C>>, context_id: OperationId, serdes: S) -> Self {
        Self {
            manager,
            context_id: Some(context_id),
            counter: Arc::new(AtomicU64::new(0)),
            serdes,
        }
    }

    /// `next_id`: `(context_id ? context_id + "-" : "") + (++counter)`.
    fn next_id(&self) -> OperationId {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.context_id {
            Some(parent) => parent.child(seq).expect("call-depth exceeded"),
            None => OperationId::root(seq),
        }
    }

    /// This context's own per-context replay flag, independent of the
    /// manager's global flag: true iff the store already has an operation
    /// whose parent is this context's id.
    pub fn is_replaying(&self) -> bool {
        match &self.context_id {
            Some(id) => self.manager.any_child_of(id),
            None => self.manager.is_replaying(),
        }
    }

    fn thread_id(&self) -> ThreadId {
        match &self.context_id {
            Some(id) => ThreadId::context(id),
            None => ThreadId::root(),
        }
    }

    /// `step(name, func [, config])`: synchronous — create, execute, get.
    pub async fn step<F, Fut, T>(&self, name: impl Into<String>, config: StepConfig, body: F) -> Result<T, RuntimeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ExecutionError>>,
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let id = self.next_id();
        let step = Step::new(id, name.into(), self.context_id.clone(), Arc::clone(&self.manager), config, self.serdes.clone());
        step.run(&self.thread_id(), body).await
    }

    /// `step_async`: dispatches on a background task under its own
    /// dedicated thread id, so the active set stays non-empty while the
    /// caller goes on to do other work before awaiting the handle.
    pub fn step_async<F, Fut, T>(&self, name: impl Into<String>, config: StepConfig, body: F) -> AsyncHandle<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ExecutionError>> + Send,
        T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
    {
        let id = self.next_id();
        let manager = Arc::clone(&self.manager);
        let deregister_manager = Arc::clone(&self.manager);
        let serdes = self.serdes.clone();
        let name = name.into();
        let parent_id = self.context_id.clone();
        let thread = ThreadId::context(&id);
        manager.register_thread(thread.clone());
        let handle = tokio::spawn(async move {
            let step = Step::new(id, name, parent_id, manager, config, serdes);
            let result = step.run(&thread, body).await;
            let _ = deregister_manager.deregister_thread(&thread);
            result
        });
        AsyncHandle { handle }
    }

    /// `wait(name, duration)`: the backend owns the timer entirely.
    pub async fn wait(&self, name: impl Into<String>, duration_seconds: u32) -> Result<(), RuntimeError> {
        let id = self.next_id();
        let wait = Wait::new(id, name.into(), self.context_id.clone(), Arc::clone(&self.manager), duration_seconds)?;
        wait.run(&self.thread_id()).await
    }

    /// `invoke(name, function_name, payload, result_type [, config])`.
    pub async fn invoke<P, T>(
        &self,
        name: impl Into<String>,
        function_name: impl Into<String>,
        config: InvokeConfig,
        payload: &P,
    ) -> Result<T, RuntimeError>
    where
        P: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let id = self.next_id();
        let invoke = Invoke::new(
            id,
            name.into(),
            self.context_id.clone(),
            Arc::clone(&self.manager),
            function_name.into(),
            config,
            self.serdes.clone(),
        );
        invoke.run(&self.thread_id(), payload).await
    }

    pub fn invoke_async<P, T>(
        &self,
        name: impl Into<String>,
        function_name: impl Into<String>,
        config: InvokeConfig,
        payload: P,
    ) -> AsyncHandle<T>
    where
        P: serde::Serialize + Send + 'static,
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let id = self.next_id();
        let manager = Arc::clone(&self.manager);
        let deregister_manager = Arc::clone(&self.manager);
        let serdes = self.serdes.clone();
        let name = name.into();
        let function_name = function_name.into();
        let parent_id = self.context_id.clone();
        let thread = ThreadId::context(&id);
        manager.register_thread(thread.clone());
        let handle = tokio::spawn(async move {
            let invoke = Invoke::new(id, name, parent_id, manager, function_name, config, serdes);
            let result = invoke.run(&thread, &payload).await;
            let _ = deregister_manager.deregister_thread(&thread);
            result
        });
        AsyncHandle { handle }
    }

    /// `callback(name [, config])`: dispatches synchronously, blocking
    /// until the callback resolves. Use [`Self::callback_async`] to get
    /// the `callback_id` before the result is ready.
    pub async fn callback<T>(&self, name: impl Into<String>, config: CallbackConfig) -> Result<T, RuntimeError>
    where
        T: serde::de::DeserializeOwned,
    {
        let id = self.next_id();
        let callback = Callback::new(id, name.into(), self.context_id.clone(), Arc::clone(&self.manager), config, self.serdes.clone());
        callback.run(&self.thread_id()).await
    }

    pub fn callback_async<T>(&self, name: impl Into<String>, config: CallbackConfig) -> CallbackHandle<C, S, T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let id = self.next_id();
        let callback = Arc::new(Callback::new(
            id.clone(),
            name.into(),
            self.context_id.clone(),
            Arc::clone(&self.manager),
            config,
            self.serdes.clone(),
        ));
        let manager = Arc::clone(&self.manager);
        let deregister_manager = Arc::clone(&self.manager);
        let thread = ThreadId::context(&id);
        manager.register_thread(thread.clone());
        let background = Arc::clone(&callback);
        let handle = tokio::spawn(async move {
            let result = background.run(&thread).await;
            let _ = deregister_manager.deregister_thread(&thread);
            result
        });
        CallbackHandle { callback, handle }
    }

    /// `run_in_child_context(name, func)`: dispatches by status, building
    /// the nested `DurableContext` the child body runs
    /// under and registering the child's own context id as a distinct
    /// logical thread before invoking it (preventing suspension races
    /// while the child is mid-flight).
    ///
    /// Unlike a step body, a child-context body receives a nested
    /// `DurableContext` and is expected to chain further `ctx.step()` /
    /// `ctx.wait()` / etc. calls through `?` — so its error channel is
    /// `RuntimeError`, not `ExecutionError`; the existing
    /// `From<ExecutionError> for RuntimeError` impl lets a body still
    /// raise its own leaf-level errors with the same `?`.
    pub async fn run_in_child_context<F, Fut, T>(&self, name: impl Into<String>, body: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(DurableContext<C, S>) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let id = self.next_id();
        let name = name.into();
        let ctx_op: ChildContext<C, S> = ChildContext::new(
            id.clone(),
            name.clone(),
            self.context_id.clone(),
            Arc::clone(&self.manager),
            self.serdes.clone(),
        );

        let dispatch = ctx_op.dispatch_kind()?;
        debug!(context_id = %id, name = %name, replaying = self.is_replaying(), "dispatching child context");
        match dispatch {
            DispatchKind::AlreadyCompleted(op) => {
                return match ctx_op.resolve(&op)? {
                    Some(value) => Ok(value),
                    None => Err(RuntimeError::Unrecoverable(
                        "already-completed child context missing its checkpointed result".to_string(),
                    )),
                };
            }
            DispatchKind::RunAndCheckpoint => {
                ctx_op.start_if_absent().await;
                let outcome = self.run_child_body(&id, body).await;
                match outcome {
                    Ok(value) => {
                        ctx_op.succeed(&value).await?;
                        Ok(value)
                    }
                    Err(error) => {
                        self.fail_child(&ctx_op, error).await
                    }
                }
            }
            DispatchKind::ReconstructOnly => {
                let outcome = self.run_child_body(&id, body).await;
                match outcome {
                    Ok(value) => Ok(value),
                    Err(error) => self.fail_child(&ctx_op, error).await,
                }
            }
        }
    }

    async fn run_child_body<F, Fut, T>(&self, id: &OperationId, body: F) -> Result<T, RuntimeError>
    where
        F: FnOnce(DurableContext<C, S>) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        let child_thread = ThreadId::context(id);
        self.manager.register_thread(child_thread.clone());
        let child_ctx = DurableContext::child(Arc::clone(&self.manager), id.clone(), self.serdes.clone());
        let result = body(child_ctx).await;
        // Deregistering the child thread may itself raise
        // `Suspend`, but it is caught here — the global suspend signal has
        // already been published to whoever is racing against it; this
        // function's own return value carries the already-computed body
        // outcome regardless.
        let _ = self.manager.deregister_thread(&child_thread);
        result
    }

    async fn fail_child<T>(&self, ctx_op: &ChildContext<C, S>, error: RuntimeError) -> Result<T, RuntimeError> {
        if error.is_suspend() || error.is_unrecoverable() {
            return Err(error);
        }
        let error_object = error.to_error_object();
        ctx_op.fail(error_object).await?;
        Err(error)
    }
}
