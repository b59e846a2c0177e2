use super::{ActivityRequest, WorkflowContext, WorkflowInfo};
use crate::{
    coroutines::{Channel, CoroutineContext, CoroutineError, Dispatcher, Selector},
    errors::{ActivityError, FlowError},
};
use futures::{future::BoxFuture, FutureExt};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::{future::Future, sync::Arc};

/// A workflow implementation. The returned future must be deterministic: a
/// pure function of the input and the activity results delivered through the
/// context (see the crate docs).
pub trait Workflow: Send + Sync {
    fn execute(&self, ctx: WfContext, input: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, FlowError>>;
}

/// Lifts an async closure into a [`Workflow`]
pub struct WorkflowFn {
    f: Box<
        dyn Fn(WfContext, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, FlowError>> + Send + Sync,
    >,
}

impl WorkflowFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(WfContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, FlowError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }
}

impl Workflow for WorkflowFn {
    fn execute(&self, ctx: WfContext, input: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, FlowError>> {
        (self.f)(ctx, input)
    }
}

/// State shared by the definition, its coroutines, and the activity
/// completion callbacks it hands out
struct DefinitionState {
    context: Arc<WorkflowContext>,
    /// Installed right after dispatcher construction; the root coroutine and
    /// the callbacks only run afterwards, under the pump
    dispatcher: OnceCell<Dispatcher>,
    result: Mutex<Option<Result<Vec<u8>, FlowError>>>,
}

impl DefinitionState {
    fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
            .get()
            .expect("dispatcher installed before first pump")
    }

    /// Pump the dispatcher and report completion when the root workflow
    /// function has returned or panicked. No-op on a closed dispatcher, which
    /// keeps completion at-most-once even when callbacks fire after the
    /// workflow finished.
    fn execute_dispatcher(&self) {
        let dispatcher = self.dispatcher();
        if dispatcher.is_closed() {
            return;
        }
        match dispatcher.execute_until_all_blocked() {
            Err(CoroutineError::Panic(panic)) => {
                error!(reason = %panic.message, "workflow code panicked");
                self.context.complete(Err(FlowError::new(
                    panic.message,
                    panic.stack_trace.into_bytes(),
                )));
                dispatcher.close();
            }
            Err(CoroutineError::Closed) => {}
            Ok(()) => {
                let result = self.result.lock().take();
                if let Some(result) = result {
                    self.context.complete(result);
                    dispatcher.close();
                }
            }
        }
    }
}

/// Context handed to user workflow code: the synchronous activity façade,
/// coroutine spawning, and the runtime's channel and select primitives.
#[derive(Clone)]
pub struct WfContext {
    coro: CoroutineContext,
    state: Arc<DefinitionState>,
}

impl WfContext {
    pub fn workflow_info(&self) -> WorkflowInfo {
        self.state.context.workflow_info().clone()
    }

    /// Schedule an activity and wait for its terminal outcome. Suspends the
    /// calling coroutine until the matching terminal history event is
    /// processed, possibly several decision tasks later.
    pub async fn execute_activity(
        &self,
        mut request: ActivityRequest,
    ) -> Result<Vec<u8>, ActivityError> {
        let activity_id = match request.activity_id.take() {
            Some(id) => id,
            None => self.state.context.generate_activity_id(),
        };
        request.activity_id = Some(activity_id.clone());
        // Channel named after the activity so the suspension reads well in
        // stack traces.
        let outcome: Channel<Result<Vec<u8>, ActivityError>> = self
            .coro
            .new_buffered_channel(format!("activity-{activity_id}"), 1);
        let reply = outcome.clone();
        let state = self.state.clone();
        self.state.context.execute_activity(
            request,
            Box::new(move |result| {
                // Capacity is one and the slot is empty by construction.
                if !reply.send_async(result) {
                    panic!("unexpected");
                }
                state.execute_dispatcher();
            }),
        );
        outcome.recv(&self.coro).await
    }

    /// Spawn a child coroutine sharing this execution's context. The only
    /// sanctioned way to run concurrent work inside a workflow.
    pub fn spawn<F, Fut>(&self, f: F)
    where
        F: FnOnce(WfContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.clone();
        self.coro.spawn(move |coro| f(WfContext { coro, state }));
    }

    /// A named bounded channel between this execution's coroutines
    pub fn new_buffered_channel<T>(&self, name: impl Into<String>, capacity: usize) -> Channel<T> {
        self.coro.new_buffered_channel(name, capacity)
    }

    pub fn selector(&self) -> Selector {
        self.coro.selector()
    }

    pub fn coroutine(&self) -> &CoroutineContext {
        &self.coro
    }
}

/// Hosts one user workflow on a dispatcher and owns the execution's result
/// slot. Created lazily by the event handler when it sees
/// `WorkflowExecutionStarted`.
pub struct WorkflowDefinition {
    workflow: Arc<dyn Workflow>,
    state: Option<Arc<DefinitionState>>,
}

impl WorkflowDefinition {
    pub fn new(workflow: impl Workflow + 'static) -> Self {
        Self {
            workflow: Arc::new(workflow),
            state: None,
        }
    }

    /// Run the workflow until it first blocks. Decisions produced along the
    /// way accumulate in `context`; completion is reported through the
    /// context's completion handler.
    pub fn execute(&mut self, context: Arc<WorkflowContext>, input: Vec<u8>) {
        let state = Arc::new(DefinitionState {
            context,
            dispatcher: OnceCell::new(),
            result: Mutex::new(None),
        });
        let workflow = self.workflow.clone();
        let root_state = state.clone();
        let dispatcher = Dispatcher::new(move |coro| async move {
            let ctx = WfContext {
                coro,
                state: root_state.clone(),
            };
            let result = workflow.execute(ctx, input).await;
            *root_state.result.lock() = Some(result);
        });
        if state.dispatcher.set(dispatcher).is_err() {
            unreachable!("dispatcher installed twice");
        }
        self.state = Some(state.clone());
        state.execute_dispatcher();
    }

    /// Suspension points of all live coroutines; empty before `execute`
    pub fn stack_trace(&self) -> String {
        self.state
            .as_ref()
            .map(|s| s.dispatcher().stack_trace())
            .unwrap_or_default()
    }

    pub fn close(&self) {
        if let Some(state) = &self.state {
            state.dispatcher().close();
        }
    }
}
