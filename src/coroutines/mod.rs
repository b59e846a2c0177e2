//! Cooperative coroutine runtime for workflow code.
//!
//! A [`Dispatcher`] owns an unbounded set of named coroutines and runs them
//! strictly single-threaded: coroutines are futures polled with a no-op waker,
//! and suspension happens only at the runtime's own primitives (channel
//! send/recv and select). There are no background threads and nothing ever
//! parks; [`Dispatcher::execute_until_all_blocked`] advances every runnable
//! coroutine until the whole set reaches a fixed point.
//!
//! Scheduling order is spawn order and is deterministic given identical
//! inputs, which is what makes workflow replay possible.

mod channel;
mod selector;

pub use channel::{Channel, RecvFuture, SendFuture};
pub use selector::{SelectFuture, Selector};

use futures::{future::BoxFuture, task::noop_waker, FutureExt};
use parking_lot::Mutex;
use std::{
    any::Any,
    fmt::Write as _,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
};

/// A panic recovered from a coroutine: the panic message plus a synthetic
/// stack assembled from the suspension state of every coroutine at the time
/// of the panic.
#[derive(Clone, Debug)]
pub struct CoroutinePanic {
    pub message: String,
    pub stack_trace: String,
}

#[derive(thiserror::Error, Debug)]
pub enum CoroutineError {
    /// The dispatcher was closed and can no longer be pumped
    #[error("dispatcher is closed")]
    Closed,
    /// A coroutine panicked; the dispatcher is poisoned and later pumps are
    /// no-ops
    #[error("coroutine panicked: {}", .0.message)]
    Panic(CoroutinePanic),
}

/// Per-coroutine bookkeeping shared with the futures it blocks on
pub(crate) struct CoroutineStatus {
    name: String,
    blocked_on: Mutex<Option<String>>,
    finished: AtomicBool,
    panic_message: Mutex<Option<String>>,
}

impl CoroutineStatus {
    fn new(name: String) -> Self {
        Self {
            name,
            blocked_on: Mutex::new(None),
            finished: AtomicBool::new(false),
            panic_message: Mutex::new(None),
        }
    }

    pub(crate) fn set_blocked(&self, site: Option<String>) {
        *self.blocked_on.lock() = site;
    }
}

struct CoroutineCell {
    status: Arc<CoroutineStatus>,
    body: Option<BoxFuture<'static, ()>>,
}

struct DispatcherInner {
    /// Coroutines owned by the dispatcher. Taken out for the duration of a
    /// pump so coroutine bodies can spawn siblings without re-entering the
    /// lock.
    coroutines: Mutex<Vec<CoroutineCell>>,
    /// Staging area for coroutines spawned while a pump pass is advancing;
    /// merged in at the end of the pass
    spawned: Mutex<Vec<CoroutineCell>>,
    /// Set when a pass completes a channel operation, finishes a coroutine or
    /// spawns one; cleared at the start of each pass
    progress: Arc<AtomicBool>,
    next_coroutine_id: AtomicU64,
    closed: AtomicBool,
    poisoned: AtomicBool,
    pumping: AtomicBool,
}

/// A coroutine's handle to its own scheduling context. Passed to every
/// coroutine body; the only way to spawn siblings and create channels, which
/// keeps every suspension point visible to the dispatcher.
#[derive(Clone)]
pub struct CoroutineContext {
    status: Arc<CoroutineStatus>,
    dispatcher: Weak<DispatcherInner>,
    progress: Arc<AtomicBool>,
}

impl CoroutineContext {
    pub(crate) fn status(&self) -> Arc<CoroutineStatus> {
        self.status.clone()
    }

    pub fn coroutine_name(&self) -> &str {
        &self.status.name
    }

    /// Spawn a child coroutine under a generated name. It runs when the
    /// dispatcher is next pumped, after its already-live siblings.
    pub fn spawn<F, Fut>(&self, body: F)
    where
        F: FnOnce(CoroutineContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(inner) = self.dispatcher.upgrade() else {
            debug!("spawn on a released dispatcher ignored");
            return;
        };
        let id = inner.next_coroutine_id.fetch_add(1, Ordering::SeqCst);
        spawn_into(&inner, format!("coroutine-{id}"), body);
    }

    /// Spawn a child coroutine under an explicit name; the name shows up in
    /// stack traces.
    pub fn spawn_named<F, Fut>(&self, name: impl Into<String>, body: F)
    where
        F: FnOnce(CoroutineContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(inner) = self.dispatcher.upgrade() else {
            debug!("spawn on a released dispatcher ignored");
            return;
        };
        spawn_into(&inner, name.into(), body);
    }

    /// Create a named bounded channel. The name identifies the channel in
    /// stack traces.
    pub fn new_buffered_channel<T>(&self, name: impl Into<String>, capacity: usize) -> Channel<T> {
        Channel::new(name.into(), capacity, self.progress.clone())
    }

    pub fn selector(&self) -> Selector {
        Selector::new(self.status.clone())
    }
}

fn spawn_into<F, Fut>(inner: &Arc<DispatcherInner>, name: String, body: F)
where
    F: FnOnce(CoroutineContext) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let status = Arc::new(CoroutineStatus::new(name));
    let ctx = CoroutineContext {
        status: status.clone(),
        dispatcher: Arc::downgrade(inner),
        progress: inner.progress.clone(),
    };
    let future = body(ctx).boxed();
    inner.spawned.lock().push(CoroutineCell {
        status,
        body: Some(future),
    });
    inner.progress.store(true, Ordering::SeqCst);
}

/// Cooperative scheduler owning one workflow execution's coroutines. Cloning
/// yields another handle to the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Create a dispatcher whose root coroutine runs `root(ctx)`. Nothing
    /// executes until the first pump.
    pub fn new<F, Fut>(root: F) -> Self
    where
        F: FnOnce(CoroutineContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = Arc::new(DispatcherInner {
            coroutines: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            progress: Arc::new(AtomicBool::new(false)),
            next_coroutine_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
            pumping: AtomicBool::new(false),
        });
        let status = Arc::new(CoroutineStatus::new("root".to_owned()));
        let ctx = CoroutineContext {
            status: status.clone(),
            dispatcher: Arc::downgrade(&inner),
            progress: inner.progress.clone(),
        };
        let future = root(ctx).boxed();
        inner.coroutines.lock().push(CoroutineCell {
            status,
            body: Some(future),
        });
        Self { inner }
    }

    /// Run all runnable coroutines to a fixed point. Within one pass every
    /// coroutine advances as far as it can before control moves to the next;
    /// passes repeat until a full pass makes no progress. Returns a recovered
    /// panic, or [`CoroutineError::Closed`] once the dispatcher is closed.
    pub fn execute_until_all_blocked(&self) -> Result<(), CoroutineError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(CoroutineError::Closed);
        }
        // A poisoned dispatcher already reported its panic; later pumps are
        // no-ops.
        if inner.poisoned.load(Ordering::SeqCst) {
            return Ok(());
        }
        assert!(
            !inner.pumping.swap(true, Ordering::SeqCst),
            "dispatcher pump re-entered"
        );
        let result = self.pump();
        inner.pumping.store(false, Ordering::SeqCst);
        result
    }

    fn pump(&self) -> Result<(), CoroutineError> {
        let inner = &self.inner;
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut coroutines = std::mem::take(&mut *inner.coroutines.lock());
        let mut outcome = Ok(());
        'passes: loop {
            inner.progress.store(false, Ordering::SeqCst);
            for cell in coroutines.iter_mut() {
                let Some(body) = cell.body.as_mut() else {
                    continue;
                };
                match catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx))) {
                    Ok(Poll::Ready(())) => {
                        cell.body = None;
                        cell.status.finished.store(true, Ordering::SeqCst);
                        cell.status.set_blocked(None);
                        inner.progress.store(true, Ordering::SeqCst);
                    }
                    Ok(Poll::Pending) => {}
                    Err(payload) => {
                        let message = panic_message(payload);
                        warn!(coroutine = %cell.status.name, %message, "coroutine panicked");
                        cell.body = None;
                        *cell.status.panic_message.lock() = Some(message.clone());
                        inner.poisoned.store(true, Ordering::SeqCst);
                        coroutines.extend(inner.spawned.lock().drain(..));
                        let stack_trace = render_stack_trace(&coroutines);
                        outcome = Err(CoroutineError::Panic(CoroutinePanic {
                            message,
                            stack_trace,
                        }));
                        break 'passes;
                    }
                }
            }
            coroutines.extend(inner.spawned.lock().drain(..));
            if !inner.progress.load(Ordering::SeqCst) {
                break;
            }
        }
        if inner.closed.load(Ordering::SeqCst) {
            coroutines.clear();
        } else {
            *inner.coroutines.lock() = coroutines;
        }
        outcome
    }

    /// Names and current suspension points of all live coroutines
    pub fn stack_trace(&self) -> String {
        render_stack_trace(&self.inner.coroutines.lock())
    }

    /// Release the dispatcher, dropping its coroutines; later pumps are
    /// rejected.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.coroutines.lock().clear();
        self.inner.spawned.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "coroutine panicked".to_owned()
    }
}

fn render_stack_trace(cells: &[CoroutineCell]) -> String {
    let mut out = String::new();
    for cell in cells {
        let status = &cell.status;
        if let Some(message) = &*status.panic_message.lock() {
            let _ = writeln!(out, "coroutine {} [panicked: {}]", status.name, message);
        } else if status.finished.load(Ordering::SeqCst) {
            continue;
        } else if let Some(site) = &*status.blocked_on.lock() {
            let _ = writeln!(out, "coroutine {} [blocked on {}]", status.name, site);
        } else {
            let _ = writeln!(out, "coroutine {} [runnable]", status.name);
        }
    }
    out
}
