use super::CoroutineStatus;
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

pub(crate) struct ChannelInner<T> {
    name: String,
    capacity: usize,
    buf: Mutex<VecDeque<T>>,
    /// Dispatcher progress flag; a completed operation schedules another pass
    progress: Arc<AtomicBool>,
}

/// A named bounded channel between coroutines of one dispatcher. Cloning
/// yields another handle to the same channel. The blocking operations take
/// the calling coroutine's context so the suspension site can be recorded for
/// stack traces; the non-blocking ones are also safe to call from completion
/// callbacks outside the coroutine plane.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Channel<T> {
    pub(crate) fn new(name: String, capacity: usize, progress: Arc<AtomicBool>) -> Self {
        assert!(capacity > 0, "buffered channels need capacity of at least 1");
        Self {
            inner: Arc::new(ChannelInner {
                name,
                capacity,
                buf: Mutex::new(VecDeque::new()),
                progress,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Non-blocking send. Returns the value when the buffer is full.
    pub fn try_send(&self, value: T) -> Result<(), T> {
        let mut buf = self.inner.buf.lock();
        if buf.len() < self.inner.capacity {
            buf.push_back(value);
            self.inner.progress.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(value)
        }
    }

    /// Non-blocking send. Returns whether the value was accepted; a rejected
    /// value is dropped.
    pub fn send_async(&self, value: T) -> bool {
        self.try_send(value).is_ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        let value = self.inner.buf.lock().pop_front();
        if value.is_some() {
            self.inner.progress.store(true, Ordering::SeqCst);
        }
        value
    }

    /// Send a value, blocking the calling coroutine while the buffer is full.
    pub fn send(&self, ctx: &super::CoroutineContext, value: T) -> SendFuture<T> {
        SendFuture {
            inner: self.inner.clone(),
            status: ctx.status(),
            value: Some(value),
        }
    }

    /// Receive a value, blocking the calling coroutine while the buffer is
    /// empty.
    pub fn recv(&self, ctx: &super::CoroutineContext) -> RecvFuture<T> {
        RecvFuture {
            inner: self.inner.clone(),
            status: ctx.status(),
        }
    }
}

pub struct SendFuture<T> {
    inner: Arc<ChannelInner<T>>,
    status: Arc<CoroutineStatus>,
    value: Option<T>,
}

impl<T> Unpin for SendFuture<T> {}

impl<T> Future for SendFuture<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut buf = this.inner.buf.lock();
        if buf.len() < this.inner.capacity {
            let value = this.value.take().expect("send future polled after completion");
            buf.push_back(value);
            this.inner.progress.store(true, Ordering::SeqCst);
            this.status.set_blocked(None);
            Poll::Ready(())
        } else {
            this.status
                .set_blocked(Some(format!("send on channel \"{}\"", this.inner.name)));
            Poll::Pending
        }
    }
}

pub struct RecvFuture<T> {
    inner: Arc<ChannelInner<T>>,
    status: Arc<CoroutineStatus>,
}

impl<T> Unpin for RecvFuture<T> {}

impl<T> Future for RecvFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        match this.inner.buf.lock().pop_front() {
            Some(value) => {
                this.inner.progress.store(true, Ordering::SeqCst);
                this.status.set_blocked(None);
                Poll::Ready(value)
            }
            None => {
                this.status
                    .set_blocked(Some(format!("recv on channel \"{}\"", this.inner.name)));
                Poll::Pending
            }
        }
    }
}
