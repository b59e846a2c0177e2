use super::{Channel, CoroutineStatus};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// Deterministic select over channel operations. Cases are tried in the order
/// they were added and the first ready case fires its handler; when no case
/// is ready the calling coroutine blocks. The fixed ordering keeps replays
/// identical: given the same channel states, the same case fires.
pub struct Selector {
    status: Arc<CoroutineStatus>,
    cases: Vec<SelectCase>,
}

struct SelectCase {
    label: String,
    poll: Box<dyn FnMut() -> bool + Send>,
}

impl Selector {
    pub(crate) fn new(status: Arc<CoroutineStatus>) -> Self {
        Self {
            status,
            cases: Vec::new(),
        }
    }

    /// Add a receive case; `handler` runs with the received value if this
    /// case fires.
    pub fn add_recv<T, F>(mut self, channel: &Channel<T>, handler: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let chan = channel.clone();
        let mut handler = Some(handler);
        self.cases.push(SelectCase {
            label: format!("recv \"{}\"", channel.name()),
            poll: Box::new(move || match chan.try_recv() {
                Some(value) => {
                    let handler = handler.take().expect("select case fired twice");
                    handler(value);
                    true
                }
                None => false,
            }),
        });
        self
    }

    /// Add a send case; `handler` runs once the value has been accepted.
    pub fn add_send<T, F>(mut self, channel: &Channel<T>, value: T, handler: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let chan = channel.clone();
        let mut slot = Some((value, handler));
        self.cases.push(SelectCase {
            label: format!("send \"{}\"", channel.name()),
            poll: Box::new(move || {
                let (value, handler) = slot.take().expect("select case fired twice");
                match chan.try_send(value) {
                    Ok(()) => {
                        handler();
                        true
                    }
                    Err(value) => {
                        slot = Some((value, handler));
                        false
                    }
                }
            }),
        });
        self
    }

    /// Completes once exactly one case has fired.
    pub fn select(self) -> SelectFuture {
        SelectFuture {
            status: self.status,
            cases: self.cases,
        }
    }
}

pub struct SelectFuture {
    status: Arc<CoroutineStatus>,
    cases: Vec<SelectCase>,
}

impl Future for SelectFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        for case in this.cases.iter_mut() {
            if (case.poll)() {
                this.status.set_blocked(None);
                return Poll::Ready(());
            }
        }
        let labels = this
            .cases
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        this.status.set_blocked(Some(format!("select [{labels}]")));
        Poll::Pending
    }
}
