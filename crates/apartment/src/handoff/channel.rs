//! Forwarding channel between a routine and its consumer
//!
//! Unbounded FIFO of items followed by one terminal state. Items queued
//! before the terminal state are always delivered first; a fault is
//! re-raised on every read after the queue drains.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::types::{Fault, Result};

#[derive(Debug, Clone)]
enum Terminal {
    Completed,
    Faulted(Fault),
}

struct State<T> {
    items: VecDeque<T>,
    terminal: Option<Terminal>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

/// Create a connected writer and sequence
pub(crate) fn channel<T>() -> (Writer<T>, Sequence<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            items: VecDeque::new(),
            terminal: None,
        }),
        notify: Notify::new(),
    });
    (
        Writer {
            shared: Arc::clone(&shared),
            finished: false,
        },
        Sequence { shared },
    )
}

/// Producer side; dropping it unfinished faults the channel with `Canceled`
pub(crate) struct Writer<T> {
    shared: Arc<Shared<T>>,
    finished: bool,
}

impl<T> Writer<T> {
    pub(crate) fn send(&self, item: T) {
        self.shared.state.lock().items.push_back(item);
        self.shared.notify.notify_waiters();
    }

    pub(crate) fn complete(mut self) {
        self.finish(Terminal::Completed);
    }

    pub(crate) fn fault(mut self, fault: Fault) {
        self.finish(Terminal::Faulted(fault));
    }

    fn finish(&mut self, terminal: Terminal) {
        self.finished = true;
        self.shared.state.lock().terminal.get_or_insert(terminal);
        self.shared.notify.notify_waiters();
    }
}

impl<T> Drop for Writer<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(Terminal::Faulted(Fault::Canceled));
        }
    }
}

/// Consumer side of a handoff: the items a routine produced, in order
pub struct Sequence<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Sequence<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Sequence<T> {
    fn try_next(&self) -> Option<Result<Option<T>>> {
        let mut state = self.shared.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Some(Ok(Some(item)));
        }
        match &state.terminal {
            Some(Terminal::Completed) => Some(Ok(None)),
            Some(Terminal::Faulted(fault)) => Some(Err(fault.clone())),
            None => None,
        }
    }

    /// Next item, `None` at the end, or the routine's fault
    pub async fn next(&self, token: &CancellationToken) -> Result<Option<T>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(next) = self.try_next() {
                return next;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Fault::Canceled),
                _ = &mut notified => {}
            }
        }
    }

    /// Next item; reaching the end is a fault
    pub async fn next_item(&self, token: &CancellationToken) -> Result<T> {
        self.next(token).await?.ok_or(Fault::Exhausted)
    }

    /// True once the producer has finished and every item was consumed
    pub fn is_finished(&self) -> bool {
        let state = self.shared.state.lock();
        state.items.is_empty() && state.terminal.is_some()
    }

    /// Adapt into a stream that ends after the last item or the first fault
    pub fn into_stream(self, token: CancellationToken) -> impl Stream<Item = Result<T>> {
        stream::unfold(Some((self, token)), |cursor| async move {
            let (sequence, token) = cursor?;
            match sequence.next(&token).await {
                Ok(Some(item)) => Some((Ok(item), Some((sequence, token)))),
                Ok(None) => None,
                Err(fault) => Some((Err(fault), None)),
            }
        })
    }
}

impl<T> fmt::Debug for Sequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Sequence")
            .field("queued", &state.items.len())
            .field("terminal", &state.terminal)
            .finish()
    }
}
