//! Generator-style routines
//!
//! A [`Routine`] turns an async body into a stream. The body receives a
//! [`Yielder`]; each `yield_item(..).await` suspends the body and hands the
//! value to whoever polls the stream. The body does not start until the
//! stream is first polled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use parking_lot::Mutex;

use crate::types::Result;

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Handle used by a routine body to produce values.
///
/// Values reach a consumer only when yielded from the body of the
/// [`Routine`] that created the yielder; a yield awaited in any other task
/// completes without delivering its value.
pub struct Yielder<T> {
    slot: Slot<T>,
}

impl<T> Yielder<T> {
    /// Hand `value` to the consumer and suspend until it asks for more
    pub fn yield_item(&self, value: T) -> YieldNow<T> {
        YieldNow {
            slot: Arc::clone(&self.slot),
            value: Some(value),
        }
    }
}

/// Future returned by [`Yielder::yield_item`]
#[must_use = "a value is only yielded when awaited"]
pub struct YieldNow<T> {
    slot: Slot<T>,
    value: Option<T>,
}

// Never structurally pinned
impl<T> Unpin for YieldNow<T> {}

impl<T> Future for YieldNow<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.value.take() {
            Some(value) => {
                // Inside a routine, poll_next picks the value up. Anywhere
                // else the wakeup lets the await finish instead of hanging.
                *self.slot.lock() = Some(value);
                cx.waker().wake_by_ref();
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

/// Lazily driven generator over an async body
pub struct Routine<T> {
    body: Option<BoxFuture<'static, Result<()>>>,
    slot: Slot<T>,
}

impl<T: Send + 'static> Routine<T> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let slot: Slot<T> = Arc::new(Mutex::new(None));
        let yielder = Yielder {
            slot: Arc::clone(&slot),
        };
        Self {
            body: Some(Box::pin(body(yielder))),
            slot,
        }
    }
}

impl<T> Stream for Routine<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(body) = this.body.as_mut() else {
            return Poll::Ready(None);
        };

        match body.as_mut().poll(cx) {
            Poll::Ready(Ok(())) => {
                this.body = None;
                Poll::Ready(None)
            }
            Poll::Ready(Err(fault)) => {
                this.body = None;
                Poll::Ready(Some(Err(fault)))
            }
            Poll::Pending => match this.slot.lock().take() {
                Some(value) => Poll::Ready(Some(Ok(value))),
                None => Poll::Pending,
            },
        }
    }
}
