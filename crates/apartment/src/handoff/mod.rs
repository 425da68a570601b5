//! Coroutine handoff
//!
//! Pairs two independently scheduled routines. One side drives a routine
//! with [`CoroutineHandoff::run`]; the other obtains the routine's output
//! with [`CoroutineHandoff::as_sequence`] and consumes it item by item.
//! Two routines that each consume the other's sequence between their own
//! yields execute in strict alternation.
//!
//! ```text
//!   routine A ──run──► handoff A ──as_sequence──► routine B
//!   routine B ──run──► handoff B ──as_sequence──► routine A
//! ```

mod channel;
mod routine;

use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::apartment::{Apartment, OperationHandle};
use crate::types::{Fault, Result};

pub use channel::Sequence;
pub use routine::{Routine, YieldNow, Yielder};

type Promise<T> = watch::Sender<Option<Result<Sequence<T>>>>;

/// Single-use handoff of a routine's output to a consumer
pub struct CoroutineHandoff<T> {
    promise: Arc<Promise<T>>,
}

impl<T> Clone for CoroutineHandoff<T> {
    fn clone(&self) -> Self {
        Self {
            promise: Arc::clone(&self.promise),
        }
    }
}

impl<T> Default for CoroutineHandoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CoroutineHandoff<T> {
    pub fn new() -> Self {
        let (promise, _) = watch::channel(None);
        Self {
            promise: Arc::new(promise),
        }
    }

    /// Resolve the promise; false if it was already resolved
    fn resolve(&self, value: Result<Sequence<T>>) -> bool {
        self.promise.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            true
        })
    }

    /// Reject the promise unless it was already resolved
    pub fn reject(&self, fault: Fault) -> bool {
        self.resolve(Err(fault))
    }

    /// True once a sequence or a rejection is available
    pub fn is_resolved(&self) -> bool {
        self.promise.borrow().is_some()
    }

    /// Wait for the routine's sequence
    pub async fn as_sequence(&self, token: &CancellationToken) -> Result<Sequence<T>> {
        let mut receiver = self.promise.subscribe();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Fault::Canceled),
            sequence = resolved(&mut receiver) => sequence,
        }
    }
}

impl<T: Send + 'static> CoroutineHandoff<T> {
    /// Drive the routine built by `routine`, forwarding every item it yields
    /// to the consumer side. The sequence is published before the routine
    /// starts.
    pub async fn run<F, S>(&self, routine: F, token: CancellationToken) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> S,
        S: Stream<Item = Result<T>>,
    {
        if self.is_resolved() {
            return Err(self.already_resolved(&token));
        }
        if token.is_cancelled() {
            self.reject(Fault::Canceled);
            return Err(Fault::Canceled);
        }

        let (writer, sequence) = channel::channel();
        if !self.resolve(Ok(sequence)) {
            return Err(self.already_resolved(&token));
        }

        let stream = routine(token.clone());
        tokio::pin!(stream);

        let mut forwarded = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Fault::Canceled),
                item = stream.next() => Ok(item),
            };

            match next {
                Ok(Some(Ok(item))) => {
                    writer.send(item);
                    forwarded += 1;
                }
                Ok(Some(Err(fault))) | Err(fault) => {
                    debug!(forwarded, %fault, "routine faulted");
                    writer.fault(fault.clone());
                    return Err(fault);
                }
                Ok(None) => {
                    trace!(forwarded, "routine finished");
                    writer.complete();
                    return Ok(());
                }
            }
        }
    }

    /// [`run`](Self::run) inside `apartment`. If the apartment never starts
    /// the routine, the consumer sees `Canceled`.
    pub fn run_in<A, F, S>(
        &self,
        apartment: &A,
        routine: F,
        token: CancellationToken,
    ) -> OperationHandle<()>
    where
        A: Apartment,
        F: FnOnce(CancellationToken) -> S + Send + 'static,
        S: Stream<Item = Result<T>> + Send + 'static,
    {
        // The apartment may be busy long after the token fires
        if let Ok(runtime) = Handle::try_current() {
            let watched = self.clone();
            let watch_token = token.clone();
            runtime.spawn(async move {
                let mut receiver = watched.promise.subscribe();
                tokio::select! {
                    _ = watch_token.cancelled() => {
                        if watched.reject(Fault::Canceled) {
                            debug!("handoff canceled while its apartment was busy");
                        }
                    }
                    _ = receiver.wait_for(Option::is_some) => {}
                }
            });
        }

        let guard = RejectOnDrop(self.clone());
        let handoff = self.clone();
        let run_token = token.clone();
        apartment.run_async(
            move || async move {
                let _guard = guard;
                handoff.run(routine, run_token).await
            },
            token,
        )
    }
}

impl<T> CoroutineHandoff<T> {
    /// Fault for a `run` that found the promise resolved. A cancellation
    /// rejection that beat a canceled run is that run's own outcome.
    fn already_resolved(&self, token: &CancellationToken) -> Fault {
        let canceled = matches!(&*self.promise.borrow(), Some(Err(Fault::Canceled)));
        if canceled && token.is_cancelled() {
            Fault::Canceled
        } else {
            Fault::ProtocolMisuse("handoff already resolved".to_string())
        }
    }
}

impl<T> fmt::Debug for CoroutineHandoff<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineHandoff")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

async fn resolved<T>(
    receiver: &mut watch::Receiver<Option<Result<Sequence<T>>>>,
) -> Result<Sequence<T>> {
    match receiver.wait_for(Option::is_some).await {
        Ok(slot) => (*slot).clone().unwrap_or(Err(Fault::Closed)),
        Err(_) => Err(Fault::Closed),
    }
}

/// Rejects the handoff with `Canceled` unless it was resolved first
struct RejectOnDrop<T>(CoroutineHandoff<T>);

impl<T> Drop for RejectOnDrop<T> {
    fn drop(&mut self) {
        if self.0.reject(Fault::Canceled) {
            debug!("handoff canceled before its routine started");
        }
    }
}
