//! Fault aggregation utilities
//!
//! Helpers for working with faults collected from fire-and-forget work:
//! - Flattening nested aggregates into their leaf faults
//! - Detecting cancellation-only fault sets
//! - `observe` / `ignore_cancellations` / `handle` wrappers that route an
//!   unhandled fault to the apartment current at the call site
//! - `with_cancellation`, which stops waiting on a future once a token fires

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::apartment::current;
use crate::types::{AggregateFault, Fault, Result};

impl Fault {
    /// Wrap an error returned by a unit of work
    pub fn operation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Fault::Operation(Arc::new(err))
    }

    /// Build a fault from a panic payload
    pub fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Fault::Panicked(message.into())
    }

    /// Aggregate faults, flattening nested aggregates
    pub fn aggregate(faults: impl IntoIterator<Item = Fault>) -> Self {
        Fault::Aggregate(AggregateFault::new(
            faults.into_iter().flat_map(|fault| fault.flatten()),
        ))
    }

    /// Recursively flatten nested aggregates.
    ///
    /// An empty aggregate is yielded as itself, a single-element aggregate
    /// yields its element.
    pub fn flatten(&self) -> Vec<Fault> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<Fault>) {
        match self {
            Fault::Aggregate(aggregate) if aggregate.is_empty() => out.push(self.clone()),
            Fault::Aggregate(aggregate) => {
                for inner in aggregate {
                    inner.flatten_into(out);
                }
            }
            other => out.push(other.clone()),
        }
    }

    /// Peel a chain of single-element aggregates
    pub fn unwrap_single(&self) -> &Fault {
        let mut inner = self;
        while let Fault::Aggregate(aggregate) = inner {
            match aggregate.faults() {
                [only] => inner = only,
                _ => break,
            }
        }
        inner
    }

    /// True if this fault, or every leaf of it, is a cancellation
    pub fn is_cancellation(&self) -> bool {
        match self {
            Fault::Canceled => true,
            Fault::Aggregate(aggregate) => aggregate.is_cancellation(),
            _ => false,
        }
    }

    /// Invoke `handler` for each leaf fault
    pub fn handle(&self, mut handler: impl FnMut(&Fault)) {
        for fault in self.flatten() {
            handler(&fault);
        }
    }

    /// Downcast an operation fault to the concrete error type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self.unwrap_single() {
            Fault::Operation(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// True if both values are the same fault object
    pub fn is_same(&self, other: &Fault) -> bool {
        match (self, other) {
            (Fault::Operation(a), Fault::Operation(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (Fault::Panicked(a), Fault::Panicked(b)) => Arc::ptr_eq(a, b),
            (Fault::ThreadSpawn(a), Fault::ThreadSpawn(b)) => Arc::ptr_eq(a, b),
            (Fault::Aggregate(a), Fault::Aggregate(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl AggregateFault {
    /// All leaf faults, with nested aggregates flattened
    pub fn flatten(&self) -> Vec<Fault> {
        self.iter().flat_map(|fault| fault.flatten()).collect()
    }

    /// True if the set is non-empty and consists only of cancellations
    pub fn is_cancellation(&self) -> bool {
        let leaves = self.flatten();
        !leaves.is_empty() && leaves.iter().all(|f| matches!(f, Fault::Canceled))
    }
}

/// Fire-and-forget wrappers that never let a fault go unobserved.
///
/// The future is spawned on the apartment current at the call site, so an
/// unhandled fault lands in that apartment's fault list. Without a current
/// apartment it is spawned on the ambient tokio runtime and unhandled faults
/// are logged.
pub trait ObserveExt: Future<Output = Result<()>> + Send + Sized + 'static {
    /// Record any fault
    fn observe(self) {
        fire_and_forget(self, |_| false);
    }

    /// Record any fault that is not a cancellation
    fn ignore_cancellations(self) {
        fire_and_forget(self, Fault::is_cancellation);
    }

    /// Record the fault unless `handler` returns true
    fn handle<H>(self, handler: H)
    where
        H: FnOnce(&Fault) -> bool + Send + 'static,
    {
        fire_and_forget(self, handler);
    }
}

impl<F> ObserveExt for F where F: Future<Output = Result<()>> + Send + 'static {}

/// Stop waiting on a future when a token fires.
///
/// The wrapped future is dropped on cancellation; work it already handed to
/// an apartment keeps its own bracket.
pub trait CancellationExt<T>: Future<Output = Result<T>> + Send + Sized + 'static {
    /// Resolve with `Fault::Canceled` as soon as `token` is canceled
    fn with_cancellation(self, token: CancellationToken) -> BoxFuture<'static, Result<T>> {
        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Fault::Canceled),
                outcome = self => outcome,
            }
        }
        .boxed()
    }
}

impl<F, T> CancellationExt<T> for F
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
}

fn fire_and_forget<F, H>(future: F, handler: H)
where
    F: Future<Output = Result<()>> + Send + 'static,
    H: FnOnce(&Fault) -> bool + Send + 'static,
{
    let filtered = async move {
        match future.await {
            Err(fault) if handler(&fault) => {
                debug!(%fault, "fault handled");
                Ok(())
            }
            other => other,
        }
    };

    if let Some(apartment) = current::current() {
        apartment.spawn(filtered);
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if let Err(fault) = filtered.await {
                    error!(%fault, "unobserved fault outside of any apartment");
                }
            });
        }
        Err(_) => error!("no apartment or runtime to observe a fire-and-forget operation"),
    }
}
