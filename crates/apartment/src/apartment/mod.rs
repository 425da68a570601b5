//! Apartment threading model implementation
//!
//! An apartment is an execution context bound to one logical thread of
//! control. It tracks outstanding asynchronous work, collects faults raised
//! by fire-and-forget operations and exposes one aggregate completion.
//!
//! - Dedicated: one OS thread servicing a FIFO mailbox
//! - Pooled: callbacks on the shared worker pool, continuations funneled back
//! - GUI loop: a host message loop on its own thread

mod core;
pub mod current;
mod dedicated;
pub mod events;
mod gui;
mod pooled;
mod scope;
mod task;
mod thread;
pub mod wait;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use self::core::{ApartmentCore, Callback};
pub use current::{current, enter, CurrentGuard};
pub use dedicated::DedicatedThreadApartment;
pub use gui::{ChannelMessageLoop, GuiLoopApartment, MessageLoop};
pub use pooled::PooledApartment;
pub use scope::OperationScope;
pub use thread::ThreadState;

use crate::types::{AggregateFault, ApartmentId, ApartmentKind, Fault, Outcome, Result, SubscriptionToken};

/// Future resolving to the outcome of one `run` submission.
///
/// Resolves with `Fault::Canceled` as soon as the submission's token fires,
/// even while the callback is still queued behind other work. The queued
/// callback then skips the work when the apartment reaches it.
#[must_use = "dropping the handle does not cancel the work; use the token"]
pub struct OperationHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
    canceled: BoxFuture<'static, ()>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>, token: CancellationToken) -> Self {
        Self {
            rx,
            canceled: async move { token.cancelled().await }.boxed(),
        }
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the callback never ran
        if let Poll::Ready(received) = Pin::new(&mut self.rx).poll(cx) {
            return Poll::Ready(received.unwrap_or(Err(Fault::Closed)));
        }
        self.canceled.as_mut().poll(cx).map(|()| Err(Fault::Canceled))
    }
}

/// Trait for apartment implementations
pub trait Apartment: Send + Sync {
    /// Shared base state
    fn core(&self) -> &Arc<ApartmentCore>;

    /// Get the apartment ID
    fn id(&self) -> ApartmentId {
        self.core().id()
    }

    /// Get the apartment kind
    fn kind(&self) -> ApartmentKind {
        self.core().kind()
    }

    /// `Some(true)` while bracketed work is outstanding, `None` if the
    /// apartment cannot know
    fn any_background_operation(&self) -> Option<bool> {
        self.core().any_background_operation()
    }

    /// Request shutdown once outstanding work drains
    fn complete(&self) {
        self.core().complete()
    }

    /// Resolves exactly once with success or the aggregate of recorded faults
    fn completion(&self) -> BoxFuture<'static, Outcome> {
        self.core().completion().boxed()
    }

    fn is_shutdown_commenced(&self) -> bool {
        self.core().is_shutdown_commenced()
    }

    fn faults(&self) -> Vec<Fault> {
        self.core().faults()
    }

    fn clear_faults(&self) {
        self.core().clear_faults()
    }

    fn create_scope(&self) -> OperationScope {
        self.core().create_scope()
    }

    fn on_fault<H>(&self, handler: H) -> SubscriptionToken
    where
        Self: Sized,
        H: Fn(&Fault) + Send + Sync + 'static,
    {
        self.core().on_fault(handler)
    }

    fn on_background_operations_completed<H>(&self, handler: H) -> SubscriptionToken
    where
        Self: Sized,
        H: Fn() + Send + Sync + 'static,
    {
        self.core().on_background_operations_completed(handler)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.core().unsubscribe(token)
    }

    /// Run synchronous work; `T = ()` covers work without a result
    fn run<F, T>(&self, work: F, token: CancellationToken) -> OperationHandle<T>
    where
        Self: Sized,
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.core().run(work, token)
    }

    /// Run asynchronous work; `T = ()` covers work without a result
    fn run_async<F, Fut, T>(&self, work: F, token: CancellationToken) -> OperationHandle<T>
    where
        Self: Sized,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.core().run_async(work, token)
    }

    /// Start a fire-and-forget operation
    fn spawn<Fut>(&self, future: Fut)
    where
        Self: Sized,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.core().spawn(future)
    }

    /// Scoped teardown: complete, wait, and re-raise any recorded faults
    fn dispose(&self) -> BoxFuture<'_, std::result::Result<(), AggregateFault>> {
        async move {
            if self.core().is_completed() {
                return Ok(());
            }
            self.complete();
            // Observing the outcome is the caller's business; the recorded
            // faults are re-raised below
            let _ = self.completion().await;

            let faults = self.faults();
            if faults.is_empty() {
                Ok(())
            } else {
                Err(AggregateFault::deduplicated(faults))
            }
        }
        .boxed()
    }
}
