//! Apartment-bound tasks
//!
//! A task owns one boxed future. Its waker posts a poll callback back into
//! the owning apartment, so every continuation of the future runs through
//! that apartment's scheduling mechanism.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use tracing::trace;

use super::core::ApartmentCore;
use crate::types::{Fault, Result};

pub(crate) struct Task {
    core: Arc<ApartmentCore>,
    future: Mutex<Option<BoxFuture<'static, Result<()>>>>,
    /// A poll callback is sitting in the apartment queue
    queued: AtomicBool,
}

impl Task {
    /// Schedule the first poll of `future` on `core`
    pub(crate) fn spawn<F>(core: Arc<ApartmentCore>, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = Arc::new(Task {
            core,
            future: Mutex::new(Some(Box::pin(future))),
            queued: AtomicBool::new(false),
        });
        task.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        if self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = Arc::clone(self);
        if let Err(fault) = self.core.post(Box::new(move || task.poll())) {
            // The callback (and with it the future) has been dropped
            trace!(apartment = %self.core.id(), %fault, "task not scheduled");
        }
    }

    fn poll(self: Arc<Self>) -> Result<()> {
        self.queued.store(false, Ordering::Release);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return Ok(());
        };

        let waker = waker_ref(&self);
        let mut cx = Context::from_waker(&waker);
        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => Ok(()),
            Ok(Poll::Ready(outcome)) => {
                *slot = None;
                outcome
            }
            Err(payload) => {
                *slot = None;
                Err(Fault::panicked(payload))
            }
        }
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}
