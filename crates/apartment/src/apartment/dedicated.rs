//! Dedicated-thread apartment
//!
//! One named OS thread services a FIFO mailbox. Callbacks run strictly in
//! posting order and never concurrently. Concluding shutdown closes the
//! mailbox; the thread drains what is already queued, resolves completion
//! and exits.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::core::{ApartmentCore, Callback, Scheduler};
use super::current;
use super::thread::{ApartmentThread, StateCell, ThreadState};
use super::wait::{PumpWaiter, WaitHandle, WaitOutcome};
use super::Apartment;
use crate::config::ApartmentConfig;
use crate::types::{ApartmentKind, Fault, Outcome, Result};

/// Mailbox scheduler: posting enqueues, concluding closes the queue
struct Mailbox {
    sender: Mutex<Option<mpsc::UnboundedSender<Callback>>>,
    state: Arc<StateCell>,
}

impl Scheduler for Mailbox {
    fn schedule(&self, _core: &Arc<ApartmentCore>, callback: Callback) -> Result<()> {
        // Send outside the lock: a rejected callback is dropped with the error
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => tx.send(callback).map_err(|_| Fault::Closed),
            None => Err(Fault::Closed),
        }
    }

    fn conclude(&self, _core: &ApartmentCore) {
        self.state.drain();
        self.sender.lock().take();
    }
}

/// Apartment backed by one dedicated thread
pub struct DedicatedThreadApartment {
    core: Arc<ApartmentCore>,
    thread: Arc<ApartmentThread>,
    waiter: Option<PumpWaiter>,
}

impl DedicatedThreadApartment {
    /// Create with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(ApartmentConfig::default())
    }

    /// Create and start the apartment thread
    pub fn with_config(config: ApartmentConfig) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();
        let state = StateCell::new();
        let core = ApartmentCore::new(
            ApartmentKind::Dedicated,
            Box::new(Mailbox {
                sender: Mutex::new(Some(tx)),
                state: Arc::clone(&state),
            }),
        );

        let thread_core = Arc::clone(&core);
        let thread = ApartmentThread::spawn(&config.thread_name, config.runtime.clone(), state, move || {
            let _current = current::enter(&thread_core);
            while let Some(callback) = rx.blocking_recv() {
                if let Err(fault) = callback() {
                    thread_core.add_fault(fault);
                }
            }
            debug!(apartment = %thread_core.id(), "mailbox drained");
            thread_core.try_resolve_completion();
        });

        let thread = match thread {
            Ok(thread) => Arc::new(thread),
            Err(fault) => {
                // Nothing will ever service the mailbox
                core.complete();
                core.try_resolve_completion();
                return Err(fault);
            }
        };

        let waiter = config.host.map(|host| {
            PumpWaiter::new(host, config.pump_messages, config.poll_interval, thread.id())
        });

        Ok(Self {
            core,
            thread,
            waiter,
        })
    }

    /// Lifecycle of the apartment thread
    pub fn state(&self) -> ThreadState {
        self.thread.state()
    }

    /// Pump-aware wait on native handles; callable only from a callback
    /// running on this apartment
    pub fn wait(
        &self,
        handles: &[WaitHandle],
        wait_all: bool,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let waiter = self.waiter.as_ref().ok_or_else(|| {
            Fault::ProtocolMisuse("no host wait primitives configured".to_string())
        })?;
        waiter.wait(handles, wait_all, timeout, token)
    }

    /// Convenience wrapper around [`wait`](Self::wait) for a single handle
    pub fn wait_one(
        &self,
        handle: WaitHandle,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<bool> {
        self.wait(&[handle], false, timeout, token)
            .map(|outcome| outcome == WaitOutcome::Signaled(0))
    }
}

impl Apartment for DedicatedThreadApartment {
    fn core(&self) -> &Arc<ApartmentCore> {
        &self.core
    }

    /// Resolves after the thread has exited
    fn completion(&self) -> BoxFuture<'static, Outcome> {
        let completion = self.core.completion();
        let thread = Arc::clone(&self.thread);
        async move {
            let outcome = completion.await;
            thread.join_async().await;
            outcome
        }
        .boxed()
    }
}

impl Drop for DedicatedThreadApartment {
    fn drop(&mut self) {
        self.core.complete();
        if self.core.any_background_operation() == Some(true) {
            debug!(apartment = %self.core.id(), "work outstanding, detaching apartment thread");
            return;
        }
        // The mailbox is closed; the thread drains it and resolves completion
        self.thread.join();
    }
}
