//! GUI-loop apartment
//!
//! Runs a host message loop on its own thread. Posting hands the callback
//! to the loop; the loop reports faults of callbacks it runs through its
//! unhandled-fault hook. The apartment cannot see into the loop's queue, so
//! it does not know whether background work is outstanding, and concluding
//! shutdown simply asks the loop to exit.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::core::{ApartmentCore, Callback, Scheduler};
use super::current;
use super::thread::{ApartmentThread, StateCell, ThreadState};
use super::Apartment;
use crate::config::ApartmentConfig;
use crate::types::{ApartmentKind, Fault, Outcome, Result};

/// Host message loop
pub trait MessageLoop: Send + Sync + 'static {
    /// Queue a callback for the loop thread
    fn post(&self, callback: Callback) -> Result<()>;

    /// Ask the loop to return from [`run`](MessageLoop::run) once the
    /// already queued callbacks have run
    fn request_exit(&self);

    /// Run the loop on the calling thread until exit is requested
    fn run(&self, on_unhandled: &dyn Fn(Fault));
}

/// Portable message loop over an unbounded channel
pub struct ChannelMessageLoop {
    sender: Mutex<Option<mpsc::UnboundedSender<Callback>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Callback>>>,
}

impl ChannelMessageLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
        }
    }
}

impl Default for ChannelMessageLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLoop for ChannelMessageLoop {
    fn post(&self, callback: Callback) -> Result<()> {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => tx.send(callback).map_err(|_| Fault::Closed),
            None => Err(Fault::Closed),
        }
    }

    fn request_exit(&self) {
        self.sender.lock().take();
    }

    fn run(&self, on_unhandled: &dyn Fn(Fault)) {
        let Some(mut rx) = self.receiver.lock().take() else {
            return;
        };
        while let Some(callback) = rx.blocking_recv() {
            match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => {}
                Ok(Err(fault)) => on_unhandled(fault),
                Err(payload) => on_unhandled(Fault::panicked(payload)),
            }
        }
    }
}

struct LoopScheduler {
    message_loop: Arc<dyn MessageLoop>,
    state: Arc<StateCell>,
}

impl Scheduler for LoopScheduler {
    fn schedule(&self, _core: &Arc<ApartmentCore>, callback: Callback) -> Result<()> {
        self.message_loop.post(callback)
    }

    fn conclude(&self, _core: &ApartmentCore) {
        self.state.drain();
        self.message_loop.request_exit();
    }

    fn tracks_operations(&self) -> bool {
        false
    }
}

/// Apartment running a host message loop on its own thread
pub struct GuiLoopApartment {
    core: Arc<ApartmentCore>,
    thread: Arc<ApartmentThread>,
    message_loop: Arc<dyn MessageLoop>,
}

impl GuiLoopApartment {
    /// Create with the portable channel loop
    pub fn new() -> Result<Self> {
        Self::with_loop(Arc::new(ChannelMessageLoop::new()), ApartmentConfig::new("gui-loop"))
    }

    /// Create over a host-supplied loop
    pub fn with_loop(message_loop: Arc<dyn MessageLoop>, config: ApartmentConfig) -> Result<Self> {
        let state = StateCell::new();
        let core = ApartmentCore::new(
            ApartmentKind::GuiLoop,
            Box::new(LoopScheduler {
                message_loop: Arc::clone(&message_loop),
                state: Arc::clone(&state),
            }),
        );

        let thread_core = Arc::clone(&core);
        let thread_loop = Arc::clone(&message_loop);
        let thread = ApartmentThread::spawn(&config.thread_name, config.runtime, state, move || {
            let _current = current::enter(&thread_core);
            {
                let _scope = thread_core.create_scope();
                thread_loop.run(&|fault: Fault| thread_core.add_fault(fault));
            }
            debug!(apartment = %thread_core.id(), "message loop exited");
            thread_core.try_resolve_completion();
        });

        match thread {
            Ok(thread) => Ok(Self {
                core,
                thread: Arc::new(thread),
                message_loop,
            }),
            Err(fault) => {
                core.complete();
                core.try_resolve_completion();
                Err(fault)
            }
        }
    }

    pub fn state(&self) -> ThreadState {
        self.thread.state()
    }

    pub fn message_loop(&self) -> &Arc<dyn MessageLoop> {
        &self.message_loop
    }
}

impl Apartment for GuiLoopApartment {
    fn core(&self) -> &Arc<ApartmentCore> {
        &self.core
    }

    /// Resolves after the loop thread has exited
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

impl Drop for GuiLoopApartment {
    fn drop(&mut self) {
        // Concluding asked the loop to exit; it runs what is queued, resolves
        // completion and returns
        self.core.complete();
        self.thread.join();
    }
}
