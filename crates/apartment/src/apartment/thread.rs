//! Apartment-owned OS threads
//!
//! Dedicated and GUI-loop apartments each own one thread. The thread is
//! joined once, after it has resolved the apartment's completion.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::types::{Fault, Result};

/// Lifecycle of an apartment thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    NotStarted = 0,
    /// Servicing callbacks
    Running = 1,
    /// Shutdown concluded, finishing queued work
    Draining = 2,
    Joined = 3,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThreadState::NotStarted,
            1 => ThreadState::Running,
            2 => ThreadState::Draining,
            _ => ThreadState::Joined,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::NotStarted => "not-started",
            ThreadState::Running => "running",
            ThreadState::Draining => "draining",
            ThreadState::Joined => "joined",
        };
        f.write_str(name)
    }
}

/// Observable state shared with the thread body
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU8::new(ThreadState::NotStarted as u8)))
    }

    pub(crate) fn get(&self) -> ThreadState {
        ThreadState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ThreadState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Shutdown concluded; a thread that has not started yet drains at once
    pub(crate) fn drain(&self) {
        let _ = self.advance(ThreadState::Running, ThreadState::Draining)
            || self.advance(ThreadState::NotStarted, ThreadState::Draining);
    }

    /// Move from `from` to `to`; false if the state was elsewhere
    pub(crate) fn advance(&self, from: ThreadState, to: ThreadState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Owned apartment thread
pub(crate) struct ApartmentThread {
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    state: Arc<StateCell>,
}

impl ApartmentThread {
    /// Spawn the named thread. `runtime` is entered for the whole body.
    pub(crate) fn spawn<F>(
        name: &str,
        runtime: Option<Handle>,
        state: Arc<StateCell>,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let body_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _runtime = runtime.as_ref().map(Handle::enter);
                body_state.advance(ThreadState::NotStarted, ThreadState::Running);
                body();
            })
            .map_err(|e: io::Error| Fault::ThreadSpawn(Arc::new(e)))?;

        let thread_id = handle.thread().id();
        debug!(thread = name, "apartment thread started");
        Ok(Self {
            handle: Mutex::new(Some(handle)),
            thread_id,
            state,
        })
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.thread_id
    }

    pub(crate) fn state(&self) -> ThreadState {
        self.state.get()
    }

    /// Join the thread if it was not joined yet. Joining from the thread
    /// itself is skipped.
    pub(crate) fn join(&self) {
        if thread::current().id() == self.thread_id {
            return;
        }
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("apartment thread panicked");
        }
        self.state.set(ThreadState::Joined);
    }

    /// Join without blocking an async worker when a runtime is available
    pub(crate) async fn join_async(self: Arc<Self>) {
        let joined = self.handle.lock().is_none();
        if joined || thread::current().id() == self.thread_id {
            return;
        }
        match Handle::try_current() {
            Ok(runtime) => {
                let thread = Arc::clone(&self);
                if runtime.spawn_blocking(move || thread.join()).await.is_err() {
                    warn!("apartment thread join task failed");
                }
            }
            Err(_) => self.join(),
        }
    }
}

impl fmt::Debug for ApartmentThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApartmentThread")
            .field("thread_id", &self.thread_id)
            .field("state", &self.state())
            .finish()
    }
}
