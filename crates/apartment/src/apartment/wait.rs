//! Pump-aware multi-object wait
//!
//! A thread that owns a message queue must keep dispatching host messages
//! while it blocks on native handles, or the host stalls. The wait here
//! alternates bounded native waits with the dispatch of one pending message,
//! recomputing the remaining timeout on every iteration.
//!
//! The native primitives are supplied through [`HostWait`].

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::types::{Fault, HostWaitFault, Result};

/// Upper bound of one native wait slice unless configured otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Opaque native waitable handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitHandle(pub usize);

/// Raw result of one native wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeWaitResult {
    /// Handle at this index was signaled (index 0 when all were awaited)
    Signaled(usize),
    /// Handle at this index is a mutex whose owner exited without releasing it
    Abandoned(usize),
    /// A host message arrived in the queue
    MessagePending,
    /// An alertable I/O completion ran
    IoCompletion,
    TimedOut,
    /// The primitive failed with a host error code
    Failed(i32),
}

/// Result of a successful [`PumpWaiter::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled(usize),
    TimedOut,
}

/// Native wait and message primitives of the host
pub trait HostWait: Send + Sync {
    /// Block on `handles` for at most `timeout`
    fn wait(&self, handles: &[WaitHandle], wait_all: bool, timeout: Duration) -> NativeWaitResult;

    /// Block on `handles` or on the arrival of a host message
    fn wait_with_messages(&self, handles: &[WaitHandle], timeout: Duration) -> NativeWaitResult;

    /// Dispatch one pending message; false if none was queued
    fn dispatch_message(&self) -> bool;
}

/// Wait primitive bound to the thread that owns the message queue
pub struct PumpWaiter {
    host: Arc<dyn HostWait>,
    pump_messages: bool,
    poll_interval: Duration,
    owner: ThreadId,
}

impl PumpWaiter {
    pub fn new(
        host: Arc<dyn HostWait>,
        pump_messages: bool,
        poll_interval: Duration,
        owner: ThreadId,
    ) -> Self {
        Self {
            host,
            pump_messages,
            // A zero slice would spin
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            owner,
        }
    }

    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Wait until one of `handles` is signaled (or all of them, with
    /// `wait_all` outside pump mode), the timeout elapses or `token` is
    /// canceled. `None` waits forever.
    pub fn wait(
        &self,
        handles: &[WaitHandle],
        wait_all: bool,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<WaitOutcome> {
        if thread::current().id() != self.owner {
            return Err(Fault::ProtocolMisuse(
                "wait called outside the owning apartment thread".to_string(),
            ));
        }
        if handles.is_empty() {
            return Err(Fault::ProtocolMisuse("wait requires at least one handle".to_string()));
        }
        if self.pump_messages && wait_all && handles.len() > 1 {
            return Err(Fault::ProtocolMisuse(
                "wait_all over several handles is not supported while pumping messages".to_string(),
            ));
        }

        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        if !self.pump_messages {
            return self.wait_plain(handles, wait_all, deadline, token);
        }

        // Probe: already signaled handles return without touching the queue
        match self.host.wait(handles, false, Duration::ZERO) {
            NativeWaitResult::TimedOut
            | NativeWaitResult::MessagePending
            | NativeWaitResult::IoCompletion => {}
            other => return self.settle(other, handles.len()),
        }

        loop {
            let Some(slice) = self.next_slice(deadline, token)? else {
                return Ok(WaitOutcome::TimedOut);
            };

            match self.host.wait_with_messages(handles, slice) {
                NativeWaitResult::MessagePending => {
                    let dispatched = self.host.dispatch_message();
                    trace!(dispatched, "message pumped during wait");
                }
                NativeWaitResult::TimedOut | NativeWaitResult::IoCompletion => {}
                other => return self.settle(other, handles.len()),
            }
        }
    }

    fn wait_plain(
        &self,
        handles: &[WaitHandle],
        wait_all: bool,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> Result<WaitOutcome> {
        loop {
            let Some(slice) = self.next_slice(deadline, token)? else {
                return Ok(WaitOutcome::TimedOut);
            };

            match self.host.wait(handles, wait_all, slice) {
                NativeWaitResult::TimedOut
                | NativeWaitResult::IoCompletion
                | NativeWaitResult::MessagePending => {}
                other => return self.settle(other, handles.len()),
            }
        }
    }

    /// Length of the next wait slice, `None` once the deadline has passed
    fn next_slice(
        &self,
        deadline: Option<Instant>,
        token: &CancellationToken,
    ) -> Result<Option<Duration>> {
        if token.is_cancelled() {
            return Err(Fault::Canceled);
        }
        match deadline {
            None => Ok(Some(self.poll_interval)),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    Ok(None)
                } else {
                    Ok(Some(remaining.min(self.poll_interval)))
                }
            }
        }
    }

    fn settle(&self, result: NativeWaitResult, count: usize) -> Result<WaitOutcome> {
        match result {
            NativeWaitResult::Signaled(index) if index < count => Ok(WaitOutcome::Signaled(index)),
            NativeWaitResult::Signaled(index) => {
                Err(HostWaitFault::OutOfRange { index, count }.into())
            }
            NativeWaitResult::Abandoned(index) => Err(HostWaitFault::AbandonedMutex(index).into()),
            NativeWaitResult::Failed(code) => Err(HostWaitFault::Failed(code).into()),
            NativeWaitResult::TimedOut
            | NativeWaitResult::MessagePending
            | NativeWaitResult::IoCompletion => Ok(WaitOutcome::TimedOut),
        }
    }
}
