//! Apartment base contract
//!
//! `ApartmentCore` holds the state every apartment kind shares:
//! - the outstanding operation counter and the recorded faults, guarded by
//!   one lock held only for check-and-mutate
//! - the idempotent shutdown flag and the once-only conclusion hook
//! - the single-resolution completion signal
//!
//! The concrete execution mechanism is supplied by a [`Scheduler`].

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::events::{ApartmentEvents, DrainedHandler, FaultHandler};
use super::scope::OperationScope;
use super::task::Task;
use super::OperationHandle;
use crate::types::{
    AggregateFault, ApartmentId, ApartmentKind, Fault, Outcome, Result, SubscriptionToken,
};

/// A callback queued for execution inside an apartment
pub type Callback = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Execution mechanism of a concrete apartment kind
pub(crate) trait Scheduler: Send + Sync + 'static {
    /// Queue a callback; the bracket around it is handled by the core
    fn schedule(&self, core: &Arc<ApartmentCore>, callback: Callback) -> Result<()>;

    /// Conclude a commenced shutdown (runs at most once)
    fn conclude(&self, core: &ApartmentCore);

    /// False if the mechanism cannot report exact in-flight counts
    fn tracks_operations(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct CoreState {
    operation_count: u64,
    faults: Vec<Fault>,
    shutdown_commenced: bool,
    concluded: bool,
}

/// Shared state and behavior of every apartment
pub struct ApartmentCore {
    id: ApartmentId,
    kind: ApartmentKind,
    state: Mutex<CoreState>,
    completion: watch::Sender<Option<Outcome>>,
    scheduler: Box<dyn Scheduler>,
    events: ApartmentEvents,
}

impl ApartmentCore {
    pub(crate) fn new(kind: ApartmentKind, scheduler: Box<dyn Scheduler>) -> Arc<Self> {
        let (completion, _) = watch::channel(None);
        let core = Arc::new(Self {
            id: ApartmentId::generate(),
            kind,
            state: Mutex::new(CoreState::default()),
            completion,
            scheduler,
            events: ApartmentEvents::default(),
        });
        debug!(apartment = %core.id, kind = %kind, "apartment created");
        core
    }

    pub fn id(&self) -> ApartmentId {
        self.id
    }

    pub fn kind(&self) -> ApartmentKind {
        self.kind
    }

    fn background(&self, state: &CoreState) -> Option<bool> {
        self.scheduler
            .tracks_operations()
            .then_some(state.operation_count > 0)
    }

    /// Whether any bracketed operation is outstanding; `None` if unknowable
    pub fn any_background_operation(&self) -> Option<bool> {
        self.background(&self.state.lock())
    }

    pub fn operation_started(&self) {
        let mut state = self.state.lock();
        state.operation_count += 1;
    }

    pub fn operation_completed(&self) {
        let (drained, conclude) = {
            let mut state = self.state.lock();
            debug_assert!(state.operation_count > 0, "unbalanced operation_completed");
            state.operation_count = state.operation_count.saturating_sub(1);

            let drained = self.background(&state) == Some(false);
            let conclude = drained && state.shutdown_commenced && !state.concluded;
            if conclude {
                state.concluded = true;
            }
            (drained, conclude)
        };

        if conclude {
            debug!(apartment = %self.id, "last operation completed, concluding");
            self.scheduler.conclude(self);
        }
        if drained {
            self.events.raise_drained();
        }
    }

    /// Record a fault; it does not by itself resolve completion
    pub fn add_fault(&self, fault: Fault) {
        debug!(apartment = %self.id, %fault, "fault recorded");
        self.state.lock().faults.push(fault.clone());
        self.events.raise_fault(&fault);
    }

    /// Snapshot of all recorded faults
    pub fn faults(&self) -> Vec<Fault> {
        self.state.lock().faults.clone()
    }

    /// Forget recorded faults so that disposal does not re-raise them
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Resolve completion from the recorded faults. Returns whether this call
    /// won the resolution.
    pub fn try_resolve_completion(&self) -> bool {
        // Waking completion waiters may re-enter `post`, so the lock is
        // released before the send. Resolution only follows the conclusion,
        // when no bracketed operation is left to add a fault between the
        // snapshot and the send; a fault recorded later is visible through
        // `faults()` but never changes a resolved outcome.
        let faults = self.faults();
        let count = faults.len();
        let won = self.completion.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(if faults.is_empty() {
                Ok(())
            } else {
                Err(AggregateFault::new(faults))
            });
            true
        });
        if won {
            debug!(apartment = %self.id, faults = count, "completion resolved");
        }
        won
    }

    pub fn is_completed(&self) -> bool {
        self.completion.borrow().is_some()
    }

    pub fn is_shutdown_commenced(&self) -> bool {
        self.state.lock().shutdown_commenced
    }

    /// Commence shutdown. Concludes immediately unless a background operation
    /// is known to be outstanding, otherwise the last one to finish concludes.
    pub fn complete(&self) {
        let conclude = {
            let mut state = self.state.lock();
            if state.shutdown_commenced {
                return;
            }
            state.shutdown_commenced = true;
            let conclude = self.background(&state) != Some(true) && !state.concluded;
            if conclude {
                state.concluded = true;
            }
            conclude
        };

        debug!(apartment = %self.id, immediate = conclude, "shutdown commenced");
        if conclude {
            self.scheduler.conclude(self);
        }
    }

    /// Resolves once with the apartment's lifetime outcome
    pub fn completion(&self) -> impl Future<Output = Outcome> + Send + 'static {
        let mut receiver = self.completion.subscribe();
        async move {
            match receiver.wait_for(Option::is_some).await {
                Ok(slot) => (*slot).clone().unwrap_or(Ok(())),
                Err(_) => Err(AggregateFault::new([Fault::Closed])),
            }
        }
    }

    pub fn create_scope(self: &Arc<Self>) -> OperationScope {
        OperationScope::new(Arc::clone(self))
    }

    /// Queue a raw callback. Tracking schedulers bracket it and capture its
    /// fault; others leave fault capture to the host.
    pub(crate) fn post(self: &Arc<Self>, callback: Callback) -> Result<()> {
        if !self.scheduler.tracks_operations() {
            return self.scheduler.schedule(self, callback);
        }

        let scope = self.create_scope();
        let core = Arc::clone(self);
        self.scheduler.schedule(
            self,
            Box::new(move || {
                let _scope = scope;
                match panic::catch_unwind(AssertUnwindSafe(callback)) {
                    Ok(Ok(())) => {}
                    Ok(Err(fault)) => core.add_fault(fault),
                    Err(payload) => core.add_fault(Fault::panicked(payload)),
                }
                Ok(())
            }),
        )
    }

    /// Run synchronous work inside the apartment
    pub fn run<F, T>(self: &Arc<Self>, work: F, token: CancellationToken) -> OperationHandle<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = OperationHandle::new(rx, token.clone());
        let scope = self.create_scope();
        let posted = self.post(Box::new(move || {
            let _scope = scope;
            let outcome = if token.is_cancelled() {
                Err(Fault::Canceled)
            } else {
                panic::catch_unwind(AssertUnwindSafe(work))
                    .unwrap_or_else(|payload| Err(Fault::panicked(payload)))
            };
            deliver(tx, outcome)
        }));
        if let Err(fault) = posted {
            trace!(apartment = %self.id, %fault, "run rejected");
        }
        handle
    }

    /// Run asynchronous work inside the apartment; every continuation of the
    /// work's future is scheduled back onto this apartment
    pub fn run_async<F, Fut, T>(
        self: &Arc<Self>,
        work: F,
        token: CancellationToken,
    ) -> OperationHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = OperationHandle::new(rx, token.clone());
        let scope = self.create_scope();
        Task::spawn(Arc::clone(self), async move {
            let _scope = scope;
            let outcome = cancellable(token, async move { work().await }).await;
            deliver(tx, outcome)
        });
        handle
    }

    /// Fire-and-forget: the future is bracketed for its whole lifetime and
    /// its fault lands in the apartment fault list
    pub fn spawn<Fut>(self: &Arc<Self>, future: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let scope = self.create_scope();
        Task::spawn(Arc::clone(self), async move {
            let _scope = scope;
            future.await
        });
    }

    pub fn on_fault<H>(&self, handler: H) -> SubscriptionToken
    where
        H: Fn(&Fault) + Send + Sync + 'static,
    {
        let handler: Arc<FaultHandler> = Arc::new(handler);
        self.events.fault.subscribe(handler)
    }

    pub fn on_background_operations_completed<H>(&self, handler: H) -> SubscriptionToken
    where
        H: Fn() + Send + Sync + 'static,
    {
        let handler: Arc<DrainedHandler> = Arc::new(handler);
        self.events.drained.subscribe(handler)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.events.unsubscribe(token)
    }
}

/// Hand the outcome to the caller and surface a fault to the apartment too
fn deliver<T>(tx: oneshot::Sender<Result<T>>, outcome: Result<T>) -> Result<()> {
    let recorded = outcome.as_ref().err().cloned();
    let _ = tx.send(outcome);
    match recorded {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

/// Drive `work` unless `token` is canceled first; panics become faults
async fn cancellable<T, F>(token: CancellationToken, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(Fault::Canceled);
    }
    let guarded = AssertUnwindSafe(work).catch_unwind();
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Fault::Canceled),
        outcome = guarded => outcome.unwrap_or_else(|payload| Err(Fault::panicked(payload))),
    }
}
