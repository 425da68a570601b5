//! Apartment event subscriptions
//!
//! Subscribers are kept in a copy-on-write list keyed by
//! [`SubscriptionToken`]. Dispatch iterates the snapshot taken when the event
//! fires, so handlers may subscribe or unsubscribe while being invoked.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{Fault, SubscriptionToken};

/// Handler invoked for every recorded fault
pub type FaultHandler = dyn Fn(&Fault) + Send + Sync;

/// Handler invoked when the outstanding operation count drains to zero
pub type DrainedHandler = dyn Fn() + Send + Sync;

type Snapshot<H> = Arc<Vec<(SubscriptionToken, Arc<H>)>>;

/// Subscriber list for one event
pub struct Subscribers<H: ?Sized> {
    list: Mutex<Snapshot<H>>,
}

impl<H: ?Sized> Subscribers<H> {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(Arc::new(Vec::new())),
        }
    }

    /// Add a handler
    pub fn subscribe(&self, handler: Arc<H>) -> SubscriptionToken {
        let token = SubscriptionToken::next();
        let mut list = self.list.lock();
        let mut updated = Vec::with_capacity(list.len() + 1);
        updated.extend(list.iter().cloned());
        updated.push((token, handler));
        *list = Arc::new(updated);
        token
    }

    /// Remove a handler, returning whether it was subscribed
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut list = self.list.lock();
        if !list.iter().any(|(t, _)| *t == token) {
            return false;
        }
        let updated = list.iter().filter(|(t, _)| *t != token).cloned().collect();
        *list = Arc::new(updated);
        true
    }

    /// Handlers subscribed at this instant
    pub fn snapshot(&self) -> Snapshot<H> {
        Arc::clone(&self.list.lock())
    }

    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: ?Sized> Default for Subscribers<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Events raised by an apartment
#[derive(Default)]
pub struct ApartmentEvents {
    /// A fault was recorded
    pub fault: Subscribers<FaultHandler>,
    /// The outstanding operation count drained to zero
    pub drained: Subscribers<DrainedHandler>,
}

impl ApartmentEvents {
    pub(crate) fn raise_fault(&self, fault: &Fault) {
        for (_, handler) in self.fault.snapshot().iter() {
            handler(fault);
        }
    }

    pub(crate) fn raise_drained(&self) {
        for (_, handler) in self.drained.snapshot().iter() {
            handler();
        }
    }

    /// Remove a subscription from whichever event holds it
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.fault.unsubscribe(token) || self.drained.unsubscribe(token)
    }
}
