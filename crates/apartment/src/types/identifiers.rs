//! Apartment identifiers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_APARTMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an apartment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApartmentId(pub u64);

impl ApartmentId {
    /// Generate a new process-unique apartment ID
    pub fn generate() -> Self {
        Self(NEXT_APARTMENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ApartmentId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ApartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "apartment-{}", self.0)
    }
}

/// Apartment type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApartmentKind {
    /// One dedicated thread servicing a FIFO mailbox
    Dedicated,
    /// Callbacks dispatched to a shared worker pool
    Pooled,
    /// A host message loop on a dedicated thread
    GuiLoop,
}

impl fmt::Display for ApartmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApartmentKind::Dedicated => "dedicated",
            ApartmentKind::Pooled => "pooled",
            ApartmentKind::GuiLoop => "gui-loop",
        };
        f.write_str(name)
    }
}

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Token identifying one event subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}
