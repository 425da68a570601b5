//! Apartment fault types

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for apartment operations
pub type Result<T> = std::result::Result<T, Fault>;

/// Shared, type-erased error raised by a unit of work
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of an apartment's whole lifetime
pub type Outcome = std::result::Result<(), AggregateFault>;

/// A fault raised by, or on behalf of, a unit of apartment work.
///
/// Faults are cheap to clone: payloads are reference counted, so the value
/// returned to a `run` caller and the one recorded in the apartment fault list
/// are the same object.
#[derive(Error, Debug, Clone)]
pub enum Fault {
    /// Error returned by scheduled work
    #[error("operation faulted: {0}")]
    Operation(SharedError),

    /// Work observed its cancellation token
    #[error("operation canceled")]
    Canceled,

    /// Several faults collected before a completion was resolved
    #[error(transparent)]
    Aggregate(AggregateFault),

    /// The host wait primitive failed
    #[error("host wait failed: {0}")]
    HostWait(#[from] HostWaitFault),

    /// The caller broke the usage protocol of a primitive
    #[error("protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// Work panicked
    #[error("work panicked: {0}")]
    Panicked(Arc<str>),

    /// The apartment no longer accepts callbacks
    #[error("apartment no longer accepts work")]
    Closed,

    /// A sequence ended where another item was required
    #[error("sequence exhausted")]
    Exhausted,

    /// The worker thread could not be started
    #[error("failed to start apartment thread: {0}")]
    ThreadSpawn(Arc<std::io::Error>),
}

/// Failures reported by the native multi-object wait
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostWaitFault {
    /// A mutex was abandoned by a terminated owner
    #[error("mutex at index {0} was abandoned")]
    AbandonedMutex(usize),

    /// The wait call itself failed
    #[error("native wait failed with code {0}")]
    Failed(i32),

    /// The wait reported an index outside the handle set
    #[error("native wait reported index {index} for {count} handle(s)")]
    OutOfRange { index: usize, count: usize },
}

/// An ordered collection of faults.
#[derive(Debug, Clone)]
pub struct AggregateFault {
    faults: Arc<[Fault]>,
}

impl AggregateFault {
    /// Aggregate faults in the given order
    pub fn new(faults: impl IntoIterator<Item = Fault>) -> Self {
        Self {
            faults: faults.into_iter().collect(),
        }
    }

    /// Aggregate faults, dropping entries that are the same object as an
    /// earlier one
    pub fn deduplicated(faults: impl IntoIterator<Item = Fault>) -> Self {
        let mut unique: Vec<Fault> = Vec::new();
        for fault in faults {
            if !unique.iter().any(|seen| seen.is_same(&fault)) {
                unique.push(fault);
            }
        }
        Self::new(unique)
    }

    /// The directly contained faults
    pub fn faults(&self) -> &[Fault] {
        &self.faults
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fault> {
        self.faults.iter()
    }

    pub(crate) fn ptr_eq(&self, other: &AggregateFault) -> bool {
        Arc::ptr_eq(&self.faults, &other.faults)
    }
}

impl fmt::Display for AggregateFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault(s) occurred", self.faults.len())?;
        for (i, fault) in self.faults.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{fault}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFault {}

impl<'a> IntoIterator for &'a AggregateFault {
    type Item = &'a Fault;
    type IntoIter = std::slice::Iter<'a, Fault>;

    fn into_iter(self) -> Self::IntoIter {
        self.faults.iter()
    }
}

impl From<AggregateFault> for Fault {
    fn from(aggregate: AggregateFault) -> Self {
        Fault::Aggregate(aggregate)
    }
}
