//! Pooled apartment
//!
//! Callbacks run on the tokio blocking pool. While one runs, the apartment is
//! installed as current on the worker, so continuations created inside it are
//! posted back here rather than to whatever pool thread happens to wake them.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::trace;

use super::core::{ApartmentCore, Callback, Scheduler};
use super::current;
use super::Apartment;
use crate::types::{ApartmentKind, Fault, Result};

struct BlockingPool {
    runtime: Handle,
}

impl Scheduler for BlockingPool {
    fn schedule(&self, core: &Arc<ApartmentCore>, callback: Callback) -> Result<()> {
        let core = Arc::clone(core);
        self.runtime.spawn_blocking(move || {
            let _current = current::enter(&core);
            if let Err(fault) = callback() {
                core.add_fault(fault);
            }
        });
        Ok(())
    }

    fn conclude(&self, core: &ApartmentCore) {
        trace!(apartment = %core.id(), "pooled apartment concluded");
        core.try_resolve_completion();
    }
}

/// Apartment whose callbacks run on the shared worker pool
pub struct PooledApartment {
    core: Arc<ApartmentCore>,
}

impl PooledApartment {
    /// Bind to the ambient tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            Fault::ProtocolMisuse("pooled apartment requires a tokio runtime".to_string())
        })?;
        Ok(Self::with_runtime(runtime))
    }

    /// Bind to an explicit runtime
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            core: ApartmentCore::new(ApartmentKind::Pooled, Box::new(BlockingPool { runtime })),
        }
    }
}

impl Apartment for PooledApartment {
    fn core(&self) -> &Arc<ApartmentCore> {
        &self.core
    }
}

impl Drop for PooledApartment {
    fn drop(&mut self) {
        self.core.complete();
    }
}
