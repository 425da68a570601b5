//! Operation scope
//!
//! Brackets a unit of work with `operation_started` / `operation_completed`.

use std::fmt;
use std::sync::Arc;

use super::core::ApartmentCore;

/// Scoped background operation.
///
/// Creating the scope counts one outstanding operation; dropping it, on any
/// path including unwinding, completes it.
#[must_use = "the operation completes as soon as the scope is dropped"]
pub struct OperationScope {
    core: Arc<ApartmentCore>,
}

impl OperationScope {
    pub(crate) fn new(core: Arc<ApartmentCore>) -> Self {
        core.operation_started();
        Self { core }
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        self.core.operation_completed();
    }
}

impl fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScope")
            .field("apartment", &self.core.id())
            .finish()
    }
}
