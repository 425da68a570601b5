//! Core apartment types
//!
//! - Faults: `Fault`, `AggregateFault`, `HostWaitFault`
//! - Identifiers: `ApartmentId`, `ApartmentKind`, `SubscriptionToken`

mod error;
mod identifiers;

pub use error::*;
pub use identifiers::*;
