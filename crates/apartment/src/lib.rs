//! Apartment concurrency runtime
//!
//! This crate provides thread-affine execution contexts ("apartments") that
//! track outstanding asynchronous work, aggregate the faults of
//! fire-and-forget operations and resolve one completion signal, plus a
//! handoff primitive that runs two generator-style routines in lock-step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Coroutine Handoff (handoff)                │
//! │   run / run_in ──► forwarding channel ──► as_sequence       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Dedicated thread     │  Pooled           │  GUI loop       │
//! │  - FIFO mailbox       │  - blocking pool  │  - MessageLoop  │
//! │  - pump-aware wait    │  - current scope  │  - untracked    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ApartmentCore: operation count, faults, completion, events │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! - **Operation scope**: brackets one unit of work; shutdown concludes when
//!   the last scope closes
//! - **Completion**: resolves once, with the aggregate of recorded faults
//! - **Current apartment**: the apartment active on the calling thread;
//!   continuations of work started inside an apartment return to it
//!
//! # Example
//!
//! ```no_run
//! use apartment::{Apartment, PooledApartment};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> apartment::Result<()> {
//!     let pool = PooledApartment::new()?;
//!     let answer = pool.run(|| Ok(42), CancellationToken::new()).await?;
//!     assert_eq!(answer, 42);
//!
//!     pool.complete();
//!     pool.completion().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Identifiers and fault types
//! - [`fault`]: Fault aggregation and fire-and-forget observation
//! - [`config`]: Apartment configuration
//! - [`apartment`]: The apartment kinds and their shared core
//! - [`handoff`]: Coroutine handoff

pub mod apartment;
pub mod config;
pub mod fault;
pub mod handoff;
pub mod types;

pub use apartment::{
    current, enter, Apartment, ApartmentCore, ChannelMessageLoop, CurrentGuard,
    DedicatedThreadApartment, GuiLoopApartment, MessageLoop, OperationHandle, OperationScope,
    PooledApartment, ThreadState,
};
pub use apartment::wait::{HostWait, NativeWaitResult, WaitHandle, WaitOutcome};
pub use config::ApartmentConfig;
pub use fault::{CancellationExt, ObserveExt};
pub use handoff::{CoroutineHandoff, Routine, Sequence, Yielder};
pub use types::{
    AggregateFault, ApartmentId, ApartmentKind, Fault, HostWaitFault, Outcome, Result,
    SubscriptionToken,
};
