//! Apartment Tests - Dedicated, Pooled and GUI-loop apartments
//!
//! These tests verify the apartment contract end to end:
//! - Completion after shutdown with and without outstanding work
//! - Fault collection and ordering per apartment kind
//! - Background operation tracking
//! - The pump-aware wait protocol on a dedicated thread

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use apartment::{
    current, Apartment, ApartmentConfig, DedicatedThreadApartment, Fault, GuiLoopApartment,
    HostWait, NativeWaitResult, ObserveExt, PooledApartment, ThreadState, WaitHandle, WaitOutcome,
};
use common::*;
use tokio_util::sync::CancellationToken;

/// Host whose handles signal after a fixed number of waits
struct CountdownHost {
    remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl CountdownHost {
    fn new(waits: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(waits),
            calls: AtomicUsize::new(0),
        })
    }

    fn tick(&self, timeout: Duration) -> NativeWaitResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return NativeWaitResult::Signaled(0);
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        thread::sleep(timeout);
        NativeWaitResult::TimedOut
    }
}

impl HostWait for CountdownHost {
    fn wait(&self, _handles: &[WaitHandle], _wait_all: bool, timeout: Duration) -> NativeWaitResult {
        if timeout.is_zero() {
            return NativeWaitResult::TimedOut;
        }
        self.tick(timeout)
    }

    fn wait_with_messages(&self, _handles: &[WaitHandle], timeout: Duration) -> NativeWaitResult {
        self.tick(timeout)
    }

    fn dispatch_message(&self) -> bool {
        false
    }
}

async fn fail_after(millis: u64, error: TestError) -> apartment::Result<()> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Err(Fault::operation(error))
}

/// Test: Complete on an idle apartment resolves completion promptly
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_complete_when_idle_resolves() {
    init_logging();

    let bound = Duration::from_secs(2);

    let dedicated = DedicatedThreadApartment::new().unwrap();
    dedicated.complete();
    let outcome = tokio::time::timeout(bound, dedicated.completion()).await;
    assert!(matches!(outcome, Ok(Ok(()))));
    assert_eq!(dedicated.state(), ThreadState::Joined);

    let pooled = PooledApartment::new().unwrap();
    pooled.complete();
    let outcome = tokio::time::timeout(bound, pooled.completion()).await;
    assert!(matches!(outcome, Ok(Ok(()))));

    let gui = GuiLoopApartment::new().unwrap();
    gui.complete();
    let outcome = tokio::time::timeout(bound, gui.completion()).await;
    assert!(matches!(outcome, Ok(Ok(()))));

    println!("\n=== Idle Completion Test ===");
    println!("Dedicated, pooled and GUI-loop apartments resolved within {:?}", bound);
}

/// Test: Double complete is idempotent and completion resolves once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_complete_is_idempotent() {
    init_logging();

    let pooled = PooledApartment::new().unwrap();
    pooled.spawn(async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err(Fault::operation(TestError::InvalidState))
    });

    pooled.complete();
    pooled.complete();
    assert!(pooled.is_shutdown_commenced());

    let first = pooled.completion().await.unwrap_err();
    pooled.complete();
    let second = pooled.completion().await.unwrap_err();

    // Both awaiters observe the same aggregate
    assert_eq!(first.len(), 1);
    assert!(Fault::Aggregate(first).is_same(&Fault::Aggregate(second)));
}

/// Test: N faulting operations on a dedicated thread keep submission order
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dedicated_faults_in_submission_order() {
    init_logging();

    const NUM_OPERATIONS: usize = 16;

    let dedicated = DedicatedThreadApartment::new().unwrap();
    for i in 0..NUM_OPERATIONS {
        dedicated.spawn(async move { Err(Fault::operation(TestError::Item(i))) });
    }

    dedicated.complete();
    let aggregate = dedicated.completion().await.unwrap_err();

    let order: Vec<usize> = aggregate
        .iter()
        .filter_map(|fault| match fault.downcast_ref::<TestError>() {
            Some(TestError::Item(i)) => Some(*i),
            _ => None,
        })
        .collect();

    println!("\n=== Dedicated Fault Order Test ===");
    println!("Operations: {}", NUM_OPERATIONS);
    println!("Recorded faults: {}", dedicated.faults().len());

    assert_eq!(order, (0..NUM_OPERATIONS).collect::<Vec<_>>());
    assert_eq!(dedicated.faults().len(), NUM_OPERATIONS);
}

/// Test: N faulting operations on the pool are all collected
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pooled_faults_collected_as_set() {
    init_logging();

    const NUM_OPERATIONS: usize = 32;

    let pooled = PooledApartment::new().unwrap();
    for i in 0..NUM_OPERATIONS {
        pooled.spawn(async move {
            tokio::time::sleep(Duration::from_millis((i % 5) as u64 * 7)).await;
            Err(Fault::operation(TestError::Item(i)))
        });
    }

    pooled.complete();
    let aggregate = pooled.completion().await.unwrap_err();

    let seen: HashSet<usize> = aggregate
        .iter()
        .filter_map(|fault| match fault.downcast_ref::<TestError>() {
            Some(TestError::Item(i)) => Some(*i),
            _ => None,
        })
        .collect();

    assert_eq!(aggregate.len(), NUM_OPERATIONS);
    assert_eq!(seen, (0..NUM_OPERATIONS).collect::<HashSet<_>>());
}

/// Test: Background operation flag follows the operation count
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_background_operation_tracking() {
    init_logging();

    let pooled = PooledApartment::new().unwrap();
    assert_eq!(pooled.any_background_operation(), Some(false));

    let scope = pooled.create_scope();
    assert_eq!(pooled.any_background_operation(), Some(true));
    drop(scope);
    assert_eq!(pooled.any_background_operation(), Some(false));

    let dedicated = DedicatedThreadApartment::new().unwrap();
    let handle = dedicated.run_async(
        || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        },
        CancellationToken::new(),
    );
    assert_eq!(dedicated.any_background_operation(), Some(true));
    handle.await.unwrap();
    // The bracket closes right after the outcome is delivered
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dedicated.any_background_operation(), Some(false));

    let gui = GuiLoopApartment::new().unwrap();
    assert_eq!(gui.any_background_operation(), None);
}

/// Test: Two delayed faults observed from inside a pooled apartment
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pooled_delayed_fault_scenario() {
    init_logging();

    let pooled = PooledApartment::new().unwrap();
    let started = Instant::now();

    pooled
        .run(
            || {
                fail_after(400, TestError::InvalidState).observe();
                fail_after(600, TestError::NotImplemented).observe();
                Ok(())
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pooled.any_background_operation(), Some(true));

    pooled.complete();
    let aggregate = pooled.completion().await.unwrap_err();
    let elapsed = started.elapsed();

    println!("\n=== Pooled Delayed Fault Scenario ===");
    println!("Completion after: {:?}", elapsed);
    println!("Aggregate: {}", aggregate);

    assert!(elapsed >= Duration::from_millis(600));
    assert_eq!(aggregate.len(), 2);
    assert_eq!(
        aggregate.faults()[0].downcast_ref::<TestError>(),
        Some(&TestError::InvalidState)
    );
    assert_eq!(
        aggregate.faults()[1].downcast_ref::<TestError>(),
        Some(&TestError::NotImplemented)
    );

    pooled.clear_faults();
    assert!(pooled.faults().is_empty());
    assert_eq!(pooled.any_background_operation(), Some(false));
    assert!(pooled.dispose().await.is_ok());
}

/// Test: Cancellation-only faults can be filtered out
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignore_cancellations() {
    init_logging();

    let pooled = PooledApartment::new().unwrap();
    pooled
        .run(
            || {
                let canceled: apartment::Result<()> = Err(Fault::Canceled);
                async move { canceled }.ignore_cancellations();
                fail_after(0, TestError::InvalidState).ignore_cancellations();
                fail_after(0, TestError::NotImplemented).handle(|fault| {
                    fault.downcast_ref::<TestError>() == Some(&TestError::NotImplemented)
                });
                Ok(())
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    pooled.complete();
    let aggregate = pooled.completion().await.unwrap_err();
    assert_eq!(aggregate.len(), 1);
    assert_eq!(
        aggregate.faults()[0].downcast_ref::<TestError>(),
        Some(&TestError::InvalidState)
    );
}

/// Test: Dispose re-raises recorded faults once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispose_reraises() {
    init_logging();

    let dedicated = DedicatedThreadApartment::new().unwrap();
    dedicated.spawn(async { Err(Fault::operation(TestError::InvalidState)) });

    let aggregate = dedicated.dispose().await.unwrap_err();
    assert_eq!(aggregate.len(), 1);
    assert!(dedicated.dispose().await.is_ok());
}

/// Test: Wait-all over several handles while pumping never blocks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_all_is_protocol_misuse() {
    init_logging();

    let host = CountdownHost::new(usize::MAX);
    let config = ApartmentConfig::new("pump").with_host(host.clone());
    let dedicated = Arc::new(DedicatedThreadApartment::with_config(config).unwrap());

    let inner = dedicated.clone();
    let started = Instant::now();
    let result = dedicated
        .run(
            move || {
                inner.wait(
                    &[WaitHandle(1), WaitHandle(2)],
                    true,
                    None,
                    &CancellationToken::new(),
                )
            },
            CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(Fault::ProtocolMisuse(_))));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(host.calls.load(Ordering::SeqCst), 0);
}

/// Test: Pump-aware wait observes the timeout and the signal
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pump_wait_outcomes() {
    init_logging();

    let host = CountdownHost::new(3);
    let config = ApartmentConfig::new("pump")
        .with_host(host.clone())
        .with_poll_interval(Duration::from_millis(10));
    let dedicated = Arc::new(DedicatedThreadApartment::with_config(config).unwrap());

    let inner = dedicated.clone();
    let outcome = dedicated
        .run(
            move || inner.wait(&[WaitHandle(7)], false, None, &CancellationToken::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::Signaled(0));
    assert_eq!(host.calls.load(Ordering::SeqCst), 4);

    let slow = CountdownHost::new(usize::MAX);
    let config = ApartmentConfig::new("pump-timeout")
        .with_host(slow)
        .with_poll_interval(Duration::from_millis(10));
    let dedicated = Arc::new(DedicatedThreadApartment::with_config(config).unwrap());

    let inner = dedicated.clone();
    let outcome = dedicated
        .run(
            move || {
                inner.wait(
                    &[WaitHandle(7)],
                    false,
                    Some(Duration::from_millis(50)),
                    &CancellationToken::new(),
                )
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
}

/// Test: The current apartment is visible inside work and restored after
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_current_apartment_scoping() {
    init_logging();

    let dedicated = DedicatedThreadApartment::new().unwrap();
    let pooled = PooledApartment::new().unwrap();
    let gui = GuiLoopApartment::new().unwrap();

    let token = CancellationToken::new();
    let seen = [
        dedicated
            .run(|| Ok(current().map(|core| core.id())), token.clone())
            .await
            .unwrap(),
        pooled
            .run(|| Ok(current().map(|core| core.id())), token.clone())
            .await
            .unwrap(),
        gui.run(|| Ok(current().map(|core| core.id())), token.clone())
            .await
            .unwrap(),
    ];

    assert_eq!(seen, [Some(dedicated.id()), Some(pooled.id()), Some(gui.id())]);
    assert!(current().is_none());
}
