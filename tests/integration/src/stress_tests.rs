//! Stress Tests - Apartments under concurrent load
//!
//! These tests exercise race conditions in the apartment bookkeeping by:
//! - Submitting high volumes of work from many tasks at once
//! - Checking serialization on the dedicated thread under contention
//! - Creating and shutting down many apartments concurrently
//! - Running long handoff exchanges between apartments

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use apartment::{
    Apartment, CoroutineHandoff, DedicatedThreadApartment, Fault, PooledApartment, Routine,
};
use common::*;

/// Test: Many tasks submitting to one dedicated apartment
/// Callbacks must never overlap and every submission must run once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_dedicated_serializes_concurrent_submissions() {
    init_logging();

    const NUM_TASKS: usize = 32;
    const RUNS_PER_TASK: usize = 100;

    let dedicated = Arc::new(DedicatedThreadApartment::new().unwrap());
    let in_callback = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(AtomicUsize::new(0));
    let stats = Arc::new(ConcurrentStats::new());
    let barrier = Arc::new(Barrier::new(NUM_TASKS));

    let mut handles = Vec::new();
    for task_id in 0..NUM_TASKS {
        let dedicated = dedicated.clone();
        let in_callback = in_callback.clone();
        let violations = violations.clone();
        let stats = stats.clone();
        let barrier = barrier.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for run_id in 0..RUNS_PER_TASK {
                let in_callback = in_callback.clone();
                let violations = violations.clone();
                let start = Instant::now();
                let result = dedicated
                    .run(
                        move || {
                            if in_callback.swap(true, Ordering::SeqCst) {
                                violations.fetch_add(1, Ordering::SeqCst);
                            }
                            let value = task_id * RUNS_PER_TASK + run_id;
                            in_callback.store(false, Ordering::SeqCst);
                            Ok(value)
                        },
                        CancellationToken::new(),
                    )
                    .await;
                match result {
                    Ok(value) if value == task_id * RUNS_PER_TASK + run_id => {
                        stats.record_success(start.elapsed())
                    }
                    _ => stats.record_failure(),
                }
            }
        }));
    }

    join_all(handles).await;

    let total_expected = (NUM_TASKS * RUNS_PER_TASK) as u64;

    println!("\n=== Dedicated Serialization Test Results ===");
    println!("Total expected: {}", total_expected);
    println!("Successful: {}", stats.success_count());
    println!("Failed: {}", stats.failure_count());
    println!("Overlap violations: {}", violations.load(Ordering::SeqCst));
    println!("Avg latency: {:?}", stats.avg_latency());
    println!("Max latency: {:?}", stats.max_latency());

    assert_eq!(stats.success_count(), total_expected);
    assert_eq!(violations.load(Ordering::SeqCst), 0);

    dedicated.complete();
    assert!(dedicated.completion().await.is_ok());
}

/// Test: High volume of fire-and-forget work on the pool
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_pooled_high_volume() {
    init_logging();

    const NUM_OPERATIONS: usize = 2000;
    const FAILING_EVERY: usize = 100;

    let pooled = PooledApartment::new().unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let drained = Arc::new(AtomicUsize::new(0));

    let d = drained.clone();
    pooled.on_background_operations_completed(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    let start = Instant::now();
    for i in 0..NUM_OPERATIONS {
        let finished = finished.clone();
        pooled.spawn(async move {
            tokio::time::sleep(Duration::from_millis((i % 10) as u64)).await;
            finished.fetch_add(1, Ordering::SeqCst);
            if i % FAILING_EVERY == 0 {
                Err(Fault::operation(TestError::Item(i)))
            } else {
                Ok(())
            }
        });
    }

    pooled.complete();
    let aggregate = pooled.completion().await.unwrap_err();
    let duration = start.elapsed();

    println!("\n=== Pooled High Volume Test Results ===");
    println!("Operations: {}", NUM_OPERATIONS);
    println!("Finished: {}", finished.load(Ordering::SeqCst));
    println!("Faults: {}", aggregate.len());
    println!("Drain events: {}", drained.load(Ordering::SeqCst));
    println!("Duration: {:?}", duration);

    assert_eq!(finished.load(Ordering::SeqCst), NUM_OPERATIONS);
    assert_eq!(aggregate.len(), NUM_OPERATIONS / FAILING_EVERY);
    assert!(drained.load(Ordering::SeqCst) >= 1);
    assert_eq!(pooled.any_background_operation(), Some(false));
}

/// Test: Create and shut down many apartments concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_apartment_lifecycles() {
    init_logging();

    const NUM_APARTMENTS: usize = 32;

    let stats = Arc::new(ConcurrentStats::new());
    let mut handles = Vec::new();

    for i in 0..NUM_APARTMENTS {
        let stats = stats.clone();
        handles.push(tokio::spawn(async move {
            let start = Instant::now();
            let dedicated = match DedicatedThreadApartment::new() {
                Ok(dedicated) => dedicated,
                Err(_) => {
                    stats.record_failure();
                    return;
                }
            };

            let value = dedicated.run(move || Ok(i * 2), CancellationToken::new()).await;
            dedicated.complete();
            let outcome = dedicated.completion().await;

            match (value, outcome) {
                (Ok(v), Ok(())) if v == i * 2 => stats.record_success(start.elapsed()),
                _ => stats.record_failure(),
            }
        }));
    }

    join_all(handles).await;

    println!("\n=== Apartment Lifecycle Test Results ===");
    println!("Apartments: {}", NUM_APARTMENTS);
    println!("Successful: {}", stats.success_count());
    println!("Avg lifetime: {:?}", stats.avg_latency());

    assert_eq!(stats.success_count(), NUM_APARTMENTS as u64);
}

/// Test: Long ping-pong exchange between two pooled apartments
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_long_handoff_exchange() {
    init_logging();

    const ROUNDS: u64 = 500;

    let left = PooledApartment::new().unwrap();
    let right = PooledApartment::new().unwrap();
    let from_left = CoroutineHandoff::<u64>::new();
    let from_right = CoroutineHandoff::<u64>::new();
    let token = CancellationToken::new();

    let replies = from_right.clone();
    let ping = from_left.run_in(
        &left,
        move |token: CancellationToken| {
            Routine::new(move |y| async move {
                let replies = replies.as_sequence(&token).await?;
                let mut value = 0;
                for round in 0..ROUNDS {
                    y.yield_item(value).await;
                    if round + 1 < ROUNDS {
                        value = replies.next_item(&token).await? + 1;
                    }
                }
                Ok(())
            })
        },
        token.clone(),
    );

    let requests = from_left.clone();
    let pong = from_right.run_in(
        &right,
        move |token: CancellationToken| {
            Routine::new(move |y| async move {
                let requests = requests.as_sequence(&token).await?;
                while let Some(value) = requests.next(&token).await? {
                    y.yield_item(value + 1).await;
                }
                Ok(())
            })
        },
        token.clone(),
    );

    let start = Instant::now();
    ping.await.unwrap();
    pong.await.unwrap();
    let duration = start.elapsed();

    // The last reply is never consumed by the left side
    let tail = from_right.as_sequence(&token).await.unwrap();
    let last = tail.next_item(&token).await.unwrap();

    println!("\n=== Long Handoff Exchange Results ===");
    println!("Rounds: {}", ROUNDS);
    println!("Last reply: {}", last);
    println!("Duration: {:?}", duration);
    println!(
        "Round trips/sec: {:.2}",
        ROUNDS as f64 / duration.as_secs_f64()
    );

    assert_eq!(last, 2 * ROUNDS - 1);

    left.complete();
    right.complete();
    assert!(left.completion().await.is_ok());
    assert!(right.completion().await.is_ok());
}
