//! End-to-end factory behavior
//!
//! Exercises the full create-and-run path: configuration resolution,
//! engine reuse, customizer application, and the execution contract under
//! timeouts and open circuits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fusegate::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("downstream unavailable")]
struct DownstreamError;

/// Default supplier used across scenarios: opens at 50% over a 10-call
/// window and bounds calls at 100ms (scaled down from production numbers
/// to keep the suite fast).
fn scenario_defaults(id: &str) -> BreakerConfig {
    ConfigBuilder::new(id)
        .breaker_policy(
            BreakerPolicy::default()
                .with_failure_rate_threshold(50.0)
                .with_sliding_window_size(10)
                .with_minimum_calls(10)
                .with_wait_in_open(Duration::from_secs(5)),
        )
        .time_limit_policy(TimeLimitPolicy::default().with_time_limit(Duration::from_millis(100)))
        .build()
        .unwrap_or_else(|_| BreakerConfig::of_defaults(id))
}

#[tokio::test]
async fn create_returns_identity_stable_wrappers() {
    let factory = ResilienceFactory::new();

    let first = factory.create("svc").unwrap();
    let second = factory.create("svc").unwrap();

    assert!(Arc::ptr_eq(first.engine(), second.engine()));
    assert_eq!(first.id(), "svc");
    assert_eq!(factory.engine_registry().len(), 1);
}

#[tokio::test]
async fn blank_ids_fail_without_side_effects() {
    let factory = ResilienceFactory::new();

    assert_eq!(factory.create("").unwrap_err(), ConfigError::InvalidId);
    assert_eq!(factory.create("   ").unwrap_err(), ConfigError::InvalidId);

    assert!(factory.engine_registry().is_empty());
}

#[test_log::test(tokio::test)]
async fn customizer_applies_once_before_first_use() {
    let factory = ResilienceFactory::new();
    let applied = Arc::new(AtomicUsize::new(0));
    let transitions = Arc::new(AtomicUsize::new(0));

    let applications = Arc::clone(&applied);
    let observed = Arc::clone(&transitions);
    factory.register_customizer(
        Customizer::new(move |engine| {
            applications.fetch_add(1, Ordering::SeqCst);
            let observed = Arc::clone(&observed);
            engine.on_transition(move |_| {
                observed.fetch_add(1, Ordering::SeqCst);
            });
        }),
        ["svc"],
    );

    factory.configure_default(scenario_defaults);
    let call = factory.create("svc").unwrap();
    factory.create("svc").unwrap();
    assert_eq!(applied.load(Ordering::SeqCst), 1);

    // The hook registered by the customizer sees the circuit open
    for _ in 0..10 {
        let _ = call
            .run(|_cancel| async { Err::<(), _>(DownstreamError) })
            .await;
    }
    assert_eq!(call.state(), CircuitState::Open);
    assert_eq!(transitions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn customizer_registered_after_create_has_no_effect() {
    let factory = ResilienceFactory::new();
    factory.create("svc").unwrap();

    let applied = Arc::new(AtomicUsize::new(0));
    let applications = Arc::clone(&applied);
    factory.register_customizer(
        Customizer::new(move |_| {
            applications.fetch_add(1, Ordering::SeqCst);
        }),
        ["svc"],
    );

    factory.create("svc").unwrap();
    assert_eq!(applied.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_creates_publish_one_engine_and_config() {
    let factory = Arc::new(ResilienceFactory::new());
    let supplier_runs = Arc::new(AtomicUsize::new(0));

    let runs = Arc::clone(&supplier_runs);
    factory.configure_default(move |id| {
        runs.fetch_add(1, Ordering::SeqCst);
        BreakerConfig::of_defaults(id)
    });

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let factory = Arc::clone(&factory);
            tokio::spawn(async move { factory.create("racy").unwrap() })
        })
        .collect();

    let mut calls = Vec::new();
    for handle in handles {
        calls.push(handle.await.unwrap());
    }

    for call in &calls {
        assert!(Arc::ptr_eq(calls[0].engine(), call.engine()));
    }
    assert_eq!(factory.engine_registry().len(), 1);
    assert_eq!(supplier_runs.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn slow_operation_times_out_and_invokes_fallback() {
    let factory = ResilienceFactory::new();
    factory.configure_default(scenario_defaults);

    let call = factory.create("svc").unwrap();
    let fallback_hit = Arc::new(AtomicBool::new(false));

    let hit = Arc::clone(&fallback_hit);
    let value = call
        .run_with_fallback(
            |_cancel| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, DownstreamError>("fresh")
            },
            move |err| {
                assert!(err.is_timeout());
                hit.store(true, Ordering::SeqCst);
                "stale"
            },
        )
        .await;

    assert_eq!(value, "stale");
    assert!(fallback_hit.load(Ordering::SeqCst));

    // Without a fallback the timeout propagates
    let err = call
        .run(|_cancel| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok::<_, DownstreamError>("fresh")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Timeout(limit) if limit == Duration::from_millis(100)));
}

#[tokio::test]
async fn open_circuit_rejects_without_dispatching() {
    let factory = ResilienceFactory::new();
    factory.configure_default(scenario_defaults);
    let call = factory.create("svc").unwrap();

    // 6 of 10 calls fail: 60% over the 10-call window opens the circuit
    for i in 0..10 {
        let _ = call
            .run(move |_cancel| async move {
                if i < 6 {
                    Err::<u32, _>(DownstreamError)
                } else {
                    Ok(i)
                }
            })
            .await;
    }
    assert_eq!(call.state(), CircuitState::Open);

    let dispatched = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&dispatched);
    let err = call
        .run(move |_cancel| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, DownstreamError>(0)
        })
        .await
        .unwrap_err();

    assert!(err.is_circuit_open());
    assert!(!dispatched.load(Ordering::SeqCst));

    // Wrappers created after the circuit opened observe the same engine state
    let warm = factory.create("svc").unwrap();
    assert_eq!(warm.state(), CircuitState::Open);
}

#[tokio::test]
async fn operation_error_propagates_unchanged_without_fallback() {
    let factory = ResilienceFactory::new();
    let call = factory.create("svc").unwrap();

    let err = call
        .run(|_cancel| async { Err::<u32, _>(DownstreamError) })
        .await
        .unwrap_err();

    match err {
        CallError::Operation(inner) => {
            assert_eq!(inner.to_string(), "downstream unavailable");
        }
        other => panic!("expected pass-through operation error, got {other}"),
    }
}

#[tokio::test]
async fn bounded_worker_pool_is_shared_by_wrappers() {
    let factory = ResilienceFactory::new();
    factory.configure_worker_pool(Arc::new(WorkerPool::new(
        WorkerPoolConfig::new().with_max_concurrency(2),
    )));

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..6 {
        let call = factory.create(&format!("svc-{i}")).unwrap();
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            call.run(move |_cancel| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, DownstreamError>(())
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
}
