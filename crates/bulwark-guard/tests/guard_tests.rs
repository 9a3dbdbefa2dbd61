//! Execution guard behaviour on virtual time

use bulwark_core::fallback_fn;
use bulwark_guard::{
    CircuitBreakerConfig, CircuitState, ErrorType, ExecutionGuard, GuardError, GuardEvent,
    RecoveryOptions, RetryConfig,
};
use bulwark_test_utils::{FlakyOperation, TestError};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn single_attempt(failure_threshold: u32) -> RecoveryOptions<&'static str> {
    RecoveryOptions::new()
        .with_retry(RetryConfig::new().with_max_attempts(1))
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(failure_threshold)
                .with_reset_timeout(Duration::from_secs(1)),
        )
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_after_threshold_failures() {
    for k in 1..=4 {
        let guard = ExecutionGuard::new();
        let op = FlakyOperation::always_failing("never");

        for _ in 0..k {
            let result = guard
                .execute_with_recovery("svc", single_attempt(k), || op.call())
                .await;
            assert!(matches!(result, Err(GuardError::Operation(_))));
        }
        assert_eq!(op.calls(), k);

        let result = guard
            .execute_with_recovery("svc", single_attempt(k), || op.call())
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(op.calls(), k, "fast-fail must not invoke the operation");
    }
}

#[tokio::test(start_paused = true)]
async fn half_open_recovers_after_three_successes() {
    let guard = ExecutionGuard::new();
    let failing = FlakyOperation::always_failing("x");
    for _ in 0..2 {
        let _ = guard
            .execute_with_recovery("svc", single_attempt(2), || failing.call())
            .await;
    }
    assert_eq!(guard.circuit_state("svc"), Some(CircuitState::Open));

    tokio::time::sleep(Duration::from_millis(1_001)).await;

    let healthy = FlakyOperation::new(0, "ok");
    for expected in [CircuitState::HalfOpen, CircuitState::HalfOpen, CircuitState::Closed] {
        let result = guard
            .execute_with_recovery("svc", single_attempt(2), || healthy.call())
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(guard.circuit_state("svc"), Some(expected));
    }
}

#[tokio::test(start_paused = true)]
async fn half_open_failure_reopens() {
    let guard = ExecutionGuard::new();
    let failing = FlakyOperation::always_failing("x");
    for _ in 0..2 {
        let _ = guard
            .execute_with_recovery("svc", single_attempt(2), || failing.call())
            .await;
    }

    tokio::time::sleep(Duration::from_millis(1_001)).await;

    let _ = guard
        .execute_with_recovery("svc", single_attempt(2), || failing.call())
        .await;
    assert_eq!(guard.circuit_state("svc"), Some(CircuitState::Open));

    let snapshot = &guard.get_health_status().circuit_breakers["svc"];
    assert_eq!(snapshot.times_opened, 2);
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::new(2, 7u32);
    let options = RecoveryOptions::new().with_retry(RetryConfig::new().with_max_attempts(3));

    let value = guard
        .execute_with_recovery("x", options, || op.call())
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(op.calls(), 3);
    let status = guard.get_health_status();
    assert_eq!(status.circuit_breakers["x"].failure_count, 0);
    assert_eq!(status.total_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn backoff_sleeps_between_attempts() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::new(2, ());
    let retry = RetryConfig::new()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100))
        .with_jitter(false);

    let started = tokio::time::Instant::now();
    guard
        .execute_with_recovery("x", RecoveryOptions::new().with_retry(retry), || op.call())
        .await
        .unwrap();

    // 100ms after the first failure, 200ms after the second
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(310), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn fallback_value_wins_over_primary_failure() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::always_failing("primary");
    let options = RecoveryOptions::new()
        .with_retry(RetryConfig::new().with_max_attempts(2))
        .with_fallback(fallback_fn(|| async { Ok::<_, anyhow::Error>("fallback") }));

    let mut events = guard.subscribe();
    let value = guard
        .execute_with_recovery("x", options, || op.call())
        .await
        .unwrap();

    assert_eq!(value, "fallback");
    assert_eq!(op.calls(), 2);
    assert_eq!(
        events.recv().await.unwrap(),
        GuardEvent::FallbackUsed {
            operation: "x".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn failing_fallback_surfaces_primary_error() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::always_failing(0u8).with_error(TestError::new("upstream timeout"));
    let options = RecoveryOptions::new()
        .with_retry(RetryConfig::new().with_max_attempts(2))
        .with_fallback(fallback_fn(|| async {
            Err::<u8, _>(anyhow::anyhow!("fallback exploded"))
        }));

    let err = guard
        .execute_with_recovery("x", options, || op.call())
        .await
        .unwrap_err();

    assert_eq!(err.operation_error(), Some(&TestError::new("upstream timeout")));
}

#[tokio::test(start_paused = true)]
async fn validation_errors_are_not_retried() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::always_failing(()).with_error(TestError::validation());
    let options = RecoveryOptions::new().with_retry(RetryConfig::new().with_max_attempts(5));

    let result = guard.execute_with_recovery("x", options, || op.call()).await;

    assert!(result.is_err());
    assert_eq!(op.calls(), 1);
    let stats = guard.get_health_status().error_stats;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].error_type, ErrorType::Validation);
}

#[tokio::test(start_paused = true)]
async fn error_stats_accumulate_per_operation_and_type() {
    let guard = ExecutionGuard::new();
    let network = FlakyOperation::always_failing(());
    let database = FlakyOperation::always_failing(()).with_error(TestError::database());
    let retry = RetryConfig::new().with_max_attempts(1);

    for _ in 0..3 {
        let _ = guard
            .execute_with_recovery("a", RecoveryOptions::new().with_retry(retry), || network.call())
            .await;
    }
    let _ = guard
        .execute_with_recovery("b", RecoveryOptions::new().with_retry(retry), || database.call())
        .await;

    let status = guard.get_health_status();
    let summary: Vec<_> = status
        .error_stats
        .iter()
        .map(|r| (r.operation.as_str(), r.error_type, r.count))
        .collect();
    assert_eq!(
        summary,
        vec![("a", ErrorType::Network, 3), ("b", ErrorType::Database, 1)]
    );
    assert_eq!(status.total_errors, 4);
}

#[tokio::test(start_paused = true)]
async fn circuit_rejections_count_as_dependency_errors() {
    let guard = ExecutionGuard::new();
    let op = FlakyOperation::always_failing("never");

    let _ = guard
        .execute_with_recovery("svc", single_attempt(1), || op.call())
        .await;
    let result = guard
        .execute_with_recovery("svc", single_attempt(1), || op.call())
        .await;
    assert!(result.unwrap_err().is_circuit_open());

    let status = guard.get_health_status();
    let summary: Vec<_> = status
        .error_stats
        .iter()
        .map(|r| (r.error_type, r.count))
        .collect();
    assert_eq!(
        summary,
        vec![(ErrorType::Network, 1), (ErrorType::Dependency, 1)]
    );
    assert_eq!(status.total_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn breakers_are_independent_per_operation() {
    let guard = ExecutionGuard::new();
    let failing = FlakyOperation::always_failing("x");
    let _ = guard
        .execute_with_recovery("a", single_attempt(1), || failing.call())
        .await;

    let healthy = FlakyOperation::new(0, "ok");
    let result = guard
        .execute_with_recovery("b", single_attempt(1), || healthy.call())
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(guard.circuit_state("a"), Some(CircuitState::Open));
    assert_eq!(guard.circuit_state("b"), Some(CircuitState::Closed));
}
