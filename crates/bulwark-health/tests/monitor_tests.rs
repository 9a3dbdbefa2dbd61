//! Health monitor behaviour on virtual time

use async_trait::async_trait;
use bulwark_health::{
    probe_fn, HealthConfig, HealthEvent, HealthMonitor, HealthProbe, HealthStatus, ProbeResult,
    StatusCounts, MEMORY_ALERT_SOURCE,
};
use bulwark_test_utils::ScriptedProbe;
use mockall::mock;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

mock! {
    pub Probe {}

    #[async_trait]
    impl HealthProbe for Probe {
        async fn check(&self) -> anyhow::Result<ProbeResult>;
    }
}

fn scripted(script: &Arc<ScriptedProbe>) -> impl HealthProbe {
    let script = Arc::clone(script);
    probe_fn(move || {
        let healthy = script.next_outcome();
        async move {
            Ok::<_, anyhow::Error>(if healthy {
                ProbeResult::healthy()
            } else {
                ProbeResult::new(HealthStatus::Unhealthy).with_message("connection refused")
            })
        }
    })
}

fn drain(events: &mut Receiver<HealthEvent>) -> Vec<HealthEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn alerts(events: &[HealthEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, HealthEvent::AlertTriggered(_)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn probe_timeout_records_critical() {
    let monitor = HealthMonitor::with_config(HealthConfig::new().with_probe_timeout(Duration::from_secs(10)));
    monitor.register_health_check(
        "slow",
        probe_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, anyhow::Error>(ProbeResult::healthy())
        }),
    );

    let health = monitor.force_health_check("slow").await.unwrap();

    assert_eq!(health.status, HealthStatus::Critical);
    assert!(health.last_error.unwrap().contains("timed out"));
    assert_eq!(health.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn probe_error_records_critical() {
    let mut probe = MockProbe::new();
    probe
        .expect_check()
        .times(1)
        .returning(|| Err(anyhow::anyhow!("pool exhausted")));

    let monitor = HealthMonitor::new();
    monitor.register_health_check("db", probe);

    let health = monitor.force_health_check("db").await.unwrap();
    assert_eq!(health.status, HealthStatus::Critical);
    assert!(health.last_error.unwrap().contains("pool exhausted"));
}

#[tokio::test(start_paused = true)]
async fn panicking_check_records_critical_and_loop_survives() {
    struct CrashingProbe;

    #[async_trait]
    impl HealthProbe for CrashingProbe {
        async fn check(&self) -> anyhow::Result<ProbeResult> {
            panic!("driver crashed")
        }
    }

    let monitor = HealthMonitor::with_config(
        HealthConfig::new()
            .with_check_interval(Duration::from_secs(30))
            .with_alert_channels(vec![]),
    );
    let script = Arc::new(ScriptedProbe::always(true));
    monitor.register_health_check("ok", scripted(&script));
    monitor.register_health_check("bad", CrashingProbe);

    assert!(monitor.start());
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(script.calls(), 2);
    let ok = monitor.service_health("ok").unwrap();
    assert_eq!((ok.status, ok.total_checks), (HealthStatus::Healthy, 2));
    let bad = monitor.service_health("bad").unwrap();
    assert_eq!((bad.status, bad.total_checks), (HealthStatus::Critical, 2));
    assert!(bad.last_error.unwrap().contains("driver crashed"));
    assert!(monitor.is_running());

    assert!(monitor.stop().await);
}

#[tokio::test(start_paused = true)]
async fn alert_cooldown_suppresses_repeats() {
    let config = HealthConfig::new()
        .with_consecutive_failure_threshold(1)
        .with_alert_cooldown(Duration::from_secs(300))
        .with_alert_channels(vec![]);
    let monitor = HealthMonitor::with_config(config);
    let script = Arc::new(ScriptedProbe::always(false));
    monitor.register_health_check("api", scripted(&script));
    let mut events = monitor.subscribe();

    monitor.force_health_check("api").await.unwrap();
    monitor.force_health_check("api").await.unwrap();
    assert_eq!(alerts(&drain(&mut events)), 1);

    tokio::time::sleep(Duration::from_secs(301)).await;
    monitor.force_health_check("api").await.unwrap();

    let later = drain(&mut events);
    assert_eq!(alerts(&later), 1);
    let escalation = later.iter().find_map(|e| match e {
        HealthEvent::AlertTriggered(alert) => Some(alert.escalation_level),
        _ => None,
    });
    assert_eq!(escalation, Some(3));
}

#[tokio::test(start_paused = true)]
async fn alert_waits_for_consecutive_threshold() {
    let monitor = HealthMonitor::with_config(HealthConfig::new().with_alert_channels(vec![]));
    let script = Arc::new(ScriptedProbe::new([false, false, true, false, false, false]));
    monitor.register_health_check("api", scripted(&script));
    let mut events = monitor.subscribe();

    for _ in 0..5 {
        monitor.force_health_check("api").await.unwrap();
    }
    assert_eq!(alerts(&drain(&mut events)), 0);

    monitor.force_health_check("api").await.unwrap();
    assert_eq!(alerts(&drain(&mut events)), 1);
}

#[tokio::test(start_paused = true)]
async fn overall_change_carries_counts() {
    let monitor = HealthMonitor::new();
    monitor.register_health_check(
        "cache",
        probe_fn(|| async { Ok::<_, anyhow::Error>(ProbeResult::healthy()) }),
    );
    monitor.register_health_check(
        "db",
        probe_fn(|| async { Ok::<_, anyhow::Error>(ProbeResult::new(HealthStatus::Critical)) }),
    );
    let mut events = monitor.subscribe();

    assert_eq!(monitor.run_health_checks().await, HealthStatus::Critical);

    let change = drain(&mut events)
        .into_iter()
        .find(|e| matches!(e, HealthEvent::OverallHealthChanged { .. }));
    assert_eq!(
        change,
        Some(HealthEvent::OverallHealthChanged {
            from: HealthStatus::Healthy,
            to: HealthStatus::Critical,
            counts: StatusCounts {
                healthy: 1,
                degraded: 0,
                unhealthy: 0,
                critical: 1,
            },
        })
    );

    // unchanged overall status publishes nothing further
    monitor.run_health_checks().await;
    assert!(!drain(&mut events)
        .iter()
        .any(|e| matches!(e, HealthEvent::OverallHealthChanged { .. })));
}

#[tokio::test(start_paused = true)]
async fn loops_tick_immediately_and_stop_cleanly() {
    let config = HealthConfig::new()
        .with_check_interval(Duration::from_secs(30))
        .with_metrics_interval(Duration::from_secs(10));
    let monitor = HealthMonitor::with_config(config);
    let script = Arc::new(ScriptedProbe::always(true));
    monitor.register_health_check("db", scripted(&script));

    assert!(monitor.start());
    assert!(!monitor.start());
    assert!(monitor.is_running());

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(script.calls(), 1);
    assert_eq!(monitor.get_metrics_history(None).len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(script.calls(), 2);
    assert_eq!(monitor.get_metrics_history(None).len(), 4);

    assert!(monitor.stop().await);
    assert!(!monitor.stop().await);
    assert!(!monitor.is_running());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(script.calls(), 2);
    assert_eq!(monitor.get_metrics_history(None).len(), 4);
}

#[tokio::test(start_paused = true)]
async fn metrics_error_rate_and_threshold_alert() {
    let config = HealthConfig::new()
        .with_error_rate_threshold(0.05)
        .with_memory_threshold_mb(f64::MAX)
        .with_alert_channels(vec![]);
    let monitor = HealthMonitor::with_config(config);
    let failing = Arc::new(ScriptedProbe::always(false));
    let healthy = Arc::new(ScriptedProbe::always(true));
    monitor.register_health_check("a", scripted(&failing));
    monitor.register_health_check("b", scripted(&healthy));
    monitor.run_health_checks().await;
    monitor.run_health_checks().await;
    let mut events = monitor.subscribe();

    let sample = monitor.collect_metrics();

    assert!((sample.error_rate - 0.5).abs() < f64::EPSILON);
    let fired: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            HealthEvent::AlertTriggered(alert) => Some(alert.source),
            _ => None,
        })
        .collect();
    assert_eq!(fired, vec!["system.error_rate".to_string()]);
}

#[cfg(target_os = "linux")]
#[tokio::test(start_paused = true)]
async fn memory_threshold_raises_degraded_alert() {
    let config = HealthConfig::new()
        .with_memory_threshold_mb(0.0)
        .with_alert_channels(vec![]);
    let monitor = HealthMonitor::with_config(config);
    let mut events = monitor.subscribe();

    let sample = monitor.collect_metrics();
    monitor.collect_metrics();

    assert!(sample.memory_mb.is_some_and(|mb| mb > 0.0));
    let fired: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            HealthEvent::AlertTriggered(alert) => Some((alert.source, alert.status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        fired,
        vec![(MEMORY_ALERT_SOURCE.to_string(), HealthStatus::Degraded)]
    );
}

#[tokio::test(start_paused = true)]
async fn history_limit_returns_most_recent() {
    let monitor = HealthMonitor::new();
    for _ in 0..5 {
        monitor.collect_metrics();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let all = monitor.get_metrics_history(None);
    let last_two = monitor.get_metrics_history(Some(2));
    assert_eq!(all.len(), 5);
    assert_eq!(last_two, all[3..].to_vec());
}

#[tokio::test(start_paused = true)]
async fn reset_service_stats_clears_record() {
    let monitor = HealthMonitor::with_config(HealthConfig::new().with_alert_channels(vec![]));
    let script = Arc::new(ScriptedProbe::always(false));
    monitor.register_health_check("api", scripted(&script));
    for _ in 0..3 {
        monitor.force_health_check("api").await.unwrap();
    }
    assert_eq!(monitor.overall_status(), HealthStatus::Unhealthy);

    monitor.reset_service_stats("api").unwrap();

    let health = monitor.service_health("api").unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.total_checks, 0);
    assert_eq!(monitor.overall_status(), HealthStatus::Healthy);
}
