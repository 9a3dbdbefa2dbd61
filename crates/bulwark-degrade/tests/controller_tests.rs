//! Degradation controller scenarios

use bulwark_core::fallback_fn;
use bulwark_degrade::{
    DegradationAction, DegradationConfig, DegradationController, DegradationEvent,
    DegradationLevel, DegradationRule, ExecuteError, FeatureToggle, ServiceConfig, ServiceStatus,
    SystemReadings,
};
use bulwark_test_utils::TestError;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn controller() -> DegradationController {
    DegradationController::with_config(DegradationConfig::new().with_process_memory_sampling(false))
}

fn escalating_controller() -> DegradationController {
    DegradationController::with_config(
        DegradationConfig::new()
            .with_essential_unavailable_multiplier(2)
            .with_process_memory_sampling(false),
    )
}

fn bare_controller() -> DegradationController {
    DegradationController::with_config(
        DegradationConfig::new()
            .without_default_rules()
            .with_process_memory_sampling(false),
    )
}

fn set_level(controller: &DegradationController, level: DegradationLevel) {
    controller.update_readings(SystemReadings {
        system_load: Some(f64::from(level.as_u8())),
        ..SystemReadings::default()
    });
}

/// One rule per level keyed on `system_load`
fn level_rules(controller: &DegradationController) {
    for level in DegradationLevel::ALL.into_iter().skip(1) {
        let threshold = f64::from(level.as_u8());
        controller.add_rule(DegradationRule::new(
            format!("load_{level}"),
            level,
            move |ctx| ctx.system_load >= threshold,
        ));
    }
}

#[test]
fn essential_service_degrades_after_threshold() {
    let controller = controller();
    controller
        .register_service(ServiceConfig::new("db").essential().with_degradation_threshold(3))
        .unwrap();

    for _ in 0..3 {
        controller.record_service_result("db", false, None).unwrap();
    }

    let status = controller.get_system_status();
    assert_eq!(status.services.len(), 1);
    assert_eq!(status.services[0].name, "db");
    assert_eq!(status.services[0].status, ServiceStatus::Degraded);
    assert_eq!(status.services[0].failures, 3);
}

#[test]
fn essential_service_stays_degraded_by_default() {
    let controller = controller();
    controller
        .register_service(ServiceConfig::new("db").essential().with_degradation_threshold(3))
        .unwrap();

    for _ in 0..18 {
        controller.record_service_result("db", false, None).unwrap();
    }

    assert_eq!(controller.service_status("db"), Some(ServiceStatus::Degraded));
    assert_eq!(controller.current_level(), DegradationLevel::None);
}

#[tokio::test]
async fn degraded_essential_service_keeps_calling_primary() {
    let controller = controller();
    controller
        .register_service(
            ServiceConfig::new("db")
                .essential()
                .with_degradation_threshold(3)
                .with_recovery_threshold(2),
        )
        .unwrap();

    for _ in 0..6 {
        let result = controller
            .execute_with_fallback("db", || async { Err::<u32, _>(TestError::database()) }, None)
            .await;
        assert!(result.is_err());
    }
    assert_eq!(controller.service_status("db"), Some(ServiceStatus::Degraded));

    let calls = AtomicU32::new(0);
    let counter = &calls;
    for _ in 0..2 {
        let value = controller
            .execute_with_fallback(
                "db",
                || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(1)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(controller.service_status("db"), Some(ServiceStatus::Available));
}

#[test]
fn essential_escalation_reaches_critical() {
    let controller = escalating_controller();
    controller
        .register_service(ServiceConfig::new("db").essential().with_degradation_threshold(2))
        .unwrap();
    controller.register_feature("ai_analysis", FeatureToggle::new(DegradationLevel::Critical));
    let mut events = controller.subscribe();

    for _ in 0..4 {
        controller.record_service_result("db", false, None).unwrap();
    }

    assert_eq!(controller.service_status("db"), Some(ServiceStatus::Unavailable));
    assert_eq!(controller.current_level(), DegradationLevel::Critical);
    assert!(!controller.is_feature_enabled("ai_analysis"));
    assert!(controller.is_fallback_active("core_services"));

    let mut level_changes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DegradationEvent::LevelChanged { to, triggered_rules, .. } = event {
            level_changes.push((to, triggered_rules));
        }
    }
    assert_eq!(
        level_changes,
        vec![(
            DegradationLevel::Critical,
            vec!["essential_service_unavailable".to_string()]
        )]
    );
}

#[test]
fn highest_triggered_level_wins() {
    let controller = controller();
    controller.register_service(ServiceConfig::new("a").essential()).unwrap();
    controller.register_service(ServiceConfig::new("b").essential()).unwrap();
    for service in ["a", "b"] {
        for _ in 0..3 {
            controller.record_service_result(service, false, None).unwrap();
        }
    }
    assert_eq!(controller.current_level(), DegradationLevel::Moderate);

    controller.update_readings(SystemReadings {
        error_rate: Some(0.25),
        ..SystemReadings::default()
    });
    assert_eq!(
        controller.get_system_status().degradation_level,
        DegradationLevel::Severe
    );
}

#[test]
fn feature_gating_follows_level() {
    let controller = bare_controller();
    level_rules(&controller);
    controller.register_feature("search", FeatureToggle::new(DegradationLevel::Moderate));

    for level in DegradationLevel::ALL {
        set_level(&controller, level);
        assert_eq!(controller.current_level(), level);
        assert_eq!(
            controller.is_feature_enabled("search"),
            level <= DegradationLevel::Moderate,
            "at {level}"
        );
    }

    set_level(&controller, DegradationLevel::Minimal);
    assert!(controller.is_feature_enabled("search"));
}

#[test]
fn host_disabled_feature_stays_disabled() {
    let controller = bare_controller();
    level_rules(&controller);
    controller.register_feature("search", FeatureToggle::new(DegradationLevel::Critical));
    controller.set_feature_enabled("search", false).unwrap();

    set_level(&controller, DegradationLevel::Severe);
    set_level(&controller, DegradationLevel::None);
    assert!(!controller.is_feature_enabled("search"));
}

#[test]
fn action_disabled_feature_returns_when_level_drops() {
    let controller = controller();
    controller.register_feature("ai_analysis", FeatureToggle::new(DegradationLevel::Critical));

    controller.update_readings(SystemReadings {
        error_rate: Some(0.5),
        ..SystemReadings::default()
    });
    assert!(!controller.is_feature_enabled("ai_analysis"));
    assert!(controller
        .active_actions()
        .contains(&DegradationAction::disable_feature("ai_analysis")));

    controller.update_readings(SystemReadings::default());
    assert!(controller.is_feature_enabled("ai_analysis"));
}

#[test]
fn reset_restores_everything() {
    let controller = escalating_controller();
    controller.register_service(ServiceConfig::new("db").essential()).unwrap();
    controller.register_service(ServiceConfig::new("search")).unwrap();
    controller.register_feature("ai_analysis", FeatureToggle::new(DegradationLevel::Minimal));
    controller.register_feature("export", FeatureToggle::new(DegradationLevel::Critical));
    controller.set_feature_enabled("export", false).unwrap();
    for _ in 0..6 {
        controller.record_service_result("db", false, None).unwrap();
        controller.record_service_result("search", false, None).unwrap();
    }
    assert_eq!(controller.current_level(), DegradationLevel::Critical);
    let mut events = controller.subscribe();

    controller.reset_all_services();

    let status = controller.get_system_status();
    assert_eq!(status.degradation_level, DegradationLevel::None);
    assert!(status.features.iter().all(|f| f.enabled));
    assert!(status
        .services
        .iter()
        .all(|s| s.status == ServiceStatus::Available && s.failures == 0 && s.successes == 0));
    assert!(status.active_actions.is_empty());
    assert!(status.active_fallbacks.is_empty());
    assert_eq!(events.try_recv().unwrap(), DegradationEvent::SystemReset);
}

#[test]
fn recovery_after_consecutive_successes() {
    let controller = controller();
    controller
        .register_service(ServiceConfig::new("search").with_recovery_threshold(2))
        .unwrap();
    for _ in 0..3 {
        controller.record_service_result("search", false, None).unwrap();
    }
    assert_eq!(controller.service_status("search"), Some(ServiceStatus::Unavailable));

    assert_eq!(
        controller.record_service_result("search", true, None).unwrap(),
        ServiceStatus::Unavailable
    );
    assert_eq!(
        controller.record_service_result("search", true, None).unwrap(),
        ServiceStatus::Available
    );
}

#[tokio::test]
async fn execute_with_fallback_records_and_falls_back() {
    let controller = controller();
    controller.register_service(ServiceConfig::new("search")).unwrap();
    controller.register_fallback("search", fallback_fn(|| async { Ok::<_, anyhow::Error>(vec!["cached"]) }));

    let live = controller
        .execute_with_fallback("search", || async { Ok::<_, TestError>(vec!["live"]) }, None)
        .await
        .unwrap();
    assert_eq!(live, vec!["live"]);

    let served = controller
        .execute_with_fallback(
            "search",
            || async { Err::<Vec<&str>, _>(TestError::network()) },
            None,
        )
        .await
        .unwrap();
    assert_eq!(served, vec!["cached"]);

    let summary = &controller.get_system_status().services[0];
    assert_eq!(summary.total_requests, 2);
    assert_eq!(summary.failures, 1);
}

#[tokio::test]
async fn unavailable_service_skips_primary() {
    let controller = controller();
    controller
        .register_service(ServiceConfig::new("search").with_degradation_threshold(1))
        .unwrap();
    controller.record_service_result("search", false, None).unwrap();

    let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let result: Result<u32, ExecuteError<TestError>> = controller
        .execute_with_fallback(
            "search",
            move || async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(1)
            },
            None,
        )
        .await;

    assert!(result.unwrap_err().is_unavailable());
    assert!(!called.load(std::sync::atomic::Ordering::SeqCst));

    let fallback: Arc<dyn bulwark_core::Fallback<u32>> =
        Arc::new(fallback_fn(|| async { Ok::<_, anyhow::Error>(7) }));
    let value = controller
        .execute_with_fallback("search", || async { Ok::<u32, TestError>(1) }, Some(fallback))
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn failing_fallback_surfaces_primary_error() {
    let controller = controller();
    controller.register_service(ServiceConfig::new("search")).unwrap();
    controller.register_fallback(
        "search",
        fallback_fn(|| async { Err::<u32, _>(anyhow::anyhow!("cache cold")) }),
    );

    let err = controller
        .execute_with_fallback("search", || async { Err::<u32, _>(TestError::network()) }, None)
        .await
        .unwrap_err();

    assert_eq!(err.primary_error(), Some(&TestError::network()));
}

#[tokio::test]
async fn fallback_of_other_type_is_ignored() {
    let controller = controller();
    controller.register_service(ServiceConfig::new("search")).unwrap();
    controller.register_fallback("search", fallback_fn(|| async { Ok::<_, anyhow::Error>("text") }));

    let err = controller
        .execute_with_fallback("search", || async { Err::<u32, _>(TestError::network()) }, None)
        .await
        .unwrap_err();
    assert!(err.primary_error().is_some());
}
