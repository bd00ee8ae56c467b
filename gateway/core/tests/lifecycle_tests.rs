//! Gateway Lifecycle Tests
//!
//! Config loading on init, shutdown, and the read-only helpers.

mod common;

use pretty_assertions::assert_eq;

use common::{test_config, Harness};
use gateway_core::{BudgetMode, ConfigSource, TaskType};

#[tokio::test]
async fn test_on_init_loads_persisted_config() {
    let h = Harness::new(test_config());
    let mut persisted = test_config();
    persisted.timeout_ms = 1234;
    h.store.set_active_config(Some(persisted));

    let source = h.gateway.on_init(vec![]).await;

    assert_eq!(source, ConfigSource::Persisted);
    assert_eq!(h.gateway.config_source(), ConfigSource::Persisted);
    assert_eq!(h.gateway.current_config().timeout_ms, 1234);
    assert!(h.registry.is_initialized());

    h.gateway.on_shutdown().await;
}

#[tokio::test]
async fn test_unreadable_config_falls_back_to_static() {
    let h = Harness::new(test_config());
    let mut persisted = test_config();
    persisted.timeout_ms = 1234;
    h.store.set_active_config(Some(persisted));
    h.store.fail_reads(true);

    assert_eq!(h.gateway.on_init(vec![]).await, ConfigSource::Default);
    assert_eq!(h.gateway.current_config().timeout_ms, test_config().timeout_ms);

    h.gateway.on_shutdown().await;
}

#[tokio::test]
async fn test_invalid_persisted_config_is_ignored() {
    let h = Harness::new(test_config());
    let mut persisted = test_config();
    persisted.circuit_breaker.failure_threshold = 0;
    h.store.set_active_config(Some(persisted));

    assert_eq!(h.gateway.reload_config().await, ConfigSource::Default);
    assert_eq!(h.gateway.current_config().circuit_breaker.failure_threshold, 5);
}

#[tokio::test]
async fn test_reload_picks_up_new_config() {
    let h = Harness::new(test_config());
    assert_eq!(h.gateway.reload_config().await, ConfigSource::Default);

    let mut persisted = test_config();
    persisted.budget.daily_limit = 7.5;
    h.store.set_active_config(Some(persisted));

    assert_eq!(h.gateway.reload_config().await, ConfigSource::Persisted);
    assert!((h.gateway.current_config().budget.daily_limit - 7.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let h = Harness::new(test_config());
    h.gateway.on_init(vec![]).await;
    h.gateway.invoke(&gateway_core::NormalizedRequest::from_prompt("hi")).await.unwrap();
    assert!(!h.gateway.circuit_snapshots().is_empty());

    h.gateway.on_shutdown().await;
    h.gateway.on_shutdown().await;

    assert!(h.cache.is_closed());
    assert!(h.gateway.circuit_snapshots().is_empty());
    assert!(!h.registry.is_initialized());
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_shutdown_without_init() {
    let h = Harness::new(test_config());
    h.gateway.on_shutdown().await;
    assert!(h.cache.is_closed());
}

#[tokio::test]
async fn test_available_providers_skips_unavailable() {
    let h = Harness::new(test_config());
    h.alpha.set_available(false);

    assert_eq!(h.gateway.available_providers().await, vec!["beta".to_string()]);

    let statuses = h.gateway.provider_statuses().await;
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().any(|s| s.name == "alpha" && !s.available));
}

#[tokio::test]
async fn test_cost_helpers() {
    let h = Harness::new(test_config());

    let estimate = h
        .gateway
        .estimate_task_cost(TaskType::General, 1000, 1000, None)
        .unwrap();
    assert_eq!(estimate.model, "alpha-small");
    assert!((estimate.cost.total_cost - 0.000_45).abs() < 1e-9);

    let recommended = h
        .gateway
        .recommended_models(TaskType::General, Some(BudgetMode::Economy));
    assert_eq!(recommended[0].model, "alpha-small");
    assert_eq!(recommended[1].model, "beta-large");

    let quality = h
        .gateway
        .recommended_models(TaskType::Analysis, Some(BudgetMode::Quality));
    assert_eq!(quality[0].model, "beta-large");

    assert!(h.gateway.model_capabilities("beta-large").is_some());
    assert!(h.gateway.model_capabilities("gamma").is_none());
}
