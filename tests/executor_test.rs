//! Executor integration tests
//!
//! Wave scheduling, failure containment, idempotent re-runs, fail-fast,
//! cancellation and the event log, all against `MockProvider`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use foundry_deploy::ast::{DeploymentPlan, EnvironmentType, GlobalParams, Module, Region};
use foundry_deploy::event::EventKind;
use foundry_deploy::provider::{ApplyRequest, MockProvider, ModuleOutputs, ModuleProvider};
use foundry_deploy::resilience::{RetryConfig, RetryPolicy};
use foundry_deploy::runtime::{Executor, ModuleState};
use foundry_deploy::store::{FileStateStore, StateStore};

// ============================================================================
// Helpers
// ============================================================================

/// identity, account(identity), storage, functionApp(account, storage)
fn foundry_plan() -> DeploymentPlan {
    DeploymentPlan::new("foundry")
        .with_module(Module::new("identity").outputs(["principalId"]))
        .with_module(
            Module::new("account")
                .depends_on(["identity"])
                .literal("sku", "S0")
                .reference("principalId", "identity", "principalId")
                .outputs(["endpoint"]),
        )
        .with_module(Module::new("storage").outputs(["name"]))
        .with_module(
            Module::new("functionApp")
                .depends_on(["account", "storage"])
                .reference("endpoint", "account", "endpoint")
                .reference("storageName", "storage", "name"),
        )
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5)),
    )
}

fn executor(mock: &MockProvider) -> Executor {
    Executor::new(Arc::new(mock.clone())).with_retry(fast_retry())
}

fn dev() -> GlobalParams {
    GlobalParams::default()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_applies_every_module_and_threads_outputs() {
    let mock = MockProvider::new();
    let outcome = executor(&mock).apply(&foundry_plan(), dev()).await.unwrap();

    assert!(outcome.is_success(), "{}", outcome.report);
    assert_eq!(outcome.count(ModuleState::Applied), 4);
    assert_eq!(mock.call_count(), 4);

    let account = mock.last_request("account").unwrap();
    assert_eq!(account.inputs["sku"], json!("S0"));
    assert_eq!(account.inputs["principalId"], json!("identity-principalId-dev"));

    let app = mock.last_request("functionApp").unwrap();
    assert_eq!(app.inputs["endpoint"], json!("account-endpoint-dev"));
    assert_eq!(app.inputs["storageName"], json!("storage-name-dev"));

    // No plan outputs declared: every module output is exposed
    assert_eq!(outcome.outputs["storage.name"], json!("storage-name-dev"));
    assert_eq!(outcome.outputs["functionApp.id"], json!("functionApp-dev"));
}

#[tokio::test]
async fn test_dependencies_are_applied_first() {
    let mock = MockProvider::new();
    executor(&mock).apply(&foundry_plan(), dev()).await.unwrap();

    let order: Vec<String> = mock.requests().into_iter().map(|r| r.module).collect();
    let position = |name: &str| order.iter().position(|m| m == name).unwrap();
    assert!(position("identity") < position("account"));
    assert!(position("account") < position("functionApp"));
    assert!(position("storage") < position("functionApp"));
}

#[tokio::test]
async fn test_declared_plan_outputs_only() {
    let plan = foundry_plan().with_output("principal", "identity", "principalId");
    let mock = MockProvider::new();
    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();

    let expected = BTreeMap::from([("principal".to_string(), json!("identity-principalId-dev"))]);
    assert_eq!(outcome.outputs, expected);
}

#[tokio::test]
async fn test_global_params_reach_every_module() {
    let mock = MockProvider::new();
    let params = GlobalParams::new(EnvironmentType::Sweden, Region::SwedenCentral);
    executor(&mock).apply(&foundry_plan(), params).await.unwrap();

    for request in mock.requests() {
        assert_eq!(request.params, params, "module {}", request.module);
    }
}

#[tokio::test]
async fn test_empty_plan_succeeds_with_empty_outputs() {
    let mock = MockProvider::new();
    let outcome = executor(&mock)
        .apply(&DeploymentPlan::new("empty"), dev())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert!(outcome.outputs.is_empty());
    assert_eq!(mock.call_count(), 0);
}

// ============================================================================
// Validation happens before any provider call
// ============================================================================

#[tokio::test]
async fn test_cycle_aborts_before_provider_call() {
    let plan = DeploymentPlan::new("cycle")
        .with_module(Module::new("a").depends_on(["b"]))
        .with_module(Module::new("b").depends_on(["a"]));
    let mock = MockProvider::new();

    let err = executor(&mock).apply(&plan, dev()).await.unwrap_err();
    assert_eq!(err.code(), "FD-020");
    assert!(err.to_string().contains("FD-014"));
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_reference_without_dependency_aborts() {
    let plan = DeploymentPlan::new("implicit")
        .with_module(Module::new("identity"))
        .with_module(Module::new("account").reference("principalId", "identity", "id"));
    let mock = MockProvider::new();

    let err = executor(&mock).apply(&plan, dev()).await.unwrap_err();
    assert!(err.to_string().contains("FD-017"));
    assert_eq!(mock.call_count(), 0);
}

// ============================================================================
// Failure containment
// ============================================================================

#[tokio::test]
async fn test_failed_module_skips_dependents_only() {
    let mock = MockProvider::new();
    mock.fail_module("account", "quota exceeded for S0");

    let outcome = executor(&mock).apply(&foundry_plan(), dev()).await.unwrap();

    assert!(!outcome.is_success());
    assert_eq!(outcome.state("identity"), Some(ModuleState::Applied));
    assert_eq!(outcome.state("storage"), Some(ModuleState::Applied));
    assert_eq!(outcome.state("account"), Some(ModuleState::Failed));
    assert_eq!(outcome.state("functionApp"), Some(ModuleState::Skipped));

    assert_eq!(outcome.report.failed_modules(), vec!["account"]);
    assert_eq!(outcome.report.skipped_modules(), vec!["functionApp"]);
    assert!(outcome.report.reason("account").unwrap().contains("quota exceeded"));
    assert_eq!(
        outcome.report.reason("functionApp"),
        Some("dependency 'account' failed")
    );
    assert_eq!(mock.calls_for("functionApp"), 0);
}

#[tokio::test]
async fn test_skip_propagates_transitively() {
    let plan = DeploymentPlan::new("chain")
        .with_module(Module::new("a"))
        .with_module(Module::new("b").depends_on(["a"]))
        .with_module(Module::new("c").depends_on(["b"]))
        .with_module(Module::new("d"));
    let mock = MockProvider::new();
    mock.fail_module("a", "boom");

    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();
    assert_eq!(outcome.state("b"), Some(ModuleState::Skipped));
    assert_eq!(outcome.state("c"), Some(ModuleState::Skipped));
    assert_eq!(outcome.state("d"), Some(ModuleState::Applied));
    assert_eq!(outcome.report.reason("c"), Some("dependency 'b' skipped"));
}

#[tokio::test]
async fn test_missing_referenced_output_fails_dependent() {
    let plan = DeploymentPlan::new("missing")
        .with_module(Module::new("identity"))
        .with_module(
            Module::new("account")
                .depends_on(["identity"])
                .reference("principalId", "identity", "principalId"),
        );
    let mock = MockProvider::new();
    mock.set_outputs("identity", ModuleOutputs::from([("clientId".to_string(), json!("c"))]));

    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();
    assert_eq!(outcome.state("identity"), Some(ModuleState::Applied));
    assert_eq!(outcome.state("account"), Some(ModuleState::Failed));
    assert!(outcome.report.reason("account").unwrap().contains("FD-031"));
    assert_eq!(mock.calls_for("account"), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let mock = MockProvider::new();
    mock.fail_transiently("storage", 2);

    let outcome = executor(&mock).apply(&foundry_plan(), dev()).await.unwrap();
    assert!(outcome.is_success(), "{}", outcome.report);
    assert_eq!(mock.calls_for("storage"), 3);
}

#[tokio::test]
async fn test_exhausted_retries_fail_as_transport() {
    let mock = MockProvider::new();
    mock.fail_transiently("storage", 10);
    let executor = Executor::new(Arc::new(mock.clone())).with_retry(RetryPolicy::new(
        RetryConfig::default()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1)),
    ));

    let outcome = executor.apply(&foundry_plan(), dev()).await.unwrap();
    assert_eq!(outcome.state("storage"), Some(ModuleState::Failed));
    assert!(outcome.report.reason("storage").unwrap().contains("FD-050"));
    assert_eq!(mock.calls_for("storage"), 2);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let mock = MockProvider::new();
    mock.fail_module("identity", "invalid principal");

    executor(&mock).apply(&foundry_plan(), dev()).await.unwrap();
    assert_eq!(mock.calls_for("identity"), 1);
}

struct PanickingProvider;

#[async_trait]
impl ModuleProvider for PanickingProvider {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn apply_module(&self, request: &ApplyRequest) -> AnyResult<ModuleOutputs> {
        if request.module == "storage" {
            panic!("provider bug");
        }
        Ok(ModuleOutputs::new())
    }
}

#[tokio::test]
async fn test_panicking_provider_fails_only_that_module() {
    let plan = DeploymentPlan::new("panic")
        .with_module(Module::new("identity"))
        .with_module(Module::new("storage"))
        .with_module(Module::new("app").depends_on(["storage"]));

    let outcome = Executor::new(Arc::new(PanickingProvider))
        .apply(&plan, dev())
        .await
        .unwrap();

    assert_eq!(outcome.state("identity"), Some(ModuleState::Applied));
    assert_eq!(outcome.state("storage"), Some(ModuleState::Failed));
    assert_eq!(outcome.state("app"), Some(ModuleState::Skipped));
    assert!(outcome.report.reason("storage").unwrap().contains("provider bug"));
}

// ============================================================================
// Fail-fast and cancellation
// ============================================================================

#[tokio::test]
async fn test_fail_fast_cancels_later_waves() {
    let plan = foundry_plan()
        .with_module(Module::new("monitoring").depends_on(["storage"]))
        .with_fail_fast(true);
    let mock = MockProvider::new();
    mock.fail_module("identity", "denied");

    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();

    // Same wave as the failure: already started, still applied
    assert_eq!(outcome.state("storage"), Some(ModuleState::Applied));
    // Later waves never start, even branches that do not depend on identity
    assert_eq!(outcome.state("monitoring"), Some(ModuleState::Skipped));
    assert_eq!(outcome.report.reason("monitoring"), Some("cancelled"));
    assert_eq!(outcome.report.reason("account"), Some("cancelled"));
    assert_eq!(mock.calls_for("monitoring"), 0);
}

#[tokio::test]
async fn test_without_fail_fast_independent_branches_continue() {
    let plan = foundry_plan().with_module(Module::new("monitoring").depends_on(["storage"]));
    let mock = MockProvider::new();
    mock.fail_module("identity", "denied");

    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();
    assert_eq!(outcome.state("monitoring"), Some(ModuleState::Applied));
    assert_eq!(outcome.report.reason("account"), Some("dependency 'identity' failed"));
}

#[tokio::test]
async fn test_cancellation_token_skips_everything_not_started() {
    let mock = MockProvider::new();
    let executor = executor(&mock);
    executor.cancellation_token().cancel();

    let outcome = executor.apply(&foundry_plan(), dev()).await.unwrap();
    assert_eq!(outcome.count(ModuleState::Skipped), 4);
    assert_eq!(outcome.report.reason("identity"), Some("cancelled"));
    assert_eq!(mock.call_count(), 0);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_rerun_with_unchanged_inputs_makes_no_calls() {
    let mock = MockProvider::new();
    let executor = executor(&mock);

    let first = executor.apply(&foundry_plan(), dev()).await.unwrap();
    mock.clear_requests();
    let second = executor.apply(&foundry_plan(), dev()).await.unwrap();

    assert_eq!(mock.call_count(), 0);
    assert!(second.is_success());
    assert_eq!(second.unchanged.len(), 4);
    assert_eq!(second.outputs, first.outputs);
}

#[tokio::test]
async fn test_changed_literal_reapplies_only_that_module() {
    let mock = MockProvider::new();
    let executor = executor(&mock);
    executor.apply(&foundry_plan(), dev()).await.unwrap();
    mock.clear_requests();

    let mut plan = foundry_plan();
    plan.modules[2] = Module::new("storage").outputs(["name"]).literal("sku", "Standard_GRS");
    let outcome = executor.apply(&plan, dev()).await.unwrap();

    // storage outputs are unchanged, so functionApp's fingerprint is too
    assert_eq!(mock.call_count(), 1);
    assert_eq!(mock.calls_for("storage"), 1);
    assert!(!outcome.unchanged.contains(&"storage".to_string()));
    assert!(outcome.unchanged.contains(&"functionApp".to_string()));
}

#[tokio::test]
async fn test_changed_params_reapply_everything() {
    let mock = MockProvider::new();
    let executor = executor(&mock);
    executor.apply(&foundry_plan(), dev()).await.unwrap();
    mock.clear_requests();

    let prod = GlobalParams::new(EnvironmentType::Prod, Region::EastUs);
    executor.apply(&foundry_plan(), prod).await.unwrap();
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test]
async fn test_failed_module_is_retried_on_next_run() {
    let mock = MockProvider::new();
    mock.fail_module("account", "quota exceeded");
    let executor = executor(&mock);
    executor.apply(&foundry_plan(), dev()).await.unwrap();

    mock.clear_module("account");
    mock.clear_requests();
    let outcome = executor.apply(&foundry_plan(), dev()).await.unwrap();

    assert!(outcome.is_success(), "{}", outcome.report);
    assert_eq!(mock.calls_for("account"), 1);
    assert_eq!(mock.calls_for("functionApp"), 1);
    assert_eq!(mock.calls_for("identity"), 0);
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_failed_reapply_forgets_previous_snapshot() {
    let storage = |sku: &str| Module::new("storage").outputs(["name"]).literal("sku", sku);
    let mock = MockProvider::new();
    let executor = executor(&mock);

    let mut plan = foundry_plan();
    plan.modules[2] = storage("S0");
    executor.apply(&plan, dev()).await.unwrap();

    plan.modules[2] = storage("S1");
    mock.fail_module("storage", "sku not available");
    let outcome = executor.apply(&plan, dev()).await.unwrap();
    assert_eq!(outcome.state("storage"), Some(ModuleState::Failed));

    // Back to the inputs of the last success: the failed apply must not count as unchanged
    mock.clear_module("storage");
    mock.clear_requests();
    plan.modules[2] = storage("S0");
    let outcome = executor.apply(&plan, dev()).await.unwrap();

    assert!(outcome.is_success(), "{}", outcome.report);
    assert_eq!(mock.calls_for("storage"), 1);
    assert!(!outcome.unchanged.contains(&"storage".to_string()));
}

#[tokio::test]
async fn test_file_state_survives_new_executor() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let first = MockProvider::new();
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(&path).unwrap());
    executor(&first)
        .with_state_store(store)
        .apply(&foundry_plan(), dev())
        .await
        .unwrap();
    assert!(path.exists());

    let second = MockProvider::new();
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::open(&path).unwrap());
    let outcome = executor(&second)
        .with_state_store(store)
        .apply(&foundry_plan(), dev())
        .await
        .unwrap();

    assert_eq!(second.call_count(), 0);
    assert_eq!(outcome.count(ModuleState::Applied), 4);
}

// ============================================================================
// Concurrency and events
// ============================================================================

#[tokio::test]
async fn test_wave_members_run_concurrently() {
    let mut plan = DeploymentPlan::new("wide");
    for i in 0..8 {
        plan = plan.with_module(Module::new(format!("m{}", i)));
    }
    let mock = MockProvider::new().with_delay(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let outcome = executor(&mock).apply(&plan, dev()).await.unwrap();

    assert!(outcome.is_success());
    assert!(started.elapsed() < Duration::from_millis(700));
}

#[tokio::test]
async fn test_event_log_records_the_run() {
    let mock = MockProvider::new();
    mock.fail_module("account", "quota exceeded");
    let executor = executor(&mock);
    executor.apply(&foundry_plan(), dev()).await.unwrap();

    let log = executor.event_log();
    let events = log.events();
    assert!(matches!(events.first().unwrap().kind, EventKind::DeploymentStarted { .. }));
    assert!(matches!(
        events.last().unwrap().kind,
        EventKind::DeploymentCompleted { applied: 2, failed: 1, skipped: 1, .. }
    ));
    assert_eq!(log.count(|k| matches!(k, EventKind::WaveStarted { .. })), 3);
    assert_eq!(log.count(|k| matches!(k, EventKind::ModuleApplied { .. })), 2);
    assert_eq!(log.count(|k| matches!(k, EventKind::ModuleFailed { .. })), 1);
    assert_eq!(log.count(|k| matches!(k, EventKind::ModuleSkipped { .. })), 1);

    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}
