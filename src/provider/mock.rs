//! Mock provider for testing and dry runs
//!
//! Produces deterministic outputs without touching any real environment:
//! each declared output key maps to `"<module>-<key>-<environment>"`.
//! Modules without declared outputs get a single `id` output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{ApplyRequest, ModuleOutputs, ModuleProvider};

/// Injected behaviour for one module
#[derive(Debug, Clone)]
enum Injection {
    /// Fail every call
    Fail(String),
    /// Fail the first N calls with a transient error, then succeed
    Transient(usize),
    /// Return exactly these outputs
    Outputs(ModuleOutputs),
}

/// Mock provider with call recording and failure injection
#[derive(Clone, Default)]
pub struct MockProvider {
    injections: Arc<Mutex<FxHashMap<String, Injection>>>,
    /// Every request received, in call order
    requests: Arc<Mutex<Vec<ApplyRequest>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every apply of `module` fail with `reason`
    pub fn fail_module(&self, module: impl Into<String>, reason: impl Into<String>) {
        self.injections
            .lock()
            .insert(module.into(), Injection::Fail(reason.into()));
    }

    /// Fail the first `times` applies of `module` with a retryable error
    pub fn fail_transiently(&self, module: impl Into<String>, times: usize) {
        self.injections
            .lock()
            .insert(module.into(), Injection::Transient(times));
    }

    /// Return `outputs` for `module` instead of the generated ones
    pub fn set_outputs(&self, module: impl Into<String>, outputs: ModuleOutputs) {
        self.injections
            .lock()
            .insert(module.into(), Injection::Outputs(outputs));
    }

    /// Remove any injection for `module`
    pub fn clear_module(&self, module: &str) {
        self.injections.lock().remove(module);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls for one module
    pub fn calls_for(&self, module: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.module == module)
            .count()
    }

    pub fn requests(&self) -> Vec<ApplyRequest> {
        self.requests.lock().clone()
    }

    /// Most recent request for `module`
    pub fn last_request(&self, module: &str) -> Option<ApplyRequest> {
        self.requests
            .lock()
            .iter()
            .rev()
            .find(|r| r.module == module)
            .cloned()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
        self.calls.store(0, Ordering::SeqCst);
    }

    fn generated_outputs(request: &ApplyRequest) -> ModuleOutputs {
        let environment = request.params.environment.as_str();
        if request.outputs.is_empty() {
            return ModuleOutputs::from([(
                "id".to_string(),
                Value::String(format!("{}-{}", request.module, environment)),
            )]);
        }
        request
            .outputs
            .iter()
            .map(|key| {
                let value = format!("{}-{}-{}", request.module, key, environment);
                (key.clone(), Value::String(value))
            })
            .collect()
    }
}

#[async_trait]
impl ModuleProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn apply_module(&self, request: &ApplyRequest) -> Result<ModuleOutputs> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        // Decide under the lock, act after releasing it
        let injection = {
            let mut injections = self.injections.lock();
            match injections.get_mut(&request.module) {
                Some(Injection::Transient(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(Injection::Transient(*remaining))
                }
                Some(Injection::Transient(_)) => None,
                other => other.cloned(),
            }
        };

        match injection {
            Some(Injection::Fail(reason)) => bail!("{}", reason),
            Some(Injection::Transient(_)) => {
                bail!("service unavailable (503) applying '{}'", request.module)
            }
            Some(Injection::Outputs(outputs)) => Ok(outputs),
            None => Ok(Self::generated_outputs(request)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnvironmentType, GlobalParams, Region};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn request(module: &str, outputs: &[&str]) -> ApplyRequest {
        ApplyRequest {
            module: module.to_string(),
            inputs: BTreeMap::new(),
            params: GlobalParams::new(EnvironmentType::Prod, Region::SwedenCentral),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            command: None,
        }
    }

    #[tokio::test]
    async fn outputs_follow_declared_keys() {
        let provider = MockProvider::new();
        let outputs = provider
            .apply_module(&request("identity", &["principalId", "clientId"]))
            .await
            .unwrap();
        assert_eq!(outputs["principalId"], json!("identity-principalId-prod"));
        assert_eq!(outputs["clientId"], json!("identity-clientId-prod"));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn undeclared_outputs_get_an_id() {
        let provider = MockProvider::new();
        let outputs = provider.apply_module(&request("storage", &[])).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["id"], json!("storage-prod"));
    }

    #[tokio::test]
    async fn injected_failure() {
        let provider = MockProvider::new();
        provider.fail_module("account", "quota exceeded");
        let err = provider.apply_module(&request("account", &[])).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));

        provider.clear_module("account");
        assert!(provider.apply_module(&request("account", &[])).await.is_ok());
        assert_eq!(provider.calls_for("account"), 2);
    }

    #[tokio::test]
    async fn transient_failures_run_out() {
        let provider = MockProvider::new();
        provider.fail_transiently("account", 2);
        assert!(provider.apply_module(&request("account", &[])).await.is_err());
        assert!(provider.apply_module(&request("account", &[])).await.is_err());
        assert!(provider.apply_module(&request("account", &[])).await.is_ok());
    }

    #[tokio::test]
    async fn injected_outputs_and_recording() {
        let provider = MockProvider::new();
        provider.set_outputs("account", ModuleOutputs::from([("name".to_string(), json!("acct"))]));
        let outputs = provider.apply_module(&request("account", &["name"])).await.unwrap();
        assert_eq!(outputs["name"], json!("acct"));
        assert_eq!(provider.last_request("account").unwrap().module, "account");

        provider.clear_requests();
        assert_eq!(provider.call_count(), 0);
        assert!(provider.requests().is_empty());
    }
}
