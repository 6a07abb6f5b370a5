//! Run results - module states, failure report and apply outcome

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeployError, Result};

/// Lifecycle of a module within one run
///
/// ```text
/// Pending ─► Ready ─► Applying ─► Applied | Failed
///    │         ├──────────────► Applied   (unchanged, outputs reused)
///    │         └──────────────► Failed    (inputs could not be resolved)
///    └───────────────────────► Skipped    (dependency not applied, or cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Pending,
    Ready,
    Applying,
    Applied,
    Failed,
    Skipped,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }

    pub fn can_transition_to(&self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Applying)
                | (Ready, Applied)
                | (Ready, Failed)
                | (Ready, Skipped)
                | (Applying, Applied)
                | (Applying, Failed)
        )
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of every module in a run, owned by the executor
#[derive(Debug, Clone, Default)]
pub struct ModuleStates {
    states: FxHashMap<Arc<str>, ModuleState>,
}

impl ModuleStates {
    /// Every module starts `Pending`
    pub fn new<'a>(modules: impl IntoIterator<Item = &'a Arc<str>>) -> Self {
        Self {
            states: modules
                .into_iter()
                .map(|m| (Arc::clone(m), ModuleState::Pending))
                .collect(),
        }
    }

    pub fn get(&self, module: &str) -> Option<ModuleState> {
        self.states.get(module).copied()
    }

    /// Move a module to `next`, rejecting transitions the lifecycle forbids
    pub fn transition(&mut self, module: &str, next: ModuleState) -> Result<()> {
        let current = self
            .states
            .get_mut(module)
            .ok_or_else(|| DeployError::InvalidTransition {
                module: module.to_string(),
                from: "unknown".to_string(),
                to: next.to_string(),
            })?;

        if !current.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                module: module.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *current = next;
        Ok(())
    }

    /// Modules currently in `state`
    pub fn in_state(&self, state: ModuleState) -> Vec<Arc<str>> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(m, _)| Arc::clone(m))
            .collect()
    }

    pub fn to_map(&self) -> BTreeMap<String, ModuleState> {
        self.states
            .iter()
            .map(|(m, s)| (m.to_string(), *s))
            .collect()
    }
}

/// A module that did not apply, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: String,
    pub reason: String,
}

/// Every failed and skipped module of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failed: Vec<ModuleFailure>,
    pub skipped: Vec<ModuleFailure>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn record_failed(&mut self, module: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(ModuleFailure {
            module: module.into(),
            reason: reason.into(),
        });
    }

    pub fn record_skipped(&mut self, module: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(ModuleFailure {
            module: module.into(),
            reason: reason.into(),
        });
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.module.as_str()).collect()
    }

    pub fn skipped_modules(&self) -> Vec<&str> {
        self.skipped.iter().map(|f| f.module.as_str()).collect()
    }

    /// Reason recorded for a module, failed or skipped
    pub fn reason(&self, module: &str) -> Option<&str> {
        self.failed
            .iter()
            .chain(&self.skipped)
            .find(|f| f.module == module)
            .map(|f| f.reason.as_str())
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for failure in &self.failed {
            writeln!(f, "failed  {}: {}", failure.module, failure.reason)?;
        }
        for skipped in &self.skipped {
            writeln!(f, "skipped {}: {}", skipped.module, skipped.reason)?;
        }
        Ok(())
    }
}

/// Result of `Executor::apply`
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub deployment_id: String,
    /// Deployment outputs (declared plan outputs, or every `<module>.<key>`)
    pub outputs: BTreeMap<String, Value>,
    /// Terminal state of every module
    pub states: BTreeMap<String, ModuleState>,
    pub report: FailureReport,
    /// Modules whose stored outputs were reused without a provider call
    pub unchanged: Vec<String>,
    pub duration_ms: u64,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        self.report.is_empty()
    }

    pub fn state(&self, module: &str) -> Option<ModuleState> {
        self.states.get(module).copied()
    }

    pub fn count(&self, state: ModuleState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }
}
