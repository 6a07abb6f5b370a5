// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

//! Error types with error codes and fix suggestions
//!
//! Error code ranges:
//! - FD-000-009: Plan parsing errors
//! - FD-010-029: Plan validation errors
//! - FD-030-039: Module apply errors
//! - FD-040-049: State store errors
//! - FD-050-059: Queue / correlation errors
//! - FD-060-069: Configuration errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeployError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

fn join_issues(issues: &[DeployError]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum DeployError {
    // ═══════════════════════════════════════════
    // PLAN ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[FD-001] Failed to parse plan: {details}")]
    ParseError { details: String },

    #[error("[FD-002] Invalid schema: expected '{expected}', got '{actual}'")]
    InvalidSchema { expected: String, actual: String },

    #[error("[FD-003] Invalid parameter '{name}': '{value}' (expected one of: {expected})")]
    InvalidParam {
        name: String,
        value: String,
        expected: String,
    },

    #[error("[FD-004] IO error: {0}")]
    Io(#[from] std::io::Error),

    // ═══════════════════════════════════════════
    // VALIDATION ERRORS (010-029)
    // ═══════════════════════════════════════════
    #[error("[FD-010] Duplicate module name '{name}'")]
    DuplicateModule { name: String },

    #[error("[FD-011] Invalid module name '{name}' (expected [a-z][a-zA-Z0-9_-]*)")]
    InvalidModuleName { name: String },

    #[error("[FD-012] Module '{module}' depends on unknown module '{dependency}'")]
    UnknownDependency { module: String, dependency: String },

    #[error("[FD-013] Module '{module}' depends on itself")]
    SelfDependency { module: String },

    #[error("[FD-014] Cycle detected in plan: {cycle}")]
    CycleDetected { cycle: String },

    #[error("[FD-015] Input '{input}' of '{module}' references unknown module '{from}'")]
    UnknownReference {
        module: String,
        input: String,
        from: String,
    },

    #[error("[FD-016] Input '{input}' of '{module}' references its own outputs")]
    SelfReference { module: String, input: String },

    #[error("[FD-017] Input '{input}' of '{module}' references '{from}', which is not in its depends_on")]
    UndeclaredDependency {
        module: String,
        input: String,
        from: String,
    },

    #[error("[FD-018] Input '{input}' of '{module}' references output '{output}', which '{from}' does not declare")]
    UndeclaredOutput {
        module: String,
        input: String,
        from: String,
        output: String,
    },

    #[error("[FD-019] Plan output '{name}' references unknown module '{from}'")]
    UnknownPlanOutput { name: String, from: String },

    #[error("[FD-020] Plan validation failed with {} issue(s): {}", .issues.len(), join_issues(.issues))]
    PlanInvalid { issues: Vec<DeployError> },

    // ═══════════════════════════════════════════
    // APPLY ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[FD-030] Module '{module}' failed: {reason}")]
    ModuleApply { module: String, reason: String },

    #[error("[FD-031] Module '{module}' needs output '{output}' from '{from}', which was not produced")]
    MissingOutput {
        module: String,
        from: String,
        output: String,
    },

    #[error("[FD-032] Outputs of module '{module}' were already written")]
    OutputAlreadyWritten { module: String },

    #[error("[FD-033] Module '{module}' cannot move from {from} to {to}")]
    InvalidTransition {
        module: String,
        from: String,
        to: String,
    },

    #[error("[FD-034] Unknown provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error("[FD-035] Module task panicked: {reason}")]
    ModulePanicked { reason: String },

    // ═══════════════════════════════════════════
    // STATE ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[FD-040] State store error: {reason}")]
    StateStore { reason: String },

    // ═══════════════════════════════════════════
    // QUEUE ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[FD-050] Transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("[FD-051] No response for request '{correlation_id}' within {timeout_ms}ms")]
    Timeout {
        correlation_id: String,
        timeout_ms: u64,
    },

    #[error("[FD-052] Response '{correlation_id}' matches no pending request")]
    CorrelationMismatch { correlation_id: String },

    #[error("[FD-053] Invalid queue message: {reason}")]
    InvalidMessage { reason: String },

    #[error("[FD-054] Message '{message_id}' not found or lease expired")]
    MessageNotFound { message_id: String },

    #[error("[FD-055] Handler failed for request '{correlation_id}': {reason}")]
    Handler {
        correlation_id: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[FD-060] Configuration error: {reason}")]
    Config { reason: String },
}

impl From<serde_yaml::Error> for DeployError {
    fn from(err: serde_yaml::Error) -> Self {
        DeployError::ParseError {
            details: err.to_string(),
        }
    }
}

impl DeployError {
    /// Stable error code (e.g. `FD-014`)
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "FD-001",
            Self::InvalidSchema { .. } => "FD-002",
            Self::InvalidParam { .. } => "FD-003",
            Self::Io(_) => "FD-004",
            Self::DuplicateModule { .. } => "FD-010",
            Self::InvalidModuleName { .. } => "FD-011",
            Self::UnknownDependency { .. } => "FD-012",
            Self::SelfDependency { .. } => "FD-013",
            Self::CycleDetected { .. } => "FD-014",
            Self::UnknownReference { .. } => "FD-015",
            Self::SelfReference { .. } => "FD-016",
            Self::UndeclaredDependency { .. } => "FD-017",
            Self::UndeclaredOutput { .. } => "FD-018",
            Self::UnknownPlanOutput { .. } => "FD-019",
            Self::PlanInvalid { .. } => "FD-020",
            Self::ModuleApply { .. } => "FD-030",
            Self::MissingOutput { .. } => "FD-031",
            Self::OutputAlreadyWritten { .. } => "FD-032",
            Self::InvalidTransition { .. } => "FD-033",
            Self::UnknownProvider { .. } => "FD-034",
            Self::ModulePanicked { .. } => "FD-035",
            Self::StateStore { .. } => "FD-040",
            Self::Transport { .. } => "FD-050",
            Self::Timeout { .. } => "FD-051",
            Self::CorrelationMismatch { .. } => "FD-052",
            Self::InvalidMessage { .. } => "FD-053",
            Self::MessageNotFound { .. } => "FD-054",
            Self::Handler { .. } => "FD-055",
            Self::Config { .. } => "FD-060",
        }
    }

    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Shorthand for a transport failure
    pub fn transport(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

impl FixSuggestion for DeployError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            DeployError::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            DeployError::InvalidSchema { .. } => Some("Use 'schema: foundry/plan@0.1'"),
            DeployError::InvalidParam { .. } => Some("Pick one of the listed values"),
            DeployError::Io(_) => Some("Check file path and permissions"),
            DeployError::DuplicateModule { .. } => Some("Give every module a unique name"),
            DeployError::InvalidModuleName { .. } => {
                Some("Start module names with a lowercase letter; use letters, digits, '-' or '_'")
            }
            DeployError::UnknownDependency { .. } => {
                Some("Fix the typo in depends_on or add the missing module")
            }
            DeployError::SelfDependency { .. } => Some("Remove the module from its own depends_on"),
            DeployError::CycleDetected { .. } => {
                Some("Break the cycle: one of the modules must not depend on the others")
            }
            DeployError::UnknownReference { .. } => {
                Some("Reference an existing module in 'from:'")
            }
            DeployError::SelfReference { .. } => {
                Some("A module cannot consume its own outputs; split it into two modules")
            }
            DeployError::UndeclaredDependency { .. } => {
                Some("Add the referenced module to depends_on")
            }
            DeployError::UndeclaredOutput { .. } => {
                Some("Add the key to the producer's outputs list or fix the output name")
            }
            DeployError::UnknownPlanOutput { .. } => {
                Some("Plan outputs must reference modules defined in the plan")
            }
            DeployError::PlanInvalid { .. } => Some("Fix the listed issues and re-run validate"),
            DeployError::ModuleApply { .. } => {
                Some("Inspect the provider error; dependents were skipped")
            }
            DeployError::MissingOutput { .. } => {
                Some("Make the producing module return the referenced output key")
            }
            DeployError::OutputAlreadyWritten { .. } => None,
            DeployError::InvalidTransition { .. } => None,
            DeployError::UnknownProvider { .. } => Some("Use --provider mock or --provider command"),
            DeployError::ModulePanicked { .. } => None,
            DeployError::StateStore { .. } => {
                Some("Check the state file is valid JSON and writable")
            }
            DeployError::Transport { .. } => {
                Some("Check the queue or provider endpoint is reachable, then retry")
            }
            DeployError::Timeout { .. } => {
                Some("Check a worker is running, or raise the response timeout")
            }
            DeployError::CorrelationMismatch { .. } => None,
            DeployError::InvalidMessage { .. } => {
                Some("Messages must be JSON objects with a correlationId")
            }
            DeployError::MessageNotFound { .. } => {
                Some("Raise the visibility timeout so processing finishes within the lease")
            }
            DeployError::Handler { .. } => Some("Inspect the worker logs for the handler failure"),
            DeployError::Config { .. } => {
                Some("Check ~/.config/foundry-deploy/config.toml syntax")
            }
        }
    }
}

/// Message carried by a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
