//! # Provider Abstraction Layer
//!
//! How the executor talks to the system that actually creates resources.
//!
//! - [`ModuleProvider`] - Core trait: apply one module, return its outputs
//! - [`CommandProvider`] - Runs the module's `command` through `sh -c`
//! - [`MockProvider`] - Deterministic outputs, call recording, failure injection
//!
//! ## Creating Providers
//!
//! Use [`create_provider`] to instantiate a provider by name:
//!
//! ```rust
//! use foundry_deploy::provider::create_provider;
//!
//! assert!(create_provider("mock").is_ok());
//! assert!(create_provider("command").is_ok());
//! assert!(create_provider("bicep").is_err());
//! ```

mod command;
mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ast::GlobalParams;
use crate::error::DeployError;

pub use command::CommandProvider;
pub use mock::MockProvider;

/// Output key -> value, as returned by a provider
pub type ModuleOutputs = BTreeMap<String, Value>;

/// Everything a provider needs to apply one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub module: String,
    /// Literals and resolved references
    pub inputs: BTreeMap<String, Value>,
    pub params: GlobalParams,
    /// Output keys the module declares (may be empty)
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Applies modules against a target environment
#[async_trait]
pub trait ModuleProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Create or update the module's resources and return its outputs
    async fn apply_module(&self, request: &ApplyRequest) -> Result<ModuleOutputs>;
}

/// Provider names accepted by [`create_provider`]
pub const PROVIDERS: [&str; 2] = ["mock", "command"];

/// Create a provider by name
pub fn create_provider(name: &str) -> crate::error::Result<Arc<dyn ModuleProvider>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mock" => Ok(Arc::new(MockProvider::new())),
        "command" | "cmd" => Ok(Arc::new(CommandProvider::new())),
        _ => Err(DeployError::UnknownProvider {
            provider: name.to_string(),
        }),
    }
}
