//! Plan Types - deployment plan structure
//!
//! - `DeploymentPlan`: root plan with modules, global params and outputs
//! - `Module`: one unit of infrastructure work with explicit `depends_on`
//! - `InputValue`: literal value or reference to another module's output
//!
//! ```yaml
//! schema: foundry/plan@0.1
//! name: foundry-agents
//! params:
//!   environment: dev
//!   region: eastus
//! modules:
//!   - name: identity
//!     outputs: [principalId]
//!   - name: account
//!     depends_on: [identity]
//!     inputs:
//!       sku: S0
//!       principalId: { from: identity, output: principalId }
//! outputs:
//!   accountPrincipal: { from: identity, output: principalId }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeployError, Result};

use super::params::GlobalParams;

/// Expected schema version for v0.1 plans
pub const SCHEMA_V01: &str = "foundry/plan@0.1";

fn default_plan_name() -> String {
    "foundry-deployment".to_string()
}

/// Reference to an output of another module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputRef {
    /// Producing module
    pub from: String,
    /// Output key on the producing module
    pub output: String,
}

impl OutputRef {
    pub fn new(from: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            output: output.into(),
        }
    }
}

/// Module input value
///
/// Order matters for serde untagged: a `{from, output}` object is a
/// reference, anything else is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Reference(OutputRef),
    Literal(Value),
}

impl InputValue {
    pub fn as_reference(&self) -> Option<&OutputRef> {
        match self {
            InputValue::Reference(r) => Some(r),
            InputValue::Literal(_) => None,
        }
    }
}

/// A named unit of infrastructure work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,

    /// Modules that must be applied first
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,

    /// Parameter name -> literal or reference
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,

    /// Output keys this module promises (empty = unchecked)
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Shell command for the command provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            command: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Add a literal input
    pub fn literal(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Literal(value.into()));
        self
    }

    /// Add a reference input `{ from, output }`
    pub fn reference(
        mut self,
        name: impl Into<String>,
        from: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.inputs
            .insert(name.into(), InputValue::Reference(OutputRef::new(from, output)));
        self
    }

    pub fn outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Iterate over reference inputs as (input name, reference)
    pub fn references(&self) -> impl Iterator<Item = (&str, &OutputRef)> {
        self.inputs
            .iter()
            .filter_map(|(name, value)| value.as_reference().map(|r| (name.as_str(), r)))
    }
}

/// Deployment plan parsed from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub schema: String,

    #[serde(default = "default_plan_name")]
    pub name: String,

    #[serde(default)]
    pub params: GlobalParams,

    /// Cancel later waves as soon as a module fails
    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub modules: Vec<Module>,

    /// Deployment output name -> module output
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputRef>,
}

impl DeploymentPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_V01.to_string(),
            name: name.into(),
            params: GlobalParams::default(),
            fail_fast: false,
            modules: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Parse and check the schema version
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let plan: DeploymentPlan = serde_yaml::from_str(yaml)?;
        plan.validate_schema()?;
        Ok(plan)
    }

    pub fn validate_schema(&self) -> Result<()> {
        if self.schema != SCHEMA_V01 {
            return Err(DeployError::InvalidSchema {
                expected: SCHEMA_V01.to_string(),
                actual: self.schema.clone(),
            });
        }
        Ok(())
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_params(mut self, params: GlobalParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_output(
        mut self,
        name: impl Into<String>,
        from: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.outputs.insert(name.into(), OutputRef::new(from, output));
        self
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnvironmentType, Region};
    use serde_json::json;

    const FOUNDRY_PLAN: &str = r#"
schema: foundry/plan@0.1
name: foundry-agents
params:
  environment: prod
  region: swedencentral
modules:
  - name: identity
    outputs: [principalId, clientId]
  - name: account
    dependsOn: [identity]
    inputs:
      sku: S0
      capacity: 50
      principalId: { from: identity, output: principalId }
outputs:
  clientId: { from: identity, output: clientId }
"#;

    #[test]
    fn parse_plan_with_references_and_literals() {
        let plan = DeploymentPlan::from_yaml(FOUNDRY_PLAN).unwrap();
        assert_eq!(plan.name, "foundry-agents");
        assert_eq!(plan.params.environment, EnvironmentType::Prod);
        assert_eq!(plan.params.region, Region::SwedenCentral);
        assert!(!plan.fail_fast);

        let account = plan.module("account").unwrap();
        assert_eq!(account.depends_on, vec!["identity"]);
        assert_eq!(account.inputs["sku"], InputValue::Literal(json!("S0")));
        assert_eq!(account.inputs["capacity"], InputValue::Literal(json!(50)));
        assert_eq!(
            account.inputs["principalId"],
            InputValue::Reference(OutputRef::new("identity", "principalId"))
        );
        assert_eq!(plan.outputs["clientId"], OutputRef::new("identity", "clientId"));
    }

    #[test]
    fn object_with_extra_keys_is_a_literal() {
        let yaml = r#"
schema: foundry/plan@0.1
modules:
  - name: storage
    inputs:
      tags: { from: team, output: x, owner: ops }
"#;
        let plan = DeploymentPlan::from_yaml(yaml).unwrap();
        let storage = plan.module("storage").unwrap();
        assert!(storage.inputs["tags"].as_reference().is_none());
        assert_eq!(storage.references().count(), 0);
    }

    #[test]
    fn wrong_schema_is_rejected() {
        let err = DeploymentPlan::from_yaml("schema: foundry/plan@9.9\nmodules: []").unwrap_err();
        assert_eq!(err.code(), "FD-002");
    }

    #[test]
    fn missing_name_uses_default() {
        let plan = DeploymentPlan::from_yaml("schema: foundry/plan@0.1").unwrap();
        assert_eq!(plan.name, "foundry-deployment");
        assert!(plan.is_empty());
    }

    #[test]
    fn builder_matches_yaml() {
        let built = DeploymentPlan::new("foundry-agents")
            .with_params(GlobalParams::new(EnvironmentType::Prod, Region::SwedenCentral))
            .with_module(Module::new("identity").outputs(["principalId", "clientId"]))
            .with_module(
                Module::new("account")
                    .depends_on(["identity"])
                    .literal("sku", "S0")
                    .literal("capacity", 50)
                    .reference("principalId", "identity", "principalId"),
            )
            .with_output("clientId", "identity", "clientId");

        assert_eq!(built, DeploymentPlan::from_yaml(FOUNDRY_PLAN).unwrap());
    }
}
