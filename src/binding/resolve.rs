//! Runtime resolution of module inputs and plan outputs

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ast::{DeploymentPlan, InputValue, Module};
use crate::error::{DeployError, Result};
use crate::store::OutputStore;

/// Resolve every input of `module` to a concrete value
///
/// A referenced key the producer never returned is an error, never null.
pub fn resolve_inputs(module: &Module, store: &OutputStore) -> Result<BTreeMap<String, Value>> {
    module
        .inputs
        .iter()
        .map(|(name, value)| {
            let resolved = match value {
                InputValue::Literal(literal) => literal.clone(),
                InputValue::Reference(reference) => {
                    store
                        .resolve(reference)
                        .ok_or_else(|| DeployError::MissingOutput {
                            module: module.name.clone(),
                            from: reference.from.clone(),
                            output: reference.output.clone(),
                        })?
                }
            };
            Ok((name.clone(), resolved))
        })
        .collect()
}

/// Build the final deployment output map
///
/// With declared plan outputs, only those are returned (skipping sources
/// that never applied). Without them, every module output is returned as
/// `<module>.<key>`.
pub fn resolve_plan_outputs(plan: &DeploymentPlan, store: &OutputStore) -> BTreeMap<String, Value> {
    if plan.outputs.is_empty() {
        return store.flatten();
    }

    plan.outputs
        .iter()
        .filter_map(|(name, reference)| {
            store
                .resolve(reference)
                .map(|value| (name.clone(), value))
        })
        .collect()
}
