//! DAG Validation - whole-plan checks before any apply
//!
//! Validates:
//! - module names (format, uniqueness)
//! - `depends_on` entries (exist, not self)
//! - acyclicity (three-color DFS, reports the cycle path)
//! - input references (source exists, not self, is a dependency, output declared)
//! - plan-level outputs (source exists, output declared)
//!
//! Every issue is collected so one `validate` run reports them all.

use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;

use crate::ast::{DeploymentPlan, Module, OutputRef};
use crate::error::{DeployError, Result};

use super::graph::ModuleGraph;

/// Bicep-style symbol names: `identity`, `functionApp`, `storage-rbac`
static MODULE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-zA-Z0-9_-]*$").expect("module name pattern compiles"));

/// Outcome of validating a plan
#[derive(Debug, Default)]
pub struct ValidationReport {
    issues: Vec<DeployError>,
    module_count: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[DeployError] {
        &self.issues
    }

    pub fn module_count(&self) -> usize {
        self.module_count
    }

    /// Check whether any issue carries the given error code
    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code() == code)
    }

    /// Collapse into a single `PlanInvalid` error when issues exist
    pub fn into_result(self) -> Result<()> {
        if self.issues.is_empty() {
            Ok(())
        } else {
            Err(DeployError::PlanInvalid {
                issues: self.issues,
            })
        }
    }
}

/// Validate a plan's structure
pub fn validate(plan: &DeploymentPlan) -> ValidationReport {
    let graph = ModuleGraph::from_plan(plan);
    let mut issues = Vec::new();

    validate_names(plan, &mut issues);
    validate_dependencies(plan, &graph, &mut issues);

    if let Err(cycle) = graph.detect_cycles() {
        issues.push(cycle);
    }

    for module in &plan.modules {
        validate_references(plan, module, &graph, &mut issues);
    }
    validate_plan_outputs(plan, &mut issues);

    ValidationReport {
        issues,
        module_count: plan.modules.len(),
    }
}

fn validate_names(plan: &DeploymentPlan, issues: &mut Vec<DeployError>) {
    let mut seen: FxHashSet<&str> = FxHashSet::default();

    for module in &plan.modules {
        if !MODULE_NAME.is_match(&module.name) {
            issues.push(DeployError::InvalidModuleName {
                name: module.name.clone(),
            });
        }
        if !seen.insert(module.name.as_str()) {
            issues.push(DeployError::DuplicateModule {
                name: module.name.clone(),
            });
        }
    }
}

fn validate_dependencies(
    plan: &DeploymentPlan,
    graph: &ModuleGraph,
    issues: &mut Vec<DeployError>,
) {
    for module in &plan.modules {
        for dep in &module.depends_on {
            if dep == &module.name {
                issues.push(DeployError::SelfDependency {
                    module: module.name.clone(),
                });
            } else if !graph.contains(dep) {
                issues.push(DeployError::UnknownDependency {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
}

/// Reference checks, cheapest first:
/// 1. not a self-reference
/// 2. source module exists
/// 3. source is a (transitive) dependency
/// 4. output key is declared, when the source declares outputs
fn validate_references(
    plan: &DeploymentPlan,
    module: &Module,
    graph: &ModuleGraph,
    issues: &mut Vec<DeployError>,
) {
    for (input, reference) in module.references() {
        if reference.from == module.name {
            issues.push(DeployError::SelfReference {
                module: module.name.clone(),
                input: input.to_string(),
            });
            continue;
        }

        let Some(source) = plan.module(&reference.from) else {
            issues.push(DeployError::UnknownReference {
                module: module.name.clone(),
                input: input.to_string(),
                from: reference.from.clone(),
            });
            continue;
        };

        if !graph.has_path(&reference.from, &module.name) {
            issues.push(DeployError::UndeclaredDependency {
                module: module.name.clone(),
                input: input.to_string(),
                from: reference.from.clone(),
            });
        }

        if !declares_output(source, reference) {
            issues.push(DeployError::UndeclaredOutput {
                module: module.name.clone(),
                input: input.to_string(),
                from: reference.from.clone(),
                output: reference.output.clone(),
            });
        }
    }
}

fn validate_plan_outputs(plan: &DeploymentPlan, issues: &mut Vec<DeployError>) {
    for (name, reference) in &plan.outputs {
        match plan.module(&reference.from) {
            None => issues.push(DeployError::UnknownPlanOutput {
                name: name.clone(),
                from: reference.from.clone(),
            }),
            Some(source) if !declares_output(source, reference) => {
                issues.push(DeployError::UndeclaredOutput {
                    module: "outputs".to_string(),
                    input: name.clone(),
                    from: reference.from.clone(),
                    output: reference.output.clone(),
                })
            }
            Some(_) => {}
        }
    }
}

/// Modules without an `outputs` list accept any key
fn declares_output(source: &Module, reference: &OutputRef) -> bool {
    source.outputs.is_empty() || source.outputs.iter().any(|k| k == &reference.output)
}
