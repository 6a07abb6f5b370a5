//! Execution order - wave layering of a validated plan
//!
//! A wave is every module whose dependencies all sit in earlier waves.
//! Inside a wave, modules keep their declaration order.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::ast::DeploymentPlan;
use crate::error::{DeployError, Result};

use super::graph::ModuleGraph;
use super::validate::validate;

/// Topological order split into concurrent waves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    waves: Vec<Vec<Arc<str>>>,
}

impl ExecutionOrder {
    /// Layer the graph into waves (Kahn's algorithm, declaration-order ties)
    pub fn from_graph(graph: &ModuleGraph) -> Result<Self> {
        let mut placed: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut waves: Vec<Vec<Arc<str>>> = Vec::new();

        while placed.len() < graph.len() {
            let wave: Vec<Arc<str>> = graph
                .module_ids()
                .iter()
                .filter(|id| !placed.contains(id.as_ref()))
                .filter(|id| {
                    graph
                        .get_dependencies(id)
                        .iter()
                        .all(|dep| placed.contains(dep.as_ref()))
                })
                .cloned()
                .collect();

            if wave.is_empty() {
                // Remaining modules wait on each other
                graph.detect_cycles()?;
                return Err(DeployError::CycleDetected {
                    cycle: "unresolvable dependencies".to_string(),
                });
            }

            placed.extend(wave.iter().cloned());
            waves.push(wave);
        }

        Ok(Self { waves })
    }

    pub fn waves(&self) -> &[Vec<Arc<str>>] {
        &self.waves
    }

    /// Flattened total order
    pub fn order(&self) -> Vec<Arc<str>> {
        self.waves.iter().flatten().cloned().collect()
    }

    /// Index of the wave containing `module`
    pub fn wave_of(&self, module: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|m| m.as_ref() == module))
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }
}

/// Validate a plan and compute its execution order
pub fn plan(plan: &DeploymentPlan) -> Result<ExecutionOrder> {
    validate(plan).into_result()?;
    ExecutionOrder::from_graph(&ModuleGraph::from_plan(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Module;

    fn names(wave: &[Arc<str>]) -> Vec<&str> {
        wave.iter().map(AsRef::as_ref).collect()
    }

    #[test]
    fn foundry_example_waves() {
        let p = DeploymentPlan::new("foundry")
            .with_module(Module::new("identity"))
            .with_module(Module::new("account").depends_on(["identity"]))
            .with_module(Module::new("storage"))
            .with_module(Module::new("functionApp").depends_on(["account", "storage"]));

        let order = plan(&p).unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(names(&order.waves()[0]), vec!["identity", "storage"]);
        assert_eq!(names(&order.waves()[1]), vec!["account"]);
        assert_eq!(names(&order.waves()[2]), vec!["functionApp"]);
        assert_eq!(order.wave_of("storage"), Some(0));
        assert_eq!(order.wave_of("nope"), None);
        assert_eq!(
            names(&order.order()),
            vec!["identity", "storage", "account", "functionApp"]
        );
    }

    #[test]
    fn ties_follow_declaration_order() {
        let p = DeploymentPlan::new("ties")
            .with_module(Module::new("zeta"))
            .with_module(Module::new("alpha"))
            .with_module(Module::new("mid"));
        let order = plan(&p).unwrap();
        assert_eq!(order.len(), 1);
        assert_eq!(names(&order.waves()[0]), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn empty_plan_has_no_waves() {
        let order = plan(&DeploymentPlan::new("empty")).unwrap();
        assert!(order.is_empty());
        assert_eq!(order.module_count(), 0);
    }

    #[test]
    fn dependency_declared_later_still_runs_first() {
        let p = DeploymentPlan::new("late")
            .with_module(Module::new("app").depends_on(["plan"]))
            .with_module(Module::new("plan"));
        let order = plan(&p).unwrap();
        assert_eq!(names(&order.order()), vec!["plan", "app"]);
    }

    #[test]
    fn cyclic_plan_is_rejected() {
        let p = DeploymentPlan::new("cycle")
            .with_module(Module::new("a").depends_on(["b"]))
            .with_module(Module::new("b").depends_on(["a"]));
        let err = plan(&p).unwrap_err();
        assert!(err.to_string().contains("FD-014"));
    }

    #[test]
    fn from_graph_detects_cycles_without_validation() {
        let p = DeploymentPlan::new("cycle")
            .with_module(Module::new("a").depends_on(["b"]))
            .with_module(Module::new("b").depends_on(["a"]));
        let err = ExecutionOrder::from_graph(&ModuleGraph::from_plan(&p)).unwrap_err();
        assert_eq!(err.code(), "FD-014");
    }
}
