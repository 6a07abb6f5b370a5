//! Property-Based Testing for plan ordering and failure containment
//!
//! Random acyclic plans are generated as a lower-triangular dependency
//! matrix (module `i` may only depend on modules `j < i`), then declared
//! in a shuffled order so the layering cannot rely on declaration order.

use std::sync::Arc;

use proptest::prelude::*;

use foundry_deploy::ast::{DeploymentPlan, GlobalParams, Module};
use foundry_deploy::dag::{self, ModuleGraph};
use foundry_deploy::provider::MockProvider;
use foundry_deploy::runtime::{Executor, ModuleState};

fn name(i: usize) -> String {
    format!("m{}", i)
}

prop_compose! {
    /// (module count, dependency flags, declaration permutation)
    fn arb_dag()(n in 1usize..12)(
        n in Just(n),
        edges in proptest::collection::vec(any::<bool>(), n * n),
        order in Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
    ) -> DeploymentPlan {
        let mut plan = DeploymentPlan::new("generated");
        for &i in &order {
            let deps: Vec<String> = (0..i).filter(|&j| edges[i * n + j]).map(name).collect();
            plan = plan.with_module(Module::new(name(i)).depends_on(deps));
        }
        plan
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn acyclic_plans_order_after_dependencies(plan in arb_dag()) {
        let order = dag::plan(&plan).unwrap();
        prop_assert_eq!(order.module_count(), plan.modules.len());

        let flat = order.order();
        let position = |m: &str| flat.iter().position(|x| x.as_ref() == m).unwrap();
        for module in &plan.modules {
            for dep in &module.depends_on {
                prop_assert!(position(dep) < position(&module.name));
                prop_assert!(order.wave_of(dep) < order.wave_of(&module.name));
            }
        }
    }

    #[test]
    fn back_edge_makes_a_cycle(plan in arb_dag(), pick in any::<prop::sample::Index>()) {
        // m0 has no dependencies, so make it depend on some module that reaches it
        let n = plan.modules.len();
        prop_assume!(n >= 2);
        let graph = ModuleGraph::from_plan(&plan);
        let reachable = graph.transitive_dependents("m0");
        prop_assume!(!reachable.is_empty());
        let target = reachable[pick.index(reachable.len())].to_string();

        let mut cyclic = plan.clone();
        for module in &mut cyclic.modules {
            if module.name == "m0" {
                module.depends_on.push(target.clone());
            }
        }

        let report = dag::validate(&cyclic);
        prop_assert!(report.has_code("FD-014"));

        let mock = MockProvider::new();
        let result = runtime().block_on(async {
            Executor::new(Arc::new(mock.clone()))
                .apply(&cyclic, GlobalParams::default())
                .await
        });
        prop_assert!(result.is_err());
        prop_assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn failure_skips_exactly_the_dependents(plan in arb_dag(), pick in any::<prop::sample::Index>()) {
        let failing = name(pick.index(plan.modules.len()));
        let graph = ModuleGraph::from_plan(&plan);
        let dependents: Vec<String> = graph
            .transitive_dependents(&failing)
            .iter()
            .map(ToString::to_string)
            .collect();

        let mock = MockProvider::new();
        mock.fail_module(failing.clone(), "injected");
        let outcome = runtime()
            .block_on(async {
                Executor::new(Arc::new(mock.clone()))
                    .apply(&plan, GlobalParams::default())
                    .await
            })
            .unwrap();

        for module in &plan.modules {
            let expected = if module.name == failing {
                ModuleState::Failed
            } else if dependents.contains(&module.name) {
                ModuleState::Skipped
            } else {
                ModuleState::Applied
            };
            prop_assert_eq!(outcome.state(&module.name), Some(expected), "module {}", module.name);
        }
    }
}
