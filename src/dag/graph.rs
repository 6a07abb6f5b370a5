//! ModuleGraph - DAG structure built from `depends_on` declarations
//!
//! Edges point from a dependency to its dependent (`identity → account`).
//!
//! - Arc<str> for cheap cloning of module names
//! - FxHashMap for faster hashing
//! - SmallVec for the common 0-4 dependency case
//!
//! Self-dependencies and unknown names are reported by validation and never
//! become edges.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ast::DeploymentPlan;
use crate::error::DeployError;

/// Stack-allocated deps: most modules have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// Graph of module dependencies
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    /// module -> modules that depend on it
    successors: FxHashMap<Arc<str>, DepVec>,
    /// module -> modules it depends on
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// Module names in declaration order (first occurrence wins)
    module_ids: Vec<Arc<str>>,
}

impl ModuleGraph {
    pub fn from_plan(plan: &DeploymentPlan) -> Self {
        let capacity = plan.modules.len();
        let mut successors: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut predecessors: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut module_ids: Vec<Arc<str>> = Vec::with_capacity(capacity);

        for module in &plan.modules {
            if predecessors.contains_key(module.name.as_str()) {
                continue;
            }
            let id: Arc<str> = Arc::from(module.name.as_str());
            module_ids.push(Arc::clone(&id));
            successors.insert(Arc::clone(&id), DepVec::new());
            predecessors.insert(id, DepVec::new());
        }

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for module in &plan.modules {
            // Duplicate declarations contribute no extra edges
            if !seen.insert(module.name.as_str()) {
                continue;
            }
            let Some((target, _)) = predecessors.get_key_value(module.name.as_str()) else {
                continue;
            };
            let target = Arc::clone(target);

            for dep in &module.depends_on {
                if dep == &module.name {
                    continue;
                }
                let Some((source, _)) = successors.get_key_value(dep.as_str()) else {
                    continue;
                };
                let source = Arc::clone(source);

                let deps = predecessors.entry(Arc::clone(&target)).or_default();
                if deps.iter().any(|d| d == &source) {
                    continue;
                }
                deps.push(Arc::clone(&source));
                successors
                    .entry(source)
                    .or_default()
                    .push(Arc::clone(&target));
            }
        }

        Self {
            successors,
            predecessors,
            module_ids,
        }
    }

    /// Module names in declaration order
    pub fn module_ids(&self) -> &[Arc<str>] {
        &self.module_ids
    }

    pub fn len(&self) -> usize {
        self.module_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_ids.is_empty()
    }

    #[inline]
    pub fn contains(&self, module: &str) -> bool {
        self.predecessors.contains_key(module)
    }

    /// Direct dependencies of a module
    #[inline]
    pub fn get_dependencies(&self, module: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(module)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Modules that directly depend on `module`
    #[inline]
    pub fn get_dependents(&self, module: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.successors
            .get(module)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Check if there's a dependency path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for neighbor in self.get_dependents(current) {
                if neighbor.as_ref() == to {
                    return true;
                }
                if visited.insert(neighbor.as_ref()) {
                    queue.push_back(neighbor.as_ref());
                }
            }
        }

        false
    }

    /// Every module that transitively depends on `module`, in declaration order
    pub fn transitive_dependents(&self, module: &str) -> Vec<Arc<str>> {
        let mut reached: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::from([module]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.get_dependents(current) {
                if reached.insert(dependent.as_ref()) {
                    queue.push_back(dependent.as_ref());
                }
            }
        }

        self.module_ids
            .iter()
            .filter(|id| id.as_ref() != module && reached.contains(id.as_ref()))
            .cloned()
            .collect()
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: on the current DFS path
    /// - Black: fully processed
    ///
    /// Reaching a Gray node closes a cycle; the error carries its path.
    pub fn detect_cycles(&self) -> Result<(), DeployError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            node: &Arc<str>,
            graph: &ModuleGraph,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> Result<(), String> {
            colors.insert(Arc::clone(node), Color::Gray);
            stack.push(Arc::clone(node));

            for neighbor in graph.get_dependents(node) {
                match colors.get(neighbor) {
                    Some(Color::Gray) => {
                        let cycle_start = stack
                            .iter()
                            .position(|x| x == neighbor)
                            .unwrap_or(0);
                        let cycle: Vec<&str> =
                            stack[cycle_start..].iter().map(AsRef::as_ref).collect();
                        return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                    }
                    Some(Color::White) | None => dfs(neighbor, graph, colors, stack)?,
                    Some(Color::Black) => {}
                }
            }

            stack.pop();
            colors.insert(Arc::clone(node), Color::Black);
            Ok(())
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .module_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        for module in &self.module_ids {
            if colors.get(module) == Some(&Color::White) {
                dfs(module, self, &mut colors, &mut stack)
                    .map_err(|cycle| DeployError::CycleDetected { cycle })?;
            }
        }

        Ok(())
    }
}
