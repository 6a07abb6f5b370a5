//! OutputStore - module outputs produced during one run
//!
//! Append-only with a single-writer rule: a module's outputs are inserted
//! once, by that module's completion. Readers never see partial maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::ast::OutputRef;
use crate::error::{DeployError, Result};
use crate::provider::ModuleOutputs;

/// Thread-safe storage for module outputs (lock-free reads)
#[derive(Clone, Default)]
pub struct OutputStore {
    /// module -> outputs (Arc for O(1) cloning into dependents)
    outputs: Arc<DashMap<Arc<str>, Arc<ModuleOutputs>>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a module's outputs; a second write for the same module fails
    pub fn insert(&self, module: Arc<str>, outputs: ModuleOutputs) -> Result<()> {
        match self.outputs.entry(module) {
            Entry::Occupied(entry) => Err(DeployError::OutputAlreadyWritten {
                module: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(outputs));
                Ok(())
            }
        }
    }

    pub fn get(&self, module: &str) -> Option<Arc<ModuleOutputs>> {
        self.outputs.get(module).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, module: &str) -> bool {
        self.outputs.contains_key(module)
    }

    /// Value of one output key
    pub fn get_output(&self, module: &str, key: &str) -> Option<Value> {
        self.outputs
            .get(module)
            .and_then(|outputs| outputs.get(key).cloned())
    }

    pub fn resolve(&self, reference: &OutputRef) -> Option<Value> {
        self.get_output(&reference.from, &reference.output)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Every recorded output flattened as `<module>.<key>`
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        self.outputs
            .iter()
            .flat_map(|entry| {
                let module = entry.key().to_string();
                entry
                    .value()
                    .iter()
                    .map(|(key, value)| (format!("{}.{}", module, key), value.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
