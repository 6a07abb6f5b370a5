//! StateStore - what was applied, with which inputs
//!
//! A module whose stored fingerprint matches the fingerprint of its current
//! resolved inputs is not applied again; its stored outputs are reused.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::ast::GlobalParams;
use crate::error::{DeployError, Result};
use crate::provider::ModuleOutputs;

const STATE_VERSION: u32 = 1;

/// Fingerprint of a module's resolved inputs plus global params
///
/// Format: `xxh3:XXXXXXXXXXXXXXXX` (16 hex chars). JSON objects serialize
/// with sorted keys, so equal inputs always hash the same.
pub fn fingerprint(
    module: &str,
    inputs: &BTreeMap<String, Value>,
    params: &GlobalParams,
) -> String {
    let canonical = json!({
        "module": module,
        "inputs": inputs,
        "params": params,
    });
    let hash = xxh3_64(canonical.to_string().as_bytes());
    format!("xxh3:{:016x}", hash)
}

/// Last successful apply of a module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub fingerprint: String,
    pub outputs: ModuleOutputs,
    pub applied_at: DateTime<Utc>,
}

impl ModuleSnapshot {
    pub fn new(fingerprint: impl Into<String>, outputs: ModuleOutputs) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            outputs,
            applied_at: Utc::now(),
        }
    }
}

/// Persistence for module snapshots
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, module: &str) -> Result<Option<ModuleSnapshot>>;

    async fn save(&self, module: &str, snapshot: ModuleSnapshot) -> Result<()>;

    async fn remove(&self, module: &str) -> Result<()>;

    /// Names of every module with a snapshot
    async fn modules(&self) -> Result<Vec<String>>;
}

/// In-process state (lost on exit)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshots: RwLock<FxHashMap<String, ModuleSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, module: &str) -> Result<Option<ModuleSnapshot>> {
        Ok(self.snapshots.read().get(module).cloned())
    }

    async fn save(&self, module: &str, snapshot: ModuleSnapshot) -> Result<()> {
        self.snapshots.write().insert(module.to_string(), snapshot);
        Ok(())
    }

    async fn remove(&self, module: &str) -> Result<()> {
        self.snapshots.write().remove(module);
        Ok(())
    }

    async fn modules(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.snapshots.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    modules: BTreeMap<String, ModuleSnapshot>,
}

/// JSON state file, rewritten atomically (temp file + rename) on every save
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    snapshots: RwLock<BTreeMap<String, ModuleSnapshot>>,
    /// Serializes file writes so the newest snapshot set lands last
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStateStore {
    /// Open a state file; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshots = match std::fs::read_to_string(&path) {
            Ok(body) => {
                let file: StateFile =
                    serde_json::from_str(&body).map_err(|e| DeployError::StateStore {
                        reason: format!("{}: {}", path.display(), e),
                    })?;
                if file.version != STATE_VERSION {
                    return Err(DeployError::StateStore {
                        reason: format!(
                            "{}: unsupported state version {}",
                            path.display(),
                            file.version
                        ),
                    });
                }
                file.modules
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), modules = snapshots.len(), "state loaded");

        Ok(Self {
            path,
            snapshots: RwLock::new(snapshots),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let body = {
            let file = StateFile {
                version: STATE_VERSION,
                modules: self.snapshots.read().clone(),
            };
            serde_json::to_string_pretty(&file).map_err(|e| DeployError::StateStore {
                reason: e.to_string(),
            })?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, module: &str) -> Result<Option<ModuleSnapshot>> {
        Ok(self.snapshots.read().get(module).cloned())
    }

    async fn save(&self, module: &str, snapshot: ModuleSnapshot) -> Result<()> {
        self.snapshots.write().insert(module.to_string(), snapshot);
        self.persist().await
    }

    async fn remove(&self, module: &str) -> Result<()> {
        let removed = self.snapshots.write().remove(module).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn modules(&self) -> Result<Vec<String>> {
        Ok(self.snapshots.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{EnvironmentType, Region};

    fn inputs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let params = GlobalParams::default();
        let a = fingerprint("account", &inputs(&[("sku", json!("S0"))]), &params);
        let b = fingerprint("account", &inputs(&[("sku", json!("S0"))]), &params);
        let c = fingerprint("account", &inputs(&[("sku", json!("S1"))]), &params);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("xxh3:"));
        assert_eq!(a.len(), 21);
    }

    #[test]
    fn fingerprint_covers_params_and_module() {
        let none = BTreeMap::new();
        let dev = fingerprint("account", &none, &GlobalParams::default());
        let prod = fingerprint(
            "account",
            &none,
            &GlobalParams::new(EnvironmentType::Prod, Region::EastUs),
        );
        let other = fingerprint("storage", &none, &GlobalParams::default());
        assert_ne!(dev, prod);
        assert_ne!(dev, other);
    }

    #[test]
    fn fingerprint_ignores_object_key_order() {
        let params = GlobalParams::default();
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(
            fingerprint("m", &inputs(&[("tags", a)]), &params),
            fingerprint("m", &inputs(&[("tags", b)]), &params)
        );
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStateStore::new();
        assert!(store.load("identity").await.unwrap().is_none());

        store
            .save("identity", ModuleSnapshot::new("xxh3:1", ModuleOutputs::new()))
            .await
            .unwrap();
        assert_eq!(store.load("identity").await.unwrap().unwrap().fingerprint, "xxh3:1");
        assert_eq!(store.modules().await.unwrap(), vec!["identity"]);

        store.remove("identity").await.unwrap();
        assert!(store.load("identity").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("foundry.json");

        let store = FileStateStore::open(&path).unwrap();
        let outputs = ModuleOutputs::from([("principalId".to_string(), json!("p-1"))]);
        store
            .save("identity", ModuleSnapshot::new("xxh3:abc", outputs.clone()))
            .await
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = FileStateStore::open(&path).unwrap();
        let snapshot = reopened.load("identity").await.unwrap().unwrap();
        assert_eq!(snapshot.fingerprint, "xxh3:abc");
        assert_eq!(snapshot.outputs, outputs);
    }

    #[test]
    fn file_store_rejects_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = FileStateStore::open(&path).unwrap_err();
        assert_eq!(err.code(), "FD-040");
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path().join("absent.json")).unwrap();
        assert!(store.snapshots.read().is_empty());
    }
}
