//! EventLog - event sourcing for deployment runs
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: deployment, wave and module levels
//! - EventLog: thread-safe, append-only log

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Single event in the deployment log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All deployment event types
///
/// Uses Arc<str> for module fields to share names with the graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // DEPLOYMENT LEVEL
    // ═══════════════════════════════════════════
    DeploymentStarted {
        deployment_id: String,
        plan: String,
        module_count: usize,
        wave_count: usize,
        environment: String,
        region: String,
    },
    DeploymentCompleted {
        applied: usize,
        failed: usize,
        skipped: usize,
        total_duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // WAVE LEVEL
    // ═══════════════════════════════════════════
    WaveStarted {
        index: usize,
        modules: Vec<Arc<str>>,
    },

    // ═══════════════════════════════════════════
    // MODULE LEVEL
    // ═══════════════════════════════════════════
    /// Provider call begins with resolved inputs
    ModuleStarted {
        module: Arc<str>,
        inputs: Value,
        fingerprint: String,
    },
    ModuleApplied {
        module: Arc<str>,
        outputs: Value,
        duration_ms: u64,
    },
    /// Stored fingerprint matched; outputs reused without a provider call
    ModuleUnchanged {
        module: Arc<str>,
        fingerprint: String,
    },
    ModuleFailed {
        module: Arc<str>,
        error: String,
        duration_ms: u64,
    },
    ModuleSkipped {
        module: Arc<str>,
        reason: String,
    },
}

impl EventKind {
    /// Extract the module name if the event is module-related
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::ModuleStarted { module, .. }
            | Self::ModuleApplied { module, .. }
            | Self::ModuleUnchanged { module, .. }
            | Self::ModuleFailed { module, .. }
            | Self::ModuleSkipped { module, .. } => Some(module),
            Self::DeploymentStarted { .. }
            | Self::DeploymentCompleted { .. }
            | Self::WaveStarted { .. } => None,
        }
    }

    pub fn is_deployment_event(&self) -> bool {
        matches!(
            self,
            Self::DeploymentStarted { .. } | Self::DeploymentCompleted { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds the read lock for the duration of the callback.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events for one module, in emission order
    pub fn filter_module(&self, module: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.module() == Some(module))
                .cloned()
                .collect()
        })
    }

    pub fn deployment_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_deployment_event())
                .cloned()
                .collect()
        })
    }

    /// Count events matching a predicate (no allocation)
    pub fn count(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.with_events(|events| events.iter().filter(|e| predicate(&e.kind)).count())
    }

    /// Serialize to JSON for persistence/debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    /// Write the log as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.to_json()).map_err(std::io::Error::from)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn applied(module: &str) -> EventKind {
        EventKind::ModuleApplied {
            module: Arc::from(module),
            outputs: json!({"id": 1}),
            duration_ms: 3,
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let log = EventLog::new();
        let a = log.emit(applied("identity"));
        let b = log.emit(applied("storage"));
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn clones_share_the_same_log() {
        let log = EventLog::new();
        let clone = log.clone();
        clone.emit(applied("identity"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn filter_by_module() {
        let log = EventLog::new();
        log.emit(EventKind::WaveStarted {
            index: 0,
            modules: vec![Arc::from("identity"), Arc::from("storage")],
        });
        log.emit(applied("identity"));
        log.emit(EventKind::ModuleSkipped {
            module: Arc::from("account"),
            reason: "dependency 'identity' failed".to_string(),
        });

        assert_eq!(log.filter_module("identity").len(), 1);
        assert_eq!(log.filter_module("account").len(), 1);
        assert_eq!(log.count(|k| matches!(k, EventKind::WaveStarted { .. })), 1);
        assert!(log.deployment_events().is_empty());
    }

    #[test]
    fn serializes_as_tagged_json() {
        let log = EventLog::new();
        log.emit(EventKind::ModuleUnchanged {
            module: Arc::from("storage"),
            fingerprint: "00ff".to_string(),
        });
        let json = log.to_json();
        assert_eq!(json[0]["kind"]["type"], "module_unchanged");
        assert_eq!(json[0]["kind"]["module"], "storage");
    }

    #[test]
    fn write_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let log = EventLog::new();
        log.emit(applied("identity"));
        log.write_json(&path).unwrap();

        let events: Vec<Event> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, applied("identity"));
    }
}
