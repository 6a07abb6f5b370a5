//! Store Module - deployment state
//!
//! - `OutputStore`: in-run module outputs, DashMap-backed, insert-once
//! - `StateStore`: applied-module snapshots that survive across runs
//! - `fingerprint`: xxh3 over a module's resolved inputs and global params

mod outputs;
mod state;

pub use outputs::OutputStore;
pub use state::{fingerprint, FileStateStore, MemoryStateStore, ModuleSnapshot, StateStore};
