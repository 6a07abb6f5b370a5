//! DAG Module - module dependency graph
//!
//! - `graph`: ModuleGraph built from `depends_on` edges, cycle detection
//! - `order`: wave layering (ExecutionOrder)
//! - `validate`: whole-plan validation (ValidationReport)
//!
//! The graph is immutable after construction.

mod graph;
mod order;
mod validate;

// Re-export public types
pub use graph::{DepVec, ModuleGraph};
pub use order::{plan, ExecutionOrder};
pub use validate::{validate, ValidationReport};
