//! Runtime Module - plan execution
//!
//! - `executor`: wave-by-wave apply with tokio concurrency
//! - `report`: module states, failure report, apply outcome
//!
//! This module is the "how" of a deployment. For static structure, see
//! the `ast` and `dag` modules.

mod executor;
mod report;

pub use executor::Executor;
pub use report::{ApplyOutcome, FailureReport, ModuleFailure, ModuleState, ModuleStates};
