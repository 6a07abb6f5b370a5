//! AST Module - deployment plans parsed from YAML
//!
//! - `plan`: DeploymentPlan, Module, InputValue, OutputRef
//! - `params`: GlobalParams, EnvironmentType, Region
//!
//! These types represent the "what" - static structure parsed from YAML.
//! For execution, see the `runtime` module.

mod params;
mod plan;

// Re-export all public types
pub use params::{EnvironmentType, GlobalParams, Region};
pub use plan::{DeploymentPlan, InputValue, Module, OutputRef, SCHEMA_V01};
