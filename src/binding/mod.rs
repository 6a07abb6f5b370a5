//! Binding Module - input threading between modules
//!
//! A module input is either a literal or a `{ from, output }` reference.
//! References are resolved against the `OutputStore` right before the
//! module is applied:
//!
//! ```text
//! Module.inputs ──► resolve_inputs(OutputStore) ──► ApplyRequest.inputs
//!                        │
//!                        └─ missing key ──► MissingOutput (module fails)
//! ```

mod resolve;

pub use resolve::{resolve_inputs, resolve_plan_outputs};
