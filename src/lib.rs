//! foundry-deploy - DAG deployment executor and queue request/response correlator
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       YAML → Rust types (DeploymentPlan, Module)       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  dag/       Module graph, validation, wave ordering          │
//! │  binding/   Input references → resolved values               │
//! │  runtime/   Wave execution (Executor, ApplyOutcome)          │
//! │  queue/     Request/response correlation (Requester, Worker) │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/      Module outputs (DashMap), applied-state file    │
//! │  event/      Event sourcing (EventLog, EventKind)            │
//! │  provider/   Module providers (command, mock)                │
//! │  resilience/ Bounded retries with backoff                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | YAML parsing → `DeploymentPlan`, `Module`, `GlobalParams` |
//! | [`dag`] | Dependency graph with FxHashMap, cycle detection, waves |
//! | [`binding`] | `{ from, output }` references resolved against outputs |
//! | [`runtime`] | Wave-by-wave apply with tokio concurrency |
//! | [`queue`] | Correlated send/await over two queues, worker pool |
//! | [`store`] | Thread-safe output storage, idempotency snapshots |
//! | [`event`] | Event sourcing for audit trail |
//! | [`provider`] | Provider abstraction (`ModuleProvider`) |
//! | [`resilience`] | Retry policy and transport error classification |
//! | [`config`] | `~/.config/foundry-deploy/config.toml` + env overrides |
//! | [`error`] | Error types with codes and fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - YAML → Rust types
// ═══════════════════════════════════════════════════════════════
pub mod ast;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - Execution logic
// ═══════════════════════════════════════════════════════════════
pub mod binding;
pub mod dag;
pub mod queue;
pub mod runtime;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - Storage, events, providers
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod provider;
pub mod resilience;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{DeployError, FixSuggestion, Result};

// Config types
pub use config::DeployConfig;

// AST types
pub use ast::{DeploymentPlan, EnvironmentType, GlobalParams, InputValue, Module, OutputRef, Region};

// DAG types
pub use dag::{ExecutionOrder, ModuleGraph, ValidationReport};

// Runtime types
pub use runtime::{ApplyOutcome, Executor, FailureReport, ModuleState};

// Queue types
pub use queue::{
    MemoryQueue, QueueService, RequestEnvelope, Requester, ResponseEnvelope, Worker,
};

// Event types
pub use event::{Event, EventKind, EventLog};

// Provider types
pub use provider::{ApplyRequest, ModuleOutputs, ModuleProvider};
