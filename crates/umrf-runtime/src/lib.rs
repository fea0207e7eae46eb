//! # UMRF Runtime
//!
//! The UMRF action engine: executes directed acyclic graphs of
//! declaratively described actions.
//!
//! This crate provides:
//! - [`ActionHandle`]: the runtime envelope around one instantiated action
//! - [`ActionExecutor`]: the scheduling core with transactional activation
//! - The cleanup reaper reconciling finished handles with graph state
//! - [`ActionEngine`]: the facade tying in name matching and the JSON
//!   wire format
//! - Engine configuration and tracing bootstrap

mod config;
mod engine;
mod error;
mod executor;
mod handle;
mod reaper;
mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use engine::ActionEngine;
pub use error::EngineError;
pub use executor::ActionExecutor;
pub use handle::{ActionCompletion, ActionHandle, HandleState};
pub use telemetry::init_tracing;

// Re-export the data model and the provisioning seams for convenience
pub use umrf_actions::{
    ActionLoader, ActionRegistry, MatchFinder, RegistryMatchFinder,
};
pub use umrf_core::prelude::*;
