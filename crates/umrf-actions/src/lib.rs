//! # UMRF Actions
//!
//! Action provisioning for the UMRF action engine.
//!
//! This crate provides:
//! - The [`ActionLoader`] and [`MatchFinder`] traits the engine consumes
//! - [`ActionRegistry`], an in-process loader keyed by library path
//! - The [`ActionFactory`] seam and the built-in action set
//! - YAML action-spec loading

mod builtin;
mod config;
mod factory;
mod loader;

pub use builtin::{
    build_builtin_action, EchoAction, FailAction, NoopAction, SetValuesAction, SleepAction,
};
pub use config::{load_actions_config, ActionConfigError, ActionSpec, ActionsConfig};
pub use factory::{ActionBuildError, ActionFactory, DefaultActionFactory};
pub use loader::{
    ActionLoadError, ActionLoader, ActionRegistry, MatchError, MatchFinder, RegistryMatchFinder,
};
