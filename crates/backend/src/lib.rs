//! Cache backends: the capability contract the gateway serves, the factory
//! registry that resolves a backend by name, and the built-in backends.
//!
//! A backend is resolved once per session from [`PluginOptions::backend`].
//! Its factory may decline to activate (see [`BackendActivation::Disabled`]),
//! which leaves the gateway inert for that session.

pub mod backend;
pub mod builtin;
pub mod registry;
pub mod types;

pub use {
    backend::{BackendActivation, BackendError, BackendFactory, BackendGuard, CacheBackend},
    registry::{BackendRegistry, LoadError, Loaded},
    types::{ExecutionContext, PluginOptions},
};
