//! Gateway: a loopback HTTP server exposing one cache backend for the
//! duration of a task run.
//!
//! Lifecycle:
//! 1. Pre-run: resolve the backend by name and run its factory
//! 2. Issue a session token, build the authenticated route table
//! 3. Bind an ephemeral loopback port and hand back `{url, token}`
//! 4. Post-run: drain in-flight requests, close the listener, release the backend
//!
//! Storage semantics live entirely in the backend; the gateway passes
//! requests and responses through untouched.

pub mod auth;
pub mod error;
pub mod lifecycle;
pub mod routes;
pub mod server;
pub mod state;

pub use {
    error::GatewayError,
    lifecycle::{CacheGateway, StartOutcome},
    server::{Discovery, ServerHandle, ServerOptions},
    state::{SessionKey, SessionRegistry},
};
