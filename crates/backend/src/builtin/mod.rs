//! Backends compiled into the gateway.

mod filesystem;
mod memory;

pub use {
    filesystem::{FilesystemBackend, FilesystemFactory},
    memory::{MemoryBackend, MemoryFactory},
};

/// Content type reported for stored artifacts.
const ARTIFACT_CONTENT_TYPE: &str = "application/octet-stream";
