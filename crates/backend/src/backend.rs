use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::{extract::Request, response::Response},
    tracing::debug,
};

use crate::types::{ExecutionContext, PluginOptions};

/// Storage capability served by the gateway.
///
/// Cache keys are opaque strings. The gateway never inspects them; a backend
/// may reject keys it cannot store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend identifier, used in logs.
    fn name(&self) -> &str;

    /// Persist the artifact carried by `request` under `hash`.
    ///
    /// The request is handed over unread, so the body can be streamed.
    async fn store_file(&self, hash: &str, request: Request) -> Result<(), BackendError>;

    /// Produce the response for `hash`. Status, headers and body are entirely
    /// up to the backend; a miss is usually a `404`.
    async fn retrieve_file(&self, hash: &str) -> Result<Response, BackendError>;

    /// Release held resources. Called once when the session ends.
    fn release(&self) {}
}

/// Failure of a backend operation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The storage behind the backend cannot be reached right now.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused this particular request.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of a factory invocation.
pub enum BackendActivation {
    Enabled(Arc<dyn CacheBackend>),
    /// The backend opted out for this run. Not an error.
    Disabled { reason: String },
}

impl BackendActivation {
    pub fn enabled(backend: impl CacheBackend + 'static) -> Self {
        Self::Enabled(Arc::new(backend))
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Debug for BackendActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enabled(backend) => f.debug_tuple("Enabled").field(&backend.name()).finish(),
            Self::Disabled { reason } => {
                f.debug_struct("Disabled").field("reason", reason).finish()
            },
        }
    }
}

/// Builds a backend from plugin options. Registered by name in a
/// [`BackendRegistry`](crate::BackendRegistry).
pub trait BackendFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(
        &self,
        options: &PluginOptions,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<BackendActivation>;
}

/// Owns an activated backend and releases it exactly once when dropped.
///
/// Dropping happens on every exit path, including a failed server start
/// after the backend was already built.
pub struct BackendGuard {
    backend: Arc<dyn CacheBackend>,
}

impl BackendGuard {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        Arc::clone(&self.backend)
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        debug!(backend = self.backend.name(), "releasing cache backend");
        self.backend.release();
    }
}
