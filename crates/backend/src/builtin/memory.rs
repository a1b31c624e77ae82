use {
    async_trait::async_trait,
    axum::{
        body::Body,
        extract::Request,
        response::{IntoResponse, Response},
    },
    bytes::Bytes,
    dashmap::DashMap,
    http::{StatusCode, header},
    tracing::debug,
};

use {
    super::ARTIFACT_CONTENT_TYPE,
    crate::{
        backend::{BackendActivation, BackendError, BackendFactory, CacheBackend},
        types::{ExecutionContext, PluginOptions},
    },
};

const DEFAULT_MAX_ENTRY_BYTES: usize = 512 * 1024 * 1024;

/// Process-local artifact map. Contents vanish with the session.
pub struct MemoryBackend {
    entries: DashMap<String, Bytes>,
    max_entry_bytes: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_BYTES)
    }
}

impl MemoryBackend {
    pub fn new(max_entry_bytes: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entry_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store_file(&self, hash: &str, request: Request) -> Result<(), BackendError> {
        let bytes = axum::body::to_bytes(request.into_body(), self.max_entry_bytes)
            .await
            .map_err(|e| BackendError::Rejected(format!("unreadable artifact body: {e}")))?;
        debug!(hash, size = bytes.len(), "stored artifact in memory");
        // Last writer wins.
        self.entries.insert(hash.to_string(), bytes);
        Ok(())
    }

    async fn retrieve_file(&self, hash: &str) -> Result<Response, BackendError> {
        let Some(bytes) = self.entries.get(hash).map(|e| e.value().clone()) else {
            return Ok(StatusCode::NOT_FOUND.into_response());
        };
        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, ARTIFACT_CONTENT_TYPE)],
            Body::from(bytes),
        )
            .into_response())
    }

    fn release(&self) {
        self.entries.clear();
    }
}

/// Factory for [`MemoryBackend`].
///
/// Settings: `enabled` (bool), `max_entry_bytes` (integer).
pub struct MemoryFactory;

impl BackendFactory for MemoryFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(
        &self,
        options: &PluginOptions,
        _ctx: &ExecutionContext,
    ) -> anyhow::Result<BackendActivation> {
        if !options.enabled()? {
            return Ok(BackendActivation::disabled("disabled by configuration"));
        }
        let max_entry_bytes = options
            .setting::<usize>("max_entry_bytes")?
            .unwrap_or(DEFAULT_MAX_ENTRY_BYTES);
        Ok(BackendActivation::enabled(MemoryBackend::new(max_entry_bytes)))
    }
}
