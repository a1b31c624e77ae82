use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use {
    anyhow::Context,
    async_trait::async_trait,
    axum::{
        body::Body,
        extract::Request,
        response::{IntoResponse, Response},
    },
    futures::StreamExt,
    http::{StatusCode, header},
    tokio::{fs, io::AsyncWriteExt},
    tokio_util::io::ReaderStream,
    tracing::debug,
};

use {
    super::ARTIFACT_CONTENT_TYPE,
    crate::{
        backend::{BackendActivation, BackendError, BackendFactory, CacheBackend},
        types::{ExecutionContext, PluginOptions},
    },
};

const DEFAULT_DIR: &str = ".cache/cachegate";

/// Stores one file per cache key under a root directory.
pub struct FilesystemBackend {
    root: PathBuf,
    next_partial: AtomicU64,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_partial: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, hash: &str) -> Result<PathBuf, BackendError> {
        // Leading dots are reserved for in-progress uploads.
        if hash.is_empty()
            || hash.starts_with('.')
            || hash.contains(['/', '\\', '\0'])
        {
            return Err(BackendError::Rejected(format!(
                "cache key `{hash}` is not a valid file name"
            )));
        }
        Ok(self.root.join(hash))
    }

    /// Upload temp file; its name never embeds the cache key.
    fn partial_path(&self) -> PathBuf {
        let n = self.next_partial.fetch_add(1, Ordering::Relaxed);
        self.root
            .join(format!(".partial-{}-{n}", std::process::id()))
    }

    async fn write_partial(&self, partial: &Path, request: Request) -> Result<u64, BackendError> {
        let mut file = fs::File::create(partial).await?;
        let mut stream = request.into_body().into_data_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| BackendError::Rejected(format!("artifact upload interrupted: {e}")))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl CacheBackend for FilesystemBackend {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn store_file(&self, hash: &str, request: Request) -> Result<(), BackendError> {
        let target = self.entry_path(hash)?;
        if !fs::metadata(&self.root).await.is_ok_and(|m| m.is_dir()) {
            return Err(BackendError::Unavailable(format!(
                "cache directory {} is missing",
                self.root.display()
            )));
        }

        let partial = self.partial_path();
        let written = match self.write_partial(&partial, request).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial).await;
                return Err(e);
            },
        };
        // Rename is atomic within a directory; the last writer wins.
        if let Err(e) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        debug!(hash, size = written, path = %target.display(), "stored artifact");
        Ok(())
    }

    async fn retrieve_file(&self, hash: &str) -> Result<Response, BackendError> {
        let path = self.entry_path(hash)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(StatusCode::NOT_FOUND.into_response());
            },
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, ARTIFACT_CONTENT_TYPE.to_string()),
                (header::CONTENT_LENGTH, len.to_string()),
            ],
            Body::from_stream(ReaderStream::new(file)),
        )
            .into_response())
    }
}

/// Factory for [`FilesystemBackend`].
///
/// Settings: `enabled` (bool), `path` (directory, relative paths resolve
/// against the workspace root). The directory is created if missing.
pub struct FilesystemFactory;

impl BackendFactory for FilesystemFactory {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn create(
        &self,
        options: &PluginOptions,
        ctx: &ExecutionContext,
    ) -> anyhow::Result<BackendActivation> {
        if !options.enabled()? {
            return Ok(BackendActivation::disabled("disabled by configuration"));
        }
        let dir = options
            .setting::<PathBuf>("path")?
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR));
        let root = ctx.resolve(dir);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cache directory {}", root.display()))?;
        Ok(BackendActivation::enabled(FilesystemBackend::new(root)))
    }
}
