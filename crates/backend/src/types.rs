use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    serde::{Deserialize, Serialize, de::DeserializeOwned},
};

/// Backend selected when none is configured.
pub const DEFAULT_BACKEND: &str = "filesystem";

/// Backend selection plus backend-specific passthrough settings.
///
/// Everything besides `backend` is opaque to the gateway and handed to the
/// factory untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Name of the registered backend factory.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND)
    }
}

impl PluginOptions {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    /// Typed lookup of a passthrough setting. Absent and `null` both read as `None`.
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.settings.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .with_context(|| format!("invalid value for backend setting `{key}`")),
        }
    }

    /// The conventional `enabled` switch; backends default to enabled.
    pub fn enabled(&self) -> anyhow::Result<bool> {
        Ok(self.setting::<bool>("enabled")?.unwrap_or(true))
    }
}

/// Orchestrator-provided environment for one task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workspace_root: PathBuf,
}

impl ExecutionContext {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Resolve `path` against the workspace root unless it is already absolute.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_flatten_next_to_backend() {
        let options: PluginOptions =
            serde_json::from_str(r#"{"backend":"memory","max_entry_bytes":1024,"team":"infra"}"#)
                .unwrap();
        assert_eq!(options.backend, "memory");
        assert_eq!(options.setting::<u64>("max_entry_bytes").unwrap(), Some(1024));
        assert_eq!(
            options.setting::<String>("team").unwrap().as_deref(),
            Some("infra")
        );
        assert_eq!(options.setting::<String>("missing").unwrap(), None);
    }

    #[test]
    fn backend_defaults_to_filesystem() {
        let options: PluginOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.backend, DEFAULT_BACKEND);
        assert!(options.enabled().unwrap());
    }

    #[test]
    fn mistyped_setting_is_an_error() {
        let options = PluginOptions::new("memory").with_setting("enabled", "yes");
        assert!(options.enabled().is_err());
    }

    #[test]
    fn resolve_relative_to_workspace() {
        let ctx = ExecutionContext::new("/work/repo");
        assert_eq!(
            ctx.resolve(".cache/cachegate"),
            PathBuf::from("/work/repo/.cache/cachegate")
        );
        assert_eq!(ctx.resolve("/var/cache"), PathBuf::from("/var/cache"));
    }
}
