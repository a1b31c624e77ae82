use std::{collections::BTreeMap, sync::Arc};

use tracing::{info, warn};

use crate::{
    backend::{BackendActivation, BackendFactory, BackendGuard},
    builtin::{FilesystemFactory, MemoryFactory},
    types::{ExecutionContext, PluginOptions},
};

/// Failure to resolve or construct a backend. Always fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unknown cache backend `{name}` (available: {available})")]
    UnknownBackend { name: String, available: String },

    #[error("cache backend `{name}` failed to initialise")]
    Factory {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of [`BackendRegistry::load`].
pub enum Loaded {
    Enabled(BackendGuard),
    Disabled { reason: String },
}

/// Named backend factories, resolved once per session.
pub struct BackendRegistry {
    factories: BTreeMap<String, Arc<dyn BackendFactory>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding the `filesystem` and `memory` backends.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FilesystemFactory));
        registry.register(Arc::new(MemoryFactory));
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register(&mut self, factory: Arc<dyn BackendFactory>) {
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            warn!(backend = %name, "replacing registered cache backend");
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve `options.backend` and run its factory.
    pub fn load(
        &self,
        options: &PluginOptions,
        ctx: &ExecutionContext,
    ) -> Result<Loaded, LoadError> {
        let Some(factory) = self.factories.get(&options.backend) else {
            return Err(LoadError::UnknownBackend {
                name: options.backend.clone(),
                available: self.names().join(", "),
            });
        };

        let activation = factory
            .create(options, ctx)
            .map_err(|source| LoadError::Factory {
                name: options.backend.clone(),
                source,
            })?;

        match activation {
            BackendActivation::Enabled(backend) => {
                info!(backend = backend.name(), "cache backend loaded");
                Ok(Loaded::Enabled(BackendGuard::new(backend)))
            },
            BackendActivation::Disabled { reason } => {
                info!(backend = %options.backend, %reason, "cache backend disabled");
                Ok(Loaded::Disabled { reason })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl BackendFactory for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn create(
            &self,
            _options: &PluginOptions,
            _ctx: &ExecutionContext,
        ) -> anyhow::Result<BackendActivation> {
            anyhow::bail!("bucket credentials missing")
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(std::env::temp_dir())
    }

    #[test]
    fn builtins_are_listed_in_order() {
        let registry = BackendRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["filesystem", "memory"]);
    }

    #[test]
    fn unknown_backend_names_the_alternatives() {
        let registry = BackendRegistry::with_builtins();
        let err = match registry.load(&PluginOptions::new("s3"), &ctx()) {
            Err(e) => e,
            Ok(_) => panic!("expected load failure"),
        };
        let msg = err.to_string();
        assert!(msg.contains("`s3`"));
        assert!(msg.contains("filesystem, memory"));
    }

    #[test]
    fn factory_error_is_fatal() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(Broken));
        let err = match registry.load(&PluginOptions::new("broken"), &ctx()) {
            Err(e) => e,
            Ok(_) => panic!("expected load failure"),
        };
        assert!(matches!(err, LoadError::Factory { ref name, .. } if name == "broken"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "bucket credentials missing");
    }

    #[test]
    fn disabled_is_not_an_error() {
        let registry = BackendRegistry::with_builtins();
        let options = PluginOptions::new("memory").with_setting("enabled", false);
        let loaded = registry.load(&options, &ctx()).unwrap();
        assert!(matches!(loaded, Loaded::Disabled { .. }));
    }

    #[test]
    fn enabled_backend_is_guarded() {
        let registry = BackendRegistry::with_builtins();
        let loaded = registry.load(&PluginOptions::new("memory"), &ctx()).unwrap();
        match loaded {
            Loaded::Enabled(guard) => assert_eq!(guard.name(), "memory"),
            Loaded::Disabled { .. } => panic!("memory backend should be enabled"),
        }
    }
}
