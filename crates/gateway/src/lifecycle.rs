//! Pre-run / post-run hooks.
//!
//! Per session: `Idle → Loading → {Disabled | Starting} → Listening →
//! Closing → Closed`. `Disabled` holds no resources and leaves no registry
//! entry behind.

use {
    cachegate_backend::{BackendRegistry, ExecutionContext, Loaded, PluginOptions},
    tracing::{debug, info, warn},
};

use crate::{
    error::GatewayError,
    server::{Discovery, ServerHandle, ServerOptions},
    state::{SessionKey, SessionRegistry, Taken},
};

/// Result of a successful pre-run.
#[derive(Debug)]
pub enum StartOutcome {
    /// The backend opted out; the gateway stays inert for this session.
    Disabled { reason: String },
    /// The gateway is listening; hand this to the task runners.
    Listening(Discovery),
}

impl StartOutcome {
    pub fn discovery(&self) -> Option<&Discovery> {
        match self {
            Self::Listening(discovery) => Some(discovery),
            Self::Disabled { .. } => None,
        }
    }
}

/// Entry point for an orchestrator: resolves backends and tracks sessions.
pub struct CacheGateway {
    backends: BackendRegistry,
    sessions: SessionRegistry,
    options: ServerOptions,
}

impl CacheGateway {
    pub fn new(backends: BackendRegistry, options: ServerOptions) -> Self {
        Self {
            backends,
            sessions: SessionRegistry::new(),
            options,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// Pre-run hook. Completes only once the listener is bound.
    ///
    /// Backend load and factory failures are returned as errors and must
    /// abort the run.
    pub async fn pre_run(
        &self,
        key: SessionKey,
        plugin: &PluginOptions,
        ctx: &ExecutionContext,
    ) -> Result<StartOutcome, GatewayError> {
        let reservation = self.sessions.reserve(key)?;
        debug!(session = %reservation.key(), backend = %plugin.backend, "loading cache backend");

        let guard = match self.backends.load(plugin, ctx)? {
            Loaded::Enabled(guard) => guard,
            Loaded::Disabled { reason } => return Ok(StartOutcome::Disabled { reason }),
        };

        let handle = ServerHandle::start(guard, &self.options).await?;
        let discovery = handle.discovery().clone();
        info!(session = %reservation.key(), url = %discovery.url, "cache session started");
        reservation.commit(handle);
        Ok(StartOutcome::Listening(discovery))
    }

    /// Post-run hook. Returns whether a session was closed; calling it for an
    /// unknown or already stopped key is a no-op.
    pub async fn post_run(&self, key: &SessionKey) -> bool {
        match self.sessions.take(key) {
            Taken::Listening(handle) => {
                handle.close().await;
                info!(session = %key, "cache session stopped");
                true
            },
            Taken::Starting => {
                warn!(session = %key, "post-run while the cache session is still starting, ignoring");
                false
            },
            Taken::Absent => {
                debug!(session = %key, "no cache session to stop");
                false
            },
        }
    }
}
