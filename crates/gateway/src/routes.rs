use std::{sync::Arc, time::Duration};

use {
    axum::{
        Router,
        extract::{Path, Request, State},
        http::{StatusCode, header},
        middleware,
        response::Response,
        routing::put,
    },
    cachegate_backend::{BackendError, CacheBackend},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tower_http::{sensitive_headers::SetSensitiveRequestHeadersLayer, trace::TraceLayer},
    tracing::warn,
};

use crate::{
    auth::{self, SessionToken},
    error::ApiError,
};

/// Route served by the gateway; `{key}` is the opaque cache key.
pub const CACHE_ROUTE: &str = "/v1/cache/{key}";

/// Tracks backend calls made by request handlers and can cut them off.
///
/// Connection tasks outlive the accept loop, so the server handle uses this
/// to make sure no backend call is still running once the backend is
/// released.
#[derive(Clone, Default)]
pub struct InFlight {
    cancel: CancellationToken,
    calls: TaskTracker,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon every running backend call and wait until none remain.
    /// Calls arriving afterwards are refused without reaching the backend.
    pub async fn force_close(&self) {
        self.cancel.cancel();
        self.calls.close();
        self.calls.wait().await;
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[derive(Clone)]
struct RouteState {
    backend: Arc<dyn CacheBackend>,
    request_timeout: Duration,
    inflight: InFlight,
}

/// Build the authenticated cache router around one backend.
pub fn cache_router(
    backend: Arc<dyn CacheBackend>,
    token: Arc<SessionToken>,
    request_timeout: Duration,
    inflight: InFlight,
) -> Router {
    let state = RouteState {
        backend,
        request_timeout,
        inflight,
    };

    Router::new()
        .route(CACHE_ROUTE, put(store_handler).get(retrieve_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(token, auth::require_bearer))
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveRequestHeadersLayer::new([header::AUTHORIZATION]))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn store_handler(
    State(state): State<RouteState>,
    Path(key): Path<String>,
    request: Request,
) -> Result<StatusCode, ApiError> {
    let backend = Arc::clone(&state.backend);
    bounded(&state, "store", &key, backend.store_file(&key, request)).await?;
    Ok(StatusCode::OK)
}

async fn retrieve_handler(
    State(state): State<RouteState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let backend = Arc::clone(&state.backend);
    bounded(&state, "retrieve", &key, backend.retrieve_file(&key)).await
}

/// Run a backend call under the request deadline, unless the gateway is
/// being force-closed.
async fn bounded<T>(
    state: &RouteState,
    op: &'static str,
    key: &str,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, ApiError> {
    let _call = state.inflight.calls.token();
    let limit = state.request_timeout;
    tokio::select! {
        biased;
        () = state.inflight.cancel.cancelled() => {
            warn!(op, key, "cache gateway force-closed, backend call abandoned");
            Err(ApiError::closing())
        },
        outcome = tokio::time::timeout(limit, call) => match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(op, key, error = %e, "cache backend call failed");
                Err(e.into())
            },
            Err(_) => {
                warn!(op, key, timeout_secs = limit.as_secs_f64(), "cache backend call timed out");
                Err(ApiError::timeout(limit))
            },
        },
    }
}
