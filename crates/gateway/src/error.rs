use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    cachegate_backend::{BackendError, LoadError},
};

/// Failure to start or manage a gateway session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("failed to bind cache gateway on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to bind cache gateway on non-loopback address {0}")]
    NonLoopbackBind(IpAddr),

    #[error("cache session `{0}` is already active")]
    SessionActive(String),
}

/// Structured error body returned by the HTTP surface:
/// `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "backend_timeout",
            format!("cache backend did not answer within {}s", limit.as_secs_f64()),
        )
    }

    pub fn closing() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "gateway_closing",
            "cache gateway is shutting down",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        let (status, code) = match &err {
            BackendError::Unavailable(_) | BackendError::Io(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "backend_unavailable")
            },
            BackendError::Rejected(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend_rejected"),
            BackendError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend_failed"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_map_to_5xx() {
        let cases = [
            (
                BackendError::Unavailable("bucket offline".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "backend_unavailable",
            ),
            (
                BackendError::Io(std::io::Error::other("disk gone")),
                StatusCode::SERVICE_UNAVAILABLE,
                "backend_unavailable",
            ),
            (
                BackendError::Rejected("bad key".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "backend_rejected",
            ),
            (
                BackendError::Other(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "backend_failed",
            ),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn timeout_is_504() {
        let api = ApiError::timeout(Duration::from_secs(2));
        assert_eq!(api.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(api.code(), "backend_timeout");
    }
}
