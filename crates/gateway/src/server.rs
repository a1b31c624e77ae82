use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use {
    cachegate_backend::BackendGuard,
    cachegate_config::GatewayConfig,
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    auth::{self, SessionToken},
    error::GatewayError,
    routes::{self, InFlight},
};

/// Environment variable carrying the gateway base URL to task runners.
pub const SERVER_URL_ENV: &str = "NX_SELF_HOSTED_REMOTE_CACHE_SERVER";
/// Environment variable carrying the session bearer token to task runners.
pub const ACCESS_TOKEN_ENV: &str = "NX_SELF_HOSTED_REMOTE_CACHE_ACCESS_TOKEN";

/// Listener settings for one session.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind: IpAddr,
    pub request_timeout: Duration,
    pub drain_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for ServerOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            bind: config.bind,
            request_timeout: config.request_timeout(),
            drain_grace: config.drain_grace(),
        }
    }
}

impl ServerOptions {
    pub fn loopback_v4() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Self::default()
        }
    }
}

/// Connection info for a listening session.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub url: String,
    pub addr: SocketAddr,
    pub token: Arc<SessionToken>,
}

impl Discovery {
    /// Variables a task runner needs to reach the gateway.
    pub fn env_vars(&self) -> [(&'static str, String); 2] {
        [
            (SERVER_URL_ENV, self.url.clone()),
            (ACCESS_TOKEN_ENV, self.token.expose().to_string()),
        ]
    }
}

/// Base URL for a bound address; IPv6 literals are bracketed.
pub fn base_url(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(v4) => format!("http://{}:{}", v4.ip(), v4.port()),
        SocketAddr::V6(v6) => format!("http://[{}]:{}", v6.ip(), v6.port()),
    }
}

/// A running gateway server. Owns the server task and the backend.
///
/// Dropping the handle signals shutdown without waiting; [`close`](Self::close)
/// is the orderly path.
pub struct ServerHandle {
    discovery: Discovery,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
    inflight: InFlight,
    drain_grace: Duration,
    backend: BackendGuard,
}

impl ServerHandle {
    /// Bind an ephemeral loopback port and start serving `backend`.
    ///
    /// Returns once the listener is bound. On failure the backend is
    /// released before returning.
    pub async fn start(
        backend: BackendGuard,
        options: &ServerOptions,
    ) -> Result<Self, GatewayError> {
        if !options.bind.is_loopback() {
            return Err(GatewayError::NonLoopbackBind(options.bind));
        }

        let requested = SocketAddr::new(options.bind, 0);
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: requested,
                source,
            })?;
        let addr = listener
            .local_addr()
            .map_err(|source| GatewayError::Bind {
                addr: requested,
                source,
            })?;

        let token = Arc::new(auth::issue_token());
        let inflight = InFlight::new();
        let app = routes::cache_router(
            backend.backend(),
            Arc::clone(&token),
            options.request_timeout,
            inflight.clone(),
        );

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        let discovery = Discovery {
            url: base_url(addr),
            addr,
            token,
        };
        info!(url = %discovery.url, backend = backend.name(), "cache gateway listening");

        Ok(Self {
            discovery,
            shutdown,
            task,
            inflight,
            drain_grace: options.drain_grace,
            backend,
        })
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Stop accepting connections, give in-flight requests `drain_grace` to
    /// finish, then force-close and release the backend.
    ///
    /// No backend call is running, or can start, once this returns.
    pub async fn close(mut self) {
        self.shutdown.cancel();
        match tokio::time::timeout(self.drain_grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => debug!(url = %self.discovery.url, "cache gateway drained"),
            Ok(Ok(Err(e))) => warn!(error = %e, "cache gateway server exited with error"),
            Ok(Err(e)) => warn!(error = %e, "cache gateway server task failed"),
            Err(_) => {
                warn!(
                    grace_secs = self.drain_grace.as_secs_f64(),
                    "in-flight cache requests outlived the drain grace, forcing close"
                );
                self.task.abort();
                let _ = (&mut self.task).await;
            },
        }
        // Connection tasks outlive the accept loop; cut off their backend
        // calls before the backend goes away.
        self.inflight.force_close().await;
        info!(
            url = %self.discovery.url,
            backend = self.backend.name(),
            "cache gateway closed"
        );
        // Dropping `self` releases the backend.
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv6Addr, SocketAddrV6};

    use {
        cachegate_backend::builtin::MemoryBackend,
        tokio::{io::AsyncWriteExt, net::TcpStream},
    };

    use super::*;

    fn memory_guard() -> BackendGuard {
        BackendGuard::new(Arc::new(MemoryBackend::default()))
    }

    #[test]
    fn base_url_v4() {
        let addr: SocketAddr = "127.0.0.1:40123".parse().unwrap();
        assert_eq!(base_url(addr), "http://127.0.0.1:40123");
    }

    #[test]
    fn base_url_brackets_v6() {
        let addr = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 40123, 0, 0));
        assert_eq!(base_url(addr), "http://[::1]:40123");
    }

    #[test]
    fn options_follow_config() {
        let config = GatewayConfig {
            request_timeout_secs: 7,
            drain_grace_secs: 1,
            ..GatewayConfig::default()
        };
        let options = ServerOptions::from(&config);
        assert_eq!(options.request_timeout, Duration::from_secs(7));
        assert_eq!(options.drain_grace, Duration::from_secs(1));
        assert!(options.bind.is_loopback());
    }

    #[test]
    fn env_vars_carry_url_and_token() {
        let token = Arc::new(auth::issue_token());
        let discovery = Discovery {
            url: "http://127.0.0.1:1".into(),
            addr: "127.0.0.1:1".parse().unwrap(),
            token: Arc::clone(&token),
        };
        let vars = discovery.env_vars();
        assert_eq!(vars[0], (SERVER_URL_ENV, "http://127.0.0.1:1".to_string()));
        assert_eq!(vars[1], (ACCESS_TOKEN_ENV, token.expose().to_string()));
    }

    #[tokio::test]
    async fn non_loopback_bind_is_refused() {
        let options = ServerOptions {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ..ServerOptions::default()
        };
        let err = match ServerHandle::start(memory_guard(), &options).await {
            Err(e) => e,
            Ok(_) => panic!("0.0.0.0 must be refused"),
        };
        assert!(matches!(err, GatewayError::NonLoopbackBind(_)));
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_closes() {
        let handle = ServerHandle::start(memory_guard(), &ServerOptions::loopback_v4())
            .await
            .unwrap();
        let addr = handle.discovery().addr;
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
        assert_eq!(handle.discovery().url, base_url(addr));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        handle.close().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
