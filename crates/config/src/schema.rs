//! Config schema: gateway listener settings plus the backend plugin section.
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use {
    cachegate_backend::PluginOptions,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachegateConfig {
    pub gateway: GatewayConfig,
    /// Backend selection and its passthrough settings.
    pub plugin: PluginOptions,
}

/// Listener settings for the cache gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind. Must be a loopback address.
    pub bind: IpAddr,

    /// Upper bound on a single backend call.
    pub request_timeout_secs: u64,

    /// How long in-flight requests may run after shutdown begins.
    pub drain_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            request_timeout_secs: 300,
            drain_grace_secs: 5,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}
