//! WebSocket listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;
use tether_proto::websocket::OriginPolicy;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080").
    pub address: SocketAddr,
    /// Allowed `Origin` values for the upgrade request. Empty allows any.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Reject upgrade requests that carry no `Origin` header.
    #[serde(default)]
    pub require_origin: bool,
    /// Connections one IP may open in a burst before being refused.
    #[serde(default = "default_connection_burst")]
    pub connection_burst: u32,
}

impl ListenConfig {
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy {
            allowed_origins: self.allow_origins.clone(),
            require_origin: self.require_origin,
        }
    }
}

fn default_connection_burst() -> u32 {
    10
}
