use super::ForwardTarget;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Snapshot of an active tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatus {
    /// Unique tunnel identifier
    pub id: Uuid,

    /// Registry key (database alias)
    pub key: String,

    /// Gateway as `user@host:port`
    pub gateway: String,

    pub target: ForwardTarget,

    /// Address the forwarding server listens on
    pub local_addr: SocketAddr,

    pub started_at: DateTime<Utc>,

    /// Relay sessions currently open
    pub active_connections: usize,

    /// Bytes relayed local → remote
    #[serde(default)]
    pub bytes_sent: u64,

    /// Bytes relayed remote → local
    #[serde(default)]
    pub bytes_received: u64,
}

impl TunnelStatus {
    /// Get duration since the tunnel started
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
