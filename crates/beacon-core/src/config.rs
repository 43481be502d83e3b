//! Server configuration

use serde::{Deserialize, Serialize};

/// Signaling server configuration
///
/// Loaded from a TOML file by the binary; every field has a default so a
/// bare `Serve` invocation works. The per-room participant cap is the
/// protocol constant [`crate::rooms::ROOM_CAPACITY`] and is deliberately
/// not configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket bind address
    pub bind_addr: String,
    /// Maximum concurrent clients (1 to 65536)
    pub max_clients: usize,
    /// Maximum concurrent rooms (1 to 10000)
    pub max_rooms: usize,
    /// Idle client timeout in seconds (minimum 30)
    pub idle_timeout_secs: u64,
    /// Ingress queue capacity
    pub ingress_capacity: usize,
}

impl ServerConfig {
    /// Lowest accepted idle timeout; anything shorter would let the
    /// reaper race normal signaling gaps
    const MIN_IDLE_TIMEOUT: u64 = 30;
    /// Client registry slot ceiling
    const MAX_CLIENTS: usize = 65_536;
    /// Room registry slot ceiling
    const MAX_ROOMS: usize = 10_000;

    /// Clamp out-of-range values, logging one warning per correction
    pub fn validate(&mut self) {
        if self.max_clients == 0 || self.max_clients > Self::MAX_CLIENTS {
            let clamped = self.max_clients.clamp(1, Self::MAX_CLIENTS);
            tracing::warn!(
                "max_clients {} out of range, clamping to {}",
                self.max_clients,
                clamped
            );
            self.max_clients = clamped;
        }
        if self.max_rooms == 0 || self.max_rooms > Self::MAX_ROOMS {
            let clamped = self.max_rooms.clamp(1, Self::MAX_ROOMS);
            tracing::warn!("max_rooms {} out of range, clamping to {}", self.max_rooms, clamped);
            self.max_rooms = clamped;
        }
        if self.idle_timeout_secs < Self::MIN_IDLE_TIMEOUT {
            tracing::warn!(
                "idle_timeout_secs {} too low, raising to {}",
                self.idle_timeout_secs,
                Self::MIN_IDLE_TIMEOUT
            );
            self.idle_timeout_secs = Self::MIN_IDLE_TIMEOUT;
        }
        if self.ingress_capacity == 0 {
            tracing::warn!("ingress_capacity 0 invalid, using default 1024");
            self.ingress_capacity = 1024;
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            max_clients: 1024,
            max_rooms: 256,
            idle_timeout_secs: 300,
            ingress_capacity: 1024,
        }
    }
}
