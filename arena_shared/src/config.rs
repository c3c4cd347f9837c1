//! Configuration system.
//!
//! Loads arena configuration from JSON strings/files (file IO left to app)
//! with a thin layer of environment overrides.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8787;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Server listen address, e.g. `127.0.0.1:8787`.
    pub server_addr: String,
    /// Name advertised by the discovery endpoint.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Fixed simulation tick rate (client).
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Snapshot broadcast rate (server).
    #[serde(default = "default_snapshot_hz")]
    pub snapshot_hz: u32,
    /// Upper bound on one render frame's elapsed time.
    #[serde(default = "default_max_frame_secs")]
    pub max_frame_secs: f64,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Delay before reconnecting after a dropped session.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Consecutive reconnection attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_server_name() -> String {
    "Arena".to_string()
}

fn default_tick_hz() -> u32 {
    60
}

fn default_snapshot_hz() -> u32 {
    15
}

fn default_max_frame_secs() -> f64 {
    0.25
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            server_name: default_server_name(),
            tick_hz: default_tick_hz(),
            snapshot_hz: default_snapshot_hz(),
            max_frame_secs: default_max_frame_secs(),
            player_name: default_player_name(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ArenaConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Applies `PORT` and `ARENA_SERVER_NAME` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env::var("PORT").ok().and_then(|v| v.parse::<u16>().ok()) {
            let host = self
                .server_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.server_addr = format!("{host}:{port}");
        }
        if let Ok(name) = env::var("ARENA_SERVER_NAME") {
            if !name.is_empty() {
                self.server_name = name;
            }
        }
        self
    }

    pub fn fixed_dt(&self) -> f64 {
        1.0 / self.tick_hz.max(1) as f64
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.snapshot_hz.max(1) as f64)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// WebSocket URL for `server_addr`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.server_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_defaults() {
        let cfg = ArenaConfig::from_json_str(r#"{"server_addr":"10.0.0.2:9000"}"#).unwrap();
        assert_eq!(cfg.server_addr, "10.0.0.2:9000");
        assert_eq!(cfg.tick_hz, 60);
        assert_eq!(cfg.snapshot_hz, 15);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(cfg.ws_url(), "ws://10.0.0.2:9000/ws");
    }
}
