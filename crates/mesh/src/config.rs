//! Configuration structures for the local node.

use std::time::Duration;

use corelib::{CONNECTION_ID_LEN, DEFAULT_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// What a route improvement does to established connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRefresh {
    /// Request a fresh link for every matching connection, even healthy ones.
    Always,
    /// Only re-establish matching connections that currently have no link.
    WhenUnbound,
}

/// Configuration for a local node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// How long an accepted link may stay silent before its handshake is
    /// abandoned. Zero disables the timeout.
    pub handshake_timeout_ms: u64,

    /// Largest frame body accepted or sent on a bound connection.
    pub max_frame_size: usize,

    /// Reaction to route improvements.
    pub route_refresh: RouteRefresh,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            route_refresh: RouteRefresh::Always,
        }
    }
}

impl MeshConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MeshError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Handshake read timeout, `None` when disabled.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout_ms = timeout.map_or(0, |t| t.as_millis().max(1) as u64);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_route_refresh(mut self, route_refresh: RouteRefresh) -> Self {
        self.route_refresh = route_refresh;
        self
    }

    /// Reject settings that would make the node unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < CONNECTION_ID_LEN {
            return Err(MeshError::Config(format!(
                "max_frame_size must be at least {} bytes, got {}",
                CONNECTION_ID_LEN, self.max_frame_size
            )));
        }
        Ok(())
    }
}
