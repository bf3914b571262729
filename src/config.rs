//! Configuration with validation, defaults and TOML file support.

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for the tiltzero server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TiltzeroConfig {
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

/// Round engine timing and payout policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long the betting window stays open per round.
    pub bet_window_ms: u64,
    /// Interval between countdown ticks broadcast to clients.
    pub tick_interval_ms: u64,
    /// Bounded wait for in-flight bet acceptances after the window
    /// closes. The round proceeds when the ceiling is reached even if
    /// acceptances are still in flight.
    pub drain_ceiling_ms: u64,
    /// Pause between the end of one round and the start of the next.
    pub pause_ms: u64,
    /// Back-off after an unexpected cycle failure before retrying.
    pub recovery_pause_ms: u64,
    /// Gross payout on a win, as a multiple of the stake. The stake was
    /// already deducted at reservation, so 2 means "stake back plus
    /// equal winnings".
    pub payout_multiplier: u64,
    pub rating_win_delta: i64,
    pub rating_loss_delta: i64,
    pub leaderboard_size: usize,
    pub starting_chips: u64,
    pub starting_rating: i64,
    pub credit: CreditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bet_window_ms: 10_000,
            tick_interval_ms: 1_000,
            drain_ceiling_ms: 500,
            pause_ms: 5_000,
            recovery_pause_ms: 2_000,
            payout_multiplier: 2,
            rating_win_delta: 10,
            rating_loss_delta: -7,
            leaderboard_size: 10,
            starting_chips: 5_000,
            starting_rating: 1_000,
            credit: CreditConfig::default(),
        }
    }
}

/// Policy for the convenience credit feature. Credit is granted only
/// when the user is below the threshold and has no outstanding
/// reservations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    pub threshold: u64,
    pub grant: u64,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            grant: 10,
        }
    }
}

/// HTTP/WebSocket server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn bet_window(&self) -> Duration {
        Duration::from_millis(self.bet_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drain_ceiling(&self) -> Duration {
        Duration::from_millis(self.drain_ceiling_ms)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn recovery_pause(&self) -> Duration {
        Duration::from_millis(self.recovery_pause_ms)
    }
}

impl TiltzeroConfig {
    /// Load configuration: defaults, overlaid by the optional TOML file,
    /// overlaid by `TILTZERO_HOST` / `TILTZERO_PORT` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    EngineError::InvalidConfig(format!("failed to read {}: {}", p.display(), e))
                })?;
                toml::from_str(&raw).map_err(|e| {
                    EngineError::InvalidConfig(format!("failed to parse {}: {}", p.display(), e))
                })?
            }
            None => Self::default(),
        };

        if let Ok(host) = std::env::var("TILTZERO_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("TILTZERO_PORT") {
            config.server.port = port
                .parse()
                .map_err(|e| EngineError::InvalidConfig(format!("TILTZERO_PORT: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.bet_window_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "bet_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.engine.tick_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.engine.payout_multiplier < 1 {
            return Err(EngineError::InvalidConfig(
                "payout_multiplier must be at least 1".to_string(),
            ));
        }
        if self.engine.leaderboard_size == 0 {
            return Err(EngineError::InvalidConfig(
                "leaderboard_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
