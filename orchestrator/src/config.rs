//! Configuration parsing and management.

use std::{
    env,
    fmt::{self, Display, Formatter},
    fs::read_to_string,
    io,
    path::Path,
    time::Duration,
};

use serde::Deserialize;
use tracing::warn;

fn default_voice_flush_delay() -> u64 {
    50
}

fn default_player_batch_delay() -> u64 {
    25
}

fn default_stuck_threshold() -> u64 {
    30_000
}

fn default_migration_threshold() -> f32 {
    0.15
}

fn default_rebalance_interval() -> u64 {
    30_000
}

fn default_health_cache_ttl() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    2_000
}

fn default_history_limit() -> usize {
    50
}

fn default_smart_shuffle_window() -> usize {
    5
}

fn default_queue_limit() -> usize {
    1_000
}

fn default_node_info_timeout() -> u64 {
    5_000
}

fn default_voice_ready_timeout() -> u64 {
    1_000
}

/// Process-wide knobs governing batching windows, timeouts, and bounded
/// collections across the orchestrator. Every field has the default this
/// domain's Lavalink-client lineage uses.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Voice+volume batch-flush window, in milliseconds. Default 50.
    #[serde(default = "default_voice_flush_delay")]
    pub voice_flush_delay_ms: u64,
    /// Player-update batch-flush window, in milliseconds. Default 25.
    #[serde(default = "default_player_batch_delay")]
    pub player_batch_delay_ms: u64,
    /// How long `position` may stay unchanged while playing before stuck
    /// recovery triggers, in milliseconds. Default 30000.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_ms: u64,
    /// Migration triggers when `currentScore - bestScore > this * 100`.
    #[serde(default = "default_migration_threshold")]
    pub migration_threshold: f32,
    /// How often `Pool::rebalance()` runs, in milliseconds. Default 30000.
    #[serde(default = "default_rebalance_interval")]
    pub rebalance_interval_ms: u64,
    /// TTL for a node's cached health score, in milliseconds. Default 30000.
    #[serde(default = "default_health_cache_ttl")]
    pub health_cache_ttl_ms: u64,
    /// Max voice-flush and voice-recovery retry attempts. Default 3.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay between voice-recovery attempts, in milliseconds. Default 2000.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Maximum number of entries kept in a Player's history. Default 50.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Number of most-recent history entries consulted by smart shuffle. Default 5.
    #[serde(default = "default_smart_shuffle_window")]
    pub smart_shuffle_window: usize,
    /// Maximum number of tracks a single Queue may hold. Default 1000.
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// Non-fatal timeout for the opportunistic `getInfo()` probe on node ready,
    /// in milliseconds. Default 5000.
    #[serde(default = "default_node_info_timeout")]
    pub node_info_timeout_ms: u64,
    /// Advisory wait for a voice binding to complete, in milliseconds. Default 1000.
    #[serde(default = "default_voice_ready_timeout")]
    pub voice_ready_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            voice_flush_delay_ms: default_voice_flush_delay(),
            player_batch_delay_ms: default_player_batch_delay(),
            stuck_threshold_ms: default_stuck_threshold(),
            migration_threshold: default_migration_threshold(),
            rebalance_interval_ms: default_rebalance_interval(),
            health_cache_ttl_ms: default_health_cache_ttl(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay(),
            history_limit: default_history_limit(),
            smart_shuffle_window: default_smart_shuffle_window(),
            queue_limit: default_queue_limit(),
            node_info_timeout_ms: default_node_info_timeout(),
            voice_ready_timeout_ms: default_voice_ready_timeout(),
        }
    }
}

impl OrchestratorConfig {
    pub fn voice_flush_delay(&self) -> Duration {
        Duration::from_millis(self.voice_flush_delay_ms)
    }

    pub fn player_batch_delay(&self) -> Duration {
        Duration::from_millis(self.player_batch_delay_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn health_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.health_cache_ttl_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn node_info_timeout(&self) -> Duration {
        Duration::from_millis(self.node_info_timeout_ms)
    }

    pub fn voice_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_ready_timeout_ms)
    }

    /// Parses the configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadFileError> {
        let file_content = read_to_string(path).map_err(LoadFileError::Io)?;
        toml::de::from_str(&file_content).map_err(LoadFileError::Toml)
    }

    /// Overwrites the batching/timeout knobs with environment variables when
    /// present, leaving unset ones at their current value.
    pub fn or_from_env(mut self) -> Self {
        if let Some(v) = env_u64("ORCHESTRATOR_VOICE_FLUSH_DELAY_MS") {
            self.voice_flush_delay_ms = v;
        }
        if let Some(v) = env_u64("ORCHESTRATOR_PLAYER_BATCH_DELAY_MS") {
            self.player_batch_delay_ms = v;
        }
        if let Some(v) = env_u64("ORCHESTRATOR_STUCK_THRESHOLD_MS") {
            self.stuck_threshold_ms = v;
        }
        if let Some(v) = env::var("ORCHESTRATOR_MIGRATION_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.migration_threshold = v;
        }
        if let Some(v) = env_u64("ORCHESTRATOR_REBALANCE_INTERVAL_MS") {
            self.rebalance_interval_ms = v;
        }
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Errors that can occur while parsing the configuration file.
#[derive(Debug)]
pub enum LoadFileError {
    Io(io::Error),
    Toml(toml::de::Error),
}

impl Display for LoadFileError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Toml(err) => write!(f, "TOML error: {}", err),
        }
    }
}

impl std::error::Error for LoadFileError {}

/// Loads the configuration from `path`, falling back to defaults (with
/// environment overrides applied) when the file can't be read or parsed.
pub fn load_or_default<P: AsRef<Path>>(path: P) -> OrchestratorConfig {
    match OrchestratorConfig::from_file(path) {
        Ok(v) => v.or_from_env(),
        Err(e) => {
            warn!("failed to load the configuration file: {}", e);
            OrchestratorConfig::default().or_from_env()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.voice_flush_delay(), Duration::from_millis(50));
        assert_eq!(config.player_batch_delay(), Duration::from_millis(25));
        assert_eq!(config.stuck_threshold(), Duration::from_secs(30));
    }

    #[test]
    fn parses_partial_toml() {
        let config: OrchestratorConfig = toml::de::from_str("history_limit = 10\n").unwrap();
        assert_eq!(config.history_limit, 10);
        assert_eq!(config.player_batch_delay_ms, default_player_batch_delay());
    }
}
