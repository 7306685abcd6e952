// Configuration Management for Flowscope
// Typed sections with defaults, merged from JSON file then environment

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::core::error::ConfigError;

// ============================================================================
// Detector thresholds
// ============================================================================

/// Every tunable the detectors read. Field defaults are the shipped behavior;
/// a JSON config file or CLI flags can override any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorThresholds {
    // Aggregation
    /// |delta| / total at or above which a bucket is flagged imbalanced.
    pub significant_imbalance_ratio: f64,
    /// Wall-clock seconds of inactivity after which an open bucket closes.
    pub bucket_idle_close_secs: f64,

    // CVD zero-cross
    /// |cvd| the previous bucket must have reached for a sign change to fire.
    pub flip_hysteresis: i64,

    // Volume profile
    /// Fraction of total volume the value area must cover.
    pub value_area_fraction: f64,
    /// A level is a low-volume node when 0 < total < this fraction of mean.
    pub lvn_mean_fraction: f64,
    /// Consecutive LVNs within this many ticks merge into one zone.
    pub lvn_group_ticks: i64,

    // Absorption
    /// Minimum single-trade size that can count as absorbed flow.
    pub absorption_min_size: u32,
    /// Accumulators idle longer than this many seconds are pruned.
    pub absorption_idle_secs: u64,
    /// Strength ladder: (event_count, total_absorbed), both required.
    pub absorption_weak: (u32, i64),
    pub absorption_medium: (u32, i64),
    pub absorption_strong: (u32, i64),
    pub absorption_defended: (u32, i64),
    /// POC/VAH/VAL proximity, in ticks, for the at-key-level tag.
    pub key_level_ticks: f64,

    // Stacked imbalance
    /// |buy − sell| / max(1, buy + sell) for a level to count as one-sided.
    pub stack_imbalance_ratio: f64,
    /// Minimum consecutive one-sided levels for a stack.
    pub stack_min_levels: usize,

    // Confluence
    /// Sliding window for signal agreement, milliseconds.
    pub confluence_window_ms: u64,

    // Outcome
    /// Win/loss threshold in ticks for the 5-minute move.
    pub outcome_win_ticks: f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            significant_imbalance_ratio: 0.15,
            bucket_idle_close_secs: 1.1,
            flip_hysteresis: 300,
            value_area_fraction: 0.70,
            lvn_mean_fraction: 0.30,
            lvn_group_ticks: 3,
            absorption_min_size: 20,
            absorption_idle_secs: 300,
            absorption_weak: (1, 20),
            absorption_medium: (3, 100),
            absorption_strong: (5, 300),
            absorption_defended: (8, 600),
            key_level_ticks: 1.0,
            stack_imbalance_ratio: 0.67,
            stack_min_levels: 3,
            confluence_window_ms: 30_000,
            outcome_win_ticks: 4.0,
        }
    }
}

// ============================================================================
// Gateway / hub / store sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Normalized trade gateway WebSocket URL (live mode).
    pub ws_url: String,
    pub api_key: String,
    /// Exponential backoff base, seconds.
    pub backoff_base_secs: u64,
    /// Backoff cap, seconds.
    pub backoff_cap_secs: u64,
    /// Random jitter applied to each backoff, ± seconds.
    pub backoff_jitter_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            api_key: String::new(),
            backoff_base_secs: 1,
            backoff_cap_secs: 30,
            backoff_jitter_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-subscriber buffered messages before the oldest are dropped.
    pub subscriber_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub db_path: String,
    /// Pending writes kept before the oldest are dropped.
    pub write_backlog: usize,
    /// Record one price sample row per CVD point.
    pub record_price_samples: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "flowscope.db".to_string(),
            write_backlog: 10_000,
            record_price_samples: true,
        }
    }
}

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub thresholds: DetectorThresholds,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub store: StoreConfig,
    /// Symbol-specific tick sizes; anything absent uses `default_tick`.
    #[serde(default)]
    pub tick_sizes: HashMap<String, f64>,
    #[serde(default = "default_tick")]
    pub default_tick: f64,
}

fn default_tick() -> f64 {
    0.25
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: DetectorThresholds::default(),
            gateway: GatewayConfig::default(),
            hub: HubConfig::default(),
            store: StoreConfig::default(),
            tick_sizes: HashMap::new(),
            default_tick: default_tick(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file if it exists, then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let content = fs::read_to_string(p)?;
                let config: EngineConfig = serde_json::from_str(&content)?;
                info!(path = p, "Configuration loaded");
                config
            }
            Some(p) => {
                warn!(path = p, "Config file not found, using defaults");
                EngineConfig::default()
            }
            None => EngineConfig::default(),
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Sensitive values come from the environment, never the file.
    fn load_from_env(&mut self) {
        if let Ok(key) = std::env::var("DATABENTO_API_KEY") {
            self.gateway.api_key = key;
        }
    }

    pub fn tick_for(&self, symbol: &str) -> f64 {
        self.tick_sizes
            .get(symbol)
            .copied()
            .unwrap_or(self.default_tick)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if !(0.0..=1.0).contains(&t.significant_imbalance_ratio) {
            return Err(ConfigError::Validation(
                "significant_imbalance_ratio must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&t.stack_imbalance_ratio) {
            return Err(ConfigError::Validation(
                "stack_imbalance_ratio must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&t.value_area_fraction) {
            return Err(ConfigError::Validation(
                "value_area_fraction must be in [0, 1]".to_string(),
            ));
        }
        if t.stack_min_levels < 2 {
            return Err(ConfigError::Validation(
                "stack_min_levels must be at least 2".to_string(),
            ));
        }
        if self.default_tick <= 0.0 {
            return Err(ConfigError::Validation(
                "default_tick must be positive".to_string(),
            ));
        }
        if self.hub.subscriber_capacity == 0 {
            return Err(ConfigError::Validation(
                "subscriber_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.thresholds.flip_hysteresis, 300);
        assert_eq!(config.thresholds.significant_imbalance_ratio, 0.15);
        assert_eq!(config.thresholds.stack_imbalance_ratio, 0.67);
        assert_eq!(config.thresholds.outcome_win_ticks, 4.0);
        assert_eq!(config.thresholds.absorption_strong, (5, 300));
        assert_eq!(config.default_tick, 0.25);
        assert_eq!(config.hub.subscriber_capacity, 1024);
        assert_eq!(config.store.write_backlog, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_lookup() {
        let mut config = EngineConfig::default();
        config.tick_sizes.insert("ES.c.0".to_string(), 0.25);
        config.tick_sizes.insert("ZB.c.0".to_string(), 0.03125);
        assert_eq!(config.tick_for("ZB.c.0"), 0.03125);
        assert_eq!(config.tick_for("UNKNOWN"), 0.25);
    }

    #[test]
    fn test_validation_rejects_bad_ratio() {
        let mut config = EngineConfig::default();
        config.thresholds.stack_imbalance_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.thresholds.flip_hysteresis,
            config.thresholds.flip_hysteresis
        );
        assert_eq!(back.store.write_backlog, config.store.write_backlog);
    }
}
