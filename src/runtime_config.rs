// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable of the tracking engine lives here: account mode, poll
// cadence, candle window, strategy parameters and the fault policy.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// Environment overrides, applied by `load_or_default` after `.env` is loaded:
//   STOPS_POLL_INTERVAL_SECS  → poll_interval_secs
//   STOPS_CANDLE_COUNT        → candle_count
//   STOPS_ACCOUNT_MODE        → account_mode (paper | live)
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::policy::FaultPolicy;
use crate::strategy::StrategyParams;
use crate::types::AccountMode;

pub const ENV_POLL_INTERVAL: &str = "STOPS_POLL_INTERVAL_SECS";
pub const ENV_CANDLE_COUNT: &str = "STOPS_CANDLE_COUNT";
pub const ENV_ACCOUNT_MODE: &str = "STOPS_ACCOUNT_MODE";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_candle_count() -> usize {
    10
}

// =============================================================================
// EngineConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Seconds between poll cycles of each position monitor.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// One-minute bars requested per cycle.
    #[serde(default = "default_candle_count")]
    pub candle_count: usize,

    #[serde(default)]
    pub strategy: StrategyParams,

    #[serde(default)]
    pub faults: FaultPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::default(),
            poll_interval_secs: default_poll_interval_secs(),
            candle_count: default_candle_count(),
            strategy: StrategyParams::default(),
            faults: FaultPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Reject values the monitor loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.candle_count == 0 {
            bail!("candle_count must be at least 1");
        }
        let s = &self.strategy;
        if !(0.0..1.0).contains(&s.trailing_pct) || !(0.0..1.0).contains(&s.range_buffer_pct) {
            bail!(
                "strategy percentages must be in [0, 1): trailing={} buffer={}",
                s.trailing_pct,
                s.range_buffer_pct
            );
        }
        if s.min_change < 0.0 || s.trailing_min_change < 0.0 {
            bail!("stop change thresholds must not be negative");
        }
        Ok(())
    }

    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        config.validate()?;

        info!(
            path = %path.display(),
            account = %config.account_mode,
            poll_secs = config.poll_interval_secs,
            candles = config.candle_count,
            "engine config loaded"
        );
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults; then apply
    /// `.env` and process environment overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            warn!(path = %path.display(), "engine config not found, using defaults");
            Self::default()
        };

        let _ = dotenv::dotenv();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Persist as pretty JSON using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved");
        Ok(())
    }

    /// Apply `STOPS_*` overrides from `lookup` (usually the environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            self.poll_interval_secs = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_POLL_INTERVAL}='{raw}' is not a number of seconds"))?;
        }
        if let Some(raw) = lookup(ENV_CANDLE_COUNT) {
            self.candle_count = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CANDLE_COUNT}='{raw}' is not a count"))?;
        }
        if let Some(raw) = lookup(ENV_ACCOUNT_MODE) {
            self.account_mode = raw
                .parse()
                .with_context(|| format!("{ENV_ACCOUNT_MODE}='{raw}' is not an account mode"))?;
        }
        self.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
