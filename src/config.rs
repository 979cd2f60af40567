//! Node Configuration using Figment
//!
//! Strongly-typed configuration for the acquisition pipeline. Configuration is
//! layered from:
//! 1. Built-in defaults (100 Hz sampling, 2.55 s / 10.23 s STA/LTA windows)
//! 2. A TOML file (by default `config/node.toml`)
//! 3. Environment variables prefixed with `GEONODE_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use geophone_node::config::NodeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::load()?;
//! config.validate()?;
//! let window = config.detection_window()?;
//! println!("STA {} / LTA {} samples", window.short(), window.long());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::data::TimestampWidth;
use crate::error::{NodeError, NodeResult};
use crate::hardware::SendMode;
use crate::pipeline::DetectionWindow;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/node.toml";

/// Prefix for environment overrides, e.g. `GEONODE_SAMPLING__PERIOD_MS=5`.
pub const ENV_PREFIX: &str = "GEONODE_";

/// Top-level node configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Producer timing
    pub sampling: SamplingSettings,
    /// Circular store sizing
    pub store: StoreConfig,
    /// STA/LTA detector
    pub detection: DetectionConfig,
    /// Event uplink
    pub transmit: TransmitConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Node name, used in log output
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "geophone-node".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Period between two ADC acquisitions in milliseconds
    pub period_ms: u64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self { period_ms: 10 }
    }
}

impl SamplingSettings {
    /// Sampling period as a `Duration`.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Sample store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of samples kept (N)
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Detector configuration
///
/// Window sizes are given as durations and converted to sample counts with the
/// configured sampling period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Short-term window length in milliseconds
    pub sta_window_ms: u64,
    /// Long-term window length in milliseconds
    pub lta_window_ms: u64,
    /// STA/LTA ratio above which an event is declared (T_hi)
    pub trigger_ratio: f64,
    /// STA/LTA ratio below which the detector re-arms (T_lo)
    pub reset_ratio: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sta_window_ms: 2_550,
            lta_window_ms: 10_230,
            trigger_ratio: 3.0,
            reset_ratio: 1.5,
        }
    }
}

/// Event uplink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    /// Samples per event packet (k, at most the store capacity)
    pub window: usize,
    /// Application port
    pub port: u8,
    /// Delivery mode
    pub mode: SendMode,
    /// Timestamp encoding
    pub timestamp: TimestampWidth,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            window: 1024,
            port: 2,
            mode: SendMode::Unconfirmed,
            timestamp: TimestampWidth::Seconds32,
        }
    }
}

impl NodeConfig {
    /// Load configuration from `config/node.toml` and environment variables
    ///
    /// A missing file is not an error; defaults and environment apply.
    ///
    /// # Errors
    /// Returns [`NodeError::Config`] when a source cannot be parsed.
    pub fn load() -> NodeResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    /// Returns [`NodeError::Config`] when a source cannot be parsed.
    pub fn load_from<P: AsRef<Path>>(path: P) -> NodeResult<Self> {
        let config = Figment::from(Serialized::defaults(NodeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides
    ///
    /// # Errors
    /// Returns [`NodeError::Config`] when the string is not valid configuration.
    pub fn from_toml_str(toml: &str) -> NodeResult<Self> {
        let config = Figment::from(Serialized::defaults(NodeConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] describing the first violated rule.
    pub fn validate(&self) -> NodeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(NodeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sampling.period_ms == 0 {
            return Err(NodeError::Configuration(
                "sampling.period_ms must be greater than 0".into(),
            ));
        }

        if self.store.capacity == 0 {
            return Err(NodeError::Configuration(
                "store.capacity must be greater than 0".into(),
            ));
        }

        if self.transmit.window == 0 || self.transmit.window > self.store.capacity {
            return Err(NodeError::Configuration(format!(
                "transmit.window {} must be between 1 and store.capacity {}",
                self.transmit.window, self.store.capacity
            )));
        }

        self.detection_window().map(|_| ())
    }

    /// Short window size in samples, derived from its duration.
    #[must_use]
    pub fn sta_samples(&self) -> usize {
        self.samples_for(self.detection.sta_window_ms)
    }

    /// Long window size in samples, derived from its duration.
    #[must_use]
    pub fn lta_samples(&self) -> usize {
        self.samples_for(self.detection.lta_window_ms)
    }

    fn samples_for(&self, window_ms: u64) -> usize {
        window_ms
            .checked_div(self.sampling.period_ms)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Build the validated detection window.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] if `S < L ≤ N` or `T_lo < T_hi` does not hold.
    pub fn detection_window(&self) -> NodeResult<DetectionWindow> {
        DetectionWindow::new(
            self.sta_samples(),
            self.lta_samples(),
            self.detection.trigger_ratio,
            self.detection.reset_ratio,
            self.store.capacity,
        )
    }
}
