//! Subscriber installation.
//!
//! The node logs structured events (`ratio = %ratio`, `error = %e`) through `tracing`.
//! [`init`] installs one global `tracing-subscriber` formatter: compact lines for a
//! serial console, pretty output during development, or JSON for log shipping.
//! `RUST_LOG` overrides the configured level.
//!
//! # Example
//! ```no_run
//! use geophone_node::config::NodeConfig;
//! use geophone_node::tracing_setup::{self, TracingConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::load()?;
//! tracing_setup::init(TracingConfig::from_node_config(&config)?)?;
//!
//! tracing::info!("Node started");
//! # Ok(())
//! # }
//! ```

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, NodeResult};

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{other}', expected pretty, compact or json"
            )),
        }
    }
}

/// Settings for [`init`].
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    pub format: OutputFormat,
    /// Colored output; ignored for JSON
    pub ansi: bool,
}

impl TracingConfig {
    /// Compact, uncolored output at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Compact,
            ansi: false,
        }
    }

    /// Take the level from `[application] log_level`.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] for an unknown level name.
    pub fn from_node_config(config: &NodeConfig) -> NodeResult<Self> {
        let name = config.application.log_level.trim();
        let level = name.parse::<Level>().map_err(|_| {
            NodeError::Configuration(format!("unknown log level '{name}'"))
        })?;
        Ok(Self::new(level))
    }

    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Install the global subscriber.
///
/// Calling it again once a subscriber is installed (by an earlier call, a test
/// harness or a host application) is a no-op.
///
/// # Errors
/// Returns [`NodeError::Configuration`] if the subscriber cannot be installed for any
/// other reason.
pub fn init(config: TracingConfig) -> NodeResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().with_ansi(config.ansi).boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(config.ansi).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    match tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(NodeError::Configuration(format!(
            "cannot install tracing subscriber: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_node_config() {
        let mut node_config = NodeConfig::default();
        node_config.application.log_level = "Debug".to_string();
        let config = TracingConfig::from_node_config(&node_config).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, OutputFormat::Compact);

        node_config.application.log_level = "verbose".to_string();
        let err = TracingConfig::from_node_config(&node_config).unwrap_err();
        assert!(matches!(err, NodeError::Configuration(_)));
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Pretty)
            .with_ansi(true);
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Pretty);
        assert!(config.ansi);
    }

    #[test]
    fn test_parse_output_format() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_init_twice_is_ok() {
        assert!(init(TracingConfig::new(Level::INFO)).is_ok());
        assert!(init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json)).is_ok());
    }
}
