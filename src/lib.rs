//! # Geophone Edge Node
//!
//! Firmware core for a battery-powered seismic sensor. A geophone channel is sampled
//! at a fixed rate into a circular store; an STA/LTA detector watches the newest
//! samples and, on each new event, the most recent window is timestamped and pushed
//! over a low-bandwidth wireless uplink.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based [`config::NodeConfig`] (defaults, `config/node.toml`,
//!   `GEONODE_` environment overrides) and its validation.
//! - **`data`**: The [`data::SampleStore`] circular buffer and the event packet
//!   wire format.
//! - **`error`**: The [`error::NodeError`] enum shared by every module.
//! - **`hardware`**: Capability traits for the ADC, clock and uplink, plus mock
//!   implementations for running without a board.
//! - **`pipeline`**: Sampler, detector and transmit tasks, owned by [`pipeline::Node`].
//! - **`tracing_setup`**: Subscriber installation for structured logging.

pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod pipeline;
pub mod tracing_setup;

pub use config::NodeConfig;
pub use error::{NodeError, NodeResult};
pub use pipeline::{Collaborators, Node};
