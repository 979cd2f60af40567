//! Custom error types for the sensor node.
//!
//! This module defines the primary error type, `NodeError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent place for the failures the
//! acquisition pipeline can run into, from configuration issues to transport
//! backpressure.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically a malformed TOML file or an
//!   environment override with the wrong type.
//! - **`Configuration`**: Semantic errors in otherwise well-formed configuration, such as
//!   a reset threshold that is not below the trigger threshold. These are rejected before
//!   any pipeline task is spawned.
//! - **`Acquisition`**: A transient ADC failure. The sampler skips the tick.
//! - **`Range`**: A store read that asked for more samples than the store holds, or for a
//!   window reaching before the first write. No partial data is returned.
//! - **`DegenerateAverage`**: The long-term average was exactly zero, so no ratio exists.
//! - **`Send`**: The network transport refused a packet. See [`SendError`].
//! - **`Packet`**: A payload could not be parsed back into a packet.
//!
//! None of these are fatal to the process.

use thiserror::Error;

/// Convenience alias for results using the node error type.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// Why a store read was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeViolation {
    /// The window is larger than the store capacity.
    ExceedsCapacity,
    /// The destination slice is shorter than the requested window.
    DestinationTooSmall,
    /// The window reaches samples that were never written or were already overwritten.
    BeforeOldest,
    /// The window extends past the most recent sample.
    PastNewest,
}

impl std::fmt::Display for RangeViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::ExceedsCapacity => "window exceeds store capacity",
            Self::DestinationTooSmall => "destination shorter than window",
            Self::BeforeOldest => "window reaches before the oldest stored sample",
            Self::PastNewest => "window extends past the newest sample",
        };
        f.write_str(text)
    }
}

/// Outcome of a refused network send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Backpressure (duty-cycle limit, busy radio). The packet is dropped, not queued.
    #[error("transport busy, retry later: {0}")]
    Retryable(String),

    /// Any other transport failure.
    #[error("transport failure: {0}")]
    Failed(String),
}

impl SendError {
    /// True when the transport signalled backpressure rather than a hard failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Primary error type for the node.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Range error: {violation} (size {size}, offset {offset}, capacity {capacity}, stored {stored})")]
    Range {
        violation: RangeViolation,
        size: usize,
        offset: isize,
        capacity: usize,
        stored: usize,
    },

    #[error("Long-term average is zero, ratio undefined")]
    DegenerateAverage,

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("Malformed packet: {0}")]
    Packet(String),
}

impl From<figment::Error> for NodeError {
    fn from(value: figment::Error) -> Self {
        NodeError::Config(Box::new(value))
    }
}

impl NodeError {
    /// Errors the pipeline absorbs by skipping one cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::Acquisition(_) | NodeError::DegenerateAverage => true,
            NodeError::Send(e) => e.is_retryable(),
            _ => false,
        }
    }
}
