//! Collaborator capabilities consumed by the pipeline.
//!
//! The node core never talks to a driver directly. Each external collaborator is a
//! small capability trait:
//!
//! - `AnalogInput`: the geophone ADC channel
//! - `Clock`: the real-time clock used to stamp event packets
//! - `Transport`: the wireless uplink
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Focuses on ONE thing
//!
//! The pipeline never holds the sample store lock while awaiting any of these calls.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Nrf52Ain0 { /* saadc handle */ }
//!
//! #[async_trait]
//! impl AnalogInput for Nrf52Ain0 {
//!     async fn acquire(&self) -> Result<Sample> {
//!         let raw = self.saadc.sample().await?;
//!         Ok(raw)
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{Sample, Timestamp};
use crate::error::SendError;

/// Capability: Single-Channel Analog Acquisition
///
/// # Contract
/// - One call yields one raw reading
/// - Any error is treated as transient by the caller; the tick is skipped and the
///   next period tries again
#[async_trait]
pub trait AnalogInput: Send + Sync {
    /// Acquire one raw sample.
    async fn acquire(&self) -> Result<Sample>;
}

/// Capability: Wall-Clock Time
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time, in the unit matching the configured timestamp width
    /// (seconds for `Seconds32`, milliseconds for `Millis64`).
    async fn now(&self) -> Result<Timestamp>;
}

/// Delivery mode requested from the uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Ask the network server for an acknowledgement.
    Confirmed,
    /// Fire and forget.
    #[default]
    Unconfirmed,
}

/// Capability: Wireless Uplink
///
/// # Contract
/// - `Err(SendError::Retryable)` means backpressure (duty-cycle limit). The caller
///   drops the packet; it is never queued or retried
/// - `Err(SendError::Failed)` is any other failure
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` on application `port`.
    async fn send(&self, port: u8, payload: &[u8], mode: SendMode) -> Result<(), SendError>;
}
