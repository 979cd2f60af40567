//! Hardware collaborators.
//!
//! - `capabilities`: the traits the pipeline consumes (ADC, clock, uplink)
//! - `mock`: simulated implementations for tests and board-less runs

pub mod capabilities;
pub mod mock;

pub use capabilities::{AnalogInput, Clock, SendMode, Transport};
