//! Mock Hardware Implementations
//!
//! Provides simulated collaborators for running the node without a board.
//! All mock devices use async-safe operations (tokio primitives, never blocking sleeps).
//!
//! # Available Mocks
//!
//! - `MockAnalogInput` - Simulated geophone channel: baseline + seeded noise, injectable
//!   bursts and failures, or a scripted sequence
//! - `SystemClock` - Host wall clock through chrono
//! - `FixedClock` - Constant timestamp for deterministic tests
//! - `MockTransport` - Records every uplink payload; can answer with an error or hold
//!   sends behind a gate

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use crate::data::{Sample, Timestamp, TimestampWidth};
use crate::error::SendError;
use crate::hardware::capabilities::{AnalogInput, Clock, SendMode, Transport};

// =============================================================================
// MockAnalogInput - Simulated Geophone Channel
// =============================================================================

struct SignalState {
    rng: StdRng,
    /// Remaining samples of the current burst.
    burst_remaining: usize,
    burst_amplitude: i32,
    /// Upcoming acquisitions that must fail.
    failures_pending: usize,
    /// Scripted readings, `None` is a failed acquisition.
    script: VecDeque<Option<Sample>>,
}

/// Mock geophone ADC channel
///
/// Produces `baseline ± noise` counts. A burst adds `amplitude` to the next `n`
/// readings, which is what drives the STA/LTA ratio above its trigger threshold.
///
/// # Example
///
/// ```rust,ignore
/// let adc = MockAnalogInput::new(1000, 20);
/// adc.inject_burst(200, 20_000);
/// let sample = adc.acquire().await?;
/// ```
pub struct MockAnalogInput {
    baseline: i32,
    noise: i32,
    state: Mutex<SignalState>,
    acquisitions: AtomicU64,
}

impl MockAnalogInput {
    /// Create a channel with a fixed seed, so runs are reproducible.
    pub fn new(baseline: Sample, noise: Sample) -> Self {
        Self::with_seed(baseline, noise, 0x6e0_5e15)
    }

    /// Create a channel with an explicit noise seed.
    pub fn with_seed(baseline: Sample, noise: Sample, seed: u64) -> Self {
        Self {
            baseline: i32::from(baseline),
            noise: i32::from(noise).abs(),
            state: Mutex::new(SignalState {
                rng: StdRng::seed_from_u64(seed),
                burst_remaining: 0,
                burst_amplitude: 0,
                failures_pending: 0,
                script: VecDeque::new(),
            }),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Channel that replays `script` first (`None` entries fail), then falls back to a
    /// noiseless `baseline`.
    pub fn scripted(baseline: Sample, script: impl IntoIterator<Item = Option<Sample>>) -> Self {
        let adc = Self::new(baseline, 0);
        adc.lock().script = script.into_iter().collect();
        adc
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add `amplitude` counts to the next `samples` readings.
    pub fn inject_burst(&self, samples: usize, amplitude: Sample) {
        let mut state = self.lock();
        state.burst_remaining = samples;
        state.burst_amplitude = i32::from(amplitude);
    }

    /// Make the next `count` acquisitions fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_pending = count;
    }

    /// Number of `acquire` calls so far, failed ones included.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalogInput for MockAnalogInput {
    async fn acquire(&self) -> Result<Sample> {
        let call = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock();

        if let Some(scripted) = state.script.pop_front() {
            return scripted
                .ok_or_else(|| anyhow!("MockAnalogInput: scripted failure at call {}", call));
        }

        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(anyhow!("MockAnalogInput: conversion timeout at call {}", call));
        }

        let noise = if self.noise > 0 {
            state.rng.gen_range(-self.noise..=self.noise)
        } else {
            0
        };
        let mut value = self.baseline + noise;
        if state.burst_remaining > 0 {
            state.burst_remaining -= 1;
            value += state.burst_amplitude;
        }

        Ok(value.clamp(i32::from(Sample::MIN), i32::from(Sample::MAX)) as Sample)
    }
}

// =============================================================================
// Clocks
// =============================================================================

/// Host wall clock
pub struct SystemClock {
    width: TimestampWidth,
}

impl SystemClock {
    /// Clock reporting seconds or milliseconds to match `width`.
    pub fn new(width: TimestampWidth) -> Self {
        Self { width }
    }
}

#[async_trait]
impl Clock for SystemClock {
    async fn now(&self) -> Result<Timestamp> {
        let now = chrono::Utc::now();
        let value = match self.width {
            TimestampWidth::Seconds32 => now.timestamp(),
            TimestampWidth::Millis64 => now.timestamp_millis(),
        };
        Timestamp::try_from(value).map_err(|_| anyhow!("SystemClock: time before Unix epoch"))
    }
}

/// Clock that always reports the same instant
pub struct FixedClock(pub Timestamp);

#[async_trait]
impl Clock for FixedClock {
    async fn now(&self) -> Result<Timestamp> {
        Ok(self.0)
    }
}

// =============================================================================
// MockTransport - Recording Uplink
// =============================================================================

/// One payload accepted by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// Application port.
    pub port: u8,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Requested delivery mode.
    pub mode: SendMode,
}

/// Mock uplink that records payloads
///
/// - `fail_with` makes every following send answer with the given error
/// - `hold` parks every send until `release`, which lets tests observe the transmit
///   worker while it is busy sending
pub struct MockTransport {
    sent: Mutex<Vec<SentPacket>>,
    outcome: Mutex<Option<SendError>>,
    gate: watch::Sender<bool>,
    attempts: AtomicU64,
}

impl MockTransport {
    /// Transport that accepts everything immediately.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            sent: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
            gate,
            attempts: AtomicU64::new(0),
        }
    }

    /// Answer every following send with `error`; `None` restores success.
    pub fn fail_with(&self, error: Option<SendError>) {
        *self
            .outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = error;
    }

    /// Park sends until [`MockTransport::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Let parked and future sends through.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of `send` calls entered so far, including parked and failed ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Payloads accepted so far.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, port: u8, payload: &[u8], mode: SendMode) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(SendError::Failed("MockTransport: gate dropped".into()));
        }

        let outcome = self
            .outcome
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(error) = outcome {
            return Err(error);
        }

        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(SentPacket {
                port,
                payload: payload.to_vec(),
                mode,
            });
        Ok(())
    }
}
