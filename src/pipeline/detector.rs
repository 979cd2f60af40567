//! STA/LTA event detector with hysteresis.
//!
//! On every "data ready" wakeup the detector reads the most recent `S` and `L`
//! samples, computes `STA / LTA` and feeds the ratio to a two-threshold state
//! machine. Only the Idle → Triggered edge requests a transmission; staying above
//! the trigger threshold does not fire again until the ratio has dropped below the
//! reset threshold.
//!
//! The numeric part ([`sta_lta_ratio`], [`Hysteresis`], [`DetectorCore`]) is plain
//! synchronous code. [`Detector`] wraps it in a task.

use std::sync::Arc;

use tokio::sync::{oneshot, watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::data::{Sample, SampleStore};
use crate::error::{NodeError, NodeResult};
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::transmit::TransmitTrigger;
use crate::pipeline::TaskHandle;

/// Validated window sizes and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionWindow {
    short: usize,
    long: usize,
    trigger_ratio: f64,
    reset_ratio: f64,
}

impl DetectionWindow {
    /// Check `0 < S < L ≤ capacity` and `T_lo < T_hi`.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] naming the violated rule.
    pub fn new(
        short: usize,
        long: usize,
        trigger_ratio: f64,
        reset_ratio: f64,
        capacity: usize,
    ) -> NodeResult<Self> {
        if short == 0 {
            return Err(NodeError::Configuration(
                "short window must hold at least one sample".into(),
            ));
        }
        if short >= long {
            return Err(NodeError::Configuration(format!(
                "short window ({} samples) must be shorter than long window ({} samples)",
                short, long
            )));
        }
        if long > capacity {
            return Err(NodeError::Configuration(format!(
                "long window ({} samples) exceeds store capacity ({})",
                long, capacity
            )));
        }
        if !trigger_ratio.is_finite() || !reset_ratio.is_finite() {
            return Err(NodeError::Configuration(
                "trigger and reset ratios must be finite".into(),
            ));
        }
        if reset_ratio >= trigger_ratio {
            return Err(NodeError::Configuration(format!(
                "reset ratio {} must be below trigger ratio {}",
                reset_ratio, trigger_ratio
            )));
        }

        Ok(Self {
            short,
            long,
            trigger_ratio,
            reset_ratio,
        })
    }

    /// Short window size `S` in samples.
    #[must_use]
    pub fn short(&self) -> usize {
        self.short
    }

    /// Long window size `L` in samples.
    #[must_use]
    pub fn long(&self) -> usize {
        self.long
    }

    /// Trigger threshold `T_hi`.
    #[must_use]
    pub fn trigger_ratio(&self) -> f64 {
        self.trigger_ratio
    }

    /// Reset threshold `T_lo`.
    #[must_use]
    pub fn reset_ratio(&self) -> f64 {
        self.reset_ratio
    }
}

/// Arithmetic mean; `0.0` for an empty slice.
#[must_use]
pub fn mean(samples: &[Sample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();
    sum as f64 / samples.len() as f64
}

/// `mean(short) / mean(long)`.
///
/// # Errors
/// [`NodeError::DegenerateAverage`] when the long-term average is zero.
pub fn sta_lta_ratio(short: &[Sample], long: &[Sample]) -> NodeResult<f64> {
    let lta = mean(long);
    if lta == 0.0 {
        return Err(NodeError::DegenerateAverage);
    }
    Ok(mean(short) / lta)
}

/// Detector state, owned by the detector task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    /// Waiting for the ratio to exceed the trigger threshold.
    #[default]
    Idle,
    /// Event in progress; waiting for the ratio to fall below the reset threshold.
    Triggered,
}

/// State change produced by one ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    Stay,
    /// Idle → Triggered. The only transition that requests a transmission.
    Triggered,
    /// Triggered → Idle.
    Reset,
}

/// Two-threshold state machine.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    trigger_ratio: f64,
    reset_ratio: f64,
    state: DetectorState,
}

impl Hysteresis {
    /// Start Idle with the window's thresholds.
    #[must_use]
    pub fn new(window: &DetectionWindow) -> Self {
        Self {
            trigger_ratio: window.trigger_ratio,
            reset_ratio: window.reset_ratio,
            state: DetectorState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Feed one ratio.
    pub fn update(&mut self, ratio: f64) -> Transition {
        match self.state {
            DetectorState::Idle if ratio > self.trigger_ratio => {
                self.state = DetectorState::Triggered;
                Transition::Triggered
            }
            DetectorState::Triggered if ratio < self.reset_ratio => {
                self.state = DetectorState::Idle;
                Transition::Reset
            }
            _ => Transition::Stay,
        }
    }
}

/// Result of one detector cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cycle {
    /// Fewer than `L` samples stored; nothing evaluated.
    WarmingUp {
        /// Samples currently stored.
        stored: usize,
    },
    /// `LTA == 0`; state untouched.
    Degenerate,
    /// Ratio computed and fed to the state machine.
    Evaluated {
        /// STA/LTA ratio.
        ratio: f64,
        /// Resulting transition.
        transition: Transition,
    },
}

/// Window buffers plus state machine; one instance per detector task.
pub struct DetectorCore {
    window: DetectionWindow,
    hysteresis: Hysteresis,
    short_buf: Vec<Sample>,
    long_buf: Vec<Sample>,
}

impl DetectorCore {
    /// Allocate both window buffers.
    #[must_use]
    pub fn new(window: DetectionWindow) -> Self {
        Self {
            hysteresis: Hysteresis::new(&window),
            short_buf: vec![0; window.short],
            long_buf: vec![0; window.long],
            window,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.hysteresis.state()
    }

    /// Read the current windows and run one cycle.
    ///
    /// # Errors
    /// Propagates unexpected store range errors. A store that has not yet filled the
    /// long window yields [`Cycle::WarmingUp`] instead.
    pub fn evaluate(&mut self, store: &SampleStore) -> NodeResult<Cycle> {
        let stored = store.len();
        if stored < self.window.long {
            return Ok(Cycle::WarmingUp { stored });
        }

        store.latest(&mut self.short_buf, self.window.short)?;
        store.latest(&mut self.long_buf, self.window.long)?;

        match sta_lta_ratio(&self.short_buf, &self.long_buf) {
            Ok(ratio) => Ok(Cycle::Evaluated {
                ratio,
                transition: self.hysteresis.update(ratio),
            }),
            Err(NodeError::DegenerateAverage) => Ok(Cycle::Degenerate),
            Err(e) => Err(e),
        }
    }
}

/// Consumer task driving [`DetectorCore`] from the "data ready" notification.
pub struct Detector {
    window: DetectionWindow,
    store: Arc<SampleStore>,
    data_ready: Arc<Notify>,
    transmit: TransmitTrigger,
    stats: Arc<PipelineStats>,
    state_tx: watch::Sender<DetectorState>,
    task: Option<TaskHandle>,
}

impl Detector {
    /// Create an idle detector; nothing runs until [`Detector::start`].
    #[must_use]
    pub fn new(
        window: DetectionWindow,
        store: Arc<SampleStore>,
        data_ready: Arc<Notify>,
        transmit: TransmitTrigger,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (state_tx, _) = watch::channel(DetectorState::Idle);
        Self {
            window,
            store,
            data_ready,
            transmit,
            stats,
            state_tx,
            task: None,
        }
    }

    /// State last published by the task.
    #[must_use]
    pub fn state(&self) -> DetectorState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DetectorState> {
        self.state_tx.subscribe()
    }

    /// True while the task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the detector task. No-op when already running.
    ///
    /// Must be called from within a Tokio runtime. A restarted detector begins Idle.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Detector already running");
            return;
        }

        self.state_tx.send_replace(DetectorState::Idle);
        let detection = DetectionLoop {
            core: DetectorCore::new(self.window),
            store: Arc::clone(&self.store),
            data_ready: Arc::clone(&self.data_ready),
            transmit: self.transmit.clone(),
            stats: Arc::clone(&self.stats),
            state_tx: self.state_tx.clone(),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(detection.run(shutdown_rx));
        self.task = Some(TaskHandle::new("detector", shutdown_tx, handle));
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
    }
}

struct DetectionLoop {
    core: DetectorCore,
    store: Arc<SampleStore>,
    data_ready: Arc<Notify>,
    transmit: TransmitTrigger,
    stats: Arc<PipelineStats>,
    state_tx: watch::Sender<DetectorState>,
}

impl DetectionLoop {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(
            sta = self.core.window.short,
            lta = self.core.window.long,
            trigger = self.core.window.trigger_ratio,
            reset = self.core.window.reset_ratio,
            "Detector started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Detector stopped");
                    return;
                }
                _ = self.data_ready.notified() => self.cycle(),
            }
        }
    }

    fn cycle(&mut self) {
        self.stats.record_detector_cycle();

        match self.core.evaluate(&self.store) {
            Ok(Cycle::WarmingUp { stored }) => {
                self.stats.record_warmup();
                trace!(stored, needed = self.core.window.long, "Long window not filled yet");
            }
            Ok(Cycle::Degenerate) => {
                self.stats.record_degenerate();
                warn!("LTA is zero, skipping cycle");
                debug!(window = ?self.core.long_buf, "Long window contents");
            }
            Ok(Cycle::Evaluated { ratio, transition }) => {
                trace!(ratio, "STA/LTA evaluated");
                match transition {
                    Transition::Triggered => {
                        self.stats.record_event();
                        info!(ratio, "Event detected, requesting transmission");
                        self.transmit.trigger();
                    }
                    Transition::Reset => {
                        info!(ratio, "Ratio below reset threshold, detector re-armed");
                    }
                    Transition::Stay => {}
                }
                if transition != Transition::Stay {
                    self.state_tx.send_replace(self.core.state());
                }
            }
            Err(e) => warn!(error = %e, "Detector cycle failed"),
        }
    }
}
