//! Periodic ADC producer.
//!
//! Each tick acquires one sample, appends it to the [`SampleStore`] and posts the
//! coalescing "data ready" notification. The sleep between ticks races against a
//! period change and the stop signal, so neither waits for a full period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::data::SampleStore;
use crate::error::{NodeError, NodeResult};
use crate::hardware::AnalogInput;
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::TaskHandle;

/// Sampler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// No task is running.
    Stopped,
    /// The periodic task is running.
    Running,
}

/// Periodic producer feeding the sample store.
pub struct Sampler {
    adc: Arc<dyn AnalogInput>,
    store: Arc<SampleStore>,
    data_ready: Arc<Notify>,
    stats: Arc<PipelineStats>,
    period_tx: watch::Sender<Duration>,
    task: Option<TaskHandle>,
}

impl Sampler {
    /// Create a stopped sampler.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] for a zero period.
    pub fn new(
        adc: Arc<dyn AnalogInput>,
        store: Arc<SampleStore>,
        data_ready: Arc<Notify>,
        stats: Arc<PipelineStats>,
        period: Duration,
    ) -> NodeResult<Self> {
        check_period(period)?;
        let (period_tx, _) = watch::channel(period);
        Ok(Self {
            adc,
            store,
            data_ready,
            stats,
            period_tx,
            task: None,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SamplerState {
        match &self.task {
            Some(task) if !task.is_finished() => SamplerState::Running,
            _ => SamplerState::Stopped,
        }
    }

    /// Configured period.
    #[must_use]
    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Change the sampling period.
    ///
    /// A running sampler wakes from its current sleep and re-arms it with the new
    /// period, measured from the start of the current tick.
    ///
    /// # Errors
    /// Returns [`NodeError::Configuration`] for a zero period.
    pub fn set_period(&self, period: Duration) -> NodeResult<()> {
        check_period(period)?;
        let previous = self.period_tx.send_replace(period);
        if previous != period {
            info!(
                from_ms = previous.as_millis() as u64,
                to_ms = period.as_millis() as u64,
                "Sampling period changed"
            );
        }
        Ok(())
    }

    /// Spawn the periodic task. No-op when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.state() == SamplerState::Running {
            debug!("Sampler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let sampling = SamplingLoop {
            adc: Arc::clone(&self.adc),
            store: Arc::clone(&self.store),
            data_ready: Arc::clone(&self.data_ready),
            stats: Arc::clone(&self.stats),
        };
        let period_rx = self.period_tx.subscribe();
        let handle = tokio::spawn(sampling.run(period_rx, shutdown_rx));

        self.task = Some(TaskHandle::new("sampler", shutdown_tx, handle));
    }

    /// Signal the task, interrupt its sleep and wait until it has exited.
    pub async fn stop(&mut self) {
        match self.task.take() {
            Some(task) => task.stop().await,
            None => debug!("Sampler already stopped"),
        }
    }
}

fn check_period(period: Duration) -> NodeResult<()> {
    if period.is_zero() {
        return Err(NodeError::Configuration(
            "sampling period must be greater than 0".into(),
        ));
    }
    Ok(())
}

struct SamplingLoop {
    adc: Arc<dyn AnalogInput>,
    store: Arc<SampleStore>,
    data_ready: Arc<Notify>,
    stats: Arc<PipelineStats>,
}

impl SamplingLoop {
    async fn run(
        self,
        mut period_rx: watch::Receiver<Duration>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut period = *period_rx.borrow_and_update();
        info!(period_ms = period.as_millis() as u64, "Sampler started");

        loop {
            let tick_start = Instant::now();
            // Stop is honoured while an acquisition is pending
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Sampler stopped during acquisition");
                    return;
                }
                result = self.tick() => {
                    if let Err(e) = result {
                        self.stats.record_acquisition_failure();
                        warn!(error = %e, "ADC acquisition failed, skipping tick");
                    }
                }
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Sampler stopped");
                        return;
                    }
                    changed = period_rx.changed() => {
                        if changed.is_err() {
                            info!("Sampler configuration dropped, exiting");
                            return;
                        }
                        period = *period_rx.borrow_and_update();
                        debug!(period_ms = period.as_millis() as u64, "Sampler adopted new period");
                    }
                    _ = tokio::time::sleep_until(tick_start + period) => break,
                }
            }
        }
    }

    async fn tick(&self) -> NodeResult<()> {
        let sample = self
            .adc
            .acquire()
            .await
            .map_err(|e| NodeError::Acquisition(format!("{e:#}")))?;
        self.store.write(sample);
        self.stats.record_sample();
        // Coalesces: a pending permit absorbs further posts
        self.data_ready.notify_one();
        Ok(())
    }
}
