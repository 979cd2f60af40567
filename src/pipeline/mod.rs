//! Acquisition pipeline
//!
//! Three tasks share one [`SampleStore`]:
//!
//! ```text
//!  Sampler ──write──▶ SampleStore ◀──read── Detector
//!     │                    ▲                   │
//!     └─ data ready ───────┼──────────────────▶│ (coalescing Notify)
//!                          │                   │
//!                   TransmitWorker ◀── trigger ┘ (coalescing Notify)
//! ```
//!
//! [`Node`] owns the tasks and is the only context object; there is no global state.

pub mod detector;
pub mod sampler;
pub mod stats;
pub mod transmit;

pub use detector::{
    sta_lta_ratio, Cycle, DetectionWindow, Detector, DetectorCore, DetectorState, Hysteresis,
    Transition,
};
pub use sampler::{Sampler, SamplerState};
pub use stats::{PipelineStats, StatsSnapshot};
pub use transmit::{TransmitTrigger, TransmitWorker, WorkerState};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::data::SampleStore;
use crate::error::NodeResult;
use crate::hardware::{AnalogInput, Clock, Transport};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shutdown channel plus join handle of one spawned pipeline task.
pub(crate) struct TaskHandle {
    name: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn new(
        name: &'static str,
        shutdown_tx: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the task, aborting it after [`STOP_TIMEOUT`].
    ///
    /// Returns only once the task has exited, so nothing it owns outlives the call.
    pub(crate) async fn stop(self) {
        let Self {
            name,
            shutdown_tx,
            mut handle,
        } = self;
        // The task may already have exited on its own
        let _ = shutdown_tx.send(());

        let joined = match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(task = name, "Task did not stop within {:?}, aborting", STOP_TIMEOUT);
                handle.abort();
                handle.await
            }
        };

        match joined {
            Ok(()) => debug!(task = name, "Task joined"),
            Err(e) if e.is_cancelled() => debug!(task = name, "Task aborted"),
            Err(e) => error!(task = name, error = %e, "Task panicked"),
        }
    }
}

/// Hardware and radio implementations the node runs against.
#[derive(Clone)]
pub struct Collaborators {
    /// Geophone ADC channel.
    pub adc: Arc<dyn AnalogInput>,
    /// Wall clock for packet timestamps.
    pub clock: Arc<dyn Clock>,
    /// Wireless uplink.
    pub transport: Arc<dyn Transport>,
}

/// The edge node: store, producer, detector and uplink wired together.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use geophone_node::config::NodeConfig;
/// use geophone_node::hardware::mock::{MockAnalogInput, MockTransport, SystemClock};
/// use geophone_node::pipeline::{Collaborators, Node};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = NodeConfig::load()?;
/// let mut node = Node::new(
///     &config,
///     Collaborators {
///         adc: Arc::new(MockAnalogInput::new(1000, 20)),
///         clock: Arc::new(SystemClock::new(config.transmit.timestamp)),
///         transport: Arc::new(MockTransport::new()),
///     },
/// )?;
/// node.start_sampling();
/// node.start_detection();
/// // ...
/// node.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    store: Arc<SampleStore>,
    stats: Arc<PipelineStats>,
    trigger: TransmitTrigger,
    sampler: Sampler,
    detector: Detector,
    transmitter: TransmitWorker,
}

impl Node {
    /// Validate `config` and build every component. No task is spawned.
    ///
    /// # Errors
    /// Returns [`crate::error::NodeError::Configuration`] for any invalid setting.
    pub fn new(config: &NodeConfig, collaborators: Collaborators) -> NodeResult<Self> {
        config.validate()?;
        let window = config.detection_window()?;

        let store = Arc::new(SampleStore::new(config.store.capacity)?);
        let stats = Arc::new(PipelineStats::default());
        let data_ready = Arc::new(Notify::new());
        let trigger = TransmitTrigger::new(Arc::clone(&stats));

        let sampler = Sampler::new(
            collaborators.adc,
            Arc::clone(&store),
            Arc::clone(&data_ready),
            Arc::clone(&stats),
            config.sampling.period(),
        )?;
        let detector = Detector::new(
            window,
            Arc::clone(&store),
            data_ready,
            trigger.clone(),
            Arc::clone(&stats),
        );
        let transmitter = TransmitWorker::new(
            config.transmit.clone(),
            Arc::clone(&store),
            collaborators.clock,
            collaborators.transport,
            trigger.clone(),
            Arc::clone(&stats),
        );

        info!(
            node = %config.application.name,
            capacity = config.store.capacity,
            period_ms = config.sampling.period_ms,
            sta = window.short(),
            lta = window.long(),
            "Node configured"
        );

        Ok(Self {
            store,
            stats,
            trigger,
            sampler,
            detector,
            transmitter,
        })
    }

    /// Change the sampling period; a running sampler adopts it without waiting
    /// out its current sleep.
    ///
    /// Detection window sizes stay as configured.
    ///
    /// # Errors
    /// Returns [`crate::error::NodeError::Configuration`] for a zero period.
    pub fn set_sampling_period(&self, period: Duration) -> NodeResult<()> {
        self.sampler.set_period(period)
    }

    /// Start the producer. No-op when already running.
    pub fn start_sampling(&mut self) {
        self.sampler.start();
    }

    /// Stop the producer and wait until it has exited.
    pub async fn stop_sampling(&mut self) {
        self.sampler.stop().await;
    }

    /// Start the detector and the transmit worker it feeds.
    pub fn start_detection(&mut self) {
        self.transmitter.start();
        self.detector.start();
    }

    /// Request an immediate transmission of the newest samples.
    pub fn force_transmit(&mut self) {
        self.transmitter.start();
        info!("Manual transmission requested");
        self.trigger.trigger();
    }

    /// Stop every task and wait for all of them.
    pub async fn shutdown(&mut self) {
        self.sampler.stop().await;
        self.detector.stop().await;
        self.transmitter.stop().await;
        info!(stats = %self.stats.snapshot().to_string().replace('\n', "; "), "Node shut down");
    }

    /// Current sampler state.
    #[must_use]
    pub fn sampler_state(&self) -> SamplerState {
        self.sampler.state()
    }

    /// Current detector state.
    #[must_use]
    pub fn detector_state(&self) -> DetectorState {
        self.detector.state()
    }

    /// Watch detector state changes.
    #[must_use]
    pub fn subscribe_detector(&self) -> tokio::sync::watch::Receiver<DetectorState> {
        self.detector.subscribe()
    }

    /// Current transmit worker state.
    #[must_use]
    pub fn transmitter_state(&self) -> WorkerState {
        self.transmitter.state()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared sample store.
    #[must_use]
    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }
}
