//! Event uplink.
//!
//! A [`TransmitTrigger`] posts a single-permit request; the [`TransmitWorker`] task
//! waits on it, snapshots the newest samples, encodes them behind a timestamp and
//! hands the payload to the [`Transport`]. Requests arriving while a send is in
//! flight collapse into one pending request, so a burst of triggers produces at most
//! one follow-up transmission.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use crate::config::TransmitConfig;
use crate::data::{encode_into, Sample, SampleStore};
use crate::error::NodeError;
use crate::hardware::{Clock, Transport};
use crate::pipeline::stats::PipelineStats;
use crate::pipeline::TaskHandle;

/// Cloneable handle that requests one transmission.
///
/// Every clone posts to the same slot. Each worker start installs a fresh
/// [`Notify`] there, so a request left over from a stopped worker is discarded.
#[derive(Clone)]
pub struct TransmitTrigger {
    slot: Arc<Mutex<Arc<Notify>>>,
    stats: Arc<PipelineStats>,
}

impl TransmitTrigger {
    /// Trigger feeding the given counters.
    #[must_use]
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Arc::new(Notify::new()))),
            stats,
        }
    }

    /// Request a transmission. Never blocks; repeated requests before the worker
    /// wakes count once.
    pub fn trigger(&self) {
        self.stats.record_trigger();
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify_one();
    }

    /// Replace the pending-request slot and hand the new one to a starting worker.
    pub(crate) fn renew(&self) -> Arc<Notify> {
        let fresh = Arc::new(Notify::new());
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&fresh);
        fresh
    }
}

/// What the worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a request (or not running).
    Idle,
    /// Snapshotting, encoding or waiting on the transport.
    Sending,
}

/// Transmit task owner.
pub struct TransmitWorker {
    settings: TransmitConfig,
    store: Arc<SampleStore>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    trigger: TransmitTrigger,
    stats: Arc<PipelineStats>,
    sending: Arc<AtomicBool>,
    task: Option<TaskHandle>,
}

impl TransmitWorker {
    /// Create a worker; nothing runs until [`TransmitWorker::start`].
    #[must_use]
    pub fn new(
        settings: TransmitConfig,
        store: Arc<SampleStore>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        trigger: TransmitTrigger,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            settings,
            store,
            clock,
            transport,
            trigger,
            stats,
            sending: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Current worker state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        if self.sending.load(Ordering::SeqCst) {
            WorkerState::Sending
        } else {
            WorkerState::Idle
        }
    }

    /// True while the task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the worker task. No-op when already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Transmit worker already running");
            return;
        }

        let window = self.settings.window.min(self.store.capacity());
        let uplink = Uplink {
            buffer: BytesMut::with_capacity(self.settings.timestamp.payload_len(window)),
            samples: vec![0; window],
            settings: self.settings.clone(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            transport: Arc::clone(&self.transport),
            stats: Arc::clone(&self.stats),
            sending: Arc::clone(&self.sending),
        };
        let requests = self.trigger.renew();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(uplink.run(requests, shutdown_rx));
        self.task = Some(TaskHandle::new("transmit", shutdown_tx, handle));
    }

    /// Stop the task, abandoning an in-flight send, and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }
        self.sending.store(false, Ordering::SeqCst);
    }
}

struct Uplink {
    buffer: BytesMut,
    samples: Vec<Sample>,
    settings: TransmitConfig,
    store: Arc<SampleStore>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    stats: Arc<PipelineStats>,
    sending: Arc<AtomicBool>,
}

impl Uplink {
    async fn run(mut self, requests: Arc<Notify>, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(
            window = self.samples.len(),
            port = self.settings.port,
            mode = ?self.settings.mode,
            "Transmit worker started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = requests.notified() => {}
            }

            self.sending.store(true, Ordering::SeqCst);
            tokio::select! {
                _ = &mut shutdown_rx => {
                    warn!("Transmit worker stopped during send");
                    break;
                }
                _ = self.transmit_once() => {}
            }
            self.sending.store(false, Ordering::SeqCst);
        }

        self.sending.store(false, Ordering::SeqCst);
        info!("Transmit worker stopped");
    }

    async fn transmit_once(&mut self) {
        let count = self.samples.len().min(self.store.len());
        if count == 0 {
            self.stats.record_dropped();
            debug!("Sample store empty, nothing to transmit");
            return;
        }

        let timestamp = match self.clock.now().await {
            Ok(ts) => ts,
            Err(e) => {
                self.stats.record_dropped();
                warn!(error = %e, "Clock unavailable, dropping packet");
                return;
            }
        };

        let snapshot = &mut self.samples[..count];
        if let Err(e) = self.store.latest(snapshot, count) {
            self.stats.record_dropped();
            warn!(error = %e, "Snapshot failed, dropping packet");
            return;
        }

        self.buffer.clear();
        encode_into(&mut self.buffer, self.settings.timestamp, timestamp, snapshot);

        let sent = self
            .transport
            .send(self.settings.port, &self.buffer, self.settings.mode)
            .await
            .map_err(NodeError::from);
        match sent {
            Ok(()) => {
                self.stats.record_sent();
                info!(samples = count, bytes = self.buffer.len(), timestamp, "Event packet sent");
            }
            // Backpressure: dropped, never queued
            Err(e) if e.is_transient() => {
                self.stats.record_dropped();
                warn!(error = %e, "Uplink busy, packet dropped");
            }
            Err(e) => {
                self.stats.record_send_failure();
                error!(error = %e, "Uplink send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{TimestampWidth, TransmitPacket};
    use crate::error::SendError;
    use crate::hardware::mock::{FixedClock, MockTransport};
    use crate::hardware::SendMode;
    use std::time::Duration;

    struct Fixture {
        worker: TransmitWorker,
        trigger: TransmitTrigger,
        transport: Arc<MockTransport>,
        store: Arc<SampleStore>,
        stats: Arc<PipelineStats>,
    }

    fn fixture(window: usize) -> Fixture {
        let stats = Arc::new(PipelineStats::default());
        let store = Arc::new(SampleStore::new(8).unwrap());
        let transport = Arc::new(MockTransport::new());
        let trigger = TransmitTrigger::new(Arc::clone(&stats));
        let settings = TransmitConfig {
            window,
            port: 7,
            mode: SendMode::Confirmed,
            timestamp: TimestampWidth::Seconds32,
        };
        let worker = TransmitWorker::new(
            settings,
            Arc::clone(&store),
            Arc::new(FixedClock(0x0102_0304)),
            transport.clone(),
            trigger.clone(),
            Arc::clone(&stats),
        );
        Fixture {
            worker,
            trigger,
            transport,
            store,
            stats,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_sends_newest_window() {
        let mut f = fixture(4);
        for s in 1..=6 {
            f.store.write(s);
        }
        f.worker.start();
        f.trigger.trigger();
        settle().await;
        f.worker.stop().await;

        let sent = f.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].port, 7);
        assert_eq!(sent[0].mode, SendMode::Confirmed);
        let packet = TransmitPacket::decode(&sent[0].payload, TimestampWidth::Seconds32).unwrap();
        assert_eq!(packet.timestamp, 0x0102_0304);
        assert_eq!(packet.samples, vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_short_store_sends_what_it_has() {
        let mut f = fixture(8);
        f.store.write(-2);
        f.store.write(9);
        f.worker.start();
        f.trigger.trigger();
        settle().await;
        f.worker.stop().await;

        let sent = f.transport.sent();
        assert_eq!(sent[0].payload, vec![1, 2, 3, 4, 0xFF, 0xFE, 0x00, 0x09]);
    }

    #[tokio::test]
    async fn test_empty_store_sends_nothing() {
        let mut f = fixture(4);
        f.worker.start();
        f.trigger.trigger();
        settle().await;
        f.worker.stop().await;

        assert_eq!(f.transport.attempts(), 0);
        assert_eq!(f.stats.snapshot().packets_dropped, 1);
    }

    #[tokio::test]
    async fn test_triggers_during_send_coalesce() {
        let mut f = fixture(4);
        f.store.write(1);
        f.transport.hold();
        f.worker.start();

        f.trigger.trigger();
        settle().await;
        assert_eq!(f.worker.state(), WorkerState::Sending);
        assert_eq!(f.transport.attempts(), 1);

        f.trigger.trigger();
        f.trigger.trigger();
        f.trigger.trigger();
        f.transport.release();
        settle().await;

        assert_eq!(f.transport.attempts(), 2);
        assert_eq!(f.transport.sent().len(), 2);
        assert_eq!(f.worker.state(), WorkerState::Idle);
        assert_eq!(f.stats.snapshot().triggers, 4);
        f.worker.stop().await;
    }

    #[tokio::test]
    async fn test_backpressure_drops_packet() {
        let mut f = fixture(4);
        f.store.write(1);
        f.transport
            .fail_with(Some(SendError::Retryable("duty cycle".into())));
        f.worker.start();
        f.trigger.trigger();
        settle().await;

        f.transport.fail_with(Some(SendError::Failed("no join".into())));
        f.trigger.trigger();
        settle().await;
        f.worker.stop().await;

        let stats = f.stats.snapshot();
        assert_eq!(stats.packets_dropped, 1);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.packets_sent, 0);
        assert_eq!(f.transport.attempts(), 2);
    }

    #[tokio::test]
    async fn test_stop_abandons_parked_send() {
        let mut f = fixture(4);
        f.store.write(1);
        f.transport.hold();
        f.worker.start();
        f.trigger.trigger();
        settle().await;

        tokio::time::timeout(Duration::from_secs(1), f.worker.stop())
            .await
            .expect("stop returns while the transport is parked");
        assert_eq!(f.worker.state(), WorkerState::Idle);
        assert!(!f.worker.is_running());
    }

    #[tokio::test]
    async fn test_request_while_stopped_is_not_sent_on_restart() {
        let mut f = fixture(4);
        f.store.write(1);
        f.worker.start();
        settle().await;
        f.worker.stop().await;

        f.trigger.trigger();
        f.worker.start();
        settle().await;
        assert_eq!(f.transport.attempts(), 0);

        f.trigger.trigger();
        settle().await;
        f.worker.stop().await;
        assert_eq!(f.transport.attempts(), 1);
        assert_eq!(f.stats.snapshot().triggers, 2);
    }
}
