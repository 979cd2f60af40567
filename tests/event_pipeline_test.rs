//! End-to-end tests for the sampling → detection → uplink pipeline.
//!
//! Every test runs on a paused Tokio clock, so "sleep 400 ms" means exactly forty
//! sampler ticks at the 10 ms period used here.

use geophone_node::config::NodeConfig;
use geophone_node::data::{TimestampWidth, TransmitPacket};
use geophone_node::error::SendError;
use geophone_node::hardware::mock::{FixedClock, MockAnalogInput, MockTransport};
use geophone_node::hardware::SendMode;
use geophone_node::pipeline::{Collaborators, DetectorState, Node, SamplerState};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

const CLOCK_MS: u64 = 1_700_000_000_123;

/// 4-sample STA, 32-sample LTA, 16-sample packets.
fn small_config() -> NodeConfig {
    NodeConfig::from_toml_str(
        r#"
        [sampling]
        period_ms = 10

        [store]
        capacity = 64

        [detection]
        sta_window_ms = 40
        lta_window_ms = 320
        trigger_ratio = 2.0
        reset_ratio = 1.2

        [transmit]
        window = 16
        port = 3
        mode = "confirmed"
        timestamp = "millis64"
        "#,
    )
    .expect("valid test config")
}

struct Harness {
    node: Node,
    adc: Arc<MockAnalogInput>,
    transport: Arc<MockTransport>,
}

fn harness(adc: MockAnalogInput) -> Harness {
    let adc = Arc::new(adc);
    let transport = Arc::new(MockTransport::new());
    let node = Node::new(
        &small_config(),
        Collaborators {
            adc: adc.clone(),
            clock: Arc::new(FixedClock(CLOCK_MS)),
            transport: transport.clone(),
        },
    )
    .expect("node builds");
    Harness {
        node,
        adc,
        transport,
    }
}

async fn ms(n: u64) {
    tokio::time::sleep(Duration::from_millis(n)).await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_sends_one_packet_with_newest_samples() {
    let mut h = harness(MockAnalogInput::new(100, 0));
    h.node.start_sampling();
    h.node.start_detection();

    ms(400).await;
    assert!(h.transport.sent().is_empty(), "steady baseline must not trigger");
    assert_eq!(h.node.detector_state(), DetectorState::Idle);

    h.adc.inject_burst(4, 1000);
    ms(200).await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].port, 3);
    assert_eq!(sent[0].mode, SendMode::Confirmed);

    let packet = TransmitPacket::decode(&sent[0].payload, TimestampWidth::Millis64).unwrap();
    assert_eq!(packet.timestamp, CLOCK_MS);
    assert_eq!(packet.samples.len(), 16);
    assert_eq!(*packet.samples.last().unwrap(), 1100);
    assert!(packet.samples.iter().all(|&s| s == 100 || s == 1100));

    // burst over, ratio fell below the reset threshold
    assert_eq!(h.node.detector_state(), DetectorState::Idle);

    h.node.shutdown().await;
    let stats = h.node.stats();
    assert_eq!(stats.events_detected, 1);
    assert_eq!(stats.triggers, 1);
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.warmup_cycles, 31);
}

#[tokio::test(start_paused = true)]
async fn test_separate_bursts_send_separate_packets() {
    let mut h = harness(MockAnalogInput::new(100, 0));
    h.node.start_sampling();
    h.node.start_detection();
    ms(400).await;

    h.adc.inject_burst(4, 1000);
    ms(400).await;
    h.adc.inject_burst(4, 1000);
    ms(200).await;
    h.node.shutdown().await;

    assert_eq!(h.transport.sent().len(), 2);
    assert_eq!(h.node.stats().events_detected, 2);
}

#[tokio::test(start_paused = true)]
async fn test_detector_reports_triggered_during_event() {
    let mut h = harness(MockAnalogInput::new(100, 0));
    let mut states = h.node.subscribe_detector();
    h.node.start_sampling();
    h.node.start_detection();
    ms(400).await;

    h.adc.inject_burst(40, 1000);
    ms(20).await;
    assert_eq!(h.node.detector_state(), DetectorState::Triggered);
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), DetectorState::Triggered);

    h.node.shutdown().await;
    assert_eq!(h.node.stats().events_detected, 1);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_force_transmit_without_detection() {
    let mut h = harness(MockAnalogInput::new(-7, 0));
    h.node.start_sampling();
    ms(45).await;

    h.node.force_transmit();
    ms(1).await;
    h.node.shutdown().await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    let packet = TransmitPacket::decode(&sent[0].payload, TimestampWidth::Millis64).unwrap();
    assert_eq!(packet.samples, vec![-7; 5]);
    assert!(logs_contain("Manual transmission requested"));
    assert!(logs_contain("Node shut down"));
}

#[tokio::test(start_paused = true)]
async fn test_force_transmit_on_empty_store_sends_nothing() {
    let mut h = harness(MockAnalogInput::new(1, 0));
    h.node.force_transmit();
    ms(1).await;
    h.node.shutdown().await;

    assert_eq!(h.transport.attempts(), 0);
    assert_eq!(h.node.stats().packets_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_drops_packet_and_pipeline_continues() {
    let mut h = harness(MockAnalogInput::new(100, 0));
    h.transport
        .fail_with(Some(SendError::Retryable("duty cycle".into())));
    h.node.start_sampling();
    h.node.start_detection();
    ms(400).await;

    h.adc.inject_burst(4, 1000);
    ms(400).await;
    assert_eq!(h.node.stats().packets_dropped, 1);
    assert!(h.transport.sent().is_empty());

    h.transport.fail_with(None);
    h.adc.inject_burst(4, 1000);
    ms(200).await;
    h.node.shutdown().await;

    let stats = h.node.stats();
    assert_eq!(stats.events_detected, 2);
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(h.transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_baseline_is_degenerate_not_an_event() {
    let mut h = harness(MockAnalogInput::new(0, 0));
    h.node.start_sampling();
    h.node.start_detection();
    ms(500).await;
    h.node.shutdown().await;

    let stats = h.node.stats();
    assert!(stats.degenerate_cycles > 0);
    assert_eq!(stats.events_detected, 0);
    assert_eq!(h.transport.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_failures_skip_ticks() {
    let mut h = harness(MockAnalogInput::new(5, 0));
    h.adc.fail_next(3);
    h.node.start_sampling();
    ms(95).await;
    h.node.stop_sampling().await;

    let stats = h.node.stats();
    assert_eq!(stats.acquisition_failures, 3);
    assert_eq!(stats.samples_written, 7);
    assert_eq!(h.node.store().len(), 7);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_runtime_period_change() {
    let mut h = harness(MockAnalogInput::new(5, 0));
    h.node.start_sampling();
    ms(95).await;
    assert_eq!(h.node.store().total_written(), 10);

    h.node
        .set_sampling_period(Duration::from_millis(50))
        .unwrap();
    ms(200).await;
    h.node.stop_sampling().await;

    // the sleep re-arms from the 90 ms tick: 140, 190, 240 and 290
    let written = h.node.store().total_written();
    assert!((13..=15).contains(&written), "wrote {}", written);
    assert!(logs_contain("Sampling period changed"));
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_restart_sampling() {
    let mut h = harness(MockAnalogInput::new(5, 0));
    h.node.start_sampling();
    ms(35).await;
    h.node.stop_sampling().await;
    assert_eq!(h.node.sampler_state(), SamplerState::Stopped);
    let after_stop = h.node.store().total_written();

    ms(100).await;
    assert_eq!(h.node.store().total_written(), after_stop);

    h.node.start_sampling();
    ms(5).await;
    assert_eq!(h.node.store().total_written(), after_stop + 1);
    h.node.shutdown().await;
}
