//! Integration tests for graceful shutdown behavior.
//!
//! Producers must stop emitting when the stop signal flips, and the
//! consumer loop must drain and exit cleanly without hanging.

use std::sync::Arc;
use std::time::Duration;

use plume_daq::channel::{ChannelKind, ChannelRegistry};
use plume_daq::config::Settings;
use plume_daq::engine::PlumeEngine;
use plume_daq::instrument::{self, MockInstrument};
use plume_daq::sink::MemorySink;
use tokio::sync::{mpsc, watch};

fn test_settings() -> Settings {
    let settings: Settings = toml::from_str(
        r#"
            [application]
            name = "shutdown test"
            log_level = "info"

            [acquisition]
            tick_interval = "20ms"

            [detection]
            primary_instrument = "mock1"

            [[instruments]]
            name = "mock1"
            kind = "CO2"
            interval_ms = 10

            [[instruments]]
            name = "mock2"
            kind = "NOX"
            base = 30.0
            interval_ms = 10
        "#,
    )
    .unwrap();
    settings.validate().unwrap();
    settings
}

fn spawn_stack(
    settings: &Settings,
) -> (
    Vec<tokio::task::JoinHandle<()>>,
    tokio::task::JoinHandle<plume_daq::error::AppResult<()>>,
    watch::Sender<bool>,
) {
    let registry = Arc::new(
        ChannelRegistry::new(
            &settings.registry_seed(),
            &settings.detection.primary_instrument,
        )
        .unwrap(),
    );
    let (tx, rx) = mpsc::channel(settings.acquisition.queue_capacity);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut producers = Vec::new();
    for spec in &settings.instruments {
        let instr = instrument::build(spec).unwrap();
        producers.push(instrument::spawn_producer(instr, tx.clone(), stop_rx.clone()));
    }
    drop(tx);

    let mut engine =
        PlumeEngine::new(settings, registry, rx, Box::new(MemorySink::new())).unwrap();
    let engine_stop = stop_rx.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_stop).await });

    (producers, engine_task, stop_tx)
}

#[tokio::test]
async fn shutdown_signal_stops_producers_and_consumer() {
    let settings = test_settings();
    let (producers, engine_task, stop_tx) = spawn_stack(&settings);

    // Let a few acquisition cycles happen.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();

    for handle in producers {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("producer did not stop in time")
            .unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), engine_task)
        .await
        .expect("consumer loop did not stop in time")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn shutdown_before_any_reading_is_clean() {
    let settings = test_settings();
    let (producers, engine_task, stop_tx) = spawn_stack(&settings);

    stop_tx.send(true).unwrap();

    for handle in producers {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("producer did not stop in time")
            .unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), engine_task)
        .await
        .expect("consumer loop did not stop in time")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn repeated_stop_signals_are_harmless() {
    let settings = test_settings();
    let (producers, engine_task, stop_tx) = spawn_stack(&settings);

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();
    let _ = stop_tx.send(true);

    for handle in producers {
        handle.await.unwrap();
    }
    engine_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stalled_instrument_never_blocks_the_consumer() {
    // A producer that emits nothing: the engine must keep cycling and exit
    // cleanly regardless.
    let settings = test_settings();
    let registry = Arc::new(
        ChannelRegistry::new(
            &settings.registry_seed(),
            &settings.detection.primary_instrument,
        )
        .unwrap(),
    );
    let (tx, rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);

    // One live producer, one that sleeps far longer than the test runs.
    let live = MockInstrument::new(
        "mock1",
        ChannelKind::Co2,
        400.0,
        0.0,
        Duration::from_millis(10),
    );
    let stalled = MockInstrument::new(
        "mock2",
        ChannelKind::Nox,
        30.0,
        0.0,
        Duration::from_secs(3600),
    );
    let producers = vec![
        instrument::spawn_producer(Box::new(live), tx.clone(), stop_rx.clone()),
        instrument::spawn_producer(Box::new(stalled), tx.clone(), stop_rx.clone()),
    ];
    drop(tx);

    let mut engine =
        PlumeEngine::new(&settings, registry, rx, Box::new(MemorySink::new())).unwrap();
    let engine_stop = stop_rx.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_stop).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();

    for handle in producers {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("producer did not stop in time")
            .unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), engine_task)
        .await
        .expect("consumer loop did not stop in time")
        .unwrap()
        .unwrap();
}
