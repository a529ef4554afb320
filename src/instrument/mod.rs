//! Instrument producers.
//!
//! One producer task per instrument, each independently reading its source
//! and pushing readings into the single shared queue. The hardware serial
//! protocols themselves are out of scope — everything behind
//! [`GasInstrument`] hands the core already-decoded readings.
//!
//! # Available implementations
//!
//! - [`MockInstrument`] — simulated readings (base level + noise, optional
//!   periodic plume injection) for testing without physical hardware.
//! - [`ReplayInstrument`] — replays a recorded per-instrument CSV at the
//!   recorded pace (`storage_csv` feature).

pub mod mock;
#[cfg(feature = "storage_csv")]
pub mod replay;

pub use mock::MockInstrument;
#[cfg(feature = "storage_csv")]
pub use replay::ReplayInstrument;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{InstrumentMode, InstrumentSettings};
use crate::core::{GasInstrument, Reading};
use crate::error::AppResult;

/// Build a producer from its configuration entry.
pub fn build(settings: &InstrumentSettings) -> AppResult<Box<dyn GasInstrument>> {
    match settings.mode {
        InstrumentMode::Mock => Ok(Box::new(MockInstrument::from_settings(settings))),
        #[cfg(feature = "storage_csv")]
        InstrumentMode::Replay => Ok(Box::new(ReplayInstrument::from_settings(settings)?)),
        #[cfg(not(feature = "storage_csv"))]
        InstrumentMode::Replay => Err(crate::error::PlumeError::FeatureNotEnabled(
            "storage_csv".to_string(),
        )),
    }
}

/// Spawn the producer task for one instrument.
///
/// The task polls the instrument until the stop signal flips, pushing every
/// decoded reading into the shared queue. Decode failures are logged and
/// polling continues; a closed queue (consumer gone) ends the task.
pub fn spawn_producer(
    mut instrument: Box<dyn GasInstrument>,
    tx: mpsc::Sender<Reading>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                read = instrument.read_one() => match read {
                    Ok(Some(reading)) => {
                        if tx.send(reading).await.is_err() {
                            debug!(
                                name = instrument.name(),
                                "reading queue closed; stopping producer"
                            );
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(name = instrument.name(), %error, "instrument read failed");
                    }
                },
            }
        }
        debug!(name = instrument.name(), "producer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use std::time::Duration;

    #[tokio::test]
    async fn producer_pushes_readings_until_stopped() {
        let instrument = MockInstrument::new(
            "LI7000",
            ChannelKind::Co2,
            400.0,
            0.0,
            Duration::from_millis(5),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_producer(Box::new(instrument), tx, stop_rx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.instrument, "LI7000");
        assert_eq!(first.kind, ChannelKind::Co2);
        assert!((first.value - 400.0).abs() < 1e-9);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn producer_stops_when_queue_closes() {
        let instrument = MockInstrument::new(
            "SBA5",
            ChannelKind::Co2,
            410.0,
            0.0,
            Duration::from_millis(5),
        );
        let (tx, rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_producer(Box::new(instrument), tx, stop_rx);
        drop(rx);
        handle.await.unwrap();
    }
}
