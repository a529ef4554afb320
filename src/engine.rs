//! The consumer loop.
//!
//! All core logic runs cooperatively on a single task: every cycle drains
//! the shared reading queue into the timeline store, evicts stale buckets,
//! runs the classifier passes, integrates any plume runs that closed, and
//! emits per-second summary rows for buckets old enough to be stable.
//!
//! The store is mutated only here — producers touch nothing but the queue.
//! Nothing in the loop blocks on I/O except the sink writes at the end of a
//! cycle, so a stalled instrument can never stall analysis.
//!
//! [`PlumeEngine::run`] drives cycles from a 1 Hz timer until the stop
//! signal flips, then drains and runs one final cycle so no queued reading
//! is lost. [`PlumeEngine::step`] is the timer-free core of one cycle,
//! taking "now" as a parameter; tests drive it directly with synthetic
//! timestamps.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::channel::ChannelRegistry;
use crate::classifier::PlumeClassifier;
use crate::config::Settings;
use crate::core::{Reading, RecordSink};
use crate::error::AppResult;
use crate::integrator::PlumeIntegrator;
use crate::records::{second_to_datetime, ChannelAverage, SummaryRow};
use crate::timeline::TimelineStore;

/// The core processing loop: queue → timeline → classifier → integrator →
/// sink.
pub struct PlumeEngine {
    store: TimelineStore,
    classifier: PlumeClassifier,
    integrator: PlumeIntegrator,
    sink: Box<dyn RecordSink>,
    rx: mpsc::Receiver<Reading>,
    retention_secs: i64,
    summary_delay_secs: i64,
    tick_interval: Duration,
}

impl PlumeEngine {
    /// Assemble the engine from validated settings.
    pub fn new(
        settings: &Settings,
        registry: Arc<ChannelRegistry>,
        rx: mpsc::Receiver<Reading>,
        sink: Box<dyn RecordSink>,
    ) -> AppResult<Self> {
        let corrections = settings.correction_table(&registry)?;
        let retention = settings.acquisition.retention_secs;
        Ok(Self {
            store: TimelineStore::new(registry),
            classifier: PlumeClassifier::new(settings.detection.clone(), retention),
            integrator: PlumeIntegrator::new(corrections, settings.species.clone(), retention),
            sink,
            rx,
            retention_secs: retention,
            summary_delay_secs: settings.acquisition.summary_delay_secs,
            tick_interval: settings.acquisition.tick_interval,
        })
    }

    /// The timeline store (for inspection in tests and diagnostics).
    pub fn store(&self) -> &TimelineStore {
        &self.store
    }

    /// Run one processing cycle against the given "now".
    pub async fn step(&mut self, now: i64) -> AppResult<()> {
        self.drain_queue();
        let evicted = self.store.evict_older_than(now, self.retention_secs);
        if evicted > 0 {
            debug!(evicted, "evicted stale buckets");
        }

        let ends = self.classifier.run(&mut self.store, now);
        for stop in ends {
            // One failed plume event must not block subsequent processing.
            match self.integrator.integrate(&self.store, stop) {
                Ok(closure) => {
                    info!(
                        event_id = closure.boundary.event_id,
                        start = %closure.boundary.start,
                        stop = %closure.boundary.stop,
                        "plume event closed"
                    );
                    self.sink.write_boundary(&closure.boundary).await?;
                    for area in &closure.areas {
                        self.sink.write_area(area).await?;
                    }
                }
                Err(error) => {
                    error!(%error, stop, "plume integration failed");
                }
            }
        }

        self.write_summaries(now).await
    }

    /// Pull everything currently queued into the store.
    fn drain_queue(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(reading) = self.rx.try_recv() {
            drained += 1;
            if let Err(error) = self.store.ingest(&reading) {
                warn!(%error, "dropped reading");
            }
        }
        if drained > 0 {
            debug!(count = drained, "drained readings");
        }
        drained
    }

    /// Emit summary rows for buckets old enough to be stable.
    async fn write_summaries(&mut self, now: i64) -> AppResult<()> {
        let pending: Vec<i64> = self
            .store
            .seconds()
            .filter(|t| now - t >= self.summary_delay_secs)
            .collect();

        for t in pending {
            let already_written = self
                .store
                .bucket(t)
                .map(|b| b.written)
                .unwrap_or(true);
            if already_written {
                continue;
            }

            let averages: Vec<ChannelAverage> = self
                .store
                .registry()
                .channels()
                .into_iter()
                .map(|e| ChannelAverage {
                    kind: e.kind,
                    channel_id: e.id,
                    value: self.store.average(t, e.kind, e.id),
                })
                .collect();
            let row = SummaryRow {
                timestamp: second_to_datetime(t),
                averages,
            };
            self.sink.write_summary(&row).await?;

            if let Some(bucket) = self.store.bucket_mut(t) {
                bucket.written = true;
            }
        }
        Ok(())
    }

    /// Drive cycles from the timer until the stop signal flips, then drain
    /// and shut the sink down.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.step(chrono::Utc::now().timestamp()).await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Final cycle: pick up whatever producers queued before stopping.
        self.step(chrono::Utc::now().timestamp()).await?;
        self.sink.shutdown().await?;
        info!("consumer loop stopped");
        Ok(())
    }
}
