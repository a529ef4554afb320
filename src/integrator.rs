//! Plume-area integration and emission factors.
//!
//! When the classifier closes a plume run, the integrator reconstructs the
//! run's boundaries, shifts them onto each channel's own clock through the
//! timing-correction table, and integrates baseline and trace areas with the
//! trapezoidal rule over the carried-forward-filled one-second series. The
//! primary CO2 channel's net area is the master against which every other
//! channel's emission factor is normalized.
//!
//! A record is either fully computed or not produced at all: any exhausted
//! carried-forward lookup aborts the whole event with a data-quality error,
//! which the consumer loop reports without stopping.

use crate::channel::{ChannelKind, ChannelRegistry};
use crate::config::SpeciesSettings;
use crate::correction::CorrectionTable;
use crate::error::{AppResult, PlumeError};
use crate::records::{second_to_datetime, PlumeAreaRecord, PlumeBoundary};
use crate::timeline::{PlumeState, TimelineStore};

/// Seconds of carried-forward lookback on each side of a boundary used for
/// the ambient baseline.
const BASELINE_SPAN: i64 = 3;

/// Everything produced for one closed plume event.
#[derive(Clone, Debug)]
pub struct PlumeClosure {
    /// Boundary row on the primary detector's timeline.
    pub boundary: PlumeBoundary,
    /// One area row per registered channel, canonical order.
    pub areas: Vec<PlumeAreaRecord>,
}

#[derive(Clone)]
struct ChannelArea {
    start_lag: i64,
    stop_lag: i64,
    corrected_start: i64,
    corrected_stop: i64,
    baseline_pre: f64,
    baseline_post: f64,
    baseline_area: f64,
    total_area: f64,
    net_area: f64,
}

/// Trapezoidal integral of a 1 Hz value series.
pub fn trapezoid(values: &[f64]) -> f64 {
    values.windows(2).map(|w| (w[0] + w[1]) / 2.0).sum()
}

/// Turns closed plume runs into boundary and area records.
pub struct PlumeIntegrator {
    corrections: CorrectionTable,
    species: SpeciesSettings,
    lookback: i64,
    next_event_id: u64,
}

impl PlumeIntegrator {
    /// Build an integrator. `lookback` bounds carried-forward searches and
    /// is normally the store's retention window.
    pub fn new(corrections: CorrectionTable, species: SpeciesSettings, lookback: i64) -> Self {
        Self {
            corrections,
            species,
            lookback,
            next_event_id: 1,
        }
    }

    /// Integrate the plume run closing at boundary `stop`.
    ///
    /// The event id is consumed only when the whole event computes; a failed
    /// event leaves the counter untouched.
    pub fn integrate(&mut self, store: &TimelineStore, stop: i64) -> AppResult<PlumeClosure> {
        let registry = store.registry();
        let primary_id = registry.primary_id();

        let start = self.find_start(store, stop).ok_or_else(|| {
            PlumeError::DataQuality {
                kind: ChannelKind::Co2,
                channel_id: primary_id,
                timestamp: stop,
                reason: "no plume run precedes the boundary".to_string(),
            }
        })?;

        let master = self.channel_area(store, ChannelKind::Co2, primary_id, start, stop)?;
        if master.net_area.abs() < 1e-9 {
            return Err(PlumeError::DataQuality {
                kind: ChannelKind::Co2,
                channel_id: primary_id,
                timestamp: stop,
                reason: "master net area is zero".to_string(),
            });
        }

        let event_id = self.next_event_id;
        let mut areas = Vec::new();
        for entry in registry.channels() {
            let area = if entry.kind == ChannelKind::Co2 && entry.id == primary_id {
                master.clone()
            } else {
                self.channel_area(store, entry.kind, entry.id, start, stop)?
            };
            let emission_factor =
                self.species.constant(entry.kind) * area.net_area / master.net_area;
            areas.push(PlumeAreaRecord {
                event_id,
                channel_id: entry.id,
                instrument: entry.instrument.clone(),
                kind: entry.kind,
                units: entry.kind.unit().to_string(),
                pip_pre: area.start_lag,
                pip_post: area.stop_lag,
                plume_start: second_to_datetime(area.corrected_start),
                plume_stop: second_to_datetime(area.corrected_stop),
                baseline_pre: area.baseline_pre,
                baseline_post: area.baseline_post,
                baseline_area: area.baseline_area,
                total_area: area.total_area,
                net_area: area.net_area,
                emission_factor,
            });
        }

        let boundary = PlumeBoundary {
            event_id,
            start: second_to_datetime(start),
            stop: second_to_datetime(stop),
            detector: registry.primary_instrument().to_string(),
        };

        self.next_event_id += 1;
        Ok(PlumeClosure { boundary, areas })
    }

    /// Earliest second of the unbroken plume run preceding `stop`: the
    /// successor of the first non-plume predecessor.
    fn find_start(&self, store: &TimelineStore, stop: i64) -> Option<i64> {
        let mut start = None;
        let mut cursor = stop;
        while let Some(prev) = store.predecessor(cursor) {
            match store.bucket(prev).map(|b| b.plume) {
                Some(PlumeState::Plume) => {
                    start = Some(prev);
                    cursor = prev;
                }
                _ => break,
            }
        }
        start
    }

    fn channel_area(
        &self,
        store: &TimelineStore,
        kind: ChannelKind,
        channel_id: usize,
        start: i64,
        stop: i64,
    ) -> AppResult<ChannelArea> {
        let lag = self.corrections.get(kind, channel_id);
        let (corrected_start, corrected_stop) =
            self.corrections.correct(start, stop, kind, channel_id);

        let lookup = |second: i64, what: &str| -> AppResult<f64> {
            store
                .carried_forward(second, kind, channel_id, self.lookback)
                .ok_or_else(|| PlumeError::DataQuality {
                    kind,
                    channel_id,
                    timestamp: second,
                    reason: format!("no data within lookback for {what}"),
                })
        };

        let baseline_pre = self.baseline(corrected_start, -1, kind, channel_id, store)?;
        let baseline_post = self.baseline(corrected_stop, 1, kind, channel_id, store)?;

        let series: Vec<f64> = (corrected_start..=corrected_stop)
            .map(|s| lookup(s, "trace integration"))
            .collect::<AppResult<_>>()?;

        let total_area = trapezoid(&series);
        let baseline_area =
            (baseline_pre + baseline_post) / 2.0 * (corrected_stop - corrected_start) as f64;

        Ok(ChannelArea {
            start_lag: lag.start_lag,
            stop_lag: lag.stop_lag,
            corrected_start,
            corrected_stop,
            baseline_pre,
            baseline_post,
            baseline_area,
            total_area,
            net_area: total_area - baseline_area,
        })
    }

    /// Ambient level next to a boundary: the mean of the carried-forward
    /// values over [`BASELINE_SPAN`] seconds on the `direction` side.
    fn baseline(
        &self,
        boundary: i64,
        direction: i64,
        kind: ChannelKind,
        channel_id: usize,
        store: &TimelineStore,
    ) -> AppResult<f64> {
        let mut sum = 0.0;
        for offset in 1..=BASELINE_SPAN {
            let second = boundary + direction * offset;
            sum += store
                .carried_forward(second, kind, channel_id, self.lookback)
                .ok_or_else(|| PlumeError::DataQuality {
                    kind,
                    channel_id,
                    timestamp: second,
                    reason: "no data within lookback for baseline".to_string(),
                })?;
        }
        Ok(sum / BASELINE_SPAN as f64)
    }
}
