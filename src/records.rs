//! Output record shapes delivered to the persistence collaborator.
//!
//! All boundary data is structured tabular records suitable for CSV-style
//! persistence; the sink decides the on-disk format.

use crate::channel::ChannelKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Convert a whole unix second into a UTC timestamp.
pub fn second_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// One per-second averaged value for a single channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelAverage {
    /// Species kind.
    pub kind: ChannelKind,
    /// Registry channel id within the kind.
    pub channel_id: usize,
    /// Mean of the values observed that second, or `None` when the channel
    /// had no readings. Never a zero placeholder.
    pub value: Option<f64>,
}

/// Per-second summary row: one averaged value per registered channel, in
/// canonical registry order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// The second this row summarizes.
    pub timestamp: DateTime<Utc>,
    /// Averages for every registered channel.
    pub averages: Vec<ChannelAverage>,
}

/// Plume event boundary on the primary detector's timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlumeBoundary {
    /// Monotonically increasing event id.
    pub event_id: u64,
    /// First second of the plume run.
    pub start: DateTime<Utc>,
    /// Second at which the run closed (first non-plume second).
    pub stop: DateTime<Utc>,
    /// Name of the primary detector instrument.
    pub detector: String,
}

/// Per-channel plume area and emission factor for one event.
///
/// Immutable once written; one row per registered channel per event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlumeAreaRecord {
    /// Event this row belongs to.
    pub event_id: u64,
    /// Registry channel id within the kind.
    pub channel_id: usize,
    /// Instrument name.
    pub instrument: String,
    /// Species kind.
    pub kind: ChannelKind,
    /// Display unit of the integrated values.
    pub units: String,
    /// Timing-correction lag applied ahead of the start boundary, seconds.
    pub pip_pre: i64,
    /// Timing-correction lag applied after the stop boundary, seconds.
    pub pip_post: i64,
    /// Lag-corrected start of the integration span.
    pub plume_start: DateTime<Utc>,
    /// Lag-corrected stop of the integration span.
    pub plume_stop: DateTime<Utc>,
    /// Ambient level ahead of the plume (3 s carried-forward average).
    pub baseline_pre: f64,
    /// Ambient level after the plume (3 s carried-forward average).
    pub baseline_post: f64,
    /// Trapezoidal area under the two-point baseline.
    pub baseline_area: f64,
    /// Trapezoidal area under the carried-forward-filled trace.
    pub total_area: f64,
    /// `total_area - baseline_area`.
    pub net_area: f64,
    /// `species_constant * net_area / master_net_area`.
    pub emission_factor: f64,
}
