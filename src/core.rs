//! Core traits and data types for the plume acquisition engine.
//!
//! The boundaries of the core are kept narrow: instruments hand in already
//! decoded [`Reading`] tuples through the [`GasInstrument`] capability trait,
//! and results leave through the [`RecordSink`] trait. The core never depends
//! on concrete instrument types or storage formats.

use crate::channel::ChannelKind;
use crate::error::AppResult;
use crate::records::{PlumeAreaRecord, PlumeBoundary, SummaryRow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single decoded reading from an instrument.
///
/// Produced by instrument collaborators; immutable once created. Timestamps
/// are arrival-side wall-clock time — bucket assignment floors them to whole
/// seconds, so readings may arrive out of strict time order across
/// instruments without harm.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    /// Name of the producing instrument.
    pub instrument: String,
    /// Species kind of the channel.
    pub kind: ChannelKind,
    /// Decoded concentration value, in the kind's unit.
    pub value: f64,
    /// Wall-clock time the value was observed.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Reading {
    /// Construct a reading stamped with the current time.
    pub fn now(instrument: impl Into<String>, kind: ChannelKind, value: f64) -> Self {
        Self {
            instrument: instrument.into(),
            kind,
            value,
            timestamp: chrono::Utc::now(),
        }
    }

    /// The reading's timestamp floored to a whole unix second.
    pub fn second(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Capability trait for anything that yields gas-concentration readings.
///
/// Implementations wrap one physical or simulated instrument each and run in
/// their own producer task. `read_one` returning `Ok(None)` means "nothing
/// decoded this poll" (the original hardware frequently emits unparsable
/// lines); the producer loop simply polls again.
#[async_trait]
pub trait GasInstrument: Send {
    /// Instrument name, as registered in the channel registry.
    fn name(&self) -> &str;

    /// The species this instrument reports.
    fn kind(&self) -> ChannelKind;

    /// Read and decode the next value, pacing itself as the hardware would.
    async fn read_one(&mut self) -> anyhow::Result<Option<Reading>>;
}

/// Trait for the persistence collaborator receiving core output.
///
/// One implementation writes CSV files; tests use an in-memory sink. A plume
/// event is delivered as one boundary row followed by one area row per
/// registered channel, and only after the whole event computed successfully.
#[async_trait]
pub trait RecordSink: Send {
    /// Write one per-second summary row.
    async fn write_summary(&mut self, row: &SummaryRow) -> AppResult<()>;

    /// Write one plume boundary row.
    async fn write_boundary(&mut self, row: &PlumeBoundary) -> AppResult<()>;

    /// Write one per-channel plume area row.
    async fn write_area(&mut self, record: &PlumeAreaRecord) -> AppResult<()>;

    /// Flush and release resources.
    async fn shutdown(&mut self) -> AppResult<()>;
}
