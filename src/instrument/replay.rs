//! CSV replay instrument.
//!
//! Replays a recorded per-instrument trace at the recorded pace: each row's
//! timestamp delta to the previous row becomes a sleep, and the emitted
//! reading is stamped with the *current* wall-clock time, exactly as a live
//! instrument would deliver it. Rows that fail to decode are skipped with a
//! warning rather than fabricating values.
//!
//! Expected layout: a header line, then `timestamp,value` rows. Timestamps
//! may be RFC 3339 or the legacy `%Y-%m-%d %H:%M:%S%.f` layout the recorded
//! field campaigns used.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::channel::ChannelKind;
use crate::config::InstrumentSettings;
use crate::core::{GasInstrument, Reading};
use crate::error::{AppResult, PlumeError};

/// Replays a recorded CSV as a live instrument.
pub struct ReplayInstrument {
    name: String,
    kind: ChannelKind,
    rows: std::vec::IntoIter<(DateTime<Utc>, f64)>,
    previous: Option<DateTime<Utc>>,
}

impl ReplayInstrument {
    /// Load the recorded trace for one instrument.
    pub fn open(
        name: impl Into<String>,
        kind: ChannelKind,
        path: &Path,
    ) -> AppResult<Self> {
        let name = name.into();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| {
                PlumeError::Configuration(format!(
                    "replay file {}: {e}",
                    path.display()
                ))
            })?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                PlumeError::Configuration(format!(
                    "replay file {}: {e}",
                    path.display()
                ))
            })?;
            let (Some(ts_field), Some(value_field)) = (record.get(0), record.get(1)) else {
                continue;
            };
            let Some(timestamp) = parse_timestamp(ts_field) else {
                warn!(instrument = %name, row = ts_field, "unparsable replay timestamp; skipped");
                continue;
            };
            let Ok(value) = value_field.trim().parse::<f64>() else {
                warn!(instrument = %name, row = value_field, "unparsable replay value; skipped");
                continue;
            };
            rows.push((timestamp, value));
        }

        Ok(Self {
            name,
            kind,
            rows: rows.into_iter(),
            previous: None,
        })
    }

    /// Build from a configuration entry (`mode = "replay"`).
    pub fn from_settings(settings: &InstrumentSettings) -> AppResult<Self> {
        let path = settings.path.as_ref().ok_or_else(|| {
            PlumeError::Configuration(format!(
                "replay instrument '{}' has no recorded CSV path",
                settings.name
            ))
        })?;
        Self::open(settings.name.clone(), settings.kind, path)
    }
}

fn parse_timestamp(field: &str) -> Option<DateTime<Utc>> {
    let field = field.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(field) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl GasInstrument for ReplayInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn read_one(&mut self) -> anyhow::Result<Option<Reading>> {
        let Some((timestamp, value)) = self.rows.next() else {
            // Trace exhausted: behave like a stalled instrument.
            sleep(Duration::from_secs(1)).await;
            return Ok(None);
        };

        if let Some(previous) = self.previous {
            let delta = (timestamp - previous).to_std().unwrap_or(Duration::ZERO);
            sleep(delta).await;
        }
        self.previous = Some(timestamp);

        Ok(Some(Reading::now(self.name.clone(), self.kind, value)))
    }
}
