//! Record sink implementations.
//!
//! The core only talks to the [`RecordSink`](crate::core::RecordSink) trait;
//! the implementations here are the concrete collaborators: an in-memory
//! sink for tests and inspection, and a CSV sink (behind the `storage_csv`
//! feature) writing one file each for summary rows, plume boundaries and
//! plume areas.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::core::RecordSink;
use crate::error::AppResult;
use crate::records::{PlumeAreaRecord, PlumeBoundary, SummaryRow};

#[cfg(feature = "storage_csv")]
use crate::{channel::ChannelRegistry, config::Settings, error::PlumeError};

/// Shared view over everything a [`MemorySink`] has recorded.
///
/// Cloning the log before handing the sink to the engine lets tests inspect
/// output after the engine has taken ownership.
#[derive(Clone, Default)]
pub struct SinkLog {
    summaries: Arc<Mutex<Vec<SummaryRow>>>,
    boundaries: Arc<Mutex<Vec<PlumeBoundary>>>,
    areas: Arc<Mutex<Vec<PlumeAreaRecord>>>,
}

impl SinkLog {
    /// Snapshot of the summary rows written so far.
    pub fn summaries(&self) -> Vec<SummaryRow> {
        self.summaries.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Snapshot of the boundary rows written so far.
    pub fn boundaries(&self) -> Vec<PlumeBoundary> {
        self.boundaries.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Snapshot of the area rows written so far.
    pub fn areas(&self) -> Vec<PlumeAreaRecord> {
        self.areas.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

/// In-memory sink backed by a [`SinkLog`].
#[derive(Default)]
pub struct MemorySink {
    log: SinkLog,
}

impl MemorySink {
    /// New empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared log handle for later inspection.
    pub fn log(&self) -> SinkLog {
        self.log.clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_summary(&mut self, row: &SummaryRow) -> AppResult<()> {
        if let Ok(mut rows) = self.log.summaries.lock() {
            rows.push(row.clone());
        }
        Ok(())
    }

    async fn write_boundary(&mut self, row: &PlumeBoundary) -> AppResult<()> {
        if let Ok(mut rows) = self.log.boundaries.lock() {
            rows.push(row.clone());
        }
        Ok(())
    }

    async fn write_area(&mut self, record: &PlumeAreaRecord) -> AppResult<()> {
        if let Ok(mut rows) = self.log.areas.lock() {
            rows.push(record.clone());
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        Ok(())
    }
}

/// CSV sink writing `summary.csv`, `plume_events.csv` and `plume_areas.csv`
/// into one output directory.
///
/// The summary file starts with the session settings as `# `-prefixed JSON
/// comment lines, so a results directory is self-describing.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    summary: csv::Writer<std::fs::File>,
    boundaries: csv::Writer<std::fs::File>,
    areas: csv::Writer<std::fs::File>,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Create the output directory and the three record files.
    pub fn create(
        dir: &std::path::Path,
        registry: &ChannelRegistry,
        settings: &Settings,
    ) -> AppResult<Self> {
        use std::io::Write;

        std::fs::create_dir_all(dir)?;

        let mut summary_file = std::fs::File::create(dir.join("summary.csv"))?;
        let metadata = serde_json::to_string_pretty(settings)
            .map_err(|e| PlumeError::Sink(e.to_string()))?;
        for line in metadata.lines() {
            summary_file.write_all(b"# ")?;
            summary_file.write_all(line.as_bytes())?;
            summary_file.write_all(b"\n")?;
        }

        let mut summary = csv::Writer::from_writer(summary_file);
        let mut header = vec!["timestamp".to_string()];
        header.extend(
            registry
                .channels()
                .iter()
                .map(|e| format!("{}-{}", e.instrument, e.kind)),
        );
        summary
            .write_record(&header)
            .map_err(|e| PlumeError::Sink(e.to_string()))?;

        let mut boundaries =
            csv::Writer::from_writer(std::fs::File::create(dir.join("plume_events.csv"))?);
        boundaries
            .write_record(["event_id", "start", "stop", "detector"])
            .map_err(|e| PlumeError::Sink(e.to_string()))?;

        let mut areas =
            csv::Writer::from_writer(std::fs::File::create(dir.join("plume_areas.csv"))?);
        areas
            .write_record([
                "event_id",
                "channel_id",
                "instrument",
                "kind",
                "units",
                "pip_pre",
                "pip_post",
                "plume_start",
                "plume_stop",
                "baseline_pre",
                "baseline_post",
                "baseline_area",
                "total_area",
                "net_area",
                "emission_factor",
            ])
            .map_err(|e| PlumeError::Sink(e.to_string()))?;

        Ok(Self {
            summary,
            boundaries,
            areas,
        })
    }
}

#[cfg(feature = "storage_csv")]
#[async_trait]
impl RecordSink for CsvSink {
    async fn write_summary(&mut self, row: &SummaryRow) -> AppResult<()> {
        let mut record = vec![row.timestamp.to_rfc3339()];
        // A channel with no data stays an empty field, never a zero.
        record.extend(
            row.averages
                .iter()
                .map(|a| a.value.map(|v| v.to_string()).unwrap_or_default()),
        );
        self.summary
            .write_record(&record)
            .map_err(|e| PlumeError::Sink(e.to_string()))
    }

    async fn write_boundary(&mut self, row: &PlumeBoundary) -> AppResult<()> {
        self.boundaries
            .write_record(&[
                row.event_id.to_string(),
                row.start.to_rfc3339(),
                row.stop.to_rfc3339(),
                row.detector.clone(),
            ])
            .map_err(|e| PlumeError::Sink(e.to_string()))
    }

    async fn write_area(&mut self, record: &PlumeAreaRecord) -> AppResult<()> {
        self.areas
            .write_record(&[
                record.event_id.to_string(),
                record.channel_id.to_string(),
                record.instrument.clone(),
                record.kind.to_string(),
                record.units.clone(),
                record.pip_pre.to_string(),
                record.pip_post.to_string(),
                record.plume_start.to_rfc3339(),
                record.plume_stop.to_rfc3339(),
                record.baseline_pre.to_string(),
                record.baseline_post.to_string(),
                record.baseline_area.to_string(),
                record.total_area.to_string(),
                record.net_area.to_string(),
                record.emission_factor.to_string(),
            ])
            .map_err(|e| PlumeError::Sink(e.to_string()))
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        for writer in [&mut self.summary, &mut self.boundaries, &mut self.areas] {
            writer.flush()?;
        }
        tracing::info!("CSV sink shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::records::{second_to_datetime, ChannelAverage};

    fn summary_row() -> SummaryRow {
        SummaryRow {
            timestamp: second_to_datetime(1_700_000_000),
            averages: vec![
                ChannelAverage {
                    kind: ChannelKind::Co2,
                    channel_id: 0,
                    value: Some(412.5),
                },
                ChannelAverage {
                    kind: ChannelKind::Nox,
                    channel_id: 0,
                    value: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn memory_sink_records_in_order() {
        let mut sink = MemorySink::new();
        let log = sink.log();

        sink.write_summary(&summary_row()).await.unwrap();
        sink.write_boundary(&PlumeBoundary {
            event_id: 1,
            start: second_to_datetime(1_700_000_050),
            stop: second_to_datetime(1_700_000_070),
            detector: "LI7000".to_string(),
        })
        .await
        .unwrap();
        sink.shutdown().await.unwrap();

        assert_eq!(log.summaries().len(), 1);
        assert_eq!(log.boundaries().len(), 1);
        assert!(log.areas().is_empty());
        assert_eq!(log.summaries()[0].averages[1].value, None);
    }

    #[cfg(feature = "storage_csv")]
    #[tokio::test]
    async fn csv_sink_writes_headers_metadata_and_empty_fields() {
        use crate::channel::ChannelRegistry;

        let dir = tempfile::tempdir().unwrap();
        let registry = ChannelRegistry::new(
            &[
                ("LI7000".to_string(), ChannelKind::Co2),
                ("CAPS".to_string(), ChannelKind::Nox),
            ],
            "LI7000",
        )
        .unwrap();
        let settings: Settings = toml::from_str(
            r#"
                [application]
                name = "csv sink test"
                log_level = "info"

                [detection]
                primary_instrument = "LI7000"

                [[instruments]]
                name = "LI7000"
                kind = "CO2"

                [[instruments]]
                name = "CAPS"
                kind = "NOX"
            "#,
        )
        .unwrap();

        let mut sink = CsvSink::create(dir.path(), &registry, &settings).unwrap();
        sink.write_summary(&summary_row()).await.unwrap();
        sink.shutdown().await.unwrap();

        let contents = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert!(contents.starts_with("# {"));
        assert!(contents.contains("timestamp,LI7000-CO2,CAPS-NOX"));
        // The NOx field is empty, not zero.
        assert!(contents.contains("412.5,\n"));
        assert!(std::fs::metadata(dir.path().join("plume_events.csv")).unwrap().is_file());
        assert!(std::fs::metadata(dir.path().join("plume_areas.csv")).unwrap().is_file());
    }
}
