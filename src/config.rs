//! Configuration management.
//!
//! Settings are loaded from `config/<name>.toml` via the `config` crate and
//! deserialized into typed sections. Everything that is tunable calibration
//! rather than algorithm — detection thresholds, species constants, timing
//! lags — lives here instead of in code, because field campaigns calibrate
//! these numbers per deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{ChannelKind, ChannelRegistry};
use crate::correction::{CorrectionTable, LagCorrection};
use crate::error::{AppResult, PlumeError};
use crate::validation;

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application identity and logging.
    pub application: ApplicationSettings,
    /// Queue and consumer-loop pacing.
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Plume classifier calibration.
    pub detection: DetectionSettings,
    /// Per-species emission-factor calibration constants.
    #[serde(default)]
    pub species: SpeciesSettings,
    /// Instruments feeding the reading queue; also seeds the registry.
    #[serde(default)]
    pub instruments: Vec<InstrumentSettings>,
    /// Per-channel timing corrections; unlisted channels are zero lag.
    #[serde(default)]
    pub corrections: Vec<CorrectionSettings>,
}

/// Application identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Session name, recorded in sink metadata.
    pub name: String,
    /// Log level: trace, debug, info, warn or error.
    pub log_level: String,
}

/// Queue and consumer-loop pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Capacity of the shared reading queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Consumer-loop cadence.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
    /// Bucket retention window, seconds. Also bounds carried-forward
    /// lookback.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: i64,
    /// Age at which a bucket's summary row is emitted, seconds.
    #[serde(default = "default_summary_delay")]
    pub summary_delay_secs: i64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            tick_interval: default_tick_interval(),
            retention_secs: default_retention_secs(),
            summary_delay_secs: default_summary_delay(),
        }
    }
}

/// Plume classifier calibration.
///
/// The thresholds varied across the source analysis's revisions; they are
/// configuration, not constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Name of the reference CO2 detector. Must be a registered CO2
    /// instrument.
    pub primary_instrument: String,
    /// Plume if the 1 s derivative magnitude exceeds this.
    #[serde(default = "default_slope_threshold")]
    pub slope_threshold: f64,
    /// Plume if the value exceeds the window's k-th smallest by this much.
    #[serde(default = "default_neighbor_threshold")]
    pub neighbor_threshold: f64,
    /// Plume if the value exceeds window mean + this many standard
    /// deviations.
    #[serde(default = "default_sd_multiplier")]
    pub sd_multiplier: f64,
    /// Which smallest window value serves as the ambient quantile (1-based).
    #[serde(default = "default_quantile_rank")]
    pub quantile_rank: usize,
    /// Half-width of the statistics window, seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
    /// Bucket age before classification runs, seconds.
    #[serde(default = "default_classify_delay")]
    pub classify_delay_secs: i64,
    /// Bucket age before the de-blip pass runs, seconds.
    #[serde(default = "default_blip_delay")]
    pub blip_delay_secs: i64,
    /// Bucket age before plume-end detection runs, seconds.
    #[serde(default = "default_analyze_delay")]
    pub analyze_delay_secs: i64,
}

/// Per-species emission-factor calibration constants.
///
/// Domain calibration data, not algorithmic: the emission factor for a
/// channel is `constant(kind) * net_area / master_net_area`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesSettings {
    /// CO2 constant (carbon-balance g/kg-fuel convention).
    pub co2: f64,
    /// NOx constant.
    pub nox: f64,
    /// Black-carbon constant.
    pub bc: f64,
}

impl Default for SpeciesSettings {
    fn default() -> Self {
        Self {
            co2: 3160.0,
            nox: 4.64,
            bc: 1.3,
        }
    }
}

impl SpeciesSettings {
    /// Calibration constant for one kind.
    pub fn constant(&self, kind: ChannelKind) -> f64 {
        match kind {
            ChannelKind::Co2 => self.co2,
            ChannelKind::Nox => self.nox,
            ChannelKind::Bc => self.bc,
        }
    }
}

/// How a configured instrument produces readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentMode {
    /// Simulated readings (base level + noise, optional plume injection).
    #[default]
    Mock,
    /// Replay of a recorded per-instrument CSV at the recorded pace.
    Replay,
}

/// One configured instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Instrument name; registry key together with `kind`.
    pub name: String,
    /// Species the instrument reports.
    pub kind: ChannelKind,
    /// Producer mode.
    #[serde(default)]
    pub mode: InstrumentMode,
    /// Mock: ambient base level.
    #[serde(default = "default_mock_base")]
    pub base: f64,
    /// Mock: uniform noise amplitude around the base.
    #[serde(default)]
    pub noise: f64,
    /// Mock: polling interval, milliseconds.
    #[serde(default = "default_mock_interval_ms")]
    pub interval_ms: u64,
    /// Mock: optional periodic plume injection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plume: Option<MockPlumeSettings>,
    /// Replay: path to the recorded CSV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Periodic plume injection for mock instruments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MockPlumeSettings {
    /// Seconds between plume onsets.
    pub period_secs: u64,
    /// Plume duration, seconds.
    pub duration_secs: u64,
    /// Concentration added on top of the base during a plume.
    pub magnitude: f64,
}

/// Timing correction for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSettings {
    /// Instrument the correction applies to.
    pub instrument: String,
    /// Kind the correction applies to.
    pub kind: ChannelKind,
    /// Seconds the channel trails the primary at plume onset.
    #[serde(default)]
    pub start_lag: i64,
    /// Seconds the channel's tail extends past the primary.
    #[serde(default)]
    pub stop_lag: i64,
}

impl Settings {
    /// Load settings from `config/<name>.toml` (default: `config/default`).
    pub fn new(config_name: Option<&str>) -> AppResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = config::Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(PlumeError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(PlumeError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Registry seed derived from the instrument list.
    pub fn registry_seed(&self) -> Vec<(String, ChannelKind)> {
        self.instruments
            .iter()
            .map(|i| (i.name.clone(), i.kind))
            .collect()
    }

    /// Build the correction table, resolving instrument names through the
    /// registry.
    pub fn correction_table(&self, registry: &ChannelRegistry) -> AppResult<CorrectionTable> {
        let mut table = CorrectionTable::new();
        for c in &self.corrections {
            let id = registry.id_of(c.kind, &c.instrument).ok_or_else(|| {
                PlumeError::Configuration(format!(
                    "correction references unknown channel: {} '{}'",
                    c.kind, c.instrument
                ))
            })?;
            table.set(
                c.kind,
                id,
                LagCorrection {
                    start_lag: c.start_lag,
                    stop_lag: c.stop_lag,
                },
            );
        }
        Ok(table)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> AppResult<()> {
        let fail = |field: &str, msg: &str| {
            Err(PlumeError::Configuration(format!("{field}: {msg}")))
        };

        if let Err(e) = validation::is_not_empty(&self.application.name) {
            return fail("application.name", e);
        }
        if self.instruments.is_empty() {
            return fail("instruments", "at least one instrument is required");
        }
        let primary_ok = self.instruments.iter().any(|i| {
            i.kind == ChannelKind::Co2 && i.name == self.detection.primary_instrument
        });
        if !primary_ok {
            return fail(
                "detection.primary_instrument",
                "must name a configured CO2 instrument",
            );
        }

        let d = &self.detection;
        for (field, value) in [
            ("detection.slope_threshold", d.slope_threshold),
            ("detection.neighbor_threshold", d.neighbor_threshold),
            ("detection.sd_multiplier", d.sd_multiplier),
        ] {
            if let Err(e) = validation::is_positive(value) {
                return fail(field, e);
            }
        }
        if let Err(e) = validation::is_in_range(d.quantile_rank, 1..=30) {
            return fail("detection.quantile_rank", e);
        }
        if validation::is_in_range(d.window_secs, 1..=d.classify_delay_secs).is_err() {
            return fail(
                "detection.window_secs",
                "window half-width cannot exceed the classify delay",
            );
        }
        if !(d.classify_delay_secs <= d.blip_delay_secs
            && d.blip_delay_secs <= d.analyze_delay_secs)
        {
            return fail(
                "detection",
                "delays must be ordered: classify <= blip <= analyze",
            );
        }

        let a = &self.acquisition;
        if a.queue_capacity == 0 {
            return fail("acquisition.queue_capacity", "must be greater than zero");
        }
        if a.tick_interval.is_zero() {
            return fail("acquisition.tick_interval", "must be greater than zero");
        }
        if a.retention_secs <= d.analyze_delay_secs {
            return fail(
                "acquisition.retention_secs",
                "retention must exceed the analyze delay",
            );
        }
        if let Err(e) = validation::is_in_range(a.summary_delay_secs, 0..=a.retention_secs) {
            return fail("acquisition.summary_delay_secs", e);
        }

        for i in &self.instruments {
            if let Err(e) = validation::is_not_empty(&i.name) {
                return fail("instruments.name", e);
            }
            if i.mode == InstrumentMode::Replay && i.path.is_none() {
                return fail(
                    "instruments",
                    "replay instruments require a recorded CSV path",
                );
            }
        }

        for c in &self.corrections {
            let known = self
                .instruments
                .iter()
                .any(|i| i.name == c.instrument && i.kind == c.kind);
            if !known {
                return fail("corrections", "entry references an unknown instrument");
            }
            for (field, lag) in [("start_lag", c.start_lag), ("stop_lag", c.stop_lag)] {
                if let Err(e) = validation::is_in_range(lag, 0..=60) {
                    return fail(&format!("corrections.{field}"), e);
                }
            }
        }

        Ok(())
    }
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}
fn default_retention_secs() -> i64 {
    185
}
fn default_summary_delay() -> i64 {
    45
}
fn default_slope_threshold() -> f64 {
    50.0
}
fn default_neighbor_threshold() -> f64 {
    50.0
}
fn default_sd_multiplier() -> f64 {
    3.0
}
fn default_quantile_rank() -> usize {
    3
}
fn default_window_secs() -> i64 {
    30
}
fn default_classify_delay() -> i64 {
    30
}
fn default_blip_delay() -> i64 {
    35
}
fn default_analyze_delay() -> i64 {
    45
}
fn default_mock_base() -> f64 {
    400.0
}
fn default_mock_interval_ms() -> u64 {
    1000
}
