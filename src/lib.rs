//! # Plume DAQ Core Library
//!
//! This crate is the core of a real-time plume measurement system. Field
//! campaigns point a set of gas/particle analyzers (CO2, NOx and
//! black-carbon channels) at passing emission sources; this library aligns
//! their asynchronous, irregularly-timed readings onto a common one-second
//! timeline, detects transient plume events on the primary CO2 tracer, and
//! integrates per-channel plume areas into emission-factor records.
//!
//! ## Crate Structure
//!
//! The library is organized into modules, each with a distinct
//! responsibility:
//!
//! - **`core`**: Fundamental types and traits — the `Reading` tuple, the
//!   `GasInstrument` capability trait producers implement, and the
//!   `RecordSink` trait results leave through.
//! - **`channel`**: `ChannelKind` and the `ChannelRegistry` assigning stable
//!   integer channel ids at session start.
//! - **`timeline`**: The `TimelineStore` — per-second aggregation buckets,
//!   bounded retention, and carried-forward fill for sparse channels.
//! - **`classifier`**: The sliding-window plume classifier with de-blip
//!   correction and plume-end detection.
//! - **`integrator`**: Plume-area integration with per-channel timing (lag)
//!   correction and emission factors.
//! - **`engine`**: The single consumer loop draining the reading queue on a
//!   fixed cadence and driving the analysis passes.
//! - **`instrument`**: Producer tasks — mock instruments and CSV replay.
//! - **`sink`**: Record sink implementations (in-memory and CSV).
//! - **`config`**: TOML-backed `Settings` with semantic validation.
//! - **`records`**: Output record shapes (summary rows, plume boundaries,
//!   plume areas).
//! - **`correction`**: The per-channel timing-correction table.
//! - **`error`**: The central `PlumeError` type.
//! - **`trace`**: Tracing (structured logging) initialization.
//! - **`validation`**: Small helpers for validating configuration values.

pub mod channel;
pub mod classifier;
pub mod config;
pub mod core;
pub mod correction;
pub mod engine;
pub mod error;
pub mod instrument;
pub mod integrator;
pub mod records;
pub mod sink;
pub mod timeline;
pub mod trace;
pub mod validation;
