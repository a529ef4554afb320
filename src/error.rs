//! Custom error types for the application.
//!
//! This module defines the primary error type, `PlumeError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from I/O and configuration issues to data-quality problems during plume
//! integration.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from the `config` crate, typically related to
//!   file parsing or format issues in the configuration files.
//! - **`Configuration`**: Semantic errors in the configuration, such as
//!   values that parse but are logically invalid (e.g., a primary detector
//!   that is not a registered CO2 instrument). Caught during validation.
//! - **`Io`**: Wraps standard `std::io::Error`, covering file I/O issues.
//! - **`UnknownChannel`**: A reading arrived for a `(kind, instrument)` pair
//!   that was never registered. The channel registry is fixed at session
//!   start, so this indicates a misconfigured producer.
//! - **`DataQuality`**: A bounded carried-forward lookup found no data while
//!   integrating a plume event. Fatal to that event only; the consumer loop
//!   reports it and keeps going.
//! - **`Sink`**: Failures in the persistence collaborator.
//! - **`QueueClosed`**: A producer observed that the consumer side of the
//!   reading queue is gone.
//!
//! Transient sparsity is *not* an error: missing per-second data is carried
//! as `Option::None` and classification starvation is handled by deferral.

use crate::channel::ChannelKind;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PlumeError>;

/// Central application error type.
#[derive(Error, Debug)]
pub enum PlumeError {
    /// Configuration file could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading for a channel the registry does not know.
    #[error("Unknown channel: {kind} instrument '{instrument}'")]
    UnknownChannel {
        /// Channel kind of the offending reading.
        kind: ChannelKind,
        /// Instrument name of the offending reading.
        instrument: String,
    },

    /// Bounded backward search exhausted during plume integration.
    #[error("Data quality error on {kind} channel {channel_id} at t={timestamp}: {reason}")]
    DataQuality {
        /// Channel kind of the failing lookup.
        kind: ChannelKind,
        /// Registry channel id of the failing lookup.
        channel_id: usize,
        /// Second (unix time) the lookup started from.
        timestamp: i64,
        /// What could not be computed.
        reason: String,
    },

    /// Persistence collaborator failure.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The reading queue consumer is gone.
    #[error("Reading queue closed")]
    QueueClosed,

    /// Functionality compiled out via feature flags.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
