//! Per-channel timing (lag) correction.
//!
//! Different instruments see the same physical plume at different times —
//! sample lines, flow rates and detector response all add lag relative to
//! the primary detector. The correction table shifts plume boundaries per
//! channel before integration so that no channel is ever integrated against
//! another channel's clock. Lags are per-instrument-model calibration
//! constants set once at startup.

use std::collections::HashMap;

use crate::channel::ChannelKind;

/// Start/stop lag for one channel, in whole seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LagCorrection {
    /// Seconds the channel's plume onset trails the primary detector.
    pub start_lag: i64,
    /// Seconds the channel's plume tail extends past the primary detector.
    pub stop_lag: i64,
}

/// Lookup table from `(kind, channel id)` to lag correction.
///
/// Channels without an entry use zero lag; the primary detector is zero by
/// convention. Read-only during operation.
#[derive(Clone, Debug, Default)]
pub struct CorrectionTable {
    lags: HashMap<(ChannelKind, usize), LagCorrection>,
}

impl CorrectionTable {
    /// Empty table: every channel at zero lag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lag for one channel.
    pub fn set(&mut self, kind: ChannelKind, channel_id: usize, lag: LagCorrection) {
        self.lags.insert((kind, channel_id), lag);
    }

    /// Lag for one channel, zero when unconfigured.
    pub fn get(&self, kind: ChannelKind, channel_id: usize) -> LagCorrection {
        self.lags
            .get(&(kind, channel_id))
            .copied()
            .unwrap_or_default()
    }

    /// Shift plume boundaries onto this channel's clock:
    /// `(start - start_lag, stop + stop_lag)`.
    pub fn correct(
        &self,
        start: i64,
        stop: i64,
        kind: ChannelKind,
        channel_id: usize,
    ) -> (i64, i64) {
        let lag = self.get(kind, channel_id);
        (start - lag.start_lag, stop + lag.stop_lag)
    }
}
