//! Channel kinds and the channel registry.
//!
//! Every reading belongs to a *channel*: a `(ChannelKind, instrument)` pair.
//! The registry assigns each pair a stable small integer id at session start,
//! in first-seen order per kind, and is read-only afterwards. All per-channel
//! storage in the timeline is indexed by `(kind, channel id)`, so channel ids
//! must never depend on the order readings happen to arrive in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{AppResult, PlumeError};

/// The measured species a channel reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelKind {
    /// Carbon dioxide, reported in ppm. The plume tracer.
    Co2,
    /// Nitrogen oxides, reported in ppb.
    Nox,
    /// Black carbon, reported in µg/m³.
    Bc,
}

impl ChannelKind {
    /// All kinds, in canonical storage order.
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Co2, ChannelKind::Nox, ChannelKind::Bc];

    /// Canonical storage index for this kind.
    pub fn index(self) -> usize {
        match self {
            ChannelKind::Co2 => 0,
            ChannelKind::Nox => 1,
            ChannelKind::Bc => 2,
        }
    }

    /// Display unit for values of this kind.
    pub fn unit(self) -> &'static str {
        match self {
            ChannelKind::Co2 => "ppm",
            ChannelKind::Nox => "ppb",
            ChannelKind::Bc => "ug/m3",
        }
    }

    /// Uppercase short name, as used in configuration and output records.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Co2 => "CO2",
            ChannelKind::Nox => "NOX",
            ChannelKind::Bc => "BC",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered channel, as enumerated by [`ChannelRegistry::channels`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEntry {
    /// Species kind.
    pub kind: ChannelKind,
    /// Stable id within the kind.
    pub id: usize,
    /// Instrument name.
    pub instrument: String,
}

/// Mapping from `(kind, instrument)` to stable channel ids.
///
/// Built once at session start from the configured instrument list; queried
/// by every component that indexes per-channel data. Replaces implicit
/// insertion-order indices so ids stay stable when instruments connect in a
/// different order than configured.
#[derive(Clone, Debug)]
pub struct ChannelRegistry {
    ids: HashMap<(ChannelKind, String), usize>,
    names: [Vec<String>; 3],
    primary_id: usize,
    primary_instrument: String,
}

impl ChannelRegistry {
    /// Build the registry from the known instrument list.
    ///
    /// `primary` names the reference CO2 detector against which plume timing
    /// and emission factors are normalized. It must appear in `seed` with
    /// kind CO2.
    pub fn new(seed: &[(String, ChannelKind)], primary: &str) -> AppResult<Self> {
        let mut ids = HashMap::new();
        let mut names: [Vec<String>; 3] = [Vec::new(), Vec::new(), Vec::new()];

        for (name, kind) in seed {
            let key = (*kind, name.clone());
            if ids.contains_key(&key) {
                return Err(PlumeError::Configuration(format!(
                    "duplicate instrument '{name}' for kind {kind}"
                )));
            }
            let id = names[kind.index()].len();
            names[kind.index()].push(name.clone());
            ids.insert(key, id);
        }

        let primary_id = ids
            .get(&(ChannelKind::Co2, primary.to_string()))
            .copied()
            .ok_or_else(|| {
                PlumeError::Configuration(format!(
                    "primary instrument '{primary}' is not a registered CO2 instrument"
                ))
            })?;

        Ok(Self {
            ids,
            names,
            primary_id,
            primary_instrument: primary.to_string(),
        })
    }

    /// Channel id for a `(kind, instrument)` pair, if registered.
    pub fn id_of(&self, kind: ChannelKind, instrument: &str) -> Option<usize> {
        self.ids.get(&(kind, instrument.to_string())).copied()
    }

    /// Number of channels registered for a kind.
    pub fn count(&self, kind: ChannelKind) -> usize {
        self.names[kind.index()].len()
    }

    /// Instrument name behind a channel id.
    pub fn name_of(&self, kind: ChannelKind, id: usize) -> Option<&str> {
        self.names[kind.index()].get(id).map(String::as_str)
    }

    /// Channel id of the primary CO2 detector.
    pub fn primary_id(&self) -> usize {
        self.primary_id
    }

    /// Instrument name of the primary CO2 detector.
    pub fn primary_instrument(&self) -> &str {
        &self.primary_instrument
    }

    /// All registered channels in canonical order (kind order, then id).
    pub fn channels(&self) -> Vec<ChannelEntry> {
        let mut out = Vec::new();
        for kind in ChannelKind::ALL {
            for (id, name) in self.names[kind.index()].iter().enumerate() {
                out.push(ChannelEntry {
                    kind,
                    id,
                    instrument: name.clone(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> Vec<(String, ChannelKind)> {
        vec![
            ("LI7000".to_string(), ChannelKind::Co2),
            ("SBA5".to_string(), ChannelKind::Co2),
            ("CAPS".to_string(), ChannelKind::Nox),
            ("AE33".to_string(), ChannelKind::Bc),
        ]
    }

    #[test]
    fn ids_assigned_in_first_seen_order_per_kind() {
        let reg = ChannelRegistry::new(&seed(), "LI7000").unwrap();
        assert_eq!(reg.id_of(ChannelKind::Co2, "LI7000"), Some(0));
        assert_eq!(reg.id_of(ChannelKind::Co2, "SBA5"), Some(1));
        assert_eq!(reg.id_of(ChannelKind::Nox, "CAPS"), Some(0));
        assert_eq!(reg.id_of(ChannelKind::Bc, "AE33"), Some(0));
        assert_eq!(reg.count(ChannelKind::Co2), 2);
        assert_eq!(reg.count(ChannelKind::Nox), 1);
    }

    #[test]
    fn unknown_pairs_are_none() {
        let reg = ChannelRegistry::new(&seed(), "LI7000").unwrap();
        assert_eq!(reg.id_of(ChannelKind::Co2, "CAPS"), None);
        assert_eq!(reg.id_of(ChannelKind::Nox, "LI7000"), None);
        assert_eq!(reg.name_of(ChannelKind::Bc, 5), None);
    }

    #[test]
    fn primary_must_be_registered_co2() {
        let err = ChannelRegistry::new(&seed(), "CAPS");
        assert!(matches!(err, Err(PlumeError::Configuration(_))));
    }

    #[test]
    fn duplicate_instrument_rejected() {
        let mut s = seed();
        s.push(("LI7000".to_string(), ChannelKind::Co2));
        assert!(ChannelRegistry::new(&s, "LI7000").is_err());
    }

    #[test]
    fn channels_enumerate_in_canonical_order() {
        let reg = ChannelRegistry::new(&seed(), "SBA5").unwrap();
        let chans = reg.channels();
        assert_eq!(chans.len(), 4);
        assert_eq!(chans[0].instrument, "LI7000");
        assert_eq!(chans[1].instrument, "SBA5");
        assert_eq!(chans[2].kind, ChannelKind::Nox);
        assert_eq!(reg.primary_id(), 1);
    }
}
