//! Sliding-window plume classification with de-blip correction.
//!
//! The classifier consumes timeline buckets once they are old enough to be
//! stable and decides plume/non-plume per bucket from the primary CO2
//! channel's trailing statistics. Three passes run in timestamp order every
//! consumer cycle:
//!
//! 1. **Classification** (age ≥ classify delay): a bucket is a plume second
//!    when the 1 s derivative is steep, the value stands above the window
//!    mean by several standard deviations, or the value stands above the
//!    window's ambient quantile by the neighbor threshold.
//! 2. **De-blip** (age ≥ blip delay): isolated 1–2 second plume runs
//!    surrounded by background are demoted. Demotion is one-way; nothing is
//!    ever promoted back to plume.
//! 3. **Plume-end detection** (age ≥ analyze delay): a background bucket
//!    whose nearest predecessor is plume closes the run and hands the
//!    boundary to the integrator.
//!
//! Buckets whose statistics window would reach before the start of the
//! session are forced to background; buckets with no primary data anywhere
//! in the lookback stay `Unknown` until history accumulates.

use crate::channel::ChannelKind;
use crate::config::DetectionSettings;
use crate::timeline::{PlumeState, TimelineStore};

/// Stateful per-cycle classification over a [`TimelineStore`].
pub struct PlumeClassifier {
    detection: DetectionSettings,
    lookback: i64,
}

impl PlumeClassifier {
    /// Build a classifier. `lookback` bounds carried-forward searches and is
    /// normally the store's retention window.
    pub fn new(detection: DetectionSettings, lookback: i64) -> Self {
        Self { detection, lookback }
    }

    /// Run all three passes for the current cycle. Returns the plume-end
    /// boundary seconds detected this cycle, ascending.
    pub fn run(&self, store: &mut TimelineStore, now: i64) -> Vec<i64> {
        self.classify(store, now);
        self.deblip(store, now);
        self.detect_plume_ends(store, now)
    }

    /// Carried-forward primary-CO2 value at a second.
    fn primary(&self, store: &TimelineStore, second: i64) -> Option<f64> {
        store.carried_forward(
            second,
            ChannelKind::Co2,
            store.registry().primary_id(),
            self.lookback,
        )
    }

    /// Classification pass: decide `Unknown` buckets old enough to have a
    /// full statistics window on both sides.
    fn classify(&self, store: &mut TimelineStore, now: i64) {
        let d = &self.detection;
        let Some(session_start) = store.session_start() else {
            return;
        };

        let eligible: Vec<i64> = store
            .seconds()
            .filter(|t| now - t >= d.classify_delay_secs)
            .collect();

        for t in eligible {
            if store.bucket(t).map(|b| b.plume) != Some(PlumeState::Unknown) {
                continue;
            }

            // Too close to the start of the session for a trailing window:
            // cannot be classified, non-plume by default.
            if t - d.window_secs < session_start {
                if let Some(bucket) = store.bucket_mut(t) {
                    bucket.plume = PlumeState::NotPlume;
                }
                continue;
            }

            // No primary data within the lookback: defer, don't guess.
            let Some(value) = self.primary(store, t) else {
                continue;
            };
            let Some(next) = self.primary(store, t + 1) else {
                continue;
            };
            let deriv = next - value;

            let window: Vec<f64> = (t - d.window_secs..=t + d.window_secs)
                .filter_map(|s| self.primary(store, s))
                .collect();
            if window.len() < d.quantile_rank {
                continue;
            }

            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let sd = (window.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / window.len() as f64)
                .sqrt();
            let mut sorted = window;
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let quantile = sorted[d.quantile_rank - 1];

            let is_plume = deriv.abs() > d.slope_threshold
                || value > mean + d.sd_multiplier * sd
                || value - quantile > d.neighbor_threshold;

            if let Some(bucket) = store.bucket_mut(t) {
                bucket.plume = if is_plume {
                    PlumeState::Plume
                } else {
                    PlumeState::NotPlume
                };
            }
        }
    }

    /// De-blip pass: demote isolated 1–2 second plume runs.
    fn deblip(&self, store: &mut TimelineStore, now: i64) {
        let d = &self.detection;
        let eligible: Vec<i64> = store
            .seconds()
            .filter(|t| now - t >= d.blip_delay_secs)
            .collect();

        for t in eligible {
            let Some(bucket) = store.bucket(t) else {
                continue;
            };
            if bucket.blip_checked {
                continue;
            }
            // The bucket itself must be decided before its pattern can be.
            if bucket.plume == PlumeState::Unknown {
                continue;
            }
            // An undecided neighbor means the pattern is not final yet;
            // retry next cycle.
            let undecided = (t - 2..=t + 2).any(|s| {
                store
                    .bucket(s)
                    .map(|b| b.plume == PlumeState::Unknown)
                    .unwrap_or(false)
            });
            if undecided {
                continue;
            }

            if bucket.plume == PlumeState::Plume {
                // Missing neighbors (seconds with no readings at all) count
                // as background.
                let plume_at = |s: i64| -> bool {
                    store
                        .bucket(s)
                        .map(|b| b.plume == PlumeState::Plume)
                        .unwrap_or(false)
                };
                let two_before = plume_at(t - 2);
                let before = plume_at(t - 1);
                let after = plume_at(t + 1);
                let two_after = plume_at(t + 2);

                if !before && !after {
                    // 1-second isolated spike.
                    Self::demote(store, t);
                } else if !before && after && !two_after {
                    // 2-second isolated spike; demote both cells.
                    Self::demote(store, t);
                    Self::demote(store, t + 1);
                } else if !after && before && !two_before {
                    Self::demote(store, t);
                    Self::demote(store, t - 1);
                }
            }

            if let Some(bucket) = store.bucket_mut(t) {
                bucket.blip_checked = true;
            }
        }
    }

    fn demote(store: &mut TimelineStore, second: i64) {
        if let Some(bucket) = store.bucket_mut(second) {
            bucket.plume = PlumeState::NotPlume;
        }
    }

    /// Plume-end detection: background buckets whose nearest predecessor is
    /// plume close the run. Each bucket is inspected exactly once.
    fn detect_plume_ends(&self, store: &mut TimelineStore, now: i64) -> Vec<i64> {
        let d = &self.detection;
        let eligible: Vec<i64> = store
            .seconds()
            .filter(|t| now - t >= d.analyze_delay_secs)
            .collect();

        let mut ends = Vec::new();
        for t in eligible {
            let Some(bucket) = store.bucket(t) else {
                continue;
            };
            if bucket.analyzed {
                continue;
            }
            let state = bucket.plume;

            let closes_run = state == PlumeState::NotPlume
                && store
                    .predecessor(t)
                    .and_then(|p| store.bucket(p))
                    .map(|b| b.plume == PlumeState::Plume)
                    .unwrap_or(false);
            if closes_run {
                ends.push(t);
            }

            if let Some(bucket) = store.bucket_mut(t) {
                bucket.analyzed = true;
            }
        }
        ends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;
    use crate::core::Reading;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000;

    fn detection() -> DetectionSettings {
        DetectionSettings {
            primary_instrument: "LI7000".to_string(),
            slope_threshold: 50.0,
            neighbor_threshold: 50.0,
            sd_multiplier: 3.0,
            quantile_rank: 3,
            window_secs: 30,
            classify_delay_secs: 30,
            blip_delay_secs: 35,
            analyze_delay_secs: 45,
        }
    }

    fn store_with(values: &[f64]) -> TimelineStore {
        let registry = Arc::new(
            ChannelRegistry::new(&[("LI7000".to_string(), ChannelKind::Co2)], "LI7000")
                .unwrap(),
        );
        let mut store = TimelineStore::new(registry);
        for (i, v) in values.iter().enumerate() {
            let ts = chrono::DateTime::from_timestamp(T0 + i as i64, 0).unwrap();
            store
                .ingest(&Reading {
                    instrument: "LI7000".to_string(),
                    kind: ChannelKind::Co2,
                    value: *v,
                    timestamp: ts,
                })
                .unwrap();
        }
        store
    }

    fn states(store: &TimelineStore, from: usize, to: usize) -> Vec<PlumeState> {
        (from..to)
            .map(|i| store.bucket(T0 + i as i64).map(|b| b.plume).unwrap())
            .collect()
    }

    #[test]
    fn steady_background_classifies_not_plume() {
        let values = vec![400.0; 120];
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);
        let ends = classifier.run(&mut store, T0 + 120);

        assert!(ends.is_empty());
        for state in states(&store, 31, 80) {
            assert_eq!(state, PlumeState::NotPlume);
        }
    }

    #[test]
    fn session_start_buckets_are_forced_not_plume() {
        // Even an immediate step up cannot be classified statistically in
        // the first window after session start.
        let mut values = vec![900.0; 10];
        values.extend(vec![400.0; 100]);
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);
        classifier.run(&mut store, T0 + 110);

        for state in states(&store, 0, 10) {
            assert_eq!(state, PlumeState::NotPlume);
        }
    }

    #[test]
    fn sustained_spike_is_classified_plume() {
        let mut values = vec![400.0; 50];
        values.extend(vec![900.0; 20]);
        values.extend(vec![400.0; 50]);
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);
        let ends = classifier.run(&mut store, T0 + 120);

        // The middle of the spike run is plume.
        for state in states(&store, 52, 68) {
            assert_eq!(state, PlumeState::Plume);
        }
        // Ambient well before and after is background.
        for state in states(&store, 35, 45) {
            assert_eq!(state, PlumeState::NotPlume);
        }
        // Exactly one closing boundary, at the first background second
        // after the run (the derivative pre-triggers one second early).
        assert_eq!(ends.len(), 1);
        let stop = ends[0];
        assert!((stop - (T0 + 70)).abs() <= 1, "stop {} off", stop);
    }

    #[test]
    fn isolated_one_second_spike_is_demoted() {
        let mut values = vec![400.0; 60];
        values.push(900.0);
        values.extend(vec![400.0; 60]);
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);
        let ends = classifier.run(&mut store, T0 + 121);

        assert!(ends.is_empty(), "de-blip must suppress the event");
        for state in states(&store, 55, 66) {
            assert_eq!(state, PlumeState::NotPlume);
        }
    }

    #[test]
    fn deblip_is_idempotent_and_never_promotes() {
        let mut values = vec![400.0; 60];
        values.push(900.0);
        values.extend(vec![400.0; 60]);
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);
        classifier.run(&mut store, T0 + 121);

        let before = states(&store, 0, 121);
        // Force a second full de-blip pass over the same buckets.
        for t in store.seconds().collect::<Vec<_>>() {
            if let Some(b) = store.bucket_mut(t) {
                b.blip_checked = false;
            }
        }
        classifier.deblip(&mut store, T0 + 121);
        let after = states(&store, 0, 121);

        assert_eq!(before, after);
        assert!(!after.contains(&PlumeState::Plume));
    }

    #[test]
    fn plume_end_detected_once_per_boundary() {
        let mut values = vec![400.0; 50];
        values.extend(vec![900.0; 20]);
        values.extend(vec![400.0; 60]);
        let mut store = store_with(&values);
        let classifier = PlumeClassifier::new(detection(), 185);

        let first = classifier.run(&mut store, T0 + 130);
        assert_eq!(first.len(), 1);
        // Subsequent cycles must not re-detect the same boundary.
        let second = classifier.run(&mut store, T0 + 131);
        assert!(second.is_empty());
    }
}
