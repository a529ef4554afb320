//! The timeline store: per-second aggregation of multi-channel readings.
//!
//! Absorbs an unordered stream of [`Reading`]s and organizes them by
//! second-resolution timestamp and channel. The store is owned and mutated
//! exclusively by the consumer loop — the reading queue is the only
//! synchronization point in the system, so no locking happens here.
//!
//! Buckets are created lazily on first reading arrival, live for a bounded
//! retention window and are then evicted. Within a bucket, the order of
//! values does not matter — only the set of values contributes to the mean.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::channel::{ChannelKind, ChannelRegistry};
use crate::core::Reading;
use crate::error::{AppResult, PlumeError};

/// Classification state of one bucket.
///
/// Explicit three-value enumeration rather than a nullable boolean, so state
/// handling is exhaustively matched. Transitions only move forward:
/// `Unknown → Plume | NotPlume`, and `Plume → NotPlume` through the de-blip
/// pass. Nothing ever promotes `NotPlume → Plume`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlumeState {
    /// Not yet classified (insufficient age or history).
    Unknown,
    /// Classified as part of a plume.
    Plume,
    /// Classified as ambient background.
    NotPlume,
}

/// One second of aggregated readings across all channels.
#[derive(Clone, Debug)]
pub struct Bucket {
    /// Raw values observed this second, indexed by kind then channel id.
    values: [Vec<Vec<f64>>; 3],
    /// Plume classification result.
    pub plume: PlumeState,
    /// Whether the de-blip correction has run on this bucket.
    pub blip_checked: bool,
    /// Whether plume-close handling has run for this bucket as an end
    /// boundary.
    pub analyzed: bool,
    /// Whether the per-second summary row has been emitted.
    pub written: bool,
}

impl Bucket {
    fn new(registry: &ChannelRegistry) -> Self {
        let values = [
            vec![Vec::new(); registry.count(ChannelKind::Co2)],
            vec![Vec::new(); registry.count(ChannelKind::Nox)],
            vec![Vec::new(); registry.count(ChannelKind::Bc)],
        ];
        Self {
            values,
            plume: PlumeState::Unknown,
            blip_checked: false,
            analyzed: false,
            written: false,
        }
    }

    fn push(&mut self, kind: ChannelKind, channel_id: usize, value: f64) {
        self.values[kind.index()][channel_id].push(value);
    }

    /// Raw values observed this second for one channel.
    pub fn values(&self, kind: ChannelKind, channel_id: usize) -> &[f64] {
        &self.values[kind.index()][channel_id]
    }

    /// Arithmetic mean of the values observed this second for one channel,
    /// or `None` when the channel has no readings. An empty list is never
    /// conflated with a real zero reading.
    pub fn average(&self, kind: ChannelKind, channel_id: usize) -> Option<f64> {
        let vs = self.values(kind, channel_id);
        if vs.is_empty() {
            None
        } else {
            Some(vs.iter().sum::<f64>() / vs.len() as f64)
        }
    }
}

/// Ordered map from unix second to aggregation bucket.
pub struct TimelineStore {
    buckets: BTreeMap<i64, Bucket>,
    registry: Arc<ChannelRegistry>,
    session_start: Option<i64>,
}

impl TimelineStore {
    /// Create an empty store over the given registry.
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            buckets: BTreeMap::new(),
            registry,
            session_start: None,
        }
    }

    /// The registry this store indexes channels against.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// First second ever ingested, if any. Buckets whose trailing window
    /// would reach before this boundary cannot be classified statistically.
    pub fn session_start(&self) -> Option<i64> {
        self.session_start
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the store holds no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Absorb one reading.
    ///
    /// Floors the timestamp to its second, lazily creates the bucket with
    /// per-channel lists sized from the registry, and appends the value.
    /// Safe to call with readings arriving out of strict time order.
    pub fn ingest(&mut self, reading: &Reading) -> AppResult<()> {
        let channel_id = self
            .registry
            .id_of(reading.kind, &reading.instrument)
            .ok_or_else(|| PlumeError::UnknownChannel {
                kind: reading.kind,
                instrument: reading.instrument.clone(),
            })?;

        let second = reading.second();
        self.session_start = Some(match self.session_start {
            Some(s) => s.min(second),
            None => second,
        });

        let registry = &self.registry;
        self.buckets
            .entry(second)
            .or_insert_with(|| Bucket::new(registry))
            .push(reading.kind, channel_id, reading.value);
        Ok(())
    }

    /// Remove buckets older than `max_age` seconds before `now`.
    ///
    /// Keys to delete are snapshotted before any mutation, so the pass never
    /// iterates a map it is removing from. Returns the number of evicted
    /// buckets.
    pub fn evict_older_than(&mut self, now: i64, max_age: i64) -> usize {
        let cutoff = now - max_age;
        let stale: Vec<i64> = self.buckets.range(..cutoff).map(|(t, _)| *t).collect();
        for t in &stale {
            self.buckets.remove(t);
        }
        stale.len()
    }

    /// Bucket at an exact second, if one exists.
    pub fn bucket(&self, second: i64) -> Option<&Bucket> {
        self.buckets.get(&second)
    }

    /// Mutable bucket at an exact second, if one exists.
    pub fn bucket_mut(&mut self, second: i64) -> Option<&mut Bucket> {
        self.buckets.get_mut(&second)
    }

    /// Seconds of all live buckets, ascending.
    pub fn seconds(&self) -> impl Iterator<Item = i64> + '_ {
        self.buckets.keys().copied()
    }

    /// The greatest bucket second strictly before `second`.
    pub fn predecessor(&self, second: i64) -> Option<i64> {
        self.buckets.range(..second).next_back().map(|(t, _)| *t)
    }

    /// Per-second average for one channel, or `None` when the second has no
    /// bucket or the channel observed nothing.
    pub fn average(&self, second: i64, kind: ChannelKind, channel_id: usize) -> Option<f64> {
        self.bucket(second)?.average(kind, channel_id)
    }

    /// Last value carried forward: walk backward second-by-second from
    /// `second` until a bucket with data for the channel is found, and
    /// return its average.
    ///
    /// The walk is bounded to `max_lookback` seconds; a channel that never
    /// produced data within the bound yields `None`, which callers surface
    /// as a data-quality condition rather than fabricating a value.
    pub fn carried_forward(
        &self,
        second: i64,
        kind: ChannelKind,
        channel_id: usize,
        max_lookback: i64,
    ) -> Option<f64> {
        for s in (second - max_lookback..=second).rev() {
            if let Some(avg) = self.average(s, kind, channel_id) {
                return Some(avg);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;
    use chrono::TimeZone;

    fn registry() -> Arc<ChannelRegistry> {
        Arc::new(
            ChannelRegistry::new(
                &[
                    ("LI7000".to_string(), ChannelKind::Co2),
                    ("SBA5".to_string(), ChannelKind::Co2),
                    ("CAPS".to_string(), ChannelKind::Nox),
                ],
                "LI7000",
            )
            .unwrap(),
        )
    }

    fn reading(second: i64, millis: u32, instrument: &str, kind: ChannelKind, value: f64) -> Reading {
        let ts = chrono::Utc
            .timestamp_opt(second, millis * 1_000_000)
            .single()
            .unwrap();
        Reading {
            instrument: instrument.to_string(),
            kind,
            value,
            timestamp: ts,
        }
    }

    #[test]
    fn ingest_floors_to_second_and_groups_values() {
        let mut store = TimelineStore::new(registry());
        store
            .ingest(&reading(1000, 100, "LI7000", ChannelKind::Co2, 400.0))
            .unwrap();
        store
            .ingest(&reading(1000, 900, "LI7000", ChannelKind::Co2, 410.0))
            .unwrap();
        store
            .ingest(&reading(1001, 0, "LI7000", ChannelKind::Co2, 420.0))
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.average(1000, ChannelKind::Co2, 0), Some(405.0));
        assert_eq!(store.average(1001, ChannelKind::Co2, 0), Some(420.0));
    }

    #[test]
    fn ingest_is_order_independent() {
        let seconds = [1003_i64, 1000, 1002, 1000, 1001];
        let values = [3.0, 1.0, 9.0, 2.0, 5.0];

        let mut forward = TimelineStore::new(registry());
        let mut backward = TimelineStore::new(registry());
        for (s, v) in seconds.iter().zip(values.iter()) {
            forward
                .ingest(&reading(*s, 0, "LI7000", ChannelKind::Co2, *v))
                .unwrap();
        }
        for (s, v) in seconds.iter().zip(values.iter()).rev() {
            backward
                .ingest(&reading(*s, 0, "LI7000", ChannelKind::Co2, *v))
                .unwrap();
        }

        for s in 1000..=1003 {
            assert_eq!(
                forward.average(s, ChannelKind::Co2, 0),
                backward.average(s, ChannelKind::Co2, 0)
            );
        }
        assert_eq!(forward.average(1000, ChannelKind::Co2, 0), Some(1.5));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let mut store = TimelineStore::new(registry());
        let err = store.ingest(&reading(1000, 0, "MA300", ChannelKind::Bc, 2.0));
        assert!(matches!(err, Err(PlumeError::UnknownChannel { .. })));
    }

    #[test]
    fn average_is_none_for_empty_channel_never_zero() {
        let mut store = TimelineStore::new(registry());
        store
            .ingest(&reading(1000, 0, "LI7000", ChannelKind::Co2, 0.0))
            .unwrap();
        // A real zero reading averages to zero...
        assert_eq!(store.average(1000, ChannelKind::Co2, 0), Some(0.0));
        // ...while a channel with no data is None.
        assert_eq!(store.average(1000, ChannelKind::Co2, 1), None);
        assert_eq!(store.average(1000, ChannelKind::Nox, 0), None);
    }

    #[test]
    fn eviction_removes_exactly_the_stale_buckets() {
        let mut store = TimelineStore::new(registry());
        for s in 0..10 {
            store
                .ingest(&reading(s, 0, "LI7000", ChannelKind::Co2, s as f64))
                .unwrap();
        }
        store.bucket_mut(7).unwrap().plume = PlumeState::Plume;

        // now = 190: buckets with age > 185 are seconds 0..5.
        let evicted = store.evict_older_than(190, 185);
        assert_eq!(evicted, 5);
        assert!(store.bucket(4).is_none());
        assert!(store.bucket(5).is_some());
        // Survivors keep values and flags unchanged.
        assert_eq!(store.average(7, ChannelKind::Co2, 0), Some(7.0));
        assert_eq!(store.bucket(7).unwrap().plume, PlumeState::Plume);
    }

    #[test]
    fn carried_forward_walks_back_over_gaps() {
        let mut store = TimelineStore::new(registry());
        store
            .ingest(&reading(1000, 0, "SBA5", ChannelKind::Co2, 415.0))
            .unwrap();
        // Unrelated bucket at 1003 with no SBA5 data.
        store
            .ingest(&reading(1003, 0, "LI7000", ChannelKind::Co2, 400.0))
            .unwrap();

        assert_eq!(
            store.carried_forward(1005, ChannelKind::Co2, 1, 185),
            Some(415.0)
        );
    }

    #[test]
    fn carried_forward_is_bounded() {
        let mut store = TimelineStore::new(registry());
        store
            .ingest(&reading(1000, 0, "LI7000", ChannelKind::Co2, 400.0))
            .unwrap();

        assert_eq!(
            store.carried_forward(1010, ChannelKind::Co2, 0, 5),
            None,
            "data older than the bound must not be found"
        );
        assert_eq!(store.carried_forward(1010, ChannelKind::Co2, 0, 10), Some(400.0));
        // A channel with no data at all terminates at the bound.
        assert_eq!(store.carried_forward(1010, ChannelKind::Nox, 0, 185), None);
    }

    #[test]
    fn predecessor_finds_nearest_earlier_bucket() {
        let mut store = TimelineStore::new(registry());
        for s in [1000_i64, 1001, 1005] {
            store
                .ingest(&reading(s, 0, "LI7000", ChannelKind::Co2, 1.0))
                .unwrap();
        }
        assert_eq!(store.predecessor(1005), Some(1001));
        assert_eq!(store.predecessor(1001), Some(1000));
        assert_eq!(store.predecessor(1000), None);
    }
}
