//! Mock instrument for testing without physical hardware.
//!
//! Emits a configurable ambient base level with uniform noise, paced by an
//! async sleep the way real readers are paced by their serial lines. An
//! optional periodic plume injection raises the level for a fixed window so
//! full plume events can be exercised end to end.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::channel::ChannelKind;
use crate::config::{InstrumentSettings, MockPlumeSettings};
use crate::core::{GasInstrument, Reading};

/// Simulated gas instrument.
pub struct MockInstrument {
    name: String,
    kind: ChannelKind,
    base: f64,
    noise: f64,
    interval: Duration,
    plume: Option<MockPlumeSettings>,
    started: Instant,
}

impl MockInstrument {
    /// Create a mock emitting `base ± noise` every `interval`.
    pub fn new(
        name: impl Into<String>,
        kind: ChannelKind,
        base: f64,
        noise: f64,
        interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            base,
            noise,
            interval,
            plume: None,
            started: Instant::now(),
        }
    }

    /// Add a periodic plume injection on top of the base level.
    pub fn with_plume(mut self, plume: MockPlumeSettings) -> Self {
        self.plume = Some(plume);
        self
    }

    /// Build from a configuration entry.
    pub fn from_settings(settings: &InstrumentSettings) -> Self {
        let mut mock = Self::new(
            settings.name.clone(),
            settings.kind,
            settings.base,
            settings.noise,
            Duration::from_millis(settings.interval_ms),
        );
        mock.plume = settings.plume;
        mock
    }

    fn current_value(&self) -> f64 {
        let mut value = self.base;
        if let Some(p) = self.plume {
            if p.period_secs > 0 {
                let elapsed = self.started.elapsed().as_secs();
                if elapsed % p.period_secs < p.duration_secs {
                    value += p.magnitude;
                }
            }
        }
        if self.noise > 0.0 {
            value += rand::thread_rng().gen_range(-self.noise..self.noise);
        }
        value
    }
}

#[async_trait]
impl GasInstrument for MockInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn read_one(&mut self) -> anyhow::Result<Option<Reading>> {
        sleep(self.interval).await;
        Ok(Some(Reading::now(
            self.name.clone(),
            self.kind,
            self.current_value(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emits_base_level_without_noise() {
        let mut mock = MockInstrument::new(
            "LI7000",
            ChannelKind::Co2,
            400.0,
            0.0,
            Duration::from_millis(1),
        );
        let reading = mock.read_one().await.unwrap().unwrap();
        assert_eq!(reading.instrument, "LI7000");
        assert!((reading.value - 400.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn noise_stays_within_amplitude() {
        let mut mock = MockInstrument::new(
            "SBA5",
            ChannelKind::Co2,
            400.0,
            5.0,
            Duration::from_millis(1),
        );
        for _ in 0..20 {
            let reading = mock.read_one().await.unwrap().unwrap();
            assert!(reading.value > 395.0 && reading.value < 405.0);
        }
    }

    #[tokio::test]
    async fn plume_injection_raises_the_level() {
        let mut mock = MockInstrument::new(
            "LI7000",
            ChannelKind::Co2,
            400.0,
            0.0,
            Duration::from_millis(1),
        )
        .with_plume(MockPlumeSettings {
            period_secs: 3600,
            duration_secs: 3600,
            magnitude: 500.0,
        });
        // The injection window covers the whole period, so the first read
        // is already inside a plume.
        let reading = mock.read_one().await.unwrap().unwrap();
        assert!((reading.value - 900.0).abs() < 1e-9);
    }
}
