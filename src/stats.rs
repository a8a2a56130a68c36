//! Sliding-window traffic statistics for a single bus.
//!
//! Running totals are exact after every push. Window eviction and the cached
//! instant metrics are only recomputed once the incoming timestamp has moved
//! [`RECOMPUTE_INTERVAL`] past the previous recompute, so readings may trail
//! the true window boundary by that much.

use std::collections::VecDeque;

use serde::Serialize;

use crate::error::ConfigError;

/// USB bus number.
pub type BusId = u16;

pub const DEFAULT_WINDOW_WIDTH: f64 = 1.0;

/// Minimum timestamp progress between two window compactions, in seconds.
pub const RECOMPUTE_INTERVAL: f64 = 0.2;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    pub timestamp: f64,
    pub size: u64,
}

/// Process-wide engine settings, fixed at startup and copied into every bus.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineConfig {
    window_width: f64,
    start_timestamp: f64,
}

impl EngineConfig {
    pub fn new(window_width: f64, start_timestamp: f64) -> Result<Self, ConfigError> {
        if !window_width.is_finite() || window_width <= 0.0 {
            return Err(ConfigError::InvalidWindow(window_width));
        }
        Ok(Self { window_width, start_timestamp })
    }

    pub fn window_width(&self) -> f64 {
        self.window_width
    }

    /// Epoch for mean bandwidth. Shared by all buses, not per first observation.
    pub fn start_timestamp(&self) -> f64 {
        self.start_timestamp
    }
}

/// Accumulator for one bus.
///
/// Timestamps passed to [`push`](Self::push) must be non-decreasing. This is
/// not checked here; out-of-order input leaves the window metrics meaningless
/// but never corrupts the lifetime totals.
#[derive(Debug)]
pub struct WindowStats {
    config: EngineConfig,
    total_samples: u64,
    total_bytes: u64,
    window_bytes: u64,
    window: VecDeque<Sample>,
    last_recompute: f64,
    last_push: Option<f64>,
    last_instant_bandwidth: f64,
    last_instant_sample_rate: f64,
}

impl WindowStats {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            total_samples: 0,
            total_bytes: 0,
            window_bytes: 0,
            window: VecDeque::with_capacity(256),
            last_recompute: 0.0,
            last_push: None,
            last_instant_bandwidth: 0.0,
            last_instant_sample_rate: 0.0,
        }
    }

    pub fn push(&mut self, timestamp: f64, size: u64) {
        self.total_samples += 1;
        self.total_bytes += size;
        self.window_bytes += size;
        self.window.push_back(Sample { timestamp, size });
        self.last_push = Some(timestamp);

        if timestamp < self.last_recompute + RECOMPUTE_INTERVAL {
            return;
        }
        self.last_recompute = timestamp;
        self.evict_before(timestamp - self.config.window_width);
        self.recompute(timestamp);
    }

    fn evict_before(&mut self, first_ts: f64) {
        while let Some(front) = self.window.front() {
            if front.timestamp >= first_ts {
                break;
            }
            self.window_bytes -= front.size;
            self.window.pop_front();
        }
    }

    fn recompute(&mut self, timestamp: f64) {
        // the sample just pushed is always still in the window
        let oldest = match self.window.front() {
            Some(s) => s.timestamp,
            None => timestamp,
        };
        let span = timestamp - oldest;
        if oldest == timestamp || span <= 0.0 {
            self.last_instant_bandwidth = 0.0;
            self.last_instant_sample_rate = 0.0;
        } else {
            self.last_instant_bandwidth = self.window_bytes as f64 / span;
            self.last_instant_sample_rate = self.window.len() as f64 / span;
        }
    }

    fn is_stale(&self, now: f64) -> bool {
        match self.last_push {
            Some(t) => now >= t + self.config.window_width,
            None => true,
        }
    }

    /// Bytes per second over the window, or 0 once a full window has passed
    /// without traffic.
    pub fn instant_bandwidth(&self, now: f64) -> f64 {
        if self.is_stale(now) {
            return 0.0;
        }
        self.last_instant_bandwidth
    }

    /// Packets per second over the window. Same staleness rule as
    /// [`instant_bandwidth`](Self::instant_bandwidth).
    pub fn sample_rate(&self, now: f64) -> f64 {
        if self.is_stale(now) {
            return 0.0;
        }
        self.last_instant_sample_rate
    }

    /// Lifetime bytes per second since the engine epoch. 0 until some time
    /// has elapsed between the epoch and the last push.
    pub fn mean_bandwidth(&self) -> f64 {
        let Some(last) = self.last_push else {
            return 0.0;
        };
        let elapsed = last - self.config.start_timestamp();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / elapsed
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    #[cfg(test)]
    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    #[cfg(test)]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    #[cfg(test)]
    pub fn window(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.window.iter()
    }

    #[cfg(test)]
    pub fn last_push_timestamp(&self) -> Option<f64> {
        self.last_push
    }

    pub fn snapshot(&self, bus: BusId, now: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            bus,
            instant_bandwidth: self.instant_bandwidth(now),
            mean_bandwidth: self.mean_bandwidth(),
            sample_rate: self.sample_rate(now),
            total_bytes: self.total_bytes(),
            total_samples: self.total_samples(),
        }
    }
}

/// Point-in-time readings for one bus, as handed to the renderer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub bus: BusId,
    pub instant_bandwidth: f64,
    pub mean_bandwidth: f64,
    pub sample_rate: f64,
    pub total_bytes: u64,
    pub total_samples: u64,
}
