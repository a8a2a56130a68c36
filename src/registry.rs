use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::clock::Clock;
pub use crate::stats::BusId;
use crate::stats::{EngineConfig, MetricsSnapshot, WindowStats};

/// One [`WindowStats`] per bus, created on first sight and never removed.
///
/// Capture writes through [`record`](Self::record) while the renderer reads
/// through [`snapshot`](Self::snapshot); each bus has its own lock so the two
/// only contend on the same bus.
pub struct BusRegistry {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    buses: DashMap<BusId, Arc<Mutex<WindowStats>>>,
}

impl BusRegistry {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buses: DashMap::new(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn get_or_create(&self, bus: BusId) -> Arc<Mutex<WindowStats>> {
        if let Some(existing) = self.buses.get(&bus) {
            return Arc::clone(existing.value());
        }
        let mut created = false;
        let stats = self
            .buses
            .entry(bus)
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(WindowStats::new(self.config)))
            })
            .value()
            .clone();
        if created {
            info!(bus, "Tracking new bus");
        }
        stats
    }

    /// Push one sample. Returns `true` if this was the first sample seen on `bus`.
    pub fn record(&self, bus: BusId, timestamp: f64, size: u64) -> bool {
        let stats = self.get_or_create(bus);
        let mut stats = stats.lock();
        let first = stats.total_samples() == 0;
        stats.push(timestamp, size);
        first
    }

    pub fn metrics(&self, bus: BusId) -> Option<MetricsSnapshot> {
        // clone the handle out so the shard lock is gone before the bus lock
        let stats = self.buses.get(&bus).map(|e| Arc::clone(e.value()))?;
        let now = self.clock.now();
        let snap = stats.lock().snapshot(bus, now);
        Some(snap)
    }

    /// Readings for every known bus, ordered by bus id.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        self.buses().into_iter().filter_map(|bus| self.metrics(bus)).collect()
    }

    pub fn buses(&self) -> Vec<BusId> {
        let mut ids: Vec<BusId> = self.buses.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::thread;

    fn registry(clock: Arc<ManualClock>) -> BusRegistry {
        let config = EngineConfig::new(1.0, clock.now()).unwrap();
        BusRegistry::new(config, clock)
    }

    #[test]
    fn creates_bus_on_first_record_only() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(clock);
        assert!(reg.is_empty());
        assert!(reg.record(2, 1.0, 64));
        assert!(!reg.record(2, 1.1, 64));
        assert!(reg.record(1, 1.1, 8));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.buses(), vec![1, 2]);
    }

    #[test]
    fn get_or_create_returns_same_state() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(clock);
        let a = reg.get_or_create(4);
        let b = reg.get_or_create(4);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().total_samples(), 0);
    }

    #[test]
    fn first_record_after_get_or_create_is_reported() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(clock);
        let _ = reg.get_or_create(5);
        assert!(reg.record(5, 1.0, 10));
        assert!(!reg.record(5, 1.1, 10));
    }

    #[test]
    fn snapshot_matches_per_bus_metrics() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(Arc::clone(&clock));
        for (bus, t) in [(7, 1.0), (2, 1.0), (7, 1.5), (2, 1.6)] {
            reg.record(bus, t, 64);
        }
        clock.set(1.6);
        let snaps = reg.snapshot();
        assert_eq!(snaps.iter().map(|s| s.bus).collect::<Vec<_>>(), vec![2, 7]);
        assert_eq!(snaps[0], reg.metrics(2).unwrap());
        assert_eq!(snaps[1], reg.metrics(7).unwrap());
    }

    #[test]
    fn buses_are_independent() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(Arc::clone(&clock));
        reg.record(1, 1.0, 100);
        reg.record(1, 1.5, 100);
        reg.record(2, 1.5, 7);
        clock.set(1.5);

        let snaps = reg.snapshot();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].bus, 1);
        assert_eq!(snaps[0].total_bytes, 200);
        assert!((snaps[0].instant_bandwidth - 400.0).abs() < 1e-9);
        assert_eq!(snaps[1].bus, 2);
        assert_eq!(snaps[1].total_bytes, 7);
        assert_eq!(snaps[1].instant_bandwidth, 0.0);
    }

    #[test]
    fn metrics_reflect_clock_staleness() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = registry(Arc::clone(&clock));
        reg.record(3, 1.0, 100);
        reg.record(3, 1.5, 100);
        clock.set(1.6);
        assert!(reg.metrics(3).unwrap().instant_bandwidth > 0.0);
        clock.set(3.0);
        let m = reg.metrics(3).unwrap();
        assert_eq!(m.instant_bandwidth, 0.0);
        assert_eq!(m.sample_rate, 0.0);
        assert_eq!(m.total_bytes, 200);
        assert!(reg.metrics(9).is_none());
    }

    #[test]
    fn concurrent_writer_and_reader() {
        let clock = Arc::new(ManualClock::new(0.0));
        let reg = Arc::new(registry(clock));

        let writer = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    reg.record((i % 4) as BusId, i as f64 * 0.001, 10);
                }
            })
        };
        let reader = {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..1_000 {
                    for snap in reg.snapshot() {
                        assert!(snap.total_bytes <= 10 * 10_000);
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        let total: u64 = reg.snapshot().iter().map(|s| s.total_bytes).sum();
        assert_eq!(total, 100_000);
        assert_eq!(reg.len(), 4);
    }
}
