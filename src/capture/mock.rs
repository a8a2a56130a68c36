use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::info;

use crate::capture::{CaptureSource, Sink};
use crate::registry::BusId;

const TICK: Duration = Duration::from_millis(10);

/// Upper bound for the nominal rate, packets per second.
pub const MAX_MOCK_RATE: f64 = 1_000_000.0;

/// Synthetic traffic for running without usbmon access.
///
/// Bus `n` (1-based) alternates between a busy phase and silence over a
/// period of `n + 2` seconds, so the display shows bursts, decay to zero and
/// recovery. Packet sizes cycle through full-speed bulk sizes.
pub struct MockSource {
    buses: u16,
    rate: f64,
    counter: u64,
}

impl MockSource {
    pub fn new(buses: u16, rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, MAX_MOCK_RATE) } else { 0.0 };
        Self { buses: buses.max(1), rate, counter: 0 }
    }

    /// Packets bus `bus` emits during the tick ending `elapsed` seconds in.
    pub fn packets_due(&self, bus: BusId, elapsed: f64) -> u64 {
        let period = f64::from(bus) + 2.0;
        let phase = elapsed % period;
        // busy for the first two thirds of each period
        if phase >= period * 2.0 / 3.0 {
            return 0;
        }
        let per_tick = self.rate * TICK.as_secs_f64() / f64::from(bus);
        let whole = per_tick.floor();
        // carry the fractional part by spreading it over ticks
        let ticks = (elapsed / TICK.as_secs_f64()).round() as u64;
        let frac = per_tick - whole;
        let extra = if frac > 0.0 && (ticks as f64 * frac).fract() < frac { 1 } else { 0 };
        whole as u64 + extra
    }

    fn next_size(&mut self) -> u64 {
        self.counter += 1;
        [64, 512, 13, 4096, 8, 1024][(self.counter % 6) as usize]
    }

    /// Emit one tick's worth of packets.
    pub fn step(&mut self, sink: &Sink, elapsed: f64) {
        for bus in 1..=self.buses {
            for _ in 0..self.packets_due(bus, elapsed) {
                let size = self.next_size();
                sink.record(bus, size);
            }
        }
    }
}

impl CaptureSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn run(&mut self, sink: &Sink, stop: &AtomicBool) -> Result<()> {
        info!(buses = self.buses, rate = self.rate, "Generating mock traffic");
        let started = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            std::thread::sleep(TICK);
            self.step(sink, started.elapsed().as_secs_f64());
        }
        Ok(())
    }
}
