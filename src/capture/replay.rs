use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::capture::usbmon::{next_line, parse_line};
use crate::capture::{CaptureSource, Sink};
use crate::clock::sleep_unless_stopped;
use crate::error::CaptureError;

/// Replays a saved usbmon text trace at the pace of its own timestamps.
pub struct ReplaySource {
    reader: Box<dyn BufRead + Send>,
    speed: f64,
    replayed: u64,
}

impl ReplaySource {
    pub fn open(path: &Path, speed: f64) -> Result<Self, CaptureError> {
        let file = File::open(path).map_err(|source| CaptureError::Trace {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), speed, "Replaying trace");
        Ok(Self::from_reader(Box::new(BufReader::new(file)), speed))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>, speed: f64) -> Self {
        Self { reader, speed, replayed: 0 }
    }

    #[cfg(test)]
    pub fn replayed(&self) -> u64 {
        self.replayed
    }
}

/// How long to wait before emitting an event `offset_us` into the trace,
/// given `elapsed` wall time since replay started.
pub fn pace_delay(offset_us: u64, speed: f64, elapsed: Duration) -> Duration {
    let target = Duration::try_from_secs_f64(offset_us as f64 / 1e6 / speed).unwrap_or(Duration::MAX);
    target.saturating_sub(elapsed)
}

impl CaptureSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn run(&mut self, sink: &Sink, stop: &AtomicBool) -> Result<()> {
        let started = Instant::now();
        let mut base_us: Option<u64> = None;
        let mut buf = Vec::with_capacity(256);
        while !stop.load(Ordering::Relaxed) {
            let Some(line) = next_line(&mut *self.reader, &mut buf).context("Reading trace")? else {
                break;
            };
            let ev = match parse_line(&line) {
                Ok(ev) => ev,
                Err(e) => {
                    debug!(?e, "Skipping trace line");
                    continue;
                }
            };
            let base = *base_us.get_or_insert(ev.timestamp_us);
            let delay = pace_delay(ev.timestamp_us.saturating_sub(base), self.speed, started.elapsed());
            if !sleep_unless_stopped(delay, stop) {
                break;
            }
            if let Some(size) = ev.payload() {
                sink.record(ev.bus, size);
                self.replayed += 1;
            }
        }
        info!(replayed = self.replayed, "Replay finished");
        sink.notify(format!("replay finished ({} samples)", self.replayed));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use crossbeam_channel as channel;

    use crate::clock::ManualClock;
    use crate::registry::BusRegistry;
    use crate::stats::EngineConfig;

    #[test]
    fn pace_delay_scales_with_speed() {
        assert_eq!(pace_delay(2_000_000, 1.0, Duration::ZERO), Duration::from_secs(2));
        assert_eq!(pace_delay(2_000_000, 2.0, Duration::ZERO), Duration::from_secs(1));
        assert_eq!(pace_delay(2_000_000, 1.0, Duration::from_millis(500)), Duration::from_millis(1500));
        // behind schedule: emit immediately
        assert_eq!(pace_delay(1_000, 1.0, Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn pace_delay_saturates_on_tiny_speed() {
        assert_eq!(pace_delay(1_000_000, 1e-300, Duration::ZERO), Duration::MAX);
        assert_eq!(pace_delay(0, 1e-300, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn invalid_utf8_line_does_not_end_replay() {
        let mut trace = b"a 1000 C Bi:1:002:1 0 50 = 00\n".to_vec();
        trace.extend_from_slice(b"\xff junk\n");
        trace.extend_from_slice(b"a 1500 C Bi:1:002:1 0 70 = 00\n");
        let clock = Arc::new(ManualClock::new(1.0));
        let reg = Arc::new(BusRegistry::new(EngineConfig::new(1.0, 0.0).unwrap(), clock));
        let (tx, _rx) = channel::unbounded();
        let sink = Sink::new(Arc::clone(&reg), None, tx);
        let mut src = ReplaySource::from_reader(Box::new(Cursor::new(trace)), 1000.0);

        src.run(&sink, &AtomicBool::new(false)).unwrap();

        assert_eq!(src.replayed(), 2);
        assert_eq!(reg.metrics(1).unwrap().total_bytes, 120);
    }

    #[test]
    fn replays_trace_into_registry() {
        // 1ms of trace time at 1000x is effectively instant
        let trace = "\
a 1000 S Bo:1:002:2 -115 100 = 00\n\
a 1500 C Bi:1:002:1 0 50 = 00\n\
a 1800 C Bi:4:002:1 0 25 = 00\n\
a 2000 E Bo:1:002:2 -71 0\n";
        let clock = Arc::new(ManualClock::new(1.0));
        let reg = Arc::new(BusRegistry::new(EngineConfig::new(1.0, 0.0).unwrap(), clock));
        let (tx, rx) = channel::unbounded();
        let sink = Sink::new(Arc::clone(&reg), None, tx);
        let mut src = ReplaySource::from_reader(Box::new(Cursor::new(trace.as_bytes().to_vec())), 1000.0);

        src.run(&sink, &AtomicBool::new(false)).unwrap();

        assert_eq!(src.replayed(), 3);
        assert_eq!(reg.metrics(1).unwrap().total_bytes, 150);
        assert_eq!(reg.metrics(4).unwrap().total_bytes, 25);
        assert!(rx.try_iter().any(|m| m.starts_with("replay finished")));
    }

    #[test]
    fn stop_flag_halts_replay() {
        let trace = "a 0 C Bi:1:002:1 0 5 = 00\na 60000000 C Bi:1:002:1 0 5 = 00\n";
        let clock = Arc::new(ManualClock::new(1.0));
        let reg = Arc::new(BusRegistry::new(EngineConfig::new(1.0, 0.0).unwrap(), clock));
        let (tx, _rx) = channel::unbounded();
        let sink = Sink::new(Arc::clone(&reg), None, tx);
        let mut src = ReplaySource::from_reader(Box::new(Cursor::new(trace.as_bytes().to_vec())), 1.0);
        let stop = AtomicBool::new(true);

        src.run(&sink, &stop).unwrap();

        assert_eq!(src.replayed(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn missing_trace_file_is_typed() {
        let err = ReplaySource::open(Path::new("/nonexistent/trace.txt"), 1.0).err().unwrap();
        assert!(matches!(err, CaptureError::Trace { .. }));
    }
}
