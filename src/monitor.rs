use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel as channel;
use tracing::{error, info, warn};

use crate::capture::mock::MockSource;
use crate::capture::replay::ReplaySource;
use crate::capture::usbmon::{list_buses, monitor_path, UsbmonSource};
use crate::capture::{CaptureSource, Sink};
use crate::cli::{Monitor, Output, SourceKind};
use crate::clock::{Clock, MonotonicClock};
use crate::error::CaptureError;
use crate::registry::BusRegistry;
use crate::stats::EngineConfig;
use crate::ui::overview::run_tui;
use crate::ui::plain::run_plain;

pub fn run_monitor(opts: Monitor) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    run_monitor_with_shutdown(opts, stop_flag)
}

fn open_source(opts: &Monitor) -> Result<Box<dyn CaptureSource>> {
    Ok(match opts.source {
        SourceKind::Usbmon => {
            let buses = list_buses(&opts.usbmon_dir)?;
            if buses.is_empty() {
                return Err(CaptureError::NoBuses { dir: opts.usbmon_dir.clone() }.into());
            }
            Box::new(UsbmonSource::open(&monitor_path(&opts.usbmon_dir, &opts.buses))?)
        }
        SourceKind::Replay => {
            let trace = opts.trace.as_deref().context("Replay needs a trace file")?;
            Box::new(ReplaySource::open(trace, opts.speed)?)
        }
        SourceKind::Mock => Box::new(MockSource::new(opts.mock_buses, opts.mock_rate)),
    })
}

pub(crate) fn run_monitor_with_shutdown(opts: Monitor, stop_flag: Arc<AtomicBool>) -> Result<()> {
    opts.validate()?;
    let interval = opts.refresh_interval()?;

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let config = EngineConfig::new(opts.window, clock.now())?;
    let registry = Arc::new(BusRegistry::new(config, clock));

    let mut source = open_source(&opts)?;
    info!(source = source.name(), window = opts.window, interval_ms = opts.interval, "Starting bustop");

    let (event_tx, event_rx) = channel::bounded::<String>(1024);
    let sink = Sink::new(Arc::clone(&registry), Some(opts.buses.clone()), event_tx);

    // Capture thread: sole writer of the per-bus stats
    let stop_capture = stop_flag.clone();
    let capture = thread::spawn(move || -> Result<()> {
        let res = source.run(&sink, &stop_capture);
        if let Err(e) = &res {
            error!(?e, "Capture stopped");
            sink.notify(format!("capture stopped: {e}"));
        }
        res
    });

    let ui_result = match opts.output {
        Output::Tui => run_tui(&registry, interval, event_rx, &stop_flag),
        Output::Plain => run_plain(&registry, false, interval, opts.ticks, event_rx, &stop_flag),
        Output::Json => run_plain(&registry, true, interval, opts.ticks, event_rx, &stop_flag),
    };

    // Shutdown
    info!("Shutting down");
    stop_flag.store(true, Ordering::Relaxed);
    if capture.is_finished() {
        match capture.join() {
            Ok(Err(e)) => warn!(?e, "Capture error on shutdown"),
            Err(_) => warn!("Capture thread panicked"),
            Ok(Ok(())) => {}
        }
    } else {
        // a blocking usbmon read only returns on the next URB
        info!("Capture thread still blocked, leaving it to process exit");
    }

    ui_result
}
