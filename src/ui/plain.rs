use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{Clear, ClearType},
};
use serde::Serialize;

use crate::clock::sleep_unless_stopped;
use crate::registry::BusRegistry;
use crate::stats::MetricsSnapshot;
use crate::ui::format::rate_to_string;
use crate::ui::BusLabels;

const EVENT_LINES: usize = 5;

pub fn render_text(snaps: &[MetricsSnapshot], labels: &mut BusLabels) -> String {
    let mut out = String::new();
    if snaps.is_empty() {
        out.push_str("Waiting for traffic...\n");
        return out;
    }
    for s in snaps {
        out.push_str(labels.label(s.bus));
        out.push_str(":\n");
        out.push_str(&format!(
            "  {:>16} {:>16} {:>12}\n",
            "instant", "mean", "packets/s"
        ));
        out.push_str(&format!(
            "  {:>16} {:>16} {:>12.0}\n",
            rate_to_string(s.instant_bandwidth),
            rate_to_string(s.mean_bandwidth),
            s.sample_rate
        ));
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct Frame<'a> {
    time: f64,
    buses: &'a [MetricsSnapshot],
}

pub fn render_json(time: f64, snaps: &[MetricsSnapshot]) -> Result<String> {
    Ok(serde_json::to_string(&Frame { time, buses: snaps })?)
}

/// Refresh loop for the non-interactive outputs.
pub fn run_plain(
    registry: &BusRegistry,
    json: bool,
    interval: Duration,
    ticks: Option<u64>,
    events: Receiver<String>,
    stop: &AtomicBool,
) -> Result<()> {
    let mut labels = BusLabels::new();
    let mut recent: Vec<String> = Vec::new();
    let mut stdout = std::io::stdout();
    let mut tick: u64 = 0;

    while sleep_unless_stopped(interval, stop) {
        recent.extend(events.try_iter());
        if recent.len() > EVENT_LINES {
            recent.drain(..recent.len() - EVENT_LINES);
        }

        let snaps = registry.snapshot();
        if json {
            writeln!(stdout, "{}", render_json(registry.now(), &snaps)?)?;
        } else {
            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
            write!(stdout, "{}", render_text(&snaps, &mut labels))?;
            for ev in &recent {
                writeln!(stdout, "* {ev}")?;
            }
        }
        stdout.flush()?;

        tick += 1;
        if ticks.is_some_and(|n| tick >= n) {
            break;
        }
    }
    Ok(())
}
