use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::Receiver;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Modifier, Style},
    widgets::{Block, Borders, List, ListItem, Paragraph, Row, Table},
    Terminal,
};

use crate::registry::BusRegistry;
use crate::stats::MetricsSnapshot;
use crate::ui::format::{bytes_to_string, rate_to_string};
use crate::ui::BusLabels;

const MAX_EVENTS: usize = 100;

pub fn table_rows(snaps: &[MetricsSnapshot], labels: &mut BusLabels) -> Vec<[String; 6]> {
    snaps
        .iter()
        .map(|s| {
            [
                labels.label(s.bus).to_string(),
                rate_to_string(s.instant_bandwidth),
                rate_to_string(s.mean_bandwidth),
                format!("{:.0}", s.sample_rate),
                bytes_to_string(s.total_bytes as f64),
                s.total_samples.to_string(),
            ]
        })
        .collect()
}

pub fn run_tui(
    registry: &BusRegistry,
    interval: Duration,
    events: Receiver<String>,
    stop: &AtomicBool,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut labels = BusLabels::new();
    let mut logs: Vec<String> = Vec::new();
    let mut paused = false;
    let mut snaps = registry.snapshot();
    let mut last_refresh = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        while let Ok(ev) = events.try_recv() {
            logs.push(ev);
            if logs.len() > MAX_EVENTS {
                logs.remove(0);
            }
        }

        if !paused && last_refresh.elapsed() >= interval {
            snaps = registry.snapshot();
            last_refresh = Instant::now();
        }
        let rows = table_rows(&snaps, &mut labels);

        terminal.draw(|f| {
            let outer = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Min(5),     // Buses
                    Constraint::Length(7),  // Events
                    Constraint::Length(1),  // Footer
                ].as_ref())
                .split(f.size());

            let header = Row::new(["Bus", "Instant", "Mean", "Packets/s", "Total", "Packets"])
                .style(Style::default().add_modifier(Modifier::BOLD));
            let body: Vec<Row> = rows.iter().map(|r| Row::new(r.clone())).collect();
            let widths = [
                Constraint::Min(20),
                Constraint::Length(16),
                Constraint::Length(16),
                Constraint::Length(10),
                Constraint::Length(14),
                Constraint::Length(12),
            ];
            let title = if registry.is_empty() {
                "Buses | waiting for traffic".to_string()
            } else {
                format!(
                    "Buses ({}) | window {:.1}s{}",
                    registry.len(),
                    registry.config().window_width(),
                    if paused { " | paused" } else { "" }
                )
            };
            let table = Table::new(body, widths)
                .header(header)
                .block(Block::default().title(title).borders(Borders::ALL));
            f.render_widget(table, outer[0]);

            let viewport = outer[1].height.saturating_sub(2) as usize;
            let start = logs.len().saturating_sub(viewport);
            let log_items: Vec<ListItem> = logs.iter().skip(start).map(|l| ListItem::new(l.clone())).collect();
            let log_list = List::new(log_items).block(Block::default().title("Events").borders(Borders::ALL));
            f.render_widget(log_list, outer[1]);

            let footer = Paragraph::new("q: quit | p: pause/resume | c: clear events");
            f.render_widget(footer, outer[2]);
        })?;

        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') => stop.store(true, Ordering::Relaxed),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        stop.store(true, Ordering::Relaxed)
                    }
                    KeyCode::Char('c') => logs.clear(),
                    KeyCode::Char('p') => paused = !paused,
                    _ => {}
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rows_format_every_column() {
        let mut labels = BusLabels::with_root(PathBuf::from("/nonexistent"));
        let snaps = [MetricsSnapshot {
            bus: 1,
            instant_bandwidth: 1536.0,
            mean_bandwidth: 0.0,
            sample_rate: 99.6,
            total_bytes: 2 * 1024 * 1024,
            total_samples: 7,
        }];
        let rows = table_rows(&snaps, &mut labels);
        assert_eq!(
            rows,
            vec![[
                "Bus 1".to_string(),
                "1.50 KiB/s".to_string(),
                "0.00 B/s".to_string(),
                "100".to_string(),
                "2.00 MiB".to_string(),
                "7".to_string(),
            ]]
        );
    }
}
