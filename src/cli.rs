use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::capture::mock::MAX_MOCK_RATE;
use crate::capture::usbmon::DEFAULT_USBMON_DIR;
use crate::error::ConfigError;
use crate::registry::BusId;
use crate::stats::DEFAULT_WINDOW_WIDTH;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List USB buses visible to usbmon
    Buses {
        /// usbmon debugfs directory
        #[arg(long, default_value = DEFAULT_USBMON_DIR)]
        usbmon_dir: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
    /// Show live per-bus bandwidth
    Monitor(Monitor),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Live capture from the usbmon text interface
    Usbmon,
    /// Replay a saved usbmon trace
    Replay,
    /// Synthetic traffic
    Mock,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    Tui,
    Plain,
    Json,
}

#[derive(Parser, Clone, Debug)]
pub struct Monitor {
    /// Where samples come from
    #[arg(long, value_enum, default_value_t = SourceKind::Usbmon)]
    pub source: SourceKind,

    /// Sliding window width in seconds
    #[arg(long, default_value_t = DEFAULT_WINDOW_WIDTH)]
    pub window: f64,

    /// Refresh interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval: u64,

    /// Only show these buses (repeatable)
    #[arg(long = "bus")]
    pub buses: Vec<BusId>,

    /// Display mode
    #[arg(long, value_enum, default_value_t = Output::Tui)]
    pub output: Output,

    /// Stop after this many refreshes (plain and json output only)
    #[arg(long)]
    pub ticks: Option<u64>,

    /// usbmon debugfs directory
    #[arg(long, default_value = DEFAULT_USBMON_DIR)]
    pub usbmon_dir: PathBuf,

    /// Trace file for --source replay
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Replay speed multiplier
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Number of buses for --source mock
    #[arg(long, default_value_t = 2)]
    pub mock_buses: u16,

    /// Nominal packets per second for --source mock
    #[arg(long, default_value_t = 800.0)]
    pub mock_rate: f64,
}

impl Monitor {
    pub fn refresh_interval(&self) -> Result<Duration, ConfigError> {
        if self.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(Duration::from_millis(self.interval))
    }

    /// Checks that don't depend on the engine config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.refresh_interval()?;
        if self.source == SourceKind::Replay {
            if self.trace.is_none() {
                return Err(ConfigError::MissingTrace);
            }
            if !self.speed.is_finite() || self.speed <= 0.0 {
                return Err(ConfigError::InvalidSpeed(self.speed));
            }
        }
        if self.source == SourceKind::Mock
            && !(self.mock_rate.is_finite() && self.mock_rate > 0.0 && self.mock_rate <= MAX_MOCK_RATE)
        {
            return Err(ConfigError::InvalidMockRate { rate: self.mock_rate, max: MAX_MOCK_RATE });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(args: &[&str]) -> Monitor {
        let mut argv = vec!["bustop", "monitor"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Commands::Monitor(m)) => m,
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn monitor_defaults() {
        let m = monitor(&[]);
        assert_eq!(m.source, SourceKind::Usbmon);
        assert_eq!(m.window, 1.0);
        assert_eq!(m.refresh_interval().unwrap(), Duration::from_secs(1));
        assert_eq!(m.output, Output::Tui);
        assert!(m.buses.is_empty());
        assert!(m.validate().is_ok());
    }

    #[test]
    fn repeated_bus_filter() {
        let m = monitor(&["--bus", "1", "--bus", "3", "--output", "json", "--ticks", "2"]);
        assert_eq!(m.buses, vec![1, 3]);
        assert_eq!(m.output, Output::Json);
        assert_eq!(m.ticks, Some(2));
    }

    #[test]
    fn replay_needs_trace() {
        let m = monitor(&["--source", "replay"]);
        assert_eq!(m.validate(), Err(ConfigError::MissingTrace));
        let m = monitor(&["--source", "replay", "--trace", "t.txt", "--speed", "0"]);
        assert_eq!(m.validate(), Err(ConfigError::InvalidSpeed(0.0)));
        let m = monitor(&["--source", "replay", "--trace", "t.txt"]);
        assert!(m.validate().is_ok());
    }

    #[test]
    fn mock_rate_must_be_finite_and_bounded() {
        for rate in ["inf", "0", "-5", "NaN", "1e12"] {
            let arg = format!("--mock-rate={rate}");
            let m = monitor(&["--source", "mock", &arg]);
            assert!(
                matches!(m.validate(), Err(ConfigError::InvalidMockRate { .. })),
                "rate {rate} accepted"
            );
        }
        assert!(monitor(&["--source", "mock", "--mock-rate", "5000"]).validate().is_ok());
        // only checked when the mock source is in use
        assert!(monitor(&["--mock-rate", "inf"]).validate().is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let m = monitor(&["--interval", "0"]);
        assert_eq!(m.validate(), Err(ConfigError::InvalidInterval));
    }

    #[test]
    fn log_file_is_global() {
        let cli = Cli::try_parse_from(["bustop", "buses", "--log-file", "/tmp/x.log"]).unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/x.log")));
    }
}
