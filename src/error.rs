use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("window width must be a positive number of seconds, got {0}")]
    InvalidWindow(f64),
    #[error("refresh interval must be at least 1 ms")]
    InvalidInterval,
    #[error("replay speed must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error("mock rate must be between 0 and {max} packets/s, got {rate}")]
    InvalidMockRate { rate: f64, max: f64 },
    #[error("--source replay requires --trace <FILE>")]
    MissingTrace,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("usbmon not available at {}: is the usbmon module loaded and debugfs mounted?", dir.display())]
    UsbmonUnavailable { dir: PathBuf },
    #[error("permission denied opening {}: usbmon requires root", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("no USB buses found under {}", dir.display())]
    NoBuses { dir: PathBuf },
    #[error("cannot read trace file {}", path.display())]
    Trace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line has {0} fields, expected at least 6")]
    TooShort(usize),
    #[error("bad timestamp {0:?}")]
    Timestamp(String),
    #[error("unknown event type {0:?}")]
    EventKind(String),
    #[error("bad address {0:?}")]
    Address(String),
    #[error("missing or bad data length")]
    Length,
}
