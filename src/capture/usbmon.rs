//! Linux usbmon text interface (`/sys/kernel/debug/usb/usbmon/<N>u`).
//!
//! A line looks like
//! `ffff88003b6d1a80 2824379313 C Bi:2:003:1 0 8 = 00000000 00000000`:
//! URB tag, timestamp in microseconds, event type, address
//! (`<type><dir>:<bus>:<device>:<endpoint>`), status or setup packet,
//! optional isochronous descriptors, then the data length.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::{CaptureSource, Sink};
use crate::error::{CaptureError, ParseError};
use crate::registry::BusId;

pub const DEFAULT_USBMON_DIR: &str = "/sys/kernel/debug/usb/usbmon";
pub const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Submission,
    Callback,
    Error,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Interrupt,
    Bulk,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsbmonEvent {
    pub timestamp_us: u64,
    pub kind: EventKind,
    pub transfer: TransferType,
    pub direction: Direction,
    pub bus: BusId,
    pub device: u8,
    pub endpoint: u8,
    pub length: u64,
}

impl UsbmonEvent {
    /// Payload actually moved by this event: OUT data travels with the
    /// submission, IN data with the callback.
    pub fn payload(&self) -> Option<u64> {
        match (self.kind, self.direction) {
            (EventKind::Submission, Direction::Out) | (EventKind::Callback, Direction::In) => Some(self.length),
            _ => None,
        }
    }
}

pub fn parse_line(line: &str) -> Result<UsbmonEvent, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(ParseError::TooShort(fields.len()));
    }

    let timestamp_us = fields[1]
        .parse::<u64>()
        .map_err(|_| ParseError::Timestamp(fields[1].to_string()))?;
    let kind = match fields[2] {
        "S" => EventKind::Submission,
        "C" => EventKind::Callback,
        "E" => EventKind::Error,
        other => return Err(ParseError::EventKind(other.to_string())),
    };
    let (transfer, direction, bus, device, endpoint) = parse_address(fields[3])?;

    let mut idx = 4;
    if fields[idx] == "s" {
        // bmRequestType bRequest wValue wIndex wLength
        idx += 6;
    } else {
        idx += 1;
        if transfer == TransferType::Isochronous {
            let count: usize = fields.get(idx).and_then(|f| f.parse().ok()).ok_or(ParseError::Length)?;
            idx += 1 + count.min(5);
        }
    }
    let length = fields
        .get(idx)
        .and_then(|f| f.parse::<u64>().ok())
        .ok_or(ParseError::Length)?;

    Ok(UsbmonEvent {
        timestamp_us,
        kind,
        transfer,
        direction,
        bus,
        device,
        endpoint,
        length,
    })
}

fn parse_address(addr: &str) -> Result<(TransferType, Direction, BusId, u8, u8), ParseError> {
    let bad = || ParseError::Address(addr.to_string());
    let mut parts = addr.split(':');
    let head = parts.next().ok_or_else(bad)?;
    let mut chars = head.chars();
    let transfer = match chars.next() {
        Some('C') => TransferType::Control,
        Some('Z') => TransferType::Isochronous,
        Some('I') => TransferType::Interrupt,
        Some('B') => TransferType::Bulk,
        _ => return Err(bad()),
    };
    let direction = match chars.next() {
        Some('i') => Direction::In,
        Some('o') => Direction::Out,
        _ => return Err(bad()),
    };
    let bus = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let device = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let endpoint = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok((transfer, direction, bus, device, endpoint))
}

#[derive(Clone, Debug, Serialize)]
pub struct BusInfo {
    pub bus: BusId,
    pub description: Option<String>,
}

/// Buses exposed by usbmon, excluding the `0u` all-buses pseudo entry.
pub fn list_buses(dir: &Path) -> Result<Vec<BusId>, CaptureError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied { path: dir.to_path_buf() },
        _ => CaptureError::UsbmonUnavailable { dir: dir.to_path_buf() },
    })?;
    let mut buses: Vec<BusId> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().into_string().ok()?;
            name.strip_suffix('u')?.parse::<BusId>().ok()
        })
        .filter(|bus| *bus != 0)
        .collect();
    buses.sort_unstable();
    buses.dedup();
    Ok(buses)
}

/// Root hub product string, e.g. "xHCI Host Controller".
pub fn bus_description(sysfs: &Path, bus: BusId) -> Option<String> {
    let path = sysfs.join(format!("usb{bus}")).join("product");
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn describe_buses(usbmon_dir: &Path) -> Result<Vec<BusInfo>, CaptureError> {
    let sysfs = Path::new(SYSFS_USB_DEVICES);
    Ok(list_buses(usbmon_dir)?
        .into_iter()
        .map(|bus| BusInfo { bus, description: bus_description(sysfs, bus) })
        .collect())
}

/// usbmon node to read: a single bus if exactly one is requested, else all.
pub fn monitor_path(dir: &Path, filter: &[BusId]) -> PathBuf {
    match filter {
        [one] => dir.join(format!("{one}u")),
        _ => dir.join("0u"),
    }
}

pub struct UsbmonSource {
    reader: Box<dyn BufRead + Send>,
    follow: bool,
    malformed: u64,
}

impl UsbmonSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => CaptureError::PermissionDenied { path: path.to_path_buf() },
            _ => CaptureError::UsbmonUnavailable {
                dir: path.parent().unwrap_or(path).to_path_buf(),
            },
        })?;
        info!(path = %path.display(), "Opened usbmon");
        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            follow: true,
            malformed: 0,
        })
    }

    /// Reads until EOF instead of waiting for more lines.
    #[cfg(test)]
    pub fn from_reader(reader: Box<dyn BufRead + Send>) -> Self {
        Self { reader, follow: false, malformed: 0 }
    }

    #[cfg(test)]
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

/// Next line with invalid UTF-8 replaced, or `None` at EOF.
pub(crate) fn next_line(reader: &mut dyn BufRead, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

impl CaptureSource for UsbmonSource {
    fn name(&self) -> &'static str {
        "usbmon"
    }

    fn run(&mut self, sink: &Sink, stop: &AtomicBool) -> Result<()> {
        let mut buf = Vec::with_capacity(256);
        while !stop.load(Ordering::Relaxed) {
            let Some(line) = next_line(&mut *self.reader, &mut buf).context("Reading usbmon")? else {
                if !self.follow {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
                continue;
            };
            match parse_line(&line) {
                Ok(ev) => {
                    if let Some(size) = ev.payload() {
                        sink.record(ev.bus, size);
                    }
                }
                Err(e) => {
                    self.malformed += 1;
                    debug!(?e, line = line.trim_end(), "Skipping usbmon line");
                    if self.malformed == 1 {
                        warn!("Malformed usbmon output, further lines logged at debug");
                        sink.notify(format!("usbmon: {e}"));
                    }
                }
            }
        }
        info!(malformed = self.malformed, "usbmon capture stopped");
        Ok(())
    }
}
