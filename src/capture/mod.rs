pub mod mock;
pub mod replay;
pub mod usbmon;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Sender;
use tracing::debug;

use crate::registry::{BusId, BusRegistry};

/// Producer of `(bus, size)` observations, run on its own thread until `stop`.
pub trait CaptureSource: Send {
    fn name(&self) -> &'static str;
    fn run(&mut self, sink: &Sink, stop: &AtomicBool) -> Result<()>;
}

/// Where capture sources deliver samples. Stamps each one with the registry
/// clock so push timestamps and read-side staleness share a timeline.
pub struct Sink {
    registry: Arc<BusRegistry>,
    filter: Option<Vec<BusId>>,
    events: Sender<String>,
}

impl Sink {
    pub fn new(registry: Arc<BusRegistry>, filter: Option<Vec<BusId>>, events: Sender<String>) -> Self {
        let filter = filter.filter(|f| !f.is_empty());
        Self { registry, filter, events }
    }

    pub fn accepts(&self, bus: BusId) -> bool {
        match &self.filter {
            Some(list) => list.contains(&bus),
            None => true,
        }
    }

    pub fn record(&self, bus: BusId, size: u64) {
        if !self.accepts(bus) {
            return;
        }
        let now = self.registry.now();
        if self.registry.record(bus, now, size) {
            self.notify(format!("bus {bus} appeared"));
        }
    }

    /// Best effort: the renderer may already be gone.
    pub fn notify(&self, msg: String) {
        if self.events.try_send(msg).is_err() {
            debug!("Event channel closed or full");
        }
    }
}
