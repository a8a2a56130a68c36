pub mod format;
pub mod overview;
pub mod plain;

use std::collections::HashMap;
use std::path::PathBuf;

use crate::capture::usbmon::{bus_description, SYSFS_USB_DEVICES};
use crate::registry::BusId;

/// Root hub names looked up once per bus.
pub struct BusLabels {
    sysfs: PathBuf,
    cache: HashMap<BusId, String>,
}

impl BusLabels {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from(SYSFS_USB_DEVICES))
    }

    pub fn with_root(sysfs: PathBuf) -> Self {
        Self { sysfs, cache: HashMap::new() }
    }

    pub fn label(&mut self, bus: BusId) -> &str {
        let sysfs = &self.sysfs;
        self.cache.entry(bus).or_insert_with(|| match bus_description(sysfs, bus) {
            Some(desc) => format!("Bus {bus} ({desc})"),
            None => format!("Bus {bus}"),
        })
    }
}

impl Default for BusLabels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_uses_root_hub_product() {
        let root = std::env::temp_dir().join(format!("bustop-sysfs-{}", std::process::id()));
        std::fs::create_dir_all(root.join("usb2")).unwrap();
        std::fs::write(root.join("usb2").join("product"), "xHCI Host Controller\n").unwrap();

        let mut labels = BusLabels::with_root(root.clone());
        let two = labels.label(2).to_string();
        let three = labels.label(3).to_string();
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(two, "Bus 2 (xHCI Host Controller)");
        assert_eq!(three, "Bus 3");
    }
}
