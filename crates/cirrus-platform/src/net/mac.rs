//! MAC address discovery from sysfs

use crate::error::{Result, ResultExt};
use crate::system::FileSystem;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Maps lowercase MAC addresses to interface names
pub trait MacAddressDetector: Send + Sync {
    fn detect_mac_addresses(&self) -> Result<BTreeMap<String, String>>;
}

/// Reads `/sys/class/net/*/address` for interfaces backed by a device.
///
/// Entries without a `device` child (loopback, bridges, veths) are skipped.
pub struct SysfsMacAddressDetector {
    fs: Arc<dyn FileSystem>,
    sys_class_net: PathBuf,
}

impl SysfsMacAddressDetector {
    pub fn new(fs: Arc<dyn FileSystem>, sys_class_net: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            sys_class_net: sys_class_net.into(),
        }
    }
}

impl MacAddressDetector for SysfsMacAddressDetector {
    fn detect_mac_addresses(&self) -> Result<BTreeMap<String, String>> {
        let entries = self
            .fs
            .list_dir(&self.sys_class_net)
            .context("Listing network interfaces")?;

        let mut interfaces = BTreeMap::new();
        for entry in entries {
            if !self.fs.file_exists(&entry.join("device")) {
                continue;
            }
            let Some(name) = entry.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let mac = self
                .fs
                .read_file_string(&entry.join("address"))
                .with_context(|| format!("Reading MAC address of '{}'", name))?
                .trim()
                .to_lowercase();
            debug!(interface = %name, mac = %mac, "Detected network interface");
            interfaces.insert(mac, name);
        }

        Ok(interfaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeFileSystem;

    #[test]
    fn test_detects_physical_interfaces() {
        let fs = Arc::new(FakeFileSystem::new());
        fs.add_network_device("/sys/class/net", "eth0", "AA:BB:CC:DD:EE:01");
        fs.add_network_device("/sys/class/net", "eth1", "aa:bb:cc:dd:ee:02");
        fs.add_virtual_device("/sys/class/net", "lo", "00:00:00:00:00:00");

        let found = SysfsMacAddressDetector::new(fs, "/sys/class/net")
            .detect_mac_addresses()
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["aa:bb:cc:dd:ee:01"], "eth0");
        assert_eq!(found["aa:bb:cc:dd:ee:02"], "eth1");
    }

    #[test]
    fn test_missing_sysfs_is_an_error() {
        let fs = Arc::new(FakeFileSystem::new());
        assert!(SysfsMacAddressDetector::new(fs, "/sys/class/net")
            .detect_mac_addresses()
            .is_err());
    }
}
