//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them and
//! keeps a small in-memory model of the mount table and of which devices
//! carry a filesystem, allowing for CI-safe testing without root privileges.

use super::{FormatOps, MountOps, MountOptions, NetInterface, NetOps, ProbeOps};
use crate::{HalError, HalResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: String,
        options: MountOptions,
    },
    UnmountDetach {
        target: PathBuf,
    },
    MakeFilesystem {
        device: PathBuf,
        fstype: String,
    },
    ProbeSignature {
        device: PathBuf,
    },
    MountSource {
        target: PathBuf,
    },
    NetworkInterfaces,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Mount point -> source device
    mounts: BTreeMap<PathBuf, String>,
    /// Device -> filesystem signature
    signatures: BTreeMap<PathBuf, String>,
    interfaces: Vec<NetInterface>,
    fail_probe: bool,
    fail_format: bool,
    fail_mount: bool,
}

/// Fake HAL implementation that records operations without executing them.
///
/// Clones share state, so a test can hand one copy to the code under test and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
        }
    }

    /// A host whose primary NIC `eth0` is up with the given MAC.
    pub fn with_primary_mac(mac: &str) -> Self {
        let hal = Self::new();
        hal.set_interfaces(vec![
            NetInterface::new("lo", None, true),
            NetInterface::new("eth0", Some(mac), true),
        ]);
        hal
    }

    pub fn set_interfaces(&self, interfaces: Vec<NetInterface>) {
        self.state.lock().unwrap().interfaces = interfaces;
    }

    /// Pretend `device` already carries a filesystem.
    pub fn set_signature(&self, device: impl Into<PathBuf>, signature: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .signatures
            .insert(device.into(), signature.into());
    }

    /// Place an entry in the simulated mount table without recording an operation.
    pub fn set_mount_source(&self, target: impl Into<PathBuf>, source: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .mounts
            .insert(target.into(), source.into());
    }

    pub fn fail_probe(&self, fail: bool) {
        self.state.lock().unwrap().fail_probe = fail;
    }

    pub fn fail_format(&self, fail: bool) {
        self.state.lock().unwrap().fail_format = fail;
    }

    pub fn fail_mount(&self, fail: bool) {
        self.state.lock().unwrap().fail_mount = fail;
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Count recorded operations matching `check`.
    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| check(op))
            .count()
    }

    /// Clear all recorded operations (the simulated mount table is kept).
    pub fn clear(&self) {
        self.state.lock().unwrap().operations.clear();
    }

    fn record_operation(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn injected_failure(program: &str) -> HalError {
        HalError::CommandFailed {
            program: program.to_string(),
            code: Some(1),
            stderr: "injected failure".to_string(),
        }
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: &str,
        options: &MountOptions,
    ) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} (type: {})",
            device.display(),
            target.display(),
            fstype
        );

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.to_string(),
            options: options.clone(),
        });

        let mut state = self.state.lock().unwrap();
        if state.fail_mount {
            return Err(HalError::Nix(nix::errno::Errno::EINVAL));
        }
        state
            .mounts
            .insert(target.to_path_buf(), device.display().to_string());
        Ok(())
    }

    fn unmount_detach(&self, target: &Path) -> HalResult<()> {
        log::info!("FAKE HAL: umount -l {}", target.display());

        self.record_operation(Operation::UnmountDetach {
            target: target.to_path_buf(),
        });

        match self.state.lock().unwrap().mounts.remove(target) {
            Some(_) => Ok(()),
            None => Err(HalError::Nix(nix::errno::Errno::EINVAL)),
        }
    }

    fn mount_source(&self, target: &Path) -> HalResult<Option<String>> {
        self.record_operation(Operation::MountSource {
            target: target.to_path_buf(),
        });
        Ok(self.state.lock().unwrap().mounts.get(target).cloned())
    }
}

impl FormatOps for FakeHal {
    fn make_filesystem(&self, device: &Path, fstype: &str) -> HalResult<()> {
        log::info!("FAKE HAL: mkfs -t {} {}", fstype, device.display());

        self.record_operation(Operation::MakeFilesystem {
            device: device.to_path_buf(),
            fstype: fstype.to_string(),
        });

        let mut state = self.state.lock().unwrap();
        if state.fail_format {
            return Err(Self::injected_failure("mkfs"));
        }
        state
            .signatures
            .insert(device.to_path_buf(), format!("TYPE=\"{}\"", fstype));
        Ok(())
    }
}

impl ProbeOps for FakeHal {
    fn filesystem_signature(&self, device: &Path) -> HalResult<Option<String>> {
        self.record_operation(Operation::ProbeSignature {
            device: device.to_path_buf(),
        });

        let state = self.state.lock().unwrap();
        if state.fail_probe {
            return Err(Self::injected_failure("blkid"));
        }
        Ok(state.signatures.get(device).cloned())
    }
}

impl NetOps for FakeHal {
    fn network_interfaces(&self) -> HalResult<Vec<NetInterface>> {
        self.record_operation(Operation::NetworkInterfaces);
        Ok(self.state.lock().unwrap().interfaces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_hal_records_mount() {
        let hal = FakeHal::new();
        let device = Path::new("/dev/xvdb");
        let target = Path::new("/mnt/test");

        hal.mount_device(device, target, "ext4", &MountOptions::restricted())
            .unwrap();

        assert_eq!(hal.operation_count(), 1);
        assert!(hal.has_operation(|op| matches!(op, Operation::Mount { .. })));
        assert!(hal.is_mounted(target).unwrap());
        assert_eq!(
            hal.mount_source(target).unwrap(),
            Some("/dev/xvdb".to_string())
        );
    }

    #[test]
    fn fake_hal_records_unmount() {
        let hal = FakeHal::new();
        let target = Path::new("/mnt/test");

        hal.mount_device(Path::new("/dev/xvdb"), target, "ext4", &MountOptions::new())
            .unwrap();
        hal.unmount_detach(target).unwrap();

        assert!(hal.has_operation(|op| matches!(op, Operation::UnmountDetach { .. })));
        assert!(!hal.is_mounted(target).unwrap());
    }

    #[test]
    fn fake_hal_unmount_of_unmounted_path_fails() {
        let hal = FakeHal::new();
        assert!(hal.unmount_detach(Path::new("/mnt/none")).is_err());
    }

    #[test]
    fn format_leaves_a_signature() {
        let hal = FakeHal::new();
        let device = Path::new("/dev/xvdc");

        assert_eq!(hal.filesystem_signature(device).unwrap(), None);
        hal.make_filesystem(device, "xfs").unwrap();
        assert_eq!(
            hal.filesystem_signature(device).unwrap(),
            Some("TYPE=\"xfs\"".to_string())
        );
    }

    #[test]
    fn injected_failures_surface() {
        let hal = FakeHal::new();
        hal.fail_probe(true);
        hal.fail_format(true);
        hal.fail_mount(true);

        assert!(hal.filesystem_signature(Path::new("/dev/xvdb")).is_err());
        assert!(hal.make_filesystem(Path::new("/dev/xvdb"), "ext4").is_err());
        assert!(hal
            .mount_device(
                Path::new("/dev/xvdb"),
                Path::new("/mnt/x"),
                "ext4",
                &MountOptions::new()
            )
            .is_err());
        assert!(!hal.is_mounted(Path::new("/mnt/x")).unwrap());
    }

    #[test]
    fn fake_hal_can_clear() {
        let hal = FakeHal::with_primary_mac("aa:bb:cc:dd:ee:ff");
        hal.network_interfaces().unwrap();
        assert_eq!(hal.operation_count(), 1);

        hal.clear();

        assert_eq!(hal.operation_count(), 0);
    }
}
