//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for mounting and unmounting filesystems.
pub trait MountOps {
    /// Mount a device to a target path.
    ///
    /// # Arguments
    /// * `device` - Device path (e.g., `/dev/xvdb`)
    /// * `target` - Mount point path
    /// * `fstype` - Filesystem type (e.g., `"ext4"`)
    /// * `options` - Mount flags
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: &str,
        options: &MountOptions,
    ) -> HalResult<()>;

    /// Lazily detach a mount point, even if it is still busy.
    fn unmount_detach(&self, target: &Path) -> HalResult<()>;

    /// Source of the filesystem mounted exactly at `target`, if any.
    ///
    /// When mounts are stacked on the same path, the topmost one wins.
    fn mount_source(&self, target: &Path) -> HalResult<Option<String>>;

    /// Check if a path is currently a mount point.
    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.mount_source(path)?.is_some())
    }
}

/// Mount flags applied by `mount_device`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub read_only: bool,
    pub noexec: bool,
    pub nosuid: bool,
    pub nodev: bool,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// No executables, no setuid binaries, no device nodes.
    pub fn restricted() -> Self {
        Self {
            noexec: true,
            nosuid: true,
            nodev: true,
            ..Self::default()
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
