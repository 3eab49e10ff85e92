//! Filesystem formatting operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for creating filesystems on block devices.
pub trait FormatOps {
    /// Create a filesystem of type `fstype` on `device` (`mkfs -t <fstype> <device>`).
    fn make_filesystem(&self, device: &Path, fstype: &str) -> HalResult<()>;
}
