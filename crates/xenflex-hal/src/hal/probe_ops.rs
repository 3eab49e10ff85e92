//! Device probing operations (blkid).

use crate::HalResult;
use std::path::Path;

/// Probing operations trait.
pub trait ProbeOps {
    /// Return the filesystem signature found on `device`.
    ///
    /// `Ok(None)` means the probe ran and found no signature; that is not an error.
    fn filesystem_signature(&self, device: &Path) -> HalResult<Option<String>>;
}
