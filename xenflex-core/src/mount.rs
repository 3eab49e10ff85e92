//! Mount Orchestrator: filesystem probe/format, mount and unmount.

use crate::config::ValidatedRequest;
use crate::errors::{VolumeError, VolumeResult};
use crate::mount_record::MountRecord;
use log::{debug, info};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use xenflex_hal::{HostHal, MountOptions};

const MOUNT_DIR_MODE: u32 = 0o755;

/// Format `device` if blank, record the request, and mount it at `target`.
///
/// The mount record is written before the mount so that a crash between the
/// two still leaves enough behind to unmount.
pub fn mount_volume<H: HostHal + ?Sized>(
    hal: &H,
    device: &Path,
    request: &ValidatedRequest,
    target: &Path,
    raw_request: &[u8],
) -> VolumeResult<()> {
    let signature = hal
        .filesystem_signature(device)
        .map_err(|source| VolumeError::Probe {
            device: device.to_path_buf(),
            source,
        })?;
    match signature {
        Some(signature) => debug!("{} already formatted: {}", device.display(), signature),
        None => {
            info!("Creating {} filesystem on {}", request.fs_type, device.display());
            hal.make_filesystem(device, &request.fs_type)
                .map_err(|source| VolumeError::Format {
                    device: device.to_path_buf(),
                    fstype: request.fs_type.clone(),
                    source,
                })?;
        }
    }

    let record = MountRecord::persist(target, raw_request)?;
    debug!("Wrote mount record {}", record.display());

    DirBuilder::new()
        .recursive(true)
        .mode(MOUNT_DIR_MODE)
        .create(target)
        .map_err(|source| VolumeError::Mkdir {
            path: target.to_path_buf(),
            source,
        })?;

    let options = MountOptions::restricted().read_only(request.mode.is_read_only());
    hal.mount_device(device, target, &request.fs_type, &options)
        .map_err(|source| VolumeError::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            source,
        })?;
    info!(
        "Mounted {} on {} ({:?})",
        device.display(),
        target.display(),
        request.mode
    );
    Ok(())
}

/// Kernel device name from a mount source such as `/dev/xvdb`.
///
/// Only a rooted path of exactly two non-empty components is accepted.
pub fn device_name_from_source(source: &str) -> VolumeResult<String> {
    let unexpected = || VolumeError::UnexpectedDevicePath(source.to_string());
    let rest = source.strip_prefix('/').ok_or_else(unexpected)?;
    let mut parts = rest.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(dir), Some(name), None) if !dir.is_empty() && !name.is_empty() => {
            Ok(name.to_string())
        }
        _ => Err(unexpected()),
    }
}

/// Lazily unmount `target` and return the device name that backed it.
pub fn unmount_target<H: HostHal + ?Sized>(hal: &H, target: &Path) -> VolumeResult<String> {
    let source = hal
        .mount_source(target)
        .map_err(|source| VolumeError::MountLookup {
            target: target.to_path_buf(),
            source,
        })?
        .ok_or_else(|| VolumeError::NotMounted(target.to_path_buf()))?;
    let device = device_name_from_source(&source)?;

    hal.unmount_detach(target)
        .map_err(|source| VolumeError::Unmount {
            target: target.to_path_buf(),
            source,
        })?;
    info!("Unmounted {} (was {})", target.display(), source);
    Ok(device)
}
