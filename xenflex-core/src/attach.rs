//! Attachment Manager: binding VDIs to this VM as hot-plugged block devices.
//!
//! Nothing here is transactional on the hypervisor side. VBD records are
//! listed and then acted on one by one; a concurrent caller working on the
//! same disk can change them in between. The orchestrator serializes calls
//! per volume.

use crate::config::AccessMode;
use crate::disks::{find_disk, DiskQuery};
use crate::errors::{VolumeError, VolumeResult};
use crate::session::Session;
use log::{debug, info, warn};
use std::path::PathBuf;
use xenflex_hal::path::device_path;
use xenflex_xapi::{
    NewVbd, VbdOps, VbdRef, VdiRef, VmOps, VmRef, Xapi, DEVICE_DETACH_REJECTED,
};

/// A plugged VBD and the block device it surfaced as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub vbd: VbdRef,
    pub vdi: VdiRef,
    pub device: String,
    pub device_path: PathBuf,
}

/// Attach the VDI named `disk_label` to `vm` and return the new block device.
///
/// Any VBD still attached to the disk (left by a run that crashed between
/// attach and detach) is detached and destroyed first.
pub fn attach<X: Xapi>(
    session: &Session<'_, X>,
    vm: &VmRef,
    disk_label: &str,
    mode: AccessMode,
) -> VolumeResult<Attachment> {
    let slots = session.query("VM.get_allowed_VBD_devices", |x, s| {
        x.vm_allowed_vbd_devices(s, vm)
    })?;
    let Some(slot) = slots.into_iter().next() else {
        return Err(VolumeError::NoDeviceSlot { vm: vm.clone() });
    };

    let (vdi, _) = find_disk(session, &DiskQuery::for_attach(disk_label))?
        .ok_or_else(|| VolumeError::DiskNotFound(disk_label.to_string()))?;

    let vbds = session.query("VBD.get_all_records", |x, s| x.vbd_all_records(s))?;
    for (stale, record) in vbds {
        if record.vdi == vdi && record.currently_attached {
            warn!(
                "VDI {} is still attached to VM {} as {}, detaching",
                disk_label, record.vm, stale
            );
            detach(session, &stale)?;
        }
    }

    let xapi = session.xapi();
    let handle = session.handle();
    let vbd = xapi
        .vbd_create(
            handle,
            &NewVbd::hotplug_disk(vm.clone(), vdi.clone(), slot.as_str(), mode.into()),
        )
        .map_err(VolumeError::remote("VBD.create"))?;
    debug!("Created VBD {} for {} at slot {}", vbd, disk_label, slot);

    xapi.vbd_plug(handle, &vbd)
        .map_err(VolumeError::remote("VBD.plug"))?;
    let device = session.query("VBD.get_device", |x, s| x.vbd_device(s, &vbd))?;
    if device.is_empty() || device.contains('/') {
        return Err(VolumeError::UnexpectedDevicePath(device));
    }

    let device_path = device_path(&device);
    info!(
        "Attached VDI {} to VM {} as {}",
        disk_label,
        vm,
        device_path.display()
    );
    Ok(Attachment {
        vbd,
        vdi,
        device,
        device_path,
    })
}

/// Unplug and destroy one VBD.
///
/// A graceful unplug rejected by the guest is escalated to a forced one,
/// once. Any other unplug failure aborts before destroy.
pub fn detach<X: Xapi>(session: &Session<'_, X>, vbd: &VbdRef) -> VolumeResult<()> {
    let xapi = session.xapi();
    let handle = session.handle();

    match xapi.vbd_unplug(handle, vbd) {
        Ok(()) => {}
        Err(err) if err.has_code(DEVICE_DETACH_REJECTED) => {
            warn!("Unplug of {} rejected, forcing: {}", vbd, err);
            xapi.vbd_unplug_force(handle, vbd)
                .map_err(VolumeError::remote(format!("VBD.unplug_force {}", vbd)))?;
        }
        Err(err) => return Err(VolumeError::remote(format!("VBD.unplug {}", vbd))(err)),
    }

    xapi.vbd_destroy(handle, vbd)
        .map_err(VolumeError::remote(format!("VBD.destroy {}", vbd)))?;
    debug!("Detached and destroyed VBD {}", vbd);
    Ok(())
}

/// Detach every VBD of `vm` currently attached as `device` (e.g. `xvdb`).
///
/// Returns how many were detached.
pub fn detach_device<X: Xapi>(
    session: &Session<'_, X>,
    vm: &VmRef,
    device: &str,
) -> VolumeResult<usize> {
    let vbds = session.query("VBD.get_all_records", |x, s| x.vbd_all_records(s))?;
    let mut detached = 0;
    for (vbd, record) in vbds {
        if &record.vm == vm && record.device == device && record.currently_attached {
            detach(session, &vbd)?;
            detached += 1;
        }
    }
    if detached == 0 {
        warn!("No attached VBD found for {} on VM {}", device, vm);
    }
    Ok(detached)
}

/// Detach every VBD binding the disk named `disk_label` to `vm`.
///
/// Used when the mount point is already gone and the device name is no
/// longer known. A missing disk detaches nothing.
pub fn detach_disk<X: Xapi>(
    session: &Session<'_, X>,
    vm: &VmRef,
    disk_label: &str,
) -> VolumeResult<usize> {
    let Some((vdi, _)) = find_disk(session, &DiskQuery::for_attach(disk_label))? else {
        warn!("VDI {} not found, nothing to detach", disk_label);
        return Ok(0);
    };

    let vbds = session.query("VBD.get_all_records", |x, s| x.vbd_all_records(s))?;
    let mut detached = 0;
    for (vbd, record) in vbds {
        if &record.vm == vm && record.vdi == vdi && record.currently_attached {
            detach(session, &vbd)?;
            detached += 1;
        }
    }
    debug!("Detached {} VBD(s) of {} from VM {}", detached, disk_label, vm);
    Ok(detached)
}
