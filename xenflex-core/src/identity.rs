//! Host Identity Resolver: which VM is this process running in?
//!
//! The guest has no direct handle on its own VM reference, so the MAC of the
//! primary NIC is matched against the hypervisor's VIF records.

use crate::errors::{VolumeError, VolumeResult};
use crate::session::Session;
use log::debug;
use std::collections::BTreeSet;
use xenflex_hal::NetOps;
use xenflex_xapi::{VifOps, VmRef, Xapi};

/// Hardware address of `interface`, which must be up and have one.
pub fn primary_mac<H: NetOps + ?Sized>(hal: &H, interface: &str) -> VolumeResult<String> {
    let interfaces = hal.network_interfaces().map_err(VolumeError::InterfaceScan)?;
    interfaces
        .into_iter()
        .find(|iface| iface.name == interface && iface.up)
        .and_then(|iface| iface.mac)
        .filter(|mac| !mac.is_empty())
        .ok_or_else(|| VolumeError::InterfaceNotFound(interface.to_string()))
}

/// The VM owning the currently attached VIF with `mac`.
///
/// Several VIFs on the same VM may share a MAC; VIFs on different VMs
/// sharing it make the answer ambiguous and fail the lookup.
pub fn vm_for_mac<X: Xapi>(session: &Session<'_, X>, mac: &str) -> VolumeResult<VmRef> {
    let vifs = session.query("VIF.get_all_records", |x, s| x.vif_all_records(s))?;
    let vms: BTreeSet<VmRef> = vifs
        .into_values()
        .filter(|vif| vif.currently_attached && vif.mac.eq_ignore_ascii_case(mac))
        .map(|vif| vif.vm)
        .collect();

    let mut iter = vms.into_iter();
    match (iter.next(), iter.next()) {
        (Some(vm), None) => {
            debug!("MAC {} belongs to VM {}", mac, vm);
            Ok(vm)
        }
        (None, _) => Err(VolumeError::VmNotFound {
            mac: mac.to_string(),
        }),
        (Some(first), Some(second)) => {
            let mut vms = vec![first, second];
            vms.extend(iter);
            Err(VolumeError::AmbiguousVm {
                mac: mac.to_string(),
                vms,
            })
        }
    }
}

/// Resolve the VM this host runs in via the MAC of `interface`.
pub fn resolve_vm<X, H>(session: &Session<'_, X>, hal: &H, interface: &str) -> VolumeResult<VmRef>
where
    X: Xapi,
    H: NetOps + ?Sized,
{
    let mac = primary_mac(hal, interface)?;
    vm_for_mac(session, &mac)
}
