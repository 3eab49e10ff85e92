//! In-memory hypervisor for testing.
//!
//! Models just enough of a pool (VMs with their VIFs, storage repositories,
//! disks and their attachments) for the volume workflows to run end to end.
//! Every call is recorded so tests can assert on the exact sequence.

use super::{SessionOps, SrOps, VbdOps, VdiOps, VifOps, VmOps, XapiConnector};
use crate::{
    NewVbd, NewVdi, SessionRef, SrRef, VbdMode, VbdRecord, VbdRef, VbdType, VdiRecord, VdiRef,
    VifRecord, VifRef, VmRef, XapiError, XapiResult, DEVICE_DETACH_REJECTED,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Device slots offered to a VM when no override is set.
const DEFAULT_SLOTS: u32 = 8;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Connect { host: String },
    Login { username: String },
    Logout { session: SessionRef },
    /// A read-only call; `method` is the XenAPI method name.
    Query { method: &'static str },
    VdiCreate { name_label: String, sr: SrRef, virtual_size: i64 },
    VdiDestroy { vdi: VdiRef },
    VbdCreate { vm: VmRef, vdi: VdiRef, userdevice: String, mode: VbdMode },
    VbdPlug { vbd: VbdRef },
    VbdUnplug { vbd: VbdRef },
    VbdUnplugForce { vbd: VbdRef },
    VbdDestroy { vbd: VbdRef },
}

#[derive(Debug, Default)]
struct FakeXapiState {
    operations: Vec<Operation>,
    next_id: u64,
    credentials: Option<(String, String)>,
    sessions: BTreeSet<SessionRef>,
    vms: BTreeMap<VmRef, String>,
    vifs: BTreeMap<VifRef, VifRecord>,
    srs: BTreeMap<SrRef, String>,
    vdis: BTreeMap<VdiRef, VdiRecord>,
    vbds: BTreeMap<VbdRef, VbdRecord>,
    allowed_slots: BTreeMap<VmRef, Vec<String>>,
    reject_graceful_unplug: bool,
    fail_unplug: Option<String>,
    fail_plug: Option<String>,
    fail_logout: bool,
    transient_query_failures: usize,
}

impl FakeXapiState {
    fn mint(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("OpaqueRef:{}-{:04}", kind, self.next_id)
    }

    fn check_session(&self, session: &SessionRef) -> XapiResult<()> {
        if self.sessions.contains(session) {
            Ok(())
        } else {
            Err(XapiError::Api {
                code: "SESSION_INVALID".to_string(),
                params: vec![session.to_string()],
            })
        }
    }

    fn query(&mut self, session: &SessionRef, method: &'static str) -> XapiResult<()> {
        self.operations.push(Operation::Query { method });
        if self.transient_query_failures > 0 {
            self.transient_query_failures -= 1;
            return Err(XapiError::Transport("connection reset by peer".to_string()));
        }
        self.check_session(session)
    }

    fn vbd_mut(&mut self, vbd: &VbdRef) -> XapiResult<&mut VbdRecord> {
        self.vbds.get_mut(vbd).ok_or_else(|| handle_invalid("VBD", vbd))
    }
}

fn handle_invalid(class: &str, reference: impl ToString) -> XapiError {
    XapiError::Api {
        code: "HANDLE_INVALID".to_string(),
        params: vec![class.to_string(), reference.to_string()],
    }
}

/// Guest device name for a numeric slot: 0 -> `xvda`, 1 -> `xvdb`, ...
fn device_for_slot(userdevice: &str) -> String {
    match userdevice.parse::<u8>() {
        Ok(n) if n < 26 => format!("xvd{}", (b'a' + n) as char),
        _ => format!("xvd{}", userdevice),
    }
}

/// Fake hypervisor that keeps all state in memory.
///
/// Clones share state; the connector hands out clones.
#[derive(Debug, Clone, Default)]
pub struct FakeXapi {
    state: Arc<Mutex<FakeXapiState>>,
}

impl FakeXapi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept logins with these credentials.
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.state.lock().unwrap().credentials = Some((username.to_string(), password.to_string()));
    }

    pub fn add_vm(&self, name: &str) -> VmRef {
        let mut state = self.state.lock().unwrap();
        let vm = VmRef::new(state.mint("VM"));
        state.vms.insert(vm.clone(), name.to_string());
        vm
    }

    pub fn add_vif(&self, vm: &VmRef, mac: &str, currently_attached: bool) -> VifRef {
        let mut state = self.state.lock().unwrap();
        let vif = VifRef::new(state.mint("VIF"));
        let device = state.vifs.values().filter(|r| &r.vm == vm).count().to_string();
        state.vifs.insert(
            vif.clone(),
            VifRecord {
                vm: vm.clone(),
                mac: mac.to_string(),
                device,
                currently_attached,
            },
        );
        vif
    }

    pub fn add_sr(&self, name_label: &str) -> SrRef {
        let mut state = self.state.lock().unwrap();
        let sr = SrRef::new(state.mint("SR"));
        state.srs.insert(sr.clone(), name_label.to_string());
        sr
    }

    pub fn add_vdi(&self, name_label: &str, sr: &SrRef, virtual_size: i64) -> VdiRef {
        self.add_vdi_record(VdiRecord {
            name_label: name_label.to_string(),
            sr: sr.clone(),
            virtual_size,
            ..VdiRecord::default()
        })
    }

    pub fn add_vdi_record(&self, record: VdiRecord) -> VdiRef {
        let mut state = self.state.lock().unwrap();
        let vdi = VdiRef::new(state.mint("VDI"));
        state.vdis.insert(vdi.clone(), record);
        vdi
    }

    /// Bind `vdi` to `vm` at `userdevice`; attached bindings get a guest device name.
    pub fn add_vbd(&self, vm: &VmRef, vdi: &VdiRef, userdevice: &str, currently_attached: bool) -> VbdRef {
        let mut state = self.state.lock().unwrap();
        let vbd = VbdRef::new(state.mint("VBD"));
        let device = if currently_attached {
            device_for_slot(userdevice)
        } else {
            String::new()
        };
        state.vbds.insert(
            vbd.clone(),
            VbdRecord {
                vm: vm.clone(),
                vdi: vdi.clone(),
                device,
                userdevice: userdevice.to_string(),
                currently_attached,
                mode: VbdMode::ReadWrite,
                vbd_type: VbdType::Disk,
            },
        );
        vbd
    }

    /// Override the slots `VM.get_allowed_VBD_devices` reports for `vm`.
    pub fn set_allowed_slots(&self, vm: &VmRef, slots: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .allowed_slots
            .insert(vm.clone(), slots.iter().map(|s| s.to_string()).collect());
    }

    /// Make graceful unplugs fail with `DEVICE_DETACH_REJECTED`.
    pub fn reject_graceful_unplug(&self, reject: bool) {
        self.state.lock().unwrap().reject_graceful_unplug = reject;
    }

    /// Make graceful unplugs fail with the given error code.
    pub fn fail_unplug(&self, code: Option<&str>) {
        self.state.lock().unwrap().fail_unplug = code.map(str::to_string);
    }

    /// Make `VBD.plug` fail with the given error code.
    pub fn fail_plug(&self, code: Option<&str>) {
        self.state.lock().unwrap().fail_plug = code.map(str::to_string);
    }

    pub fn fail_logout(&self, fail: bool) {
        self.state.lock().unwrap().fail_logout = fail;
    }

    /// Fail the next `count` read-only calls with a transport error.
    pub fn fail_next_queries(&self, count: usize) {
        self.state.lock().unwrap().transient_query_failures = count;
    }

    pub fn vdi(&self, vdi: &VdiRef) -> Option<VdiRecord> {
        self.state.lock().unwrap().vdis.get(vdi).cloned()
    }

    pub fn vdis(&self) -> BTreeMap<VdiRef, VdiRecord> {
        self.state.lock().unwrap().vdis.clone()
    }

    pub fn vbd(&self, vbd: &VbdRef) -> Option<VbdRecord> {
        self.state.lock().unwrap().vbds.get(vbd).cloned()
    }

    /// All bindings of `vdi`, in reference order.
    pub fn vbds_for(&self, vdi: &VdiRef) -> Vec<(VbdRef, VbdRecord)> {
        self.state
            .lock()
            .unwrap()
            .vbds
            .iter()
            .filter(|(_, r)| &r.vdi == vdi)
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }

    /// Number of sessions logged in and not yet logged out.
    pub fn live_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    pub fn count_operations(&self, check: impl Fn(&Operation) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|op| check(op))
            .count()
    }

    /// Clear recorded operations; the modelled pool is kept.
    pub fn clear(&self) {
        self.state.lock().unwrap().operations.clear();
    }
}

impl SessionOps for FakeXapi {
    fn login_with_password(
        &self,
        username: &str,
        password: &str,
        _version: &str,
        _originator: &str,
    ) -> XapiResult<SessionRef> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(Operation::Login {
            username: username.to_string(),
        });
        if let Some((user, pass)) = &state.credentials {
            if user != username || pass != password {
                return Err(XapiError::Api {
                    code: "SESSION_AUTHENTICATION_FAILED".to_string(),
                    params: vec![username.to_string(), "Authentication failure".to_string()],
                });
            }
        }
        let session = SessionRef::new(state.mint("session"));
        state.sessions.insert(session.clone());
        Ok(session)
    }

    fn logout(&self, session: &SessionRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(Operation::Logout {
            session: session.clone(),
        });
        state.check_session(session)?;
        state.sessions.remove(session);
        if state.fail_logout {
            return Err(XapiError::Transport("connection closed during logout".to_string()));
        }
        Ok(())
    }
}

impl VmOps for FakeXapi {
    fn vm_allowed_vbd_devices(&self, session: &SessionRef, vm: &VmRef) -> XapiResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "VM.get_allowed_VBD_devices")?;
        if !state.vms.contains_key(vm) {
            return Err(handle_invalid("VM", vm));
        }
        if let Some(slots) = state.allowed_slots.get(vm) {
            return Ok(slots.clone());
        }
        let used: BTreeSet<&str> = state
            .vbds
            .values()
            .filter(|r| &r.vm == vm)
            .map(|r| r.userdevice.as_str())
            .collect();
        Ok((0..DEFAULT_SLOTS)
            .map(|n| n.to_string())
            .filter(|slot| !used.contains(slot.as_str()))
            .collect())
    }
}

impl VdiOps for FakeXapi {
    fn vdi_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VdiRef, VdiRecord>> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "VDI.get_all_records")?;
        Ok(state.vdis.clone())
    }

    fn vdi_create(&self, session: &SessionRef, vdi: &NewVdi) -> XapiResult<VdiRef> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(Operation::VdiCreate {
            name_label: vdi.name_label.clone(),
            sr: vdi.sr.clone(),
            virtual_size: vdi.virtual_size,
        });
        state.check_session(session)?;
        if !state.srs.contains_key(&vdi.sr) {
            return Err(handle_invalid("SR", &vdi.sr));
        }
        let reference = VdiRef::new(state.mint("VDI"));
        state.vdis.insert(
            reference.clone(),
            VdiRecord {
                name_label: vdi.name_label.clone(),
                name_description: vdi.name_description.clone(),
                sr: vdi.sr.clone(),
                virtual_size: vdi.virtual_size,
                is_a_snapshot: false,
            },
        );
        Ok(reference)
    }

    fn vdi_destroy(&self, session: &SessionRef, vdi: &VdiRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(Operation::VdiDestroy { vdi: vdi.clone() });
        state.check_session(session)?;
        if !state.vdis.contains_key(vdi) {
            return Err(handle_invalid("VDI", vdi));
        }
        if state
            .vbds
            .values()
            .any(|r| &r.vdi == vdi && r.currently_attached)
        {
            return Err(XapiError::Api {
                code: "VDI_IN_USE".to_string(),
                params: vec![vdi.to_string(), "destroy".to_string()],
            });
        }
        state.vdis.remove(vdi);
        state.vbds.retain(|_, r| &r.vdi != vdi);
        Ok(())
    }
}

impl VbdOps for FakeXapi {
    fn vbd_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VbdRef, VbdRecord>> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "VBD.get_all_records")?;
        Ok(state.vbds.clone())
    }

    fn vbd_create(&self, session: &SessionRef, vbd: &NewVbd) -> XapiResult<VbdRef> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(Operation::VbdCreate {
            vm: vbd.vm.clone(),
            vdi: vbd.vdi.clone(),
            userdevice: vbd.userdevice.clone(),
            mode: vbd.mode,
        });
        state.check_session(session)?;
        if !state.vms.contains_key(&vbd.vm) {
            return Err(handle_invalid("VM", &vbd.vm));
        }
        if !state.vdis.contains_key(&vbd.vdi) {
            return Err(handle_invalid("VDI", &vbd.vdi));
        }
        if state
            .vbds
            .values()
            .any(|r| r.vm == vbd.vm && r.userdevice == vbd.userdevice)
        {
            return Err(XapiError::Api {
                code: "DEVICE_ALREADY_EXISTS".to_string(),
                params: vec![vbd.userdevice.clone()],
            });
        }
        let reference = VbdRef::new(state.mint("VBD"));
        state.vbds.insert(
            reference.clone(),
            VbdRecord {
                vm: vbd.vm.clone(),
                vdi: vbd.vdi.clone(),
                device: String::new(),
                userdevice: vbd.userdevice.clone(),
                currently_attached: false,
                mode: vbd.mode,
                vbd_type: vbd.vbd_type,
            },
        );
        Ok(reference)
    }

    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(Operation::VbdPlug { vbd: vbd.clone() });
        state.check_session(session)?;
        if let Some(code) = state.fail_plug.clone() {
            return Err(XapiError::api(code));
        }
        let record = state.vbd_mut(vbd)?;
        if record.currently_attached {
            return Err(XapiError::Api {
                code: "DEVICE_ALREADY_ATTACHED".to_string(),
                params: vec![vbd.to_string()],
            });
        }
        record.currently_attached = true;
        record.device = device_for_slot(&record.userdevice);
        Ok(())
    }

    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(Operation::VbdUnplug { vbd: vbd.clone() });
        state.check_session(session)?;
        if let Some(code) = state.fail_unplug.clone() {
            return Err(XapiError::api(code));
        }
        let reject = state.reject_graceful_unplug;
        let record = state.vbd_mut(vbd)?;
        if !record.currently_attached {
            return Err(XapiError::Api {
                code: "DEVICE_ALREADY_DETACHED".to_string(),
                params: vec![vbd.to_string()],
            });
        }
        if reject {
            return Err(XapiError::Api {
                code: DEVICE_DETACH_REJECTED.to_string(),
                params: vec!["VBD".to_string(), vbd.to_string(), "device in use".to_string()],
            });
        }
        record.currently_attached = false;
        Ok(())
    }

    fn vbd_unplug_force(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(Operation::VbdUnplugForce { vbd: vbd.clone() });
        state.check_session(session)?;
        let record = state.vbd_mut(vbd)?;
        if !record.currently_attached {
            return Err(XapiError::Api {
                code: "DEVICE_ALREADY_DETACHED".to_string(),
                params: vec![vbd.to_string()],
            });
        }
        record.currently_attached = false;
        Ok(())
    }

    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .operations
            .push(Operation::VbdDestroy { vbd: vbd.clone() });
        state.check_session(session)?;
        if state.vbd_mut(vbd)?.currently_attached {
            return Err(XapiError::Api {
                code: "OPERATION_NOT_ALLOWED".to_string(),
                params: vec!["VBD is currently attached".to_string()],
            });
        }
        state.vbds.remove(vbd);
        Ok(())
    }

    fn vbd_device(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<String> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "VBD.get_device")?;
        Ok(state.vbd_mut(vbd)?.device.clone())
    }
}

impl VifOps for FakeXapi {
    fn vif_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VifRef, VifRecord>> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "VIF.get_all_records")?;
        Ok(state.vifs.clone())
    }
}

impl SrOps for FakeXapi {
    fn sr_by_name_label(&self, session: &SessionRef, label: &str) -> XapiResult<Vec<SrRef>> {
        let mut state = self.state.lock().unwrap();
        state.query(session, "SR.get_by_name_label")?;
        Ok(state
            .srs
            .iter()
            .filter(|(_, name)| name.as_str() == label)
            .map(|(sr, _)| sr.clone())
            .collect())
    }
}

impl XapiConnector for FakeXapi {
    type Client = FakeXapi;

    fn connect(&self, host: &str) -> XapiResult<FakeXapi> {
        self.state.lock().unwrap().operations.push(Operation::Connect {
            host: host.to_string(),
        });
        Ok(self.clone())
    }
}
