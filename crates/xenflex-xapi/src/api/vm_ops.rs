use crate::{SessionRef, VmRef, XapiResult};

pub trait VmOps {
    /// Device slots (`userdevice` values) still free on `vm`.
    fn vm_allowed_vbd_devices(&self, session: &SessionRef, vm: &VmRef) -> XapiResult<Vec<String>>;
}
