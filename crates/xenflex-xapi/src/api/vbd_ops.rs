use crate::{NewVbd, SessionRef, VbdRecord, VbdRef, XapiResult};
use std::collections::BTreeMap;

/// Virtual block device (attachment) operations.
pub trait VbdOps {
    fn vbd_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VbdRef, VbdRecord>>;

    fn vbd_create(&self, session: &SessionRef, vbd: &NewVbd) -> XapiResult<VbdRef>;

    /// Hot-plug the device into the running guest.
    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()>;

    /// Ask the guest to release the device. The guest may refuse with
    /// `DEVICE_DETACH_REJECTED`.
    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()>;

    fn vbd_unplug_force(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()>;

    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()>;

    /// Kernel device name assigned in the guest after plugging.
    fn vbd_device(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<String>;
}
