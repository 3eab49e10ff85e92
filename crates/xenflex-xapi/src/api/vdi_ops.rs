use crate::{NewVdi, SessionRef, VdiRecord, VdiRef, XapiResult};
use std::collections::BTreeMap;

pub trait VdiOps {
    fn vdi_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VdiRef, VdiRecord>>;

    fn vdi_create(&self, session: &SessionRef, vdi: &NewVdi) -> XapiResult<VdiRef>;

    fn vdi_destroy(&self, session: &SessionRef, vdi: &VdiRef) -> XapiResult<()>;
}
