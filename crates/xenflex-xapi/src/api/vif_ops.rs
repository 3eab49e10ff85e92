use crate::{SessionRef, VifRecord, VifRef, XapiResult};
use std::collections::BTreeMap;

pub trait VifOps {
    fn vif_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VifRef, VifRecord>>;
}
