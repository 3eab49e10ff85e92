use crate::{SessionRef, SrRef, XapiResult};

pub trait SrOps {
    fn sr_by_name_label(&self, session: &SessionRef, label: &str) -> XapiResult<Vec<SrRef>>;
}
