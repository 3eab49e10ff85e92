use crate::{SessionRef, XapiResult};

pub trait SessionOps {
    /// `session.login_with_password`
    fn login_with_password(
        &self,
        username: &str,
        password: &str,
        version: &str,
        originator: &str,
    ) -> XapiResult<SessionRef>;

    /// `session.logout`
    fn logout(&self, session: &SessionRef) -> XapiResult<()>;
}
