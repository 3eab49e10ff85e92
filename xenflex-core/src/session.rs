//! Session Gateway: one authenticated hypervisor session per operation.

use crate::config::Credentials;
use crate::errors::{VolumeError, VolumeResult};
use log::{debug, error, warn};
use xenflex_xapi::{RetryPolicy, SessionRef, Xapi, XapiResult};

/// XenAPI protocol version sent at login.
pub const API_VERSION: &str = "1.0";
/// Originator the driver identifies itself with.
pub const DRIVER_ORIGINATOR: &str = "xenflex.io/xenserver";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub originator: String,
    pub retry: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            originator: DRIVER_ORIGINATOR.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// A logged-in session. Logs out on [`Session::close`], or on drop if the
/// scope is left without closing.
pub struct Session<'a, X: Xapi> {
    xapi: &'a X,
    handle: SessionRef,
    retry: RetryPolicy,
    open: bool,
}

impl<'a, X: Xapi> Session<'a, X> {
    pub fn open(xapi: &'a X, credentials: &Credentials, options: &SessionOptions) -> VolumeResult<Self> {
        debug!("Logging in at {} as {}", credentials.host, credentials.username);
        let handle = xapi
            .login_with_password(
                &credentials.username,
                &credentials.password,
                API_VERSION,
                &options.originator,
            )
            .map_err(|source| VolumeError::Login {
                host: credentials.host.clone(),
                source,
            })?;
        Ok(Self {
            xapi,
            handle,
            retry: options.retry,
            open: true,
        })
    }

    pub fn xapi(&self) -> &'a X {
        self.xapi
    }

    pub fn handle(&self) -> &SessionRef {
        &self.handle
    }

    /// Run a read-only call under the retry policy.
    pub fn query<T>(
        &self,
        what: &str,
        mut call: impl FnMut(&X, &SessionRef) -> XapiResult<T>,
    ) -> VolumeResult<T> {
        let handle = self.handle();
        self.retry
            .run(what, || call(self.xapi, handle))
            .map_err(VolumeError::remote(what))
    }

    pub fn close(mut self) -> VolumeResult<()> {
        self.open = false;
        debug!("Logging out");
        self.xapi.logout(&self.handle).map_err(VolumeError::Logout)
    }
}

impl<X: Xapi> Drop for Session<'_, X> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.xapi.logout(&self.handle) {
                warn!("Logout of abandoned session failed: {}", err);
            }
        }
    }
}

/// Open a session, run `op`, and always log out.
///
/// A logout failure fails the operation even when `op` succeeded. When both
/// fail, `op`'s error wins and the logout error is logged.
pub fn with_session<X, T>(
    xapi: &X,
    credentials: &Credentials,
    options: &SessionOptions,
    op: impl FnOnce(&Session<'_, X>) -> VolumeResult<T>,
) -> VolumeResult<T>
where
    X: Xapi,
{
    let session = Session::open(xapi, credentials, options)?;
    let result = op(&session);
    let closed = session.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(logout)) => Err(logout),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(logout)) => {
            error!("{}", logout);
            Err(err)
        }
    }
}
