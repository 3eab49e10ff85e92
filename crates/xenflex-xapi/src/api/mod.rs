//! XenAPI trait definitions and implementations.
//!
//! Each resource class gets its own trait; [`Xapi`] combines them. Both the
//! real JSON-RPC client and the fake implement every trait.

pub mod fake_xapi;
pub mod jsonrpc;
pub mod session_ops;
pub mod sr_ops;
pub mod vbd_ops;
pub mod vdi_ops;
pub mod vif_ops;
pub mod vm_ops;

pub use fake_xapi::{FakeXapi, Operation};
pub use jsonrpc::{ClientOptions, JsonRpcConnector, JsonRpcXapi};
pub use session_ops::SessionOps;
pub use sr_ops::SrOps;
pub use vbd_ops::VbdOps;
pub use vdi_ops::VdiOps;
pub use vif_ops::VifOps;
pub use vm_ops::VmOps;

use crate::XapiResult;

/// Complete hypervisor surface combining every resource class.
pub trait Xapi: SessionOps + VmOps + VdiOps + VbdOps + VifOps + SrOps {}

/// Automatically implement Xapi for any type implementing all required traits.
impl<T> Xapi for T where T: SessionOps + VmOps + VdiOps + VbdOps + VifOps + SrOps {}

/// Opens a client handle for a management host.
pub trait XapiConnector {
    type Client: Xapi;

    fn connect(&self, host: &str) -> XapiResult<Self::Client>;
}
