//! The slice of the XenAPI that xenflex consumes.
//!
//! Resource classes are split into small traits (`SessionOps`, `VmOps`,
//! `VdiOps`, `VbdOps`, `VifOps`, `SrOps`) combined into [`Xapi`]. The wire
//! protocol lives in [`JsonRpcXapi`]; [`FakeXapi`] is an in-memory hypervisor
//! for tests.

pub mod api;
pub mod retry;
pub mod types;

pub use api::*;
pub use retry::RetryPolicy;
pub use types::*;
pub use xenflex_error::{XapiError, XapiResult, DEVICE_DETACH_REJECTED};
