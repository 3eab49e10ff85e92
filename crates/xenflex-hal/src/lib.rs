//! xenflex host abstraction layer (HAL).
//!
//! Everything that touches the local machine (the mount table, block devices,
//! network interfaces, external filesystem tools) goes through the traits in
//! [`hal`], so volume workflows can run against [`FakeHal`] without root.

pub mod hal;
pub mod path;
pub mod procfs;
pub mod sysfs;

pub use hal::*;
pub use xenflex_error::{HalError, HalResult};
