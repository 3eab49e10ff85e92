//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for host operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod fake_hal;
pub mod format_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod net_ops;
pub mod probe_ops;

pub use fake_hal::{FakeHal, Operation};
pub use format_ops::FormatOps;
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use net_ops::{NetInterface, NetOps};
pub use probe_ops::ProbeOps;

/// Complete HAL combining every host operation the volume driver needs.
pub trait HostHal: MountOps + FormatOps + ProbeOps + NetOps + Send + Sync {}

/// Automatically implement HostHal for any type implementing all required traits.
impl<T> HostHal for T where T: MountOps + FormatOps + ProbeOps + NetOps + Send + Sync {}
