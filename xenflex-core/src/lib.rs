//! xenflex core library.
//!
//! Attaches XenServer virtual disks to the VM this process runs in, formats
//! and mounts them for the orchestrator, and reverses the whole sequence on
//! unmount. Disk creation and deletion for the provisioner live here too.
//!
//! Every remote call goes through a [`session::Session`] scoped to one
//! operation; every host call goes through the `xenflex-hal` traits.

pub mod attach;
pub mod config;
pub mod disks;
pub mod driver;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod mount;
pub mod mount_record;
pub mod protocol;
pub mod provisioner;
pub mod session;

#[cfg(test)]
pub mod test_env;

pub use config::{AccessMode, Credentials, DriverSettings, ProvisionerConfig, ValidatedRequest, VolumeRequest};
pub use driver::VolumeDriver;
pub use errors::{VolumeError, VolumeResult};
pub use mount_record::MountRecord;
pub use provisioner::{Provisioner, VolumeDescriptor, VolumeOptions};
