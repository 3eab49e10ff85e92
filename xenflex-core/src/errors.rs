use std::io;
use std::path::PathBuf;
use thiserror::Error;
use xenflex_error::{HalError, XapiError};
use xenflex_xapi::VmRef;

/// Result type alias for volume operations
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Everything a mount, unmount, provision or delete can fail with.
///
/// The `Display` text is what the orchestrator sees in the `message` field,
/// so each variant names the object it was working on.
#[derive(Error, Debug)]
pub enum VolumeError {
    // Validation
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("malformed request: {0}")]
    MalformedRequest(#[source] serde_json::Error),

    // Lookup
    #[error("no usable network interface named {0} (must be up with a hardware address)")]
    InterfaceNotFound(String),

    #[error("could not list network interfaces: {0}")]
    InterfaceScan(#[source] HalError),

    #[error("no VM has an attached VIF with MAC {mac}")]
    VmNotFound { mac: String },

    #[error("MAC {mac} is attached to more than one VM: {vms:?}")]
    AmbiguousVm { mac: String, vms: Vec<VmRef> },

    #[error("no VDI found with name label {0}")]
    DiskNotFound(String),

    #[error("{count} VDIs share the name label {name}")]
    AmbiguousDisk { name: String, count: usize },

    #[error("no SR found with name label {0}")]
    StorageRepositoryNotFound(String),

    #[error("{count} SRs share the name label {name}")]
    AmbiguousStorageRepository { name: String, count: usize },

    #[error("VM {vm} has no free VBD device slot")]
    NoDeviceSlot { vm: VmRef },

    // Remote
    #[error("could not log in at {host}: {source}")]
    Login {
        host: String,
        #[source]
        source: XapiError,
    },

    #[error("could not log out: {0}")]
    Logout(#[source] XapiError),

    #[error("{action} failed: {source}")]
    Remote {
        action: String,
        #[source]
        source: XapiError,
    },

    // Host
    #[error("could not probe {device} for a filesystem: {source}")]
    Probe {
        device: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("could not create {fstype} filesystem on {device}: {source}")]
    Format {
        device: PathBuf,
        fstype: String,
        #[source]
        source: HalError,
    },

    #[error("could not write mount record {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not create mount point {path}: {source}")]
    Mkdir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not mount {device} on {target}: {source}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("could not unmount {target}: {source}")]
    Unmount {
        target: PathBuf,
        #[source]
        source: HalError,
    },

    #[error("could not look up the mount at {target}: {source}")]
    MountLookup {
        target: PathBuf,
        #[source]
        source: HalError,
    },

    // Consistency
    #[error("nothing is mounted at {0}")]
    NotMounted(PathBuf),

    #[error("unexpected device path {0:?}")]
    UnexpectedDevicePath(String),

    #[error("mount record {0} does not exist")]
    MetadataMissing(PathBuf),

    #[error("mount record {path} is corrupt: {source}")]
    MetadataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read mount record {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not remove mount record {path}: {source}")]
    MetadataRemove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VolumeError {
    /// Adapter for `map_err` on remote calls.
    pub fn remote(action: impl Into<String>) -> impl FnOnce(XapiError) -> VolumeError {
        let action = action.into();
        move |source| VolumeError::Remote { action, source }
    }

    /// The underlying hypervisor error, if this failure came from a remote call.
    pub fn xapi_error(&self) -> Option<&XapiError> {
        match self {
            VolumeError::Login { source, .. }
            | VolumeError::Remote { source, .. }
            | VolumeError::Logout(source) => Some(source),
            _ => None,
        }
    }
}
