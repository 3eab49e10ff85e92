//! Provisioner: creates and deletes the VDIs behind persistent volumes.

use crate::config::{ProvisionerConfig, HOST_OPTION, PASSWORD_OPTION, USERNAME_OPTION};
use crate::disks::{create_disk, delete_disk};
use crate::errors::{VolumeError, VolumeResult};
use crate::session::{with_session, SessionOptions};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xenflex_xapi::XapiConnector;

pub const PROVISIONER_NAME: &str = "xenflex.io/xenserver-provisioner";
/// Driver name written into every volume descriptor.
pub const DRIVER_NAME: &str = "xenflex.io/xenserver";
/// Storage class parameter naming the SR to allocate from.
pub const SR_NAME_PARAMETER: &str = "xenflex.io/xenserver/srName";

const DESCRIPTOR_FS_TYPE: &str = "ext4";

/// What the orchestrator asks for when a claim needs a new volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VolumeOptions {
    pub pv_name: String,
    pub capacity_bytes: Option<u64>,
    #[serde(default)]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub reclaim_policy: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// The persistent volume handed back to the orchestrator.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    pub name: String,
    pub capacity_bytes: u64,
    pub access_modes: Vec<String>,
    pub reclaim_policy: String,
    pub driver: String,
    pub fs_type: String,
    /// Driver options, including the hypervisor credentials.
    pub options: BTreeMap<String, String>,
}

impl VolumeDescriptor {
    /// Descriptor carrying only a name, enough for [`Provisioner::delete`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity_bytes: 0,
            access_modes: Vec::new(),
            reclaim_policy: String::new(),
            driver: DRIVER_NAME.to_string(),
            fs_type: DESCRIPTOR_FS_TYPE.to_string(),
            options: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for VolumeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let options: BTreeMap<&str, &str> = self
            .options
            .iter()
            .map(|(k, v)| {
                let shown = if k == PASSWORD_OPTION { "<redacted>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("VolumeDescriptor")
            .field("name", &self.name)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("access_modes", &self.access_modes)
            .field("reclaim_policy", &self.reclaim_policy)
            .field("driver", &self.driver)
            .field("fs_type", &self.fs_type)
            .field("options", &options)
            .finish()
    }
}

/// Parse a capacity such as `10Gi`, `500M` or `1073741824` into bytes.
pub fn parse_capacity(value: &str) -> VolumeResult<u64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split);
    let invalid = || VolumeError::Validation(format!("invalid capacity {:?}", value));

    let number: u64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        _ => return Err(invalid()),
    };
    number.checked_mul(multiplier).ok_or_else(invalid)
}

pub struct Provisioner<C: XapiConnector> {
    connector: C,
    config: ProvisionerConfig,
}

impl<C: XapiConnector> Provisioner<C> {
    pub fn new(connector: C, config: ProvisionerConfig) -> Self {
        Self { connector, config }
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            originator: self.config.name.clone(),
            retry: self.config.retry,
        }
    }

    fn connect(&self) -> VolumeResult<C::Client> {
        let credentials = &self.config.credentials;
        credentials.validate()?;
        self.connector
            .connect(&credentials.host)
            .map_err(|source| VolumeError::Login {
                host: credentials.host.clone(),
                source,
            })
    }

    /// Create the VDI for `options.pv_name` and describe the resulting volume.
    pub fn provision(&self, options: &VolumeOptions) -> VolumeResult<VolumeDescriptor> {
        info!("Provision called for volume: {}", options.pv_name);
        let result = self.provision_disk(options);
        if let Err(err) = &result {
            error!("Failed to provision volume {}: {}", options.pv_name, err);
        }
        let capacity_bytes = result?;

        let credentials = &self.config.credentials;
        let driver_options = BTreeMap::from([
            (HOST_OPTION.to_string(), credentials.host.clone()),
            (USERNAME_OPTION.to_string(), credentials.username.clone()),
            (PASSWORD_OPTION.to_string(), credentials.password.clone()),
        ]);
        Ok(VolumeDescriptor {
            name: options.pv_name.clone(),
            capacity_bytes,
            access_modes: options.access_modes.clone(),
            reclaim_policy: options.reclaim_policy.clone(),
            driver: DRIVER_NAME.to_string(),
            fs_type: DESCRIPTOR_FS_TYPE.to_string(),
            options: driver_options,
        })
    }

    fn provision_disk(&self, options: &VolumeOptions) -> VolumeResult<u64> {
        if options.pv_name.trim().is_empty() {
            return Err(VolumeError::Validation("volume name is required".to_string()));
        }
        let sr_label = options
            .parameters
            .get(SR_NAME_PARAMETER)
            .map(String::as_str)
            .unwrap_or_default();
        let capacity = options.capacity_bytes.ok_or_else(|| {
            VolumeError::Validation(format!(
                "capacity was not specified for volume {}",
                options.pv_name
            ))
        })?;

        let xapi = self.connect()?;
        with_session(&xapi, &self.config.credentials, &self.session_options(), |session| {
            create_disk(session, &options.pv_name, sr_label, capacity)
        })?;
        Ok(capacity)
    }

    /// Delete the VDI behind `descriptor`. A missing VDI is not an error.
    pub fn delete(&self, descriptor: &VolumeDescriptor) -> VolumeResult<()> {
        info!("Delete called for volume: {}", descriptor.name);
        let xapi = self.connect()?;
        let result = with_session(&xapi, &self.config.credentials, &self.session_options(), |session| {
            delete_disk(session, &descriptor.name)
        });
        if let Err(err) = &result {
            error!("Failed to delete volume {}: {}", descriptor.name, err);
        }
        result
    }
}
