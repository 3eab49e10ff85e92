//! Request parsing and process configuration.
//!
//! The orchestrator hands the driver a flat JSON object of string options.
//! [`VolumeRequest`] mirrors it verbatim; [`VolumeRequest::validate`] turns it
//! into a [`ValidatedRequest`] with exhaustive enums before anything remote or
//! destructive happens.

use crate::errors::{VolumeError, VolumeResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use xenflex_xapi::{RetryPolicy, VbdMode};

pub const DEFAULT_FS_TYPE: &str = "ext4";
pub const DEFAULT_DRIVER_CONFIG: &str = "/etc/xenflex/driver.toml";
pub const DEFAULT_DRIVER_LOG: &str = "/tmp/xenflex-driver.log";
pub const DEFAULT_PRIMARY_INTERFACE: &str = "eth0";

/// Driver option keys carrying the hypervisor credentials.
pub const HOST_OPTION: &str = "xenflex.io/xenserver/host";
pub const USERNAME_OPTION: &str = "xenflex.io/xenserver/username";
pub const PASSWORD_OPTION: &str = "xenflex.io/xenserver/password";

pub const DRIVER_CONFIG_ENV: &str = "XENFLEX_DRIVER_CONFIG";
pub const DRIVER_LOG_ENV: &str = "XENFLEX_DRIVER_LOG";
pub const HOST_ENV: &str = "XENSERVER_HOST";
pub const USERNAME_ENV: &str = "XENSERVER_USERNAME";
pub const PASSWORD_ENV: &str = "XENSERVER_PASSWORD";

/// Options passed by the orchestrator on `mount`, as they arrive.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    #[serde(rename = "kubernetes.io/fsType", default)]
    pub fs_type: String,
    #[serde(rename = "kubernetes.io/readwrite", default)]
    pub readwrite: String,
    #[serde(rename = "kubernetes.io/pvOrVolumeName", default)]
    pub volume_name: String,
    #[serde(rename = "kubernetes.io/fsGroup", default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<String>,
    #[serde(rename = "kubernetes.io/pod.name", default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(rename = "kubernetes.io/pod.namespace", default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,
    #[serde(rename = "kubernetes.io/pod.uid", default, skip_serializing_if = "Option::is_none")]
    pub pod_uid: Option<String>,
    #[serde(
        rename = "kubernetes.io/serviceAccount.name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_account: Option<String>,
    #[serde(rename = "xenflex.io/xenserver/host", default)]
    pub host: String,
    #[serde(rename = "xenflex.io/xenserver/username", default)]
    pub username: String,
    #[serde(rename = "xenflex.io/xenserver/password", default)]
    pub password: String,
}

impl fmt::Debug for VolumeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeRequest")
            .field("fs_type", &self.fs_type)
            .field("readwrite", &self.readwrite)
            .field("volume_name", &self.volume_name)
            .field("pod_namespace", &self.pod_namespace)
            .field("pod_name", &self.pod_name)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl VolumeRequest {
    pub fn parse(raw: &[u8]) -> VolumeResult<Self> {
        serde_json::from_slice(raw).map_err(VolumeError::MalformedRequest)
    }

    pub fn validate(&self) -> VolumeResult<ValidatedRequest> {
        let mode = AccessMode::parse(&self.readwrite)?;
        if self.volume_name.trim().is_empty() {
            return Err(VolumeError::Validation(
                "kubernetes.io/pvOrVolumeName is required".to_string(),
            ));
        }
        let fs_type = if self.fs_type.trim().is_empty() {
            DEFAULT_FS_TYPE.to_string()
        } else {
            self.fs_type.trim().to_string()
        };
        let credentials = Credentials::new(&self.host, &self.username, &self.password);
        credentials.validate()?;

        Ok(ValidatedRequest {
            fs_type,
            mode,
            volume_name: self.volume_name.clone(),
            credentials,
        })
    }
}

/// Read/write mode of a mount and of the VBD backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    /// Accepts exactly `ro` or `rw`.
    pub fn parse(value: &str) -> VolumeResult<Self> {
        match value {
            "ro" => Ok(AccessMode::ReadOnly),
            "rw" => Ok(AccessMode::ReadWrite),
            other => Err(VolumeError::Validation(format!(
                "kubernetes.io/readwrite must be \"ro\" or \"rw\", got {:?}",
                other
            ))),
        }
    }

    pub fn is_read_only(self) -> bool {
        self == AccessMode::ReadOnly
    }
}

impl From<AccessMode> for VbdMode {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::ReadOnly => VbdMode::ReadOnly,
            AccessMode::ReadWrite => VbdMode::ReadWrite,
        }
    }
}

/// Management endpoint and login.
#[derive(Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(host: &str, username: &str, password: &str) -> Self {
        Self {
            host: host.trim().to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn validate(&self) -> VolumeResult<()> {
        if self.host.is_empty() {
            return Err(VolumeError::Validation(format!("{} is required", HOST_OPTION)));
        }
        if self.username.is_empty() {
            return Err(VolumeError::Validation(format!(
                "{} is required",
                USERNAME_OPTION
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub fs_type: String,
    pub mode: AccessMode,
    pub volume_name: String,
    pub credentials: Credentials,
}

/// Host-local driver settings (`/etc/xenflex/driver.toml`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Debug log; written only if the file already exists.
    pub log_file: PathBuf,
    /// Interface whose MAC identifies this VM.
    pub primary_interface: String,
    pub verify_tls: bool,
    /// Applied to read-only hypervisor queries.
    pub retry: RetryPolicy,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from(DEFAULT_DRIVER_LOG),
            primary_interface: DEFAULT_PRIMARY_INTERFACE.to_string(),
            verify_tls: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl DriverSettings {
    /// Load settings from `XENFLEX_DRIVER_CONFIG` or the default path. A missing
    /// file yields defaults; `XENFLEX_DRIVER_LOG` overrides the log path.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(DRIVER_CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DRIVER_CONFIG));
        let mut settings = Self::load_from(&path)?;
        if let Some(log) = std::env::var_os(DRIVER_LOG_ENV) {
            settings.log_file = PathBuf::from(log);
        }
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read driver config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse driver config: {}", path.display()))
    }
}

/// Provisioner settings: environment first, then an optional TOML file.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    pub credentials: Credentials,
    /// Provisioner name; also the session originator.
    pub name: String,
    pub verify_tls: bool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProvisionerFile {
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    name: Option<String>,
    verify_tls: Option<bool>,
    retry: Option<RetryPolicy>,
}

impl fmt::Debug for ProvisionerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerConfig")
            .field("credentials", &self.credentials)
            .field("name", &self.name)
            .field("verify_tls", &self.verify_tls)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProvisionerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).unwrap_or_default();
        Self {
            credentials: Credentials::new(&get(HOST_ENV), &get(USERNAME_ENV), &get(PASSWORD_ENV)),
            name: crate::provisioner::PROVISIONER_NAME.to_string(),
            verify_tls: true,
            retry: RetryPolicy::default(),
        }
    }

    /// Apply the values present in a TOML file on top of `self`.
    pub fn merge_file(mut self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read provisioner config: {}", path.display()))?;
        let file: ProvisionerFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse provisioner config: {}", path.display()))?;

        if let Some(host) = file.host {
            self.credentials.host = host.trim().to_string();
        }
        if let Some(username) = file.username {
            self.credentials.username = username;
        }
        if let Some(password) = file.password {
            self.credentials.password = password;
        }
        if let Some(name) = file.name {
            self.name = name;
        }
        if let Some(verify_tls) = file.verify_tls {
            self.verify_tls = verify_tls;
        }
        if let Some(retry) = file.retry {
            self.retry = retry;
        }
        Ok(self)
    }
}
