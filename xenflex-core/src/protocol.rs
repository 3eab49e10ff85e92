//! Orchestrator plugin protocol: `<command> [<mount dir>] [<json options>]`
//! in, one JSON object on stdout and an exit code out.

use crate::driver::VolumeDriver;
use crate::errors::{VolumeError, VolumeResult};
use log::{error, info};
use serde::Serialize;
use std::path::PathBuf;
use xenflex_hal::HostHal;
use xenflex_xapi::XapiConnector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    Init,
    Mount { target: PathBuf, options: String },
    Unmount { target: PathBuf },
    Unsupported(String),
}

impl DriverCommand {
    /// Parse the arguments following the program name.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> VolumeResult<Self> {
        let arg = |i: usize| args.get(i).map(|a| a.as_ref());
        let Some(command) = arg(0) else {
            return Ok(DriverCommand::Unsupported(String::new()));
        };
        match command {
            "init" => Ok(DriverCommand::Init),
            "mount" => match (arg(1), arg(2)) {
                (Some(target), Some(options)) => Ok(DriverCommand::Mount {
                    target: PathBuf::from(target),
                    options: options.to_string(),
                }),
                _ => Err(VolumeError::Validation(
                    "mount expects <mount dir> <json options>".to_string(),
                )),
            },
            "unmount" => match arg(1) {
                Some(target) => Ok(DriverCommand::Unmount {
                    target: PathBuf::from(target),
                }),
                None => Err(VolumeError::Validation(
                    "unmount expects <mount dir>".to_string(),
                )),
            },
            other => Ok(DriverCommand::Unsupported(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverStatus {
    Success,
    Failure,
    #[serde(rename = "Not supported")]
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub attach: bool,
}

/// The JSON object printed for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverOutput {
    pub status: DriverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

impl DriverOutput {
    pub fn success() -> Self {
        Self {
            status: DriverStatus::Success,
            message: None,
            capabilities: None,
        }
    }

    /// Reply to `init`: attach/detach are folded into mount/unmount.
    pub fn init() -> Self {
        Self {
            capabilities: Some(Capabilities { attach: false }),
            ..Self::success()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: DriverStatus::Failure,
            message: Some(message.into()),
            capabilities: None,
        }
    }

    pub fn not_supported() -> Self {
        Self {
            status: DriverStatus::NotSupported,
            message: None,
            capabilities: None,
        }
    }

    pub fn from_result(result: VolumeResult<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(err) => Self::failure(err.to_string()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            DriverStatus::Success => 0,
            DriverStatus::Failure | DriverStatus::NotSupported => 1,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"status":"Failure","message":"could not encode driver output"}"#.to_string()
        })
    }
}

/// Dispatch one plugin invocation.
pub fn run<C, H, S>(driver: &VolumeDriver<C, H>, args: &[S]) -> DriverOutput
where
    C: XapiConnector,
    H: HostHal,
    S: AsRef<str>,
{
    let command = match DriverCommand::parse(args) {
        Ok(command) => command,
        Err(err) => return DriverOutput::failure(err.to_string()),
    };

    let output = match &command {
        DriverCommand::Init => DriverOutput::init(),
        DriverCommand::Mount { target, options } => {
            DriverOutput::from_result(driver.mount(target, options.as_bytes()))
        }
        DriverCommand::Unmount { target } => DriverOutput::from_result(driver.unmount(target)),
        DriverCommand::Unsupported(name) => {
            info!("Unsupported driver command {:?}", name);
            DriverOutput::not_supported()
        }
    };
    match &output.message {
        Some(message) => error!("{} failed: {}", command_name(&command), message),
        None => info!("{} finished: {:?}", command_name(&command), output.status),
    }
    output
}

fn command_name(command: &DriverCommand) -> &str {
    match command {
        DriverCommand::Init => "init",
        DriverCommand::Mount { .. } => "mount",
        DriverCommand::Unmount { .. } => "unmount",
        DriverCommand::Unsupported(name) => name,
    }
}
