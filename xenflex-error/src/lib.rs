use std::io;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type XapiResult<T> = Result<T, XapiError>;

/// XenAPI error code returned when a guest refuses a graceful unplug.
pub const DEVICE_DETACH_REJECTED: &str = "DEVICE_DETACH_REJECTED";

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Device or mount point is busy")]
    Busy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),
}

#[derive(Error, Debug)]
pub enum XapiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {status}")]
    Http { status: u16 },

    /// A failure reported by the hypervisor itself (`code` is the XenAPI error name).
    #[error("{code} {params:?}")]
    Api { code: String, params: Vec<String> },

    #[error("could not decode response to {method}: {message}")]
    Decode { method: String, message: String },
}

impl XapiError {
    pub fn api(code: impl Into<String>) -> Self {
        XapiError::Api {
            code: code.into(),
            params: Vec::new(),
        }
    }

    /// Returns true if this is an API failure carrying the given error code.
    pub fn has_code(&self, expected: &str) -> bool {
        matches!(self, XapiError::Api { code, .. } if code == expected)
    }

    /// Failures where the request may not have reached the hypervisor.
    pub fn is_transient(&self) -> bool {
        match self {
            XapiError::Transport(_) => true,
            XapiError::Http { status } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_code_matches_api_errors_only() {
        let err = XapiError::api(DEVICE_DETACH_REJECTED);
        assert!(err.has_code(DEVICE_DETACH_REJECTED));
        assert!(!err.has_code("HANDLE_INVALID"));
        assert!(!XapiError::Transport(DEVICE_DETACH_REJECTED.to_string())
            .has_code(DEVICE_DETACH_REJECTED));
    }

    #[test]
    fn transient_errors_are_transport_and_server_side() {
        assert!(XapiError::Transport("reset".into()).is_transient());
        assert!(XapiError::Http { status: 503 }.is_transient());
        assert!(!XapiError::Http { status: 401 }.is_transient());
        assert!(!XapiError::api("SESSION_INVALID").is_transient());
    }

    #[test]
    fn command_failed_message_includes_stderr() {
        let err = HalError::CommandFailed {
            program: "mkfs".to_string(),
            code: Some(1),
            stderr: "bad superblock".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Command failed: mkfs (exit=Some(1)): bad superblock"
        );
    }
}
