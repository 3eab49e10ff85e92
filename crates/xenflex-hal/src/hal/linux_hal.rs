//! Linux HAL implementation using real system calls.

use super::{FormatOps, MountOps, MountOptions, NetInterface, NetOps, ProbeOps};
use crate::{HalError, HalResult};
use nix::mount::{MntFlags, MsFlags};
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// blkid exits with 2 when the device carries no recognizable signature.
const BLKID_NO_SIGNATURE: i32 = 2;

fn map_command_err(program: &str, err: io::Error) -> HalError {
    match err.kind() {
        io::ErrorKind::NotFound => HalError::CommandNotFound(program.to_string()),
        _ => HalError::Io(err),
    }
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Read a child pipe to the end on its own thread so neither pipe can fill
/// up and stall the child.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Run `cmd` with stdin closed, killing it once `timeout` elapses.
fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    log::debug!("running {:?}", cmd);
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = child.wait_timeout(timeout)? else {
        let _ = child.kill();
        let _ = child.wait();
        let _ = (stdout.join(), stderr.join());
        log::warn!("{} did not finish within {:?}", program, timeout);
        return Err(HalError::CommandTimeout {
            program: program.to_string(),
            timeout_secs: timeout.as_secs(),
        });
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::Busy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn ms_flags(options: &MountOptions) -> MsFlags {
    let mut flags = MsFlags::empty();
    if options.read_only {
        flags |= MsFlags::MS_RDONLY;
    }
    if options.noexec {
        flags |= MsFlags::MS_NOEXEC;
    }
    if options.nosuid {
        flags |= MsFlags::MS_NOSUID;
    }
    if options.nodev {
        flags |= MsFlags::MS_NODEV;
    }
    flags
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: &str,
        options: &MountOptions,
    ) -> HalResult<()> {
        log::debug!(
            "mount {} -> {} (type: {}, {:?})",
            device.display(),
            target.display(),
            fstype,
            options
        );
        nix::mount::mount(
            Some(device),
            target,
            Some(fstype),
            ms_flags(options),
            None::<&str>,
        )
        .map_err(map_nix_err)
    }

    fn unmount_detach(&self, target: &Path) -> HalResult<()> {
        log::debug!("umount -l {}", target.display());
        nix::mount::umount2(target, MntFlags::MNT_DETACH).map_err(map_nix_err)
    }

    fn mount_source(&self, target: &Path) -> HalResult<Option<String>> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);
        Ok(crate::procfs::mountinfo::mount_source_from_info(
            target, &entries,
        ))
    }
}

impl FormatOps for LinuxHal {
    fn make_filesystem(&self, device: &Path, fstype: &str) -> HalResult<()> {
        let mut cmd = Command::new("mkfs");
        cmd.args(["-t", fstype]).arg(device);
        let output = output_with_timeout("mkfs", &mut cmd, FORMAT_TIMEOUT)?;

        if !output.status.success() {
            return Err(output_failed("mkfs", &output));
        }

        Ok(())
    }
}

impl ProbeOps for LinuxHal {
    fn filesystem_signature(&self, device: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("blkid");
        cmd.arg(device);
        let output = output_with_timeout("blkid", &mut cmd, PROBE_TIMEOUT)?;

        if output.status.code() == Some(BLKID_NO_SIGNATURE) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(output_failed("blkid", &output));
        }

        let signature = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!signature.is_empty()).then_some(signature))
    }
}

impl NetOps for LinuxHal {
    fn network_interfaces(&self) -> HalResult<Vec<NetInterface>> {
        crate::sysfs::net::scan_interfaces()
    }
}
