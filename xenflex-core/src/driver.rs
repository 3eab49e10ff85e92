//! Volume driver: the mount and unmount workflows end to end.

use crate::attach::{attach, detach_device, detach_disk};
use crate::config::{DriverSettings, ValidatedRequest, VolumeRequest};
use crate::errors::{VolumeError, VolumeResult};
use crate::identity::resolve_vm;
use crate::mount::{mount_volume, unmount_target};
use crate::mount_record::MountRecord;
use crate::session::{with_session, SessionOptions, DRIVER_ORIGINATOR};
use log::{info, warn};
use std::path::Path;
use xenflex_hal::HostHal;
use xenflex_xapi::XapiConnector;

pub struct VolumeDriver<C: XapiConnector, H: HostHal> {
    connector: C,
    hal: H,
    settings: DriverSettings,
}

impl<C: XapiConnector, H: HostHal> VolumeDriver<C, H> {
    pub fn new(connector: C, hal: H, settings: DriverSettings) -> Self {
        Self {
            connector,
            hal,
            settings,
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            originator: DRIVER_ORIGINATOR.to_string(),
            retry: self.settings.retry,
        }
    }

    fn connect(&self, request: &ValidatedRequest) -> VolumeResult<C::Client> {
        self.connector
            .connect(&request.credentials.host)
            .map_err(|source| VolumeError::Login {
                host: request.credentials.host.clone(),
                source,
            })
    }

    /// Attach the requested disk to this VM and mount it at `target`.
    ///
    /// `raw_request` is the JSON option object exactly as the orchestrator
    /// passed it; it becomes the mount record.
    pub fn mount(&self, target: &Path, raw_request: &[u8]) -> VolumeResult<()> {
        let request = VolumeRequest::parse(raw_request)?.validate()?;
        info!(
            "Mounting {} at {} ({:?})",
            request.volume_name,
            target.display(),
            request.mode
        );

        let xapi = self.connect(&request)?;
        with_session(&xapi, &request.credentials, &self.session_options(), |session| {
            let vm = resolve_vm(session, &self.hal, &self.settings.primary_interface)?;
            let attachment = attach(session, &vm, &request.volume_name, request.mode)?;
            mount_volume(
                &self.hal,
                &attachment.device_path,
                &request,
                target,
                raw_request,
            )
        })
    }

    /// Unmount `target` and detach the disk behind it, using the mount record
    /// left by [`VolumeDriver::mount`].
    ///
    /// If `target` is no longer mounted (an earlier unmount got as far as the
    /// lazy detach and then failed), the disk is detached by the volume name
    /// kept in the record instead.
    pub fn unmount(&self, target: &Path) -> VolumeResult<()> {
        let record = MountRecord::load(target)?;
        let request = record.request().validate()?;
        info!("Unmounting {} from {}", request.volume_name, target.display());

        let xapi = self.connect(&request)?;
        with_session(&xapi, &request.credentials, &self.session_options(), |session| {
            let vm = resolve_vm(session, &self.hal, &self.settings.primary_interface)?;
            match unmount_target(&self.hal, target) {
                Ok(device) => {
                    detach_device(session, &vm, &device)?;
                }
                Err(VolumeError::NotMounted(_)) => {
                    warn!(
                        "{} is not mounted, detaching {} by name",
                        target.display(),
                        request.volume_name
                    );
                    detach_disk(session, &vm, &request.volume_name)?;
                }
                Err(err) => return Err(err),
            }
            MountRecord::remove(target)
        })
    }
}
