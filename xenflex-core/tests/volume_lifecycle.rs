//! End-to-end mount/unmount and provision/delete against the fake hypervisor
//! and fake host.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use xenflex_core::config::{Credentials, DriverSettings, ProvisionerConfig};
use xenflex_core::provisioner::{DRIVER_NAME, SR_NAME_PARAMETER};
use xenflex_core::{MountRecord, Provisioner, VolumeDescriptor, VolumeDriver, VolumeError, VolumeOptions};
use xenflex_hal::{FakeHal, MountOps, Operation as HalOperation};
use xenflex_xapi::{FakeXapi, Operation, SrRef, VbdMode, VdiRef, VmRef};

const MAC: &str = "8e:1f:3a:00:00:01";

struct World {
    xapi: FakeXapi,
    hal: FakeHal,
    vm: VmRef,
    sr: SrRef,
    dir: TempDir,
}

impl World {
    fn new() -> Self {
        let xapi = FakeXapi::new();
        let vm = xapi.add_vm("k8s-node-1");
        xapi.add_vif(&vm, MAC, true);
        let sr = xapi.add_sr("Local storage");
        let root = xapi.add_vdi("k8s-node-1 root", &sr, 20 << 30);
        xapi.add_vbd(&vm, &root, "0", true);

        Self {
            xapi,
            hal: FakeHal::with_primary_mac(MAC),
            vm,
            sr,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn driver(&self) -> VolumeDriver<FakeXapi, FakeHal> {
        VolumeDriver::new(self.xapi.clone(), self.hal.clone(), DriverSettings::default())
    }

    /// Mount point for `name`; like the kubelet, the parent directory exists.
    fn target(&self, name: &str) -> PathBuf {
        let parent = self.dir.path().join("pods/uid/volumes/xenflex.io~xenserver");
        fs::create_dir_all(&parent).unwrap();
        parent.join(name)
    }

    fn disk(&self, name: &str) -> VdiRef {
        self.xapi.add_vdi(name, &self.sr, 1 << 30)
    }
}

fn request(mode: &str, volume: &str) -> String {
    format!(
        r#"{{"kubernetes.io/fsType":"ext4","kubernetes.io/readwrite":"{mode}","kubernetes.io/pvOrVolumeName":"{volume}","xenflex.io/xenserver/host":"h","xenflex.io/xenserver/username":"u","xenflex.io/xenserver/password":"p"}}"#
    )
}

#[test]
fn mount_formats_blank_disk_and_records_request() {
    let world = World::new();
    world.disk("vol-a");
    let target = world.target("vol-a");
    let raw = request("rw", "vol-a");

    world.driver().mount(&target, raw.as_bytes()).unwrap();

    assert_eq!(
        world
            .hal
            .count_operations(|op| matches!(op, HalOperation::MakeFilesystem { fstype, .. } if fstype == "ext4")),
        1
    );
    let mounts: Vec<_> = world
        .hal
        .operations()
        .into_iter()
        .filter_map(|op| match op {
            HalOperation::Mount { device, options, .. } => Some((device, options)),
            _ => None,
        })
        .collect();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].0, PathBuf::from("/dev/xvdb"));
    assert!(!mounts[0].1.read_only);

    assert_eq!(fs::read(MountRecord::path_for(&target)).unwrap(), raw.as_bytes());
    assert_eq!(world.xapi.live_sessions(), 0);
}

#[test]
fn read_only_request_maps_to_read_only_vbd_and_mount() {
    let world = World::new();
    let vdi = world.disk("vol-ro");
    let target = world.target("vol-ro");

    world
        .driver()
        .mount(&target, request("ro", "vol-ro").as_bytes())
        .unwrap();

    let vbds = world.xapi.vbds_for(&vdi);
    assert_eq!(vbds.len(), 1);
    assert_eq!(vbds[0].1.mode, VbdMode::ReadOnly);
    assert!(world
        .hal
        .has_operation(|op| matches!(op, HalOperation::Mount { options, .. } if options.read_only)));
}

#[test]
fn invalid_mode_makes_no_remote_or_host_calls() {
    let world = World::new();
    world.disk("vol-a");
    let target = world.target("vol-a");

    let err = world
        .driver()
        .mount(&target, request("rwx", "vol-a").as_bytes())
        .unwrap_err();

    assert!(matches!(err, VolumeError::Validation(_)));
    assert_eq!(world.xapi.operation_count(), 0);
    assert_eq!(world.hal.operation_count(), 0);
    assert!(!MountRecord::path_for(&target).exists());
}

#[test]
fn mount_then_unmount_leaves_nothing_behind() {
    let world = World::new();
    let vdi = world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();

    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();
    assert!(world.hal.is_mounted(&target).unwrap());
    assert_eq!(world.xapi.vbds_for(&vdi).len(), 1);

    driver.unmount(&target).unwrap();

    assert!(!world.hal.is_mounted(&target).unwrap());
    assert!(!MountRecord::path_for(&target).exists());
    assert!(world.xapi.vbds_for(&vdi).is_empty());
    assert!(world.xapi.vdi(&vdi).is_some());
    assert!(world
        .xapi
        .has_operation(|op| matches!(op, Operation::VbdDestroy { .. })));
    assert_eq!(world.xapi.live_sessions(), 0);
}

#[test]
fn second_unmount_reports_missing_record() {
    let world = World::new();
    world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();

    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();
    driver.unmount(&target).unwrap();

    let err = driver.unmount(&target).unwrap_err();
    assert!(matches!(err, VolumeError::MetadataMissing(_)));
}

#[test]
fn remount_after_crash_replaces_stale_attachment() {
    let world = World::new();
    let vdi = world.disk("vol-a");
    let stale = world.xapi.add_vbd(&world.vm, &vdi, "4", true);
    world.hal.set_signature("/dev/xvdb", "TYPE=\"ext4\"");
    let target = world.target("vol-a");

    world
        .driver()
        .mount(&target, request("rw", "vol-a").as_bytes())
        .unwrap();

    assert!(world.xapi.vbd(&stale).is_none());
    let vbds = world.xapi.vbds_for(&vdi);
    assert_eq!(vbds.len(), 1);
    assert!(vbds[0].1.currently_attached);

    let ops = world.xapi.operations();
    let destroy = ops
        .iter()
        .position(|op| op == &Operation::VbdDestroy { vbd: stale.clone() })
        .unwrap();
    let create = ops
        .iter()
        .position(|op| matches!(op, Operation::VbdCreate { .. }))
        .unwrap();
    assert!(destroy < create);
    assert!(!world
        .hal
        .has_operation(|op| matches!(op, HalOperation::MakeFilesystem { .. })));
}

#[test]
fn rejected_unplug_on_unmount_is_forced_then_destroyed() {
    let world = World::new();
    let vdi = world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();
    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();

    world.xapi.reject_graceful_unplug(true);
    world.xapi.clear();
    driver.unmount(&target).unwrap();

    let detach_ops: Vec<_> = world
        .xapi
        .operations()
        .into_iter()
        .filter(|op| {
            matches!(
                op,
                Operation::VbdUnplug { .. }
                    | Operation::VbdUnplugForce { .. }
                    | Operation::VbdDestroy { .. }
            )
        })
        .collect();
    assert!(matches!(
        detach_ops.as_slice(),
        [
            Operation::VbdUnplug { .. },
            Operation::VbdUnplugForce { .. },
            Operation::VbdDestroy { .. }
        ]
    ));
    assert!(world.xapi.vbds_for(&vdi).is_empty());
}

#[test]
fn other_unplug_errors_abort_unmount() {
    let world = World::new();
    let vdi = world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();
    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();

    world.xapi.fail_unplug(Some("INTERNAL_ERROR"));
    world.xapi.clear();
    let err = driver.unmount(&target).unwrap_err();

    assert!(err.xapi_error().is_some_and(|e| e.has_code("INTERNAL_ERROR")));
    assert!(!world.xapi.has_operation(|op| matches!(
        op,
        Operation::VbdUnplugForce { .. } | Operation::VbdDestroy { .. }
    )));
    assert_eq!(world.xapi.vbds_for(&vdi).len(), 1);
    // The record is only removed after a successful detach.
    assert!(MountRecord::path_for(&target).exists());
    assert_eq!(world.xapi.live_sessions(), 0);
}

#[test]
fn unmount_retry_after_failed_detach_completes() {
    let world = World::new();
    let vdi = world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();
    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();

    world.xapi.fail_unplug(Some("INTERNAL_ERROR"));
    driver.unmount(&target).unwrap_err();
    assert!(!world.hal.is_mounted(&target).unwrap());
    assert!(MountRecord::path_for(&target).exists());

    world.xapi.fail_unplug(None);
    driver.unmount(&target).unwrap();

    assert!(world.xapi.vbds_for(&vdi).is_empty());
    assert!(!MountRecord::path_for(&target).exists());
    assert_eq!(world.xapi.live_sessions(), 0);
}

#[test]
fn unmount_resolves_vm_before_touching_the_mount() {
    let world = World::new();
    world.disk("vol-a");
    let target = world.target("vol-a");
    let driver = world.driver();
    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();

    world.hal.set_interfaces(Vec::new());
    let err = driver.unmount(&target).unwrap_err();

    assert!(matches!(err, VolumeError::InterfaceNotFound(_)));
    assert!(world.hal.is_mounted(&target).unwrap());
    assert!(!world
        .hal
        .has_operation(|op| matches!(op, HalOperation::UnmountDetach { .. })));
    assert!(MountRecord::path_for(&target).exists());
}

#[test]
fn logout_failure_fails_an_otherwise_successful_mount() {
    let world = World::new();
    world.disk("vol-a");
    world.xapi.fail_logout(true);
    let target = world.target("vol-a");

    let err = world
        .driver()
        .mount(&target, request("rw", "vol-a").as_bytes())
        .unwrap_err();

    assert!(matches!(err, VolumeError::Logout(_)));
    assert!(world.hal.is_mounted(&target).unwrap());
}

#[test]
fn attach_tolerates_duplicate_names_but_delete_does_not() {
    let world = World::new();
    let first = world.disk("vol-dup");
    let second = world.disk("vol-dup");
    let target = world.target("vol-dup");

    world
        .driver()
        .mount(&target, request("rw", "vol-dup").as_bytes())
        .unwrap();
    assert_eq!(world.xapi.vbds_for(&first).len(), 1);
    assert!(world.xapi.vbds_for(&second).is_empty());

    let provisioner = Provisioner::new(world.xapi.clone(), provisioner_config());
    let err = provisioner
        .delete(&VolumeDescriptor::named("vol-dup"))
        .unwrap_err();
    assert!(matches!(err, VolumeError::AmbiguousDisk { count: 2, .. }));
}

fn provisioner_config() -> ProvisionerConfig {
    let env = BTreeMap::from([
        ("XENSERVER_HOST", "xen01"),
        ("XENSERVER_USERNAME", "root"),
        ("XENSERVER_PASSWORD", "secret"),
    ]);
    ProvisionerConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
}

fn volume_options(name: &str, capacity: Option<u64>) -> VolumeOptions {
    VolumeOptions {
        pv_name: name.to_string(),
        capacity_bytes: capacity,
        access_modes: vec!["ReadWriteOnce".to_string()],
        reclaim_policy: "Delete".to_string(),
        parameters: BTreeMap::from([(SR_NAME_PARAMETER.to_string(), "Local storage".to_string())]),
    }
}

#[test]
fn provision_creates_disk_and_describes_volume() {
    let world = World::new();
    let provisioner = Provisioner::new(world.xapi.clone(), provisioner_config());

    let descriptor = provisioner
        .provision(&volume_options("pvc-1234", Some(2 << 30)))
        .unwrap();

    assert_eq!(descriptor.name, "pvc-1234");
    assert_eq!(descriptor.capacity_bytes, 2 << 30);
    assert_eq!(descriptor.driver, DRIVER_NAME);
    assert_eq!(descriptor.fs_type, "ext4");
    assert_eq!(descriptor.access_modes, vec!["ReadWriteOnce"]);
    assert_eq!(descriptor.options["xenflex.io/xenserver/host"], "xen01");
    assert_eq!(descriptor.options["xenflex.io/xenserver/password"], "secret");

    let created = world
        .xapi
        .vdis()
        .into_values()
        .find(|r| r.name_label == "pvc-1234")
        .unwrap();
    assert_eq!(created.virtual_size, 2 << 30);
    assert_eq!(created.sr, world.sr);
    assert!(world.xapi.has_operation(|op| matches!(
        op,
        Operation::Connect { host } if host == "xen01"
    )));
}

#[test]
fn provision_without_capacity_fails_before_login() {
    let world = World::new();
    let provisioner = Provisioner::new(world.xapi.clone(), provisioner_config());

    let err = provisioner
        .provision(&volume_options("pvc-1", None))
        .unwrap_err();

    assert!(matches!(err, VolumeError::Validation(_)));
    assert!(!world
        .xapi
        .has_operation(|op| matches!(op, Operation::Login { .. })));
}

#[test]
fn provisioned_volume_can_be_mounted_and_deleted() {
    let world = World::new();
    let provisioner = Provisioner::new(world.xapi.clone(), provisioner_config());
    let descriptor = provisioner
        .provision(&volume_options("pvc-e2e", Some(1 << 30)))
        .unwrap();

    let mut options: BTreeMap<String, String> = descriptor.options.clone();
    options.insert("kubernetes.io/readwrite".into(), "rw".into());
    options.insert("kubernetes.io/pvOrVolumeName".into(), descriptor.name.clone());
    options.insert("kubernetes.io/fsType".into(), descriptor.fs_type.clone());
    let raw = serde_json::to_vec(&options).unwrap();
    let target = world.target("pvc-e2e");

    let driver = world.driver();
    driver.mount(&target, &raw).unwrap();
    driver.unmount(&target).unwrap();
    provisioner.delete(&descriptor).unwrap();

    assert!(world
        .xapi
        .vdis()
        .values()
        .all(|r| r.name_label != "pvc-e2e"));
}

#[test]
fn deleting_unknown_disk_succeeds() {
    let world = World::new();
    let provisioner = Provisioner::new(world.xapi.clone(), provisioner_config());
    provisioner
        .delete(&VolumeDescriptor::named("pvc-gone"))
        .unwrap();
    assert!(!world
        .xapi
        .has_operation(|op| matches!(op, Operation::VdiDestroy { .. })));
}

#[test]
fn credentials_come_from_the_mount_record_on_unmount() {
    let world = World::new();
    world.disk("vol-a");
    world.xapi.require_credentials("u", "p");
    let target = world.target("vol-a");
    let driver = world.driver();
    driver.mount(&target, request("rw", "vol-a").as_bytes()).unwrap();

    let record = MountRecord::load(&target).unwrap();
    let credentials = record.request().validate().unwrap().credentials;
    assert_eq!(credentials, Credentials::new("h", "u", "p"));
    driver.unmount(&target).unwrap();
}
