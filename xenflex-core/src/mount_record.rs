//! Side-car mount records.
//!
//! A successful mount leaves `<target>-json` next to the mount point,
//! holding the request bytes exactly as received. Unmount has nothing else
//! to go on, so the record is written before the mount and removed last.

use crate::config::VolumeRequest;
use crate::errors::{VolumeError, VolumeResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

const RECORD_SUFFIX: &str = "-json";
const RECORD_MODE: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct MountRecord {
    request: VolumeRequest,
}

impl MountRecord {
    /// `<target>-json`, ignoring any trailing slash on `target`.
    pub fn path_for(target: &Path) -> PathBuf {
        let normalized: PathBuf = target.components().collect();
        let mut name = normalized.into_os_string();
        name.push(RECORD_SUFFIX);
        PathBuf::from(name)
    }

    /// Atomically write `raw` as the record for `target`, readable by owner only.
    pub fn persist(target: &Path, raw: &[u8]) -> VolumeResult<PathBuf> {
        let path = Self::path_for(target);
        write_atomic(&path, raw).map_err(|source| VolumeError::Persist {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn load(target: &Path) -> VolumeResult<Self> {
        let path = Self::path_for(target);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(VolumeError::MetadataMissing(path))
            }
            Err(source) => return Err(VolumeError::MetadataRead { path, source }),
        };
        let request = serde_json::from_slice(&raw)
            .map_err(|source| VolumeError::MetadataParse { path, source })?;
        Ok(Self { request })
    }

    /// Delete the record. A record that is already gone is an error.
    pub fn remove(target: &Path) -> VolumeResult<()> {
        let path = Self::path_for(target);
        fs::remove_file(&path).map_err(|source| VolumeError::MetadataRemove { path, source })
    }

    pub fn request(&self) -> &VolumeRequest {
        &self.request
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(RECORD_MODE)
        .open(&tmp_path)?;
    // mode() only applies on creation; a leftover temp file keeps its bits.
    file.set_permissions(fs::Permissions::from_mode(RECORD_MODE))?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all().ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const RAW: &[u8] = br#"{"kubernetes.io/readwrite":"rw","kubernetes.io/pvOrVolumeName":"vol-a"}"#;

    #[test]
    fn path_is_target_with_suffix() {
        assert_eq!(
            MountRecord::path_for(Path::new("/var/lib/kubelet/pods/x/volumes/vol-a")),
            PathBuf::from("/var/lib/kubelet/pods/x/volumes/vol-a-json")
        );
        assert_eq!(
            MountRecord::path_for(Path::new("/mnt/vol/")),
            PathBuf::from("/mnt/vol-json")
        );
    }

    #[test]
    fn persist_writes_exact_bytes_owner_only() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("vol-a");

        let path = MountRecord::persist(&target, RAW).unwrap();

        assert_eq!(path, dir.path().join("vol-a-json"));
        assert_eq!(fs::read(&path).unwrap(), RAW);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!dir.path().join("vol-a-json.tmp").exists());
    }

    #[test]
    fn load_round_trips_request() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("vol-a");
        MountRecord::persist(&target, RAW).unwrap();

        let record = MountRecord::load(&target).unwrap();
        assert_eq!(record.request().volume_name, "vol-a");
        assert_eq!(record.request().readwrite, "rw");
    }

    #[test]
    fn load_distinguishes_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("vol-a");
        assert!(matches!(
            MountRecord::load(&target),
            Err(VolumeError::MetadataMissing(_))
        ));

        fs::write(MountRecord::path_for(&target), b"{truncated").unwrap();
        assert!(matches!(
            MountRecord::load(&target),
            Err(VolumeError::MetadataParse { .. })
        ));
    }

    #[test]
    fn removing_twice_fails() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("vol-a");
        MountRecord::persist(&target, RAW).unwrap();

        MountRecord::remove(&target).unwrap();
        assert!(matches!(
            MountRecord::remove(&target),
            Err(VolumeError::MetadataRemove { .. })
        ));
    }
}
