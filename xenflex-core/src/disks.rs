//! Disk Lifecycle Manager: VDI lookup, creation and deletion by name label.

use crate::errors::{VolumeError, VolumeResult};
use crate::session::Session;
use log::{debug, info};
use xenflex_xapi::{NewVdi, SrOps, SrRef, VdiOps, VdiRecord, VdiRef, Xapi};

/// Description stamped on every disk the provisioner creates.
pub const DISK_DESCRIPTION: &str = "Kubernetes Persisted Volume Claim";

/// What to do when more than one VDI matches a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    /// Take the match with the lowest reference.
    FirstMatch,
    /// Fail with [`VolumeError::AmbiguousDisk`].
    Reject,
}

/// A lookup of VDIs by exact name label.
#[derive(Debug, Clone, Copy)]
pub struct DiskQuery<'a> {
    pub name_label: &'a str,
    pub exclude_snapshots: bool,
    pub ambiguity: Ambiguity,
}

impl<'a> DiskQuery<'a> {
    /// Lookup used before attaching: snapshots never match and the first
    /// match wins.
    pub fn for_attach(name_label: &'a str) -> Self {
        Self {
            name_label,
            exclude_snapshots: true,
            ambiguity: Ambiguity::FirstMatch,
        }
    }

    /// Lookup used before deleting: snapshots match too and any ambiguity
    /// is fatal.
    pub fn for_delete(name_label: &'a str) -> Self {
        Self {
            name_label,
            exclude_snapshots: false,
            ambiguity: Ambiguity::Reject,
        }
    }

    fn matches(&self, record: &VdiRecord) -> bool {
        record.name_label == self.name_label && !(self.exclude_snapshots && record.is_a_snapshot)
    }
}

/// Find the VDI selected by `query`, if any.
pub fn find_disk<X: Xapi>(
    session: &Session<'_, X>,
    query: &DiskQuery<'_>,
) -> VolumeResult<Option<(VdiRef, VdiRecord)>> {
    let records = session.query("VDI.get_all_records", |x, s| x.vdi_all_records(s))?;
    // BTreeMap iteration is ordered by reference, so FirstMatch is stable.
    let mut matches: Vec<(VdiRef, VdiRecord)> = records
        .into_iter()
        .filter(|(_, record)| query.matches(record))
        .collect();

    if matches.len() > 1 && query.ambiguity == Ambiguity::Reject {
        return Err(VolumeError::AmbiguousDisk {
            name: query.name_label.to_string(),
            count: matches.len(),
        });
    }
    if matches.len() > 1 {
        debug!(
            "{} VDIs named {}, using {}",
            matches.len(),
            query.name_label,
            matches[0].0
        );
    }
    Ok(if matches.is_empty() {
        None
    } else {
        Some(matches.swap_remove(0))
    })
}

/// The one SR carrying `name_label`.
pub fn resolve_storage_repository<X: Xapi>(
    session: &Session<'_, X>,
    name_label: &str,
) -> VolumeResult<SrRef> {
    let mut srs = session.query("SR.get_by_name_label", |x, s| x.sr_by_name_label(s, name_label))?;
    match srs.len() {
        0 => Err(VolumeError::StorageRepositoryNotFound(name_label.to_string())),
        1 => Ok(srs.remove(0)),
        count => Err(VolumeError::AmbiguousStorageRepository {
            name: name_label.to_string(),
            count,
        }),
    }
}

/// Create a user VDI of `size_bytes` in the SR named `sr_label`.
///
/// The name label is assumed fresh; the orchestrator hands out unique
/// volume names.
pub fn create_disk<X: Xapi>(
    session: &Session<'_, X>,
    name_label: &str,
    sr_label: &str,
    size_bytes: u64,
) -> VolumeResult<VdiRef> {
    let sr = resolve_storage_repository(session, sr_label)?;
    let virtual_size = i64::try_from(size_bytes).map_err(|_| {
        VolumeError::Validation(format!("capacity {} bytes is too large", size_bytes))
    })?;

    let vdi = session
        .xapi()
        .vdi_create(
            session.handle(),
            &NewVdi::user_disk(name_label, DISK_DESCRIPTION, sr.clone(), virtual_size),
        )
        .map_err(VolumeError::remote(format!("VDI.create {}", name_label)))?;
    info!("Created VDI {} ({}) in SR {}", name_label, vdi, sr);
    Ok(vdi)
}

/// Destroy the VDI named `name_label`. A missing disk counts as already deleted.
pub fn delete_disk<X: Xapi>(session: &Session<'_, X>, name_label: &str) -> VolumeResult<()> {
    let Some((vdi, _)) = find_disk(session, &DiskQuery::for_delete(name_label))? else {
        info!("VDI {} does not exist, assuming it was already destroyed", name_label);
        return Ok(());
    };

    session
        .xapi()
        .vdi_destroy(session.handle(), &vdi)
        .map_err(VolumeError::remote(format!("VDI.destroy {}", name_label)))?;
    info!("Destroyed VDI {} ({})", name_label, vdi);
    Ok(())
}
