//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub fstype: String,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <id> <parent> <major:minor> <root> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let fstype = post_fields.next()?.to_string();
            let source = unescape_mount_path(post_fields.next()?);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                fstype,
                source,
            })
        })
        .collect()
}

/// Source of the mount sitting exactly at `path`.
///
/// Later lines in mountinfo are mounted on top of earlier ones, so the last match wins.
pub fn mount_source_from_info(path: &Path, entries: &[MountInfo]) -> Option<String> {
    let target = normalize_path(path);
    entries
        .iter()
        .rev()
        .find(|entry| normalize_path(&entry.mount_point) == target)
        .map(|entry| entry.source.clone())
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
