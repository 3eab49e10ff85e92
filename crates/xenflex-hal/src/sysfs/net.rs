//! Helpers related to network interfaces in sysfs.

use crate::{HalResult, NetInterface};
use std::fs;
use std::path::{Path, PathBuf};

pub fn scan_interfaces() -> HalResult<Vec<NetInterface>> {
    scan_interfaces_in(Path::new("/sys/class/net"))
}

pub fn scan_interfaces_in(sys_net_root: &Path) -> HalResult<Vec<NetInterface>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(sys_net_root)?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let dir = sys_net_root.join(&name);
        let mac = read_trimmed(dir.join("address")).filter(|m| !is_zero_mac(m));
        let up = read_trimmed(dir.join("flags"))
            .and_then(|f| parse_flags(&f))
            .is_some_and(|flags| flags & libc::IFF_UP as u32 != 0);
        out.push(NetInterface::new(name, mac.as_deref(), up));
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

fn parse_flags(raw: &str) -> Option<u32> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

// Loopback and some virtual links report an all-zero address instead of none.
fn is_zero_mac(mac: &str) -> bool {
    mac.split(':').all(|octet| octet.chars().all(|c| c == '0'))
}

fn read_trimmed(path: PathBuf) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
