use std::path::PathBuf;

/// Block device path for a kernel device name (e.g. `xvdb` -> `/dev/xvdb`).
pub fn device_path(device: &str) -> PathBuf {
    PathBuf::from("/dev").join(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_prefixes_dev() {
        assert_eq!(device_path("xvdb"), PathBuf::from("/dev/xvdb"));
    }
}
