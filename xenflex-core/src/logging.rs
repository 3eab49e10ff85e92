use env_logger::{Env, Target};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Open the driver debug log for appending, only if it already exists.
///
/// Stdout belongs to the plugin protocol, so the driver never logs anywhere
/// else; creating the file is how an operator opts in.
pub fn open_driver_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).open(path)
}

/// Initialise logging for the driver binary. Returns false when logging is
/// disabled because the log file is absent or unwritable.
pub fn init_driver(path: &Path) -> bool {
    let Ok(file) = open_driver_log(path) else {
        return false;
    };

    env_logger::Builder::from_env(Env::default().default_filter_or("debug"))
        .target(Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Initialise logging for the provisioner: stderr, `info` unless `RUST_LOG`
/// says otherwise.
pub fn init_provisioner() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stderr)
        .try_init();
}
