use std::path::{Path, PathBuf};
use std::time::Duration;

use projsync_core::config::root_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

pub fn run_dir(home: &Path) -> PathBuf {
    root_at(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}
