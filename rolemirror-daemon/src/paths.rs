use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "rolemirror.sock";

pub fn socket_path(state_dir: &Path) -> PathBuf {
    state_dir.join(DAEMON_SOCKET)
}
