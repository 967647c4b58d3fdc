//! PID file handling for daemon running detection.
//!
//! The PID file is stored at:
//! - `$XDG_DATA_HOME/warden/daemon.pid` if XDG_DATA_HOME is set
//! - `~/.local/share/warden/daemon.pid` otherwise
//!
//! ## Example
//!
//! ```rust
//! use daemon::ipc::pidfile::{is_daemon_running, get_daemon_pid};
//!
//! if is_daemon_running() {
//!     if let Some(pid) = get_daemon_pid() {
//!         println!("Daemon is already running with PID {}", pid);
//!     }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the path to the daemon PID file.
pub fn get_pid_file_path() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_dir.join("warden").join("daemon.pid")
}

/// Check if a daemon process is currently running.
///
/// Stale PID files are cleaned up along the way.
pub fn is_daemon_running() -> bool {
    get_daemon_pid().is_some()
}

/// Get the PID of the running daemon, if any.
pub fn get_daemon_pid() -> Option<u32> {
    read_live_pid(&get_pid_file_path())
}

/// Reads the PID in `path` if that process is alive.
///
/// An unparsable file or a dead process removes the file.
pub fn read_live_pid(path: &Path) -> Option<u32> {
    let pid_str = fs::read_to_string(path).ok()?;

    let Ok(pid) = pid_str.trim().parse::<u32>() else {
        cleanup_stale_pid_file(path);
        return None;
    };

    if is_process_running(pid) {
        Some(pid)
    } else {
        cleanup_stale_pid_file(path);
        None
    }
}

/// Records the current process in `path`.
///
/// The returned guard removes the file when dropped.
pub fn write_pid_file(path: &Path) -> io::Result<PidFileGuard> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))?;
    Ok(PidFileGuard {
        path: path.to_path_buf(),
    })
}

/// Removes the PID file on drop.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    /// Path of the guarded file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        // Only remove the file if it still names this process.
        if read_pid(&self.path) == Some(std::process::id()) {
            cleanup_stale_pid_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Check if a process with the given PID is running.
///
/// On Linux this checks `/proc/{pid}/stat`; elsewhere it sends signal 0.
fn is_process_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}/stat", pid)).exists()
    }

    #[cfg(all(unix, not(target_os = "linux")))]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        i32::try_from(pid).is_ok_and(|pid| kill(Pid::from_raw(pid), None).is_ok())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
