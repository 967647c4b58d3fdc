//! Unix Domain Socket IPC between the `warden` CLI and a running daemon.
//!
//! The protocol is newline-delimited JSON: one request object per line, one
//! response object per line.
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/warden/daemon.sock`
//! - Fallback: `/tmp/warden-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use daemon::ipc::{IpcClient, get_socket_path};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_path = get_socket_path();
//!     let mut client = IpcClient::connect(&socket_path).await?;
//!
//!     if client.ping().await? {
//!         println!("Daemon is running");
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod handler;
mod messages;
pub mod pidfile;
mod server;

pub use client::IpcClient;
pub use handler::{respond, serve_ipc};
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use pidfile::{get_daemon_pid, get_pid_file_path, is_daemon_running, write_pid_file, PidFileGuard};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Returns the daemon's control socket path.
///
/// `$XDG_RUNTIME_DIR` is preferred; without it a per-UID directory under
/// `/tmp` is used.
#[cfg(unix)]
pub fn get_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("warden")
            .join("daemon.sock")
    } else {
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/warden-{}", uid)).join("daemon.sock")
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn get_socket_path() -> PathBuf {
    PathBuf::from("/tmp/warden-unsupported/daemon.sock")
}
