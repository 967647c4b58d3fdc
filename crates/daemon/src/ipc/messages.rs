//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for communication
//! between the CLI and the daemon over Unix Domain Sockets.

use serde::{Deserialize, Serialize};

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// List authenticated sessions.
    ListSessions,
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the listener is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Bound listening port.
        port: Option<u16>,
        /// Entries in the authorization table.
        user_count: usize,
        /// Authenticated sessions.
        session_count: usize,
        /// Open control connections, authenticated or not.
        connection_count: usize,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// Authenticated sessions, oldest first.
    Sessions {
        /// One entry per login.
        sessions: Vec<IpcSessionInfo>,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// An authenticated session as reported over IPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Authenticated principal.
    pub username: String,
    /// Unix timestamp of the login.
    pub connected_at: u64,
}
