//! Ledger of authenticated principals.
//!
//! The registry only knows what the engine tells it through login and
//! logout events. It starts empty and is never persisted.

use std::time::SystemTime;

use parking_lot::Mutex;

/// One authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Who logged in.
    pub username: String,
    /// When the login completed.
    pub connected_at: SystemTime,
}

/// Thread-safe list of logged-in sessions, in login order.
///
/// The same user may hold several sessions at once; each login adds a record
/// and each logout removes the oldest record for that user.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<SessionRecord>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed login.
    pub fn on_login(&self, username: &str) {
        self.sessions.lock().push(SessionRecord {
            username: username.to_string(),
            connected_at: SystemTime::now(),
        });
        tracing::debug!(username, "Session registered");
    }

    /// Records a logout. A logout without a matching session is ignored.
    pub fn on_logout(&self, username: &str) {
        let mut sessions = self.sessions.lock();
        match sessions.iter().position(|s| s.username == username) {
            Some(index) => {
                sessions.remove(index);
                tracing::debug!(username, "Session unregistered");
            }
            None => {
                tracing::debug!(username, "Logout without a matching session ignored");
            }
        }
    }

    /// Usernames of current sessions, in login order.
    pub fn snapshot(&self) -> Vec<String> {
        self.sessions
            .lock()
            .iter()
            .map(|s| s.username.clone())
            .collect()
    }

    /// Copies of current session records, in login order.
    pub fn records(&self) -> Vec<SessionRecord> {
        self.sessions.lock().clone()
    }

    /// Number of current sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no one is logged in.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
