//! Engine event hooks.
//!
//! The listener raises connect, login and logout events. Any number of
//! independent listeners can subscribe by implementing [`EngineHooks`] and
//! registering with a [`HookSet`].

use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use super::registry::SessionRegistry;

/// Details of a newly accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Connection identifier.
    pub connection_id: Uuid,
    /// Remote address.
    pub peer: SocketAddr,
    /// Whether the connection is wrapped in TLS.
    pub secure: bool,
}

/// Callbacks raised by the transfer engine.
///
/// All methods default to doing nothing.
pub trait EngineHooks: Send + Sync {
    /// A client connected.
    fn on_connect(&self, _info: &ConnectInfo) {}

    /// A client authenticated as `username`.
    fn on_login(&self, _username: &str) {}

    /// An authenticated client went away.
    fn on_logout(&self, _username: &str) {}
}

/// Fans events out to every registered listener, in registration order.
#[derive(Default, Clone)]
pub struct HookSet {
    listeners: Vec<Arc<dyn EngineHooks>>,
}

impl HookSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn register(&mut self, listener: Arc<dyn EngineHooks>) {
        self.listeners.push(listener);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, listener: Arc<dyn EngineHooks>) -> Self {
        self.register(listener);
        self
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl EngineHooks for HookSet {
    fn on_connect(&self, info: &ConnectInfo) {
        for listener in &self.listeners {
            listener.on_connect(info);
        }
    }

    fn on_login(&self, username: &str) {
        for listener in &self.listeners {
            listener.on_login(username);
        }
    }

    fn on_logout(&self, username: &str) {
        for listener in &self.listeners {
            listener.on_logout(username);
        }
    }
}

impl EngineHooks for SessionRegistry {
    fn on_login(&self, username: &str) {
        SessionRegistry::on_login(self, username);
    }

    fn on_logout(&self, username: &str) {
        SessionRegistry::on_logout(self, username);
    }
}

/// Logs every engine event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectionLogger;

impl EngineHooks for ConnectionLogger {
    fn on_connect(&self, info: &ConnectInfo) {
        tracing::info!(
            connection = %info.connection_id,
            ip = %info.peer.ip(),
            port = info.peer.port(),
            secure = info.secure,
            "Client connected"
        );
    }

    fn on_login(&self, username: &str) {
        tracing::info!(username, "User logged in");
    }

    fn on_logout(&self, username: &str) {
        tracing::info!(username, "User logged out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EngineHooks for Recorder {
        fn on_connect(&self, info: &ConnectInfo) {
            self.events.lock().push(format!("connect {}", info.peer));
        }

        fn on_login(&self, username: &str) {
            self.events.lock().push(format!("login {}", username));
        }

        fn on_logout(&self, username: &str) {
            self.events.lock().push(format!("logout {}", username));
        }
    }

    fn info() -> ConnectInfo {
        ConnectInfo {
            connection_id: Uuid::new_v4(),
            peer: "127.0.0.1:50000".parse().unwrap(),
            secure: true,
        }
    }

    #[test]
    fn test_fan_out_to_independent_listeners() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let hooks = HookSet::new()
            .with(first.clone() as Arc<dyn EngineHooks>)
            .with(second.clone() as Arc<dyn EngineHooks>);

        hooks.on_connect(&info());
        hooks.on_login("carol");
        hooks.on_logout("carol");

        let expected = vec!["connect 127.0.0.1:50000", "login carol", "logout carol"];
        assert_eq!(*first.events.lock(), expected);
        assert_eq!(*second.events.lock(), expected);
    }

    #[test]
    fn test_registry_as_listener() {
        let registry = Arc::new(SessionRegistry::new());
        let hooks = HookSet::new()
            .with(Arc::new(ConnectionLogger))
            .with(registry.clone() as Arc<dyn EngineHooks>);

        hooks.on_connect(&info());
        hooks.on_login("carol");
        assert_eq!(registry.snapshot(), vec!["carol"]);

        hooks.on_logout("carol");
        hooks.on_logout("dave");
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_empty_set() {
        let hooks = HookSet::new();
        assert!(hooks.is_empty());
        hooks.on_login("nobody");
    }
}
