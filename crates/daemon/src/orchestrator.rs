//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that brings the listener
//! up in order: TLS identity, port negotiation, bootstrap accounts, and
//! finally the listener loop that keeps the authorization table reconciled
//! with the user directory.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use directory::{hash_password, is_password_hash, CredentialStore, JsonFileStore, UserDirectory};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authz::{
    bootstrap_home, AuthorizationTable, FsProvisioner, HomeProvisioner, ReconcileResult, Reconciler,
};
use crate::config::{Config, ListenerConfig, DEFAULT_ROOT_PASSWORD};
use crate::identity::ensure_identity;
use crate::listener::{ConnectionTracker, Listener, ListenerContext, LoopSettings, PassReport};
use crate::port::{negotiate_port, PortSearch};
use crate::session::{ConnectionLogger, EngineHooks, HookSet, SessionRegistry};

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, initializing components.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A user authenticated.
    UserLoggedIn { username: String },
    /// An authenticated user went away.
    UserLoggedOut { username: String },
    /// A reconciliation pass changed the authorization table.
    Reconciled(ReconcileResult),
    /// Error occurred.
    Error { message: String },
}

/// Point-in-time daemon status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    /// Whether the listener is running.
    pub running: bool,
    /// Seconds since the listener started.
    pub uptime_secs: u64,
    /// Bound port, when running.
    pub port: Option<u16>,
    /// Entries in the authorization table.
    pub user_count: usize,
    /// Authenticated sessions.
    pub session_count: usize,
}

/// Forwards login and logout hooks onto the event channel.
struct EventForwarder {
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl EngineHooks for EventForwarder {
    fn on_login(&self, username: &str) {
        let _ = self.event_tx.send(OrchestratorEvent::UserLoggedIn {
            username: username.to_string(),
        });
    }

    fn on_logout(&self, username: &str) {
        let _ = self.event_tx.send(OrchestratorEvent::UserLoggedOut {
            username: username.to_string(),
        });
    }
}

/// The listener as seen from the orchestrator while it runs.
struct ActiveListener {
    local_addr: SocketAddr,
    tracker: Arc<ConnectionTracker>,
    started_at: Instant,
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Credential store.
    store: Arc<dyn CredentialStore>,
    /// Directory relative paths resolve against.
    cwd: PathBuf,
    /// Creates home directories.
    provisioner: Arc<dyn HomeProvisioner>,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Live authorization table.
    table: Arc<AuthorizationTable>,
    /// Authenticated sessions.
    registry: Arc<SessionRegistry>,
    /// Bound listener, while running.
    active: Mutex<Option<ActiveListener>>,
    /// Listener and report forwarding tasks.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Cancellation token for graceful shutdown, renewed on every start.
    shutdown_token: CancellationToken,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates an orchestrator over the configured JSON store.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn CredentialStore> = Arc::new(JsonFileStore::new(config.store_path()));
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        Ok(Self::with_store(config, store, cwd))
    }

    /// Creates an orchestrator over an explicit store and working directory.
    pub fn with_store(config: Config, store: Arc<dyn CredentialStore>, cwd: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        Self {
            config,
            store,
            cwd,
            provisioner: Arc::new(FsProvisioner),
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            table: Arc::new(AuthorizationTable::new()),
            registry: Arc::new(SessionRegistry::new()),
            active: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            shutdown_token: CancellationToken::new(),
            event_tx,
        }
    }

    /// Replaces the home directory provisioner.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn HomeProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Resolves a configured path against the working directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// Starts the listener.
    ///
    /// Identity and port failures are fatal: the orchestrator returns to
    /// `Stopped` and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        // Check current state
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        if let Err(e) = self.start_components().await {
            error!("Startup failed: {:#}", e);
            self.emit_event(OrchestratorEvent::Error {
                message: format!("{:#}", e),
            });
            *self.state.write().await = OrchestratorState::Stopped;
            self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
            return Err(e);
        }

        // Update state to running
        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    async fn start_components(&mut self) -> Result<()> {
        // A previous stop cancelled the old token.
        self.shutdown_token = CancellationToken::new();

        let bind_address: IpAddr = self
            .config
            .listener
            .bind_address
            .parse()
            .with_context(|| {
                format!("Invalid bind address: {}", self.config.listener.bind_address)
            })?;
        let listener_config = ListenerConfig::from_store(&*self.store, bind_address)
            .context("Failed to read listener settings from the credential store")?;

        // TLS identity
        let tls = if self.config.listener.secure {
            let cert_path = self.resolve(&self.config.tls.cert_path());
            let key_path = self.resolve(&self.config.tls.key_path());
            let identity = ensure_identity(&cert_path, &key_path, &self.config.tls.hostname)
                .context("Failed to bootstrap TLS identity")?;
            if let Ok(fingerprint) = identity.fingerprint() {
                info!("TLS certificate fingerprint: {}", fingerprint);
            }
            Some(
                identity
                    .tls_acceptor()
                    .context("Failed to configure TLS")?,
            )
        } else {
            warn!("Running without TLS: credentials travel in clear text");
            None
        };

        // Port
        let port = negotiate_port(&PortSearch {
            bind_address,
            preferred: listener_config.port,
            auto_find: listener_config.auto_find_port,
            max_attempts: self.config.listener.max_port_attempts,
            probe_timeout: self.config.listener.probe_timeout(),
        })
        .await
        .context("Failed to negotiate listening port")?;

        // Bootstrap accounts
        self.seed_bootstrap_accounts(&listener_config)?;

        // Listener
        let mut hooks = HookSet::new();
        hooks.register(Arc::new(ConnectionLogger));
        hooks.register(Arc::clone(&self.registry) as Arc<dyn EngineHooks>);
        hooks.register(Arc::new(EventForwarder {
            event_tx: self.event_tx.clone(),
        }));

        let users_root = self.resolve(&self.config.directory.users_root);
        let reconciler =
            Reconciler::new(users_root, &self.cwd).with_provisioner(Arc::clone(&self.provisioner));

        let ctx = ListenerContext {
            table: Arc::clone(&self.table),
            hooks: Arc::new(hooks),
            reconciler: Arc::new(reconciler),
            directory: Arc::new(UserDirectory::new(Arc::clone(&self.store))),
            tls,
            settings: LoopSettings {
                tick: self.config.listener.tick(),
                reconcile_budget: self.config.listener.reconcile_budget(),
                evict_on_removal: self.config.directory.evict_on_removal,
            },
        };

        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let listener = Listener::bind(SocketAddr::new(bind_address, port), ctx)
            .await
            .with_context(|| format!("Failed to bind port {}", port))?
            .with_reports(report_tx);

        let local_addr = listener.local_addr();
        *self.active.lock() = Some(ActiveListener {
            local_addr,
            tracker: listener.tracker(),
            started_at: Instant::now(),
        });

        let listener_task = tokio::spawn(listener.run(self.shutdown_token.clone()));
        let forward_task = tokio::spawn(Self::forward_reports(report_rx, self.event_tx.clone()));
        self.tasks.lock().extend([listener_task, forward_task]);

        info!(addr = %local_addr, "Listener started");
        Ok(())
    }

    /// Seeds the root account and, when allowed, the anonymous account.
    fn seed_bootstrap_accounts(&self, listener_config: &ListenerConfig) -> Result<()> {
        let home = bootstrap_home(&self.cwd);

        let root_hash = if is_password_hash(&listener_config.root_password) {
            listener_config.root_password.clone()
        } else {
            if listener_config.root_password == DEFAULT_ROOT_PASSWORD {
                warn!("Root account uses the default password; change root_password in the store");
            }
            hash_password(&listener_config.root_password)
                .context("Failed to hash the root password")?
        };
        self.table.seed_root(root_hash, home.clone());

        if listener_config.anonymous_allowed {
            self.table.seed_anonymous(home);
        }
        Ok(())
    }

    /// Turns listener pass reports into orchestrator events.
    async fn forward_reports(
        mut reports: mpsc::UnboundedReceiver<PassReport>,
        event_tx: broadcast::Sender<OrchestratorEvent>,
    ) {
        while let Some(report) = reports.recv().await {
            let event = match report {
                PassReport::Applied(result) => OrchestratorEvent::Reconciled(result),
                PassReport::Failed(message) => OrchestratorEvent::Error { message },
            };
            let _ = event_tx.send(event);
        }
    }

    /// Stops the daemon orchestrator gracefully.
    pub async fn stop(&self) -> Result<()> {
        // Check current state
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        // Signal shutdown to all tasks
        self.shutdown_token.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Listener task ended abnormally: {}", e);
            }
        }
        debug!("Listener tasks joined");
        self.active.lock().take();

        // Update state
        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Returns the live authorization table.
    pub fn table(&self) -> &Arc<AuthorizationTable> {
        &self.table
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.lock().as_ref().map(|active| active.local_addr)
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.active
            .lock()
            .as_ref()
            .map_or(0, |active| active.tracker.len())
    }

    /// Returns a status snapshot.
    pub async fn status(&self) -> DaemonStatus {
        let running = self.state().await == OrchestratorState::Running;
        let (uptime_secs, port) = match self.active.lock().as_ref().filter(|_| running) {
            Some(active) => (
                active.started_at.elapsed().as_secs(),
                Some(active.local_addr.port()),
            ),
            None => (0, None),
        };
        DaemonStatus {
            running,
            uptime_secs,
            port,
            user_count: self.table.len(),
            session_count: self.registry.len(),
        }
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory::{keys, CredentialStoreExt, MemoryStore};
    use tempfile::TempDir;

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.listener.bind_address = "127.0.0.1".to_string();
        config.listener.secure = false;
        config.listener.tick_ms = 20;
        config
    }

    fn orchestrator(temp_dir: &TempDir, config: Config) -> (DaemonOrchestrator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        // Port 0 lets the OS pick, which keeps parallel tests apart.
        store.set(keys::PORT, &0u16).unwrap();
        let orchestrator = DaemonOrchestrator::with_store(
            config,
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            temp_dir.path().to_path_buf(),
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(&temp_dir, create_test_config());

        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(orchestrator.local_addr().is_none());
        assert_eq!(orchestrator.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, _) = orchestrator(&temp_dir, create_test_config());
        let mut events = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(orchestrator.local_addr().is_some());

        let status = orchestrator.status().await;
        assert!(status.running);
        assert_eq!(status.user_count, 1);
        assert_eq!(status.session_count, 0);

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(!orchestrator.status().await.running);

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                OrchestratorState::Starting,
                OrchestratorState::Running,
                OrchestratorState::ShuttingDown,
                OrchestratorState::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, _) = orchestrator(&temp_dir, create_test_config());

        orchestrator.start().await.unwrap();
        assert!(orchestrator.start().await.is_err());
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_accounts() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, store) = orchestrator(&temp_dir, create_test_config());
        store.set(keys::ANONYMOUS_ALLOWED, &true).unwrap();

        orchestrator.start().await.unwrap();

        let table = orchestrator.table();
        assert_eq!(table.usernames(), vec!["anonymous", "root"]);
        let root = table.get("root").unwrap();
        assert_eq!(root.home_dir, temp_dir.path().to_path_buf());
        assert_eq!(root.permissions.to_string(), "elradfmw");
        assert!(table.get("anonymous").unwrap().password_hash.is_none());

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stored_root_hash_used_as_is() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, store) = orchestrator(&temp_dir, create_test_config());
        let hash = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNo";
        store.set(keys::ROOT_PASSWORD, &hash).unwrap();

        orchestrator.start().await.unwrap();
        assert_eq!(
            orchestrator.table().get("root").unwrap().password_hash.as_deref(),
            Some(hash)
        );
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_secure_start_creates_identity() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config();
        config.listener.secure = true;
        let (mut orchestrator, _) = orchestrator(&temp_dir, config);

        orchestrator.start().await.unwrap();
        assert!(temp_dir.path().join("ssl/certificate.pem").exists());
        assert!(temp_dir.path().join("ssl/private.key").exists());
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_port_conflict_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, store) = orchestrator(&temp_dir, create_test_config());
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        store
            .set(keys::PORT, &taken.local_addr().unwrap().port())
            .unwrap();
        store.set(keys::AUTO_FIND_PORT, &false).unwrap();

        assert!(orchestrator.start().await.is_err());
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_stop_accepts_connections() {
        use tokio::io::{AsyncBufReadExt, BufReader};
        use tokio::net::TcpStream;

        let temp_dir = TempDir::new().unwrap();
        let (mut orchestrator, _) = orchestrator(&temp_dir, create_test_config());

        orchestrator.start().await.unwrap();
        orchestrator.stop().await.unwrap();
        assert!(orchestrator.local_addr().is_none());
        assert_eq!(orchestrator.status().await.port, None);

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(!orchestrator.shutdown_token().is_cancelled());

        let addr = orchestrator.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut greeting = String::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            BufReader::new(stream).read_line(&mut greeting),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(greeting.starts_with("220"));

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (orchestrator, _) = orchestrator(&temp_dir, create_test_config());
        assert!(orchestrator.stop().await.is_ok());
    }
}
