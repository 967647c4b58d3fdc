//! The network listener and its event loop.
//!
//! One task owns the bound socket and multiplexes three things with
//! `tokio::select!`: accepting connections, the reconciliation tick and the
//! shutdown token. Each accepted connection runs on its own task and is
//! tracked so it can be closed on shutdown or when its user is removed.

pub mod control;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use directory::{CredentialStore, UserDirectory};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::authz::{AuthorizationTable, Authorizer, ReconcileError, ReconcileResult, Reconciler};
use crate::session::{ConnectInfo, EngineHooks, HookSet};

pub use control::{ControlChannel, UserSlot};

/// Time allowed for a client to complete the TLS handshake.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for connections to wind down after `close_all`.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The user directory as the listener reads it.
pub type SharedDirectory = Arc<UserDirectory<Arc<dyn CredentialStore>>>;

/// Event loop timing and policy.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Interval between reconciliation passes.
    pub tick: Duration,
    /// Time a pass may take before the loop stops waiting for it.
    pub reconcile_budget: Duration,
    /// Close connections of users removed from the directory.
    pub evict_on_removal: bool,
}

/// Outcome of a reconciliation pass, reported to the owner of the listener.
#[derive(Debug, Clone)]
pub enum PassReport {
    /// The pass changed the table.
    Applied(ReconcileResult),
    /// The pass was abandoned; the table is unchanged.
    Failed(String),
}

/// A tracked client connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Remote address.
    pub peer: SocketAddr,
    /// Whether the connection uses TLS.
    pub secure: bool,
    username: UserSlot,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// The user logged in on this connection, if any.
    pub fn username(&self) -> Option<String> {
        self.username.lock().clone()
    }
}

/// Registry of open connections.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: DashMap<Uuid, ConnectionHandle>,
}

impl ConnectionTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: Uuid, handle: ConnectionHandle) {
        self.connections.insert(id, handle);
    }

    fn unregister(&self, id: &Uuid) {
        self.connections.remove(id);
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is open.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Asks every connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            entry.value().cancel.cancel();
            count += 1;
        }
        count
    }

    /// Closes connections logged in as any of `usernames`.
    pub fn evict_users(&self, usernames: &[String]) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            let logged_in = entry.value().username();
            if logged_in.is_some_and(|name| usernames.contains(&name)) {
                entry.value().cancel.cancel();
                count += 1;
            }
        }
        count
    }

    /// Waits until every connection has unregistered, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Everything the listener shares with the rest of the daemon.
pub struct ListenerContext {
    /// Live authorization table.
    pub table: Arc<AuthorizationTable>,
    /// Engine event listeners.
    pub hooks: Arc<HookSet>,
    /// Applies directory changes to the table.
    pub reconciler: Arc<Reconciler>,
    /// Source of directory snapshots.
    pub directory: SharedDirectory,
    /// TLS acceptor in secure mode.
    pub tls: Option<TlsAcceptor>,
    /// Loop timing and policy.
    pub settings: LoopSettings,
}

/// A bound listener, ready to run.
pub struct Listener {
    tcp: TcpListener,
    local_addr: SocketAddr,
    ctx: ListenerContext,
    control: Arc<ControlChannel>,
    tracker: Arc<ConnectionTracker>,
    reports: Option<mpsc::UnboundedSender<PassReport>>,
}

type PassHandle = JoinHandle<Result<ReconcileResult, ReconcileError>>;

impl Listener {
    /// Binds `addr`.
    pub async fn bind(addr: SocketAddr, ctx: ListenerContext) -> std::io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        let authorizer: Arc<dyn Authorizer> = ctx.table.clone();
        let hooks: Arc<dyn EngineHooks> = ctx.hooks.clone();
        let control = Arc::new(ControlChannel::new(authorizer, hooks));

        Ok(Self {
            tcp,
            local_addr,
            ctx,
            control,
            tracker: Arc::new(ConnectionTracker::new()),
            reports: None,
        })
    }

    /// Sends a report for every pass that changed or failed.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<PassReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connection tracker.
    pub fn tracker(&self) -> Arc<ConnectionTracker> {
        Arc::clone(&self.tracker)
    }

    /// Runs until `shutdown` fires, then closes every connection and
    /// releases the socket.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.ctx.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pending: Option<PassHandle> = None;

        tracing::info!(
            addr = %self.local_addr,
            secure = self.ctx.tls.is_some(),
            "Listener accepting connections"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.tcp.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer, &shutdown),
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = ticker.tick() => self.tick(&mut pending).await,
            }
        }

        let Self { tcp, tracker, .. } = self;
        drop(tcp);

        let closing = tracker.close_all();
        if !tracker.wait_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(remaining = tracker.len(), "Connections still open after shutdown");
        }
        tracing::info!(closed = closing, "Listener stopped");
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        let id = Uuid::new_v4();
        let secure = self.ctx.tls.is_some();
        let cancel = shutdown.child_token();
        let user: UserSlot = Arc::new(Mutex::new(None));

        self.tracker.register(
            id,
            ConnectionHandle {
                peer,
                secure,
                username: Arc::clone(&user),
                cancel: cancel.clone(),
            },
        );
        self.ctx.hooks.on_connect(&ConnectInfo {
            connection_id: id,
            peer,
            secure,
        });

        let tls = self.ctx.tls.clone();
        let control = Arc::clone(&self.control);
        let tracker = Arc::clone(&self.tracker);

        tokio::spawn(async move {
            let result = match tls {
                Some(acceptor) => {
                    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await
                    {
                        Ok(Ok(tls_stream)) => control.serve(tls_stream, user, cancel).await,
                        Ok(Err(e)) => {
                            tracing::debug!(%peer, "TLS handshake failed: {}", e);
                            Ok(())
                        }
                        Err(_) => {
                            tracing::debug!(%peer, "TLS handshake timed out");
                            Ok(())
                        }
                    }
                }
                None => control.serve(stream, user, cancel).await,
            };

            if let Err(e) = result {
                tracing::debug!(%peer, "Connection ended with error: {}", e);
            }
            tracker.unregister(&id);
            tracing::debug!(connection = %id, %peer, "Connection closed");
        });
    }

    /// Runs one reconciliation pass, waiting at most the configured budget.
    ///
    /// A pass that overruns keeps going on the blocking pool; no new pass
    /// starts until it has finished.
    async fn tick(&self, pending: &mut Option<PassHandle>) {
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Previous reconciliation pass still running, skipping tick");
            return;
        }
        if let Some(handle) = pending.take() {
            self.finish_pass(handle.await);
        }

        let reconciler = Arc::clone(&self.ctx.reconciler);
        let directory = Arc::clone(&self.ctx.directory);
        let table = Arc::clone(&self.ctx.table);
        let mut handle = tokio::task::spawn_blocking(move || {
            reconciler.reconcile_from_store(directory.as_ref(), &table)
        });

        match tokio::time::timeout(self.ctx.settings.reconcile_budget, &mut handle).await {
            Ok(joined) => self.finish_pass(joined),
            Err(_) => {
                tracing::warn!(
                    budget_ms = self.ctx.settings.reconcile_budget.as_millis() as u64,
                    "Reconciliation pass exceeded its budget, finishing in background"
                );
                *pending = Some(handle);
            }
        }
    }

    fn finish_pass(&self, joined: Result<Result<ReconcileResult, ReconcileError>, JoinError>) {
        let report = match joined {
            Ok(Ok(result)) => {
                if !result.has_changes() {
                    return;
                }
                if self.ctx.settings.evict_on_removal && !result.removed.is_empty() {
                    let evicted = self.tracker.evict_users(&result.removed);
                    if evicted > 0 {
                        tracing::info!(evicted, "Closed connections of removed users");
                    }
                }
                PassReport::Applied(result)
            }
            Ok(Err(e)) => {
                tracing::error!("Reconciliation pass skipped: {}", e);
                PassReport::Failed(e.to_string())
            }
            Err(e) => {
                tracing::error!("Reconciliation task failed: {}", e);
                PassReport::Failed(e.to_string())
            }
        };

        if let Some(tx) = &self.reports {
            let _ = tx.send(report);
        }
    }
}
