//! # Warden Daemon Library
//!
//! This crate provides the running side of Warden: an FTPS listener front
//! whose set of authorized users follows the persisted user directory while
//! the server is up.
//!
//! ## Overview
//!
//! - **Identity Bootstrap**: self-signed TLS certificate and key on first start
//! - **Port Negotiation**: preferred port, optionally searching upward
//! - **Authorization Reconciler**: periodic diff of the directory into the live table
//! - **Session Registry**: who is logged in right now, fed by engine hooks
//! - **Listener**: accept loop, minimal control channel, shutdown handling
//! - **IPC**: Unix socket the `warden` CLI uses to query and stop the daemon
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Daemon Orchestrator                        │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │   Identity   │  │     Port     │  │  Bootstrap accounts │  │
//! │  │  Bootstrap   │  │  Negotiator  │  │   (root/anonymous)  │  │
//! │  └──────────────┘  └──────────────┘  └─────────────────────┘  │
//! │                                                               │
//! │  ┌─────────────────────────────────────────────────────────┐  │
//! │  │ Listener: accept │ reconcile tick │ shutdown            │  │
//! │  └─────────────────────────────────────────────────────────┘  │
//! │                                                               │
//! │  ┌───────────────────────┐  ┌─────────────────────────────┐   │
//! │  │  Authorization Table  │  │  Session Registry (hooks)   │   │
//! │  └───────────────────────┘  └─────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon::{Config, DaemonOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut orchestrator = DaemonOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Users added with `warden users add` become valid on the next tick.
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`identity`]: TLS identity bootstrap
//! - [`port`]: Listening port negotiation
//! - [`authz`]: Authorization table and reconciler
//! - [`session`]: Session registry and engine hooks
//! - [`listener`]: Listener event loop and control channel
//! - [`orchestrator`]: Main daemon coordinator
//! - [`ipc`]: CLI-daemon communication

pub mod authz;
pub mod config;
pub mod identity;
pub mod ipc;
pub mod listener;
pub mod orchestrator;
pub mod port;
pub mod session;

// Re-export config types for convenience
pub use config::{Config, ListenerConfig};

// Re-export authorization types for convenience
pub use authz::{AuthorizationEntry, AuthorizationTable, Authorizer, ReconcileResult, Reconciler};

// Re-export session types for convenience
pub use session::{ConnectInfo, EngineHooks, HookSet, SessionRegistry};

// Re-export orchestrator types for convenience
pub use orchestrator::{DaemonOrchestrator, DaemonStatus, OrchestratorEvent, OrchestratorState};
