//! Session tracking.
//!
//! This module keeps the ledger of authenticated principals and defines the
//! hook interface through which the listener reports connection events.

pub mod hooks;
pub mod registry;

pub use hooks::{ConnectInfo, ConnectionLogger, EngineHooks, HookSet};
pub use registry::{SessionRecord, SessionRegistry};
