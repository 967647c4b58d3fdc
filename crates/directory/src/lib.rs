//! # Warden Directory Library
//!
//! This crate holds the durable side of Warden: the credential store the
//! operator edits, and the records the running listener is reconciled from.
//!
//! ## Overview
//!
//! - **Credential Store**: a keyed JSON document with get/set semantics
//! - **User Directory**: validated add/remove/edit/list over user records
//! - **Permission Sets**: named capability bundles referenced as `<name>`
//! - **Capabilities**: the `elradfmwMT` letter alphabet as a typed set
//! - **Passwords**: Argon2 hashing with constant-time verification
//!
//! ## Example Usage
//!
//! ```rust
//! use directory::{HomeDirectory, MemoryStore, PermissionCatalog, UserDirectory};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let catalog = PermissionCatalog::new(Arc::clone(&store));
//! catalog.save("editors", "upload and manage files", "read-write").unwrap();
//!
//! let users = UserDirectory::new(Arc::clone(&store));
//! let perms = catalog.resolve("<editors>").unwrap();
//! users
//!     .add_user("alice", "correct-horse", HomeDirectory::Derived, perms)
//!     .unwrap();
//!
//! assert_eq!(users.list_users().unwrap().len(), 1);
//! ```
//!
//! ## Modules
//!
//! - [`store`]: credential store trait and implementations
//! - [`user`]: user records and directory operations
//! - [`catalog`]: permission set catalog
//! - [`capability`]: capability letters
//! - [`password`]: password hashing
//! - [`error`]: error types

pub mod capability;
pub mod catalog;
pub mod error;
pub mod password;
pub mod store;
pub mod user;

pub use capability::{Capability, Permissions};
pub use catalog::{PermissionCatalog, PermissionSet};
pub use error::{DirectoryError, Result};
pub use password::{hash_password, is_password_hash, verify_password};
pub use store::{keys, CredentialStore, CredentialStoreExt, JsonFileStore, MemoryStore};
pub use user::{
    validate_username, DirectorySnapshot, HomeDirectory, UserDirectory, UserEdit, UserRecord,
    LOCAL_HOME_SENTINEL,
};
