//! Reconciliation of the user directory into the live authorization table.
//!
//! A pass compares a [`DirectorySnapshot`] with the table and applies the
//! difference: new users are inserted once their home directory exists,
//! users gone from the directory are removed, and changed users are
//! overwritten in place. Failures are confined to the user they concern.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directory::{CredentialStore, DirectoryError, DirectorySnapshot, UserDirectory, UserRecord};
use parking_lot::Mutex;
use thiserror::Error;

use super::table::{AuthorizationTable, EntryOrigin};

/// Errors that abort a whole pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read user directory: {0}")]
    Store(#[from] DirectoryError),
}

/// Creates home directories for new users.
pub trait HomeProvisioner: Send + Sync {
    /// Makes sure `path` exists as a directory.
    fn provision(&self, path: &Path) -> io::Result<()>;
}

/// Creates home directories on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProvisioner;

impl HomeProvisioner for FsProvisioner {
    fn provision(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

/// What a pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Usernames inserted.
    pub added: Vec<String>,
    /// Usernames removed.
    pub removed: Vec<String>,
    /// Usernames overwritten in place.
    pub updated: Vec<String>,
    /// Usernames left out of this pass, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl ReconcileResult {
    /// Whether the pass mutated the table.
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty())
    }
}

/// Applies directory snapshots to an [`AuthorizationTable`].
pub struct Reconciler {
    users_root: PathBuf,
    cwd: PathBuf,
    provisioner: Arc<dyn HomeProvisioner>,
    /// Skip reasons already reported, so a persistent failure warns once.
    reported: Mutex<HashSet<(String, String)>>,
}

impl Reconciler {
    /// Creates a reconciler resolving relative paths against `cwd`.
    pub fn new(users_root: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            users_root: users_root.into(),
            cwd: cwd.into(),
            provisioner: Arc::new(FsProvisioner),
            reported: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the home directory provisioner.
    pub fn with_provisioner(mut self, provisioner: Arc<dyn HomeProvisioner>) -> Self {
        self.provisioner = provisioner;
        self
    }

    /// Absolute home directory of a record.
    pub fn resolve_home(&self, record: &UserRecord) -> PathBuf {
        record
            .home_dir
            .resolve(&record.username, &self.users_root, &self.cwd)
    }

    /// Reads the directory and reconciles it.
    ///
    /// When the directory cannot be read the table is left untouched.
    pub fn reconcile_from_store<S: CredentialStore>(
        &self,
        directory: &UserDirectory<S>,
        table: &AuthorizationTable,
    ) -> Result<ReconcileResult, ReconcileError> {
        let snapshot = directory.snapshot()?;
        Ok(self.reconcile(&snapshot, table))
    }

    /// Runs one pass. Applying the same snapshot twice changes nothing.
    pub fn reconcile(
        &self,
        snapshot: &DirectorySnapshot,
        table: &AuthorizationTable,
    ) -> ReconcileResult {
        let mut result = ReconcileResult::default();

        for (key, reason) in &snapshot.rejected {
            result
                .skipped
                .push((key.clone(), format!("malformed record: {}", reason)));
        }

        for record in snapshot.users.values() {
            if let Err(reason) = self.apply_record(record, table, &mut result) {
                result.skipped.push((record.username.clone(), reason));
            }
        }

        // A malformed record keeps its last good entry rather than revoking it.
        let rejected: HashSet<&str> = snapshot.rejected.iter().map(|(k, _)| k.as_str()).collect();
        for username in table.directory_usernames() {
            if snapshot.users.contains_key(&username) || rejected.contains(username.as_str()) {
                continue;
            }
            if table.remove(&username).is_some() {
                tracing::info!(username = %username, "Removed user from live table");
                result.removed.push(username);
            }
        }

        self.report_skips(&result.skipped);

        if result.has_changes() {
            tracing::debug!(
                added = result.added.len(),
                removed = result.removed.len(),
                updated = result.updated.len(),
                "Reconciliation pass applied changes"
            );
        } else {
            tracing::trace!("Reconciliation pass found no changes");
        }
        result
    }

    fn apply_record(
        &self,
        record: &UserRecord,
        table: &AuthorizationTable,
        result: &mut ReconcileResult,
    ) -> Result<(), String> {
        let username = record.username.as_str();
        let home = self.resolve_home(record);

        let Some(live) = table.get(username) else {
            self.provisioner
                .provision(&home)
                .map_err(|e| format!("cannot create home {}: {}", home.display(), e))?;
            table.insert(
                username,
                record.password_hash.clone(),
                home.clone(),
                record.permissions,
            );
            tracing::info!(
                username,
                home = %home.display(),
                permissions = %record.permissions,
                "Added user to live table"
            );
            result.added.push(username.to_string());
            return Ok(());
        };

        if live.origin == EntryOrigin::Bootstrap {
            return Err("username is reserved for a built-in account".into());
        }

        let unchanged = live.permissions == record.permissions
            && live.home_dir == home
            && live.password_hash.as_deref() == Some(record.password_hash.as_str());
        if unchanged {
            return Ok(());
        }

        if live.home_dir != home {
            self.provisioner
                .provision(&home)
                .map_err(|e| format!("cannot create home {}: {}", home.display(), e))?;
        }

        table.update(
            username,
            record.password_hash.clone(),
            home.clone(),
            record.permissions,
        );
        tracing::info!(
            username,
            home = %home.display(),
            permissions = %record.permissions,
            "Updated user in live table"
        );
        result.updated.push(username.to_string());
        Ok(())
    }

    fn report_skips(&self, skipped: &[(String, String)]) {
        let current: HashSet<(String, String)> = skipped.iter().cloned().collect();
        let mut reported = self.reported.lock();
        for (username, reason) in current.difference(&reported) {
            tracing::warn!(username = %username, reason = %reason, "Skipped user");
        }
        *reported = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory::{HomeDirectory, Permissions};
    use tempfile::TempDir;

    const HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2hoYXNo";

    fn record(username: &str, perms: &str, home: HomeDirectory) -> UserRecord {
        UserRecord {
            username: username.into(),
            password_hash: HASH.into(),
            home_dir: home,
            permissions: Permissions::parse(perms).unwrap(),
        }
    }

    /// Refuses to create any path containing the given fragment.
    struct DenyingProvisioner(&'static str);

    impl HomeProvisioner for DenyingProvisioner {
        fn provision(&self, path: &Path) -> io::Result<()> {
            if path.to_string_lossy().contains(self.0) {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                std::fs::create_dir_all(path)
            }
        }
    }

    #[test]
    fn test_adds_and_creates_home() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();

        let snapshot =
            DirectorySnapshot::from_records([record("alice", "elr", HomeDirectory::Derived)]);
        let result = reconciler.reconcile(&snapshot, &table);

        assert_eq!(result.added, vec!["alice"]);
        let home = temp_dir.path().join("users").join("alice");
        assert!(home.is_dir());
        assert_eq!(table.get("alice").unwrap().home_dir, home);
    }

    #[test]
    fn test_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();
        let snapshot = DirectorySnapshot::from_records([
            record("alice", "elr", HomeDirectory::Derived),
            record("bob", "elradfmw", HomeDirectory::Path(PathBuf::from("shared"))),
        ]);

        reconciler.reconcile(&snapshot, &table);
        let before = table.entries();

        let second = reconciler.reconcile(&snapshot, &table);
        assert_eq!(second, ReconcileResult::default());
        assert_eq!(table.entries(), before);
    }

    #[test]
    fn test_failing_home_is_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path())
            .with_provisioner(Arc::new(DenyingProvisioner("locked")));
        let table = AuthorizationTable::new();

        let snapshot = DirectorySnapshot::from_records([
            record("alice", "elr", HomeDirectory::Derived),
            record("bob", "elr", HomeDirectory::Derived),
            record("carol", "elr", HomeDirectory::Derived),
            record("dave", "elr", HomeDirectory::Path(PathBuf::from("/locked/dave"))),
        ]);
        let result = reconciler.reconcile(&snapshot, &table);

        assert_eq!(table.len(), 3);
        assert!(!table.contains("dave"));
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].0, "dave");
    }

    #[test]
    fn test_removal() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();

        reconciler.reconcile(
            &DirectorySnapshot::from_records([
                record("alice", "elr", HomeDirectory::Derived),
                record("bob", "elr", HomeDirectory::Derived),
            ]),
            &table,
        );
        let result = reconciler.reconcile(
            &DirectorySnapshot::from_records([record("bob", "elr", HomeDirectory::Derived)]),
            &table,
        );

        assert_eq!(result.removed, vec!["alice"]);
        assert!(!table.contains("alice"));
        assert!(table.contains("bob"));
    }

    #[test]
    fn test_update_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();

        reconciler.reconcile(
            &DirectorySnapshot::from_records([record("bob", "elr", HomeDirectory::Derived)]),
            &table,
        );
        let id = table.get("bob").unwrap().id;

        let result = reconciler.reconcile(
            &DirectorySnapshot::from_records([record("bob", "elradfmw", HomeDirectory::Derived)]),
            &table,
        );

        assert_eq!(result.updated, vec!["bob"]);
        let bob = table.get("bob").unwrap();
        assert_eq!(bob.id, id);
        assert_eq!(bob.permissions.to_string(), "elradfmw");
    }

    #[test]
    fn test_home_change_failure_keeps_old_entry() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path())
            .with_provisioner(Arc::new(DenyingProvisioner("locked")));
        let table = AuthorizationTable::new();

        reconciler.reconcile(
            &DirectorySnapshot::from_records([record("bob", "elr", HomeDirectory::Derived)]),
            &table,
        );
        let before = table.get("bob").unwrap();

        let result = reconciler.reconcile(
            &DirectorySnapshot::from_records([record(
                "bob",
                "elradfmw",
                HomeDirectory::Path(PathBuf::from("/locked/bob")),
            )]),
            &table,
        );

        assert!(result.updated.is_empty());
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(table.get("bob").unwrap(), before);
    }

    #[test]
    fn test_bootstrap_entries_are_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();
        table.seed_root("roothash".into(), temp_dir.path().to_path_buf());

        // Not removed by an empty directory.
        reconciler.reconcile(&DirectorySnapshot::default(), &table);
        assert!(table.contains("root"));

        // Not overwritten by a colliding record.
        let result = reconciler.reconcile(
            &DirectorySnapshot::from_records([record("root", "elradfmwMT", HomeDirectory::Derived)]),
            &table,
        );
        assert_eq!(result.skipped.len(), 1);
        let root = table.get("root").unwrap();
        assert_eq!(root.origin, EntryOrigin::Bootstrap);
        assert_eq!(root.permissions.to_string(), "elradfmw");
    }

    #[test]
    fn test_malformed_record_keeps_live_entry() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();
        reconciler.reconcile(
            &DirectorySnapshot::from_records([record("alice", "elr", HomeDirectory::Derived)]),
            &table,
        );

        let snapshot = DirectorySnapshot {
            users: Default::default(),
            rejected: vec![("alice".into(), "bad permissions".into())],
        };
        let result = reconciler.reconcile(&snapshot, &table);

        assert!(result.removed.is_empty());
        assert!(table.contains("alice"));
        assert_eq!(result.skipped.len(), 1);
    }

    #[test]
    fn test_reconcile_from_store() {
        use directory::{CredentialStoreExt, MemoryStore};

        let temp_dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store
            .set(
                directory::keys::USERS,
                &serde_json::json!({
                    "alice": {
                        "username": "alice",
                        "password_hash": HASH,
                        "home_dir": "<>local_user<>",
                        "permissions": "elr"
                    }
                }),
            )
            .unwrap();

        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();
        let result = reconciler
            .reconcile_from_store(&UserDirectory::new(store), &table)
            .unwrap();

        assert_eq!(result.added, vec!["alice"]);
    }

    #[test]
    fn test_invalid_stored_username_never_provisioned() {
        use directory::{CredentialStoreExt, MemoryStore};

        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("srv").join("ftp");
        std::fs::create_dir_all(&root).unwrap();
        let store = MemoryStore::new();
        store
            .set(
                directory::keys::USERS,
                &serde_json::json!({
                    "../../escaped dir": {
                        "username": "../../escaped dir",
                        "password_hash": HASH,
                        "home_dir": "<>local_user<>",
                        "permissions": "elr"
                    }
                }),
            )
            .unwrap();

        let reconciler = Reconciler::new("users", &root);
        let table = AuthorizationTable::new();
        let result = reconciler
            .reconcile_from_store(&UserDirectory::new(store), &table)
            .unwrap();

        assert!(result.added.is_empty());
        assert!(table.is_empty());
        assert!(!temp_dir.path().join("srv").join("escaped dir").exists());
    }

    #[test]
    fn test_store_failure_leaves_table() {
        use directory::JsonFileStore;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ corrupt").unwrap();

        let reconciler = Reconciler::new("users", temp_dir.path());
        let table = AuthorizationTable::new();
        table.insert("alice", HASH.into(), temp_dir.path().into(), Permissions::READ_ONLY);

        let result =
            reconciler.reconcile_from_store(&UserDirectory::new(JsonFileStore::new(&path)), &table);

        assert!(matches!(result, Err(ReconcileError::Store(_))));
        assert!(table.contains("alice"));
    }
}
