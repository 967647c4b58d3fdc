//! The live authorization table.
//!
//! This is what the listener consults when a client logs in. It is filled at
//! start with the bootstrap accounts and then kept in sync with the user
//! directory by the [`Reconciler`](super::Reconciler). All access goes
//! through a read-write lock held only for the duration of a lookup or a
//! single entry mutation, so a reader never observes a half-applied update.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use directory::{verify_password, Capability, Permissions};
use parking_lot::RwLock;

/// Username of the root account.
pub const ROOT_USERNAME: &str = "root";

/// Username of the anonymous account.
pub const ANONYMOUS_USERNAME: &str = "anonymous";

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Seeded at start from listener settings; never reconciled.
    Bootstrap,
    /// Mirrors a record of the user directory.
    Directory,
}

/// A principal the listener accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEntry {
    /// Stable identifier, kept across in-place updates.
    pub id: u64,
    /// Login name.
    pub username: String,
    /// PHC hash; `None` accepts any password.
    pub password_hash: Option<String>,
    /// Absolute home directory.
    pub home_dir: PathBuf,
    /// Granted capabilities.
    pub permissions: Permissions,
    /// Bootstrap or directory.
    pub origin: EntryOrigin,
}

/// Authorization queries the transfer engine makes.
pub trait Authorizer: Send + Sync {
    /// Checks a username/password pair.
    fn validate_authentication(&self, username: &str, password: &str) -> bool;

    /// Home directory of `username`.
    fn home_dir(&self, username: &str) -> Option<PathBuf>;

    /// Whether `username` holds `capability`.
    fn has_perm(&self, username: &str, capability: Capability) -> bool;
}

/// Thread-safe table of authorization entries keyed by username.
#[derive(Debug, Default)]
pub struct AuthorizationTable {
    entries: RwLock<HashMap<String, AuthorizationEntry>>,
    next_id: AtomicU64,
}

impl AuthorizationTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Seeds the root account.
    pub fn seed_root(&self, password_hash: String, home_dir: PathBuf) {
        self.seed(ROOT_USERNAME, Some(password_hash), home_dir, Permissions::READ_WRITE);
    }

    /// Seeds the anonymous account, which accepts any password.
    pub fn seed_anonymous(&self, home_dir: PathBuf) {
        self.seed(ANONYMOUS_USERNAME, None, home_dir, Permissions::READ_ONLY);
    }

    fn seed(
        &self,
        username: &str,
        password_hash: Option<String>,
        home_dir: PathBuf,
        permissions: Permissions,
    ) {
        let entry = AuthorizationEntry {
            id: self.allocate_id(),
            username: username.to_string(),
            password_hash,
            home_dir,
            permissions,
            origin: EntryOrigin::Bootstrap,
        };
        tracing::info!(
            username,
            home = %entry.home_dir.display(),
            permissions = %entry.permissions,
            "Seeded bootstrap account"
        );
        self.entries.write().insert(username.to_string(), entry);
    }

    /// Inserts a directory entry, returning its id.
    ///
    /// An existing entry with the same username is replaced.
    pub fn insert(
        &self,
        username: &str,
        password_hash: String,
        home_dir: PathBuf,
        permissions: Permissions,
    ) -> u64 {
        let id = self.allocate_id();
        let entry = AuthorizationEntry {
            id,
            username: username.to_string(),
            password_hash: Some(password_hash),
            home_dir,
            permissions,
            origin: EntryOrigin::Directory,
        };
        self.entries.write().insert(username.to_string(), entry);
        id
    }

    /// Overwrites the mutable fields of an entry in place.
    ///
    /// Returns `false` when no such entry exists.
    pub fn update(
        &self,
        username: &str,
        password_hash: String,
        home_dir: PathBuf,
        permissions: Permissions,
    ) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(username) {
            Some(entry) => {
                entry.password_hash = Some(password_hash);
                entry.home_dir = home_dir;
                entry.permissions = permissions;
                true
            }
            None => false,
        }
    }

    /// Removes an entry.
    pub fn remove(&self, username: &str) -> Option<AuthorizationEntry> {
        self.entries.write().remove(username)
    }

    /// Returns a copy of an entry.
    pub fn get(&self, username: &str) -> Option<AuthorizationEntry> {
        self.entries.read().get(username).cloned()
    }

    /// Whether `username` has an entry.
    pub fn contains(&self, username: &str) -> bool {
        self.entries.read().contains_key(username)
    }

    /// Number of entries, bootstrap accounts included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Usernames of directory-sourced entries, sorted.
    pub fn directory_usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.origin == EntryOrigin::Directory)
            .map(|entry| entry.username.clone())
            .collect();
        names.sort();
        names
    }

    /// A consistent copy of every entry, sorted by username.
    pub fn entries(&self) -> Vec<AuthorizationEntry> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.username.cmp(&b.username));
        entries
    }
}

impl Authorizer for AuthorizationTable {
    fn validate_authentication(&self, username: &str, password: &str) -> bool {
        // Copy the hash out so verification runs without holding the lock.
        let hash = match self.entries.read().get(username) {
            Some(entry) => entry.password_hash.clone(),
            None => return false,
        };
        match hash {
            Some(hash) => verify_password(password, &hash),
            None => true,
        }
    }

    fn home_dir(&self, username: &str) -> Option<PathBuf> {
        self.entries
            .read()
            .get(username)
            .map(|entry| entry.home_dir.clone())
    }

    fn has_perm(&self, username: &str, capability: Capability) -> bool {
        self.entries
            .read()
            .get(username)
            .is_some_and(|entry| entry.permissions.contains(capability))
    }
}

/// Resolves the bootstrap home `.` against the working directory.
pub fn bootstrap_home(cwd: &Path) -> PathBuf {
    cwd.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use directory::hash_password;

    fn perms(s: &str) -> Permissions {
        Permissions::parse(s).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let table = AuthorizationTable::new();
        let id = table.insert("alice", "hash".into(), PathBuf::from("/srv/alice"), perms("elr"));

        let entry = table.get("alice").unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.origin, EntryOrigin::Directory);
        assert_eq!(entry.home_dir, PathBuf::from("/srv/alice"));
        assert!(table.contains("alice"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_keeps_identity() {
        let table = AuthorizationTable::new();
        let id = table.insert("bob", "hash".into(), PathBuf::from("/srv/bob"), perms("elr"));

        assert!(table.update("bob", "hash".into(), PathBuf::from("/srv/bob"), perms("elradfmw")));

        let entry = table.get("bob").unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.permissions.to_string(), "elradfmw");
        assert!(!table.update("ghost", "h".into(), PathBuf::new(), perms("e")));
    }

    #[test]
    fn test_ids_are_unique() {
        let table = AuthorizationTable::new();
        let a = table.insert("alice", "h".into(), PathBuf::new(), perms("e"));
        let b = table.insert("bob", "h".into(), PathBuf::new(), perms("e"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove() {
        let table = AuthorizationTable::new();
        table.insert("alice", "h".into(), PathBuf::new(), perms("e"));

        assert_eq!(table.remove("alice").unwrap().username, "alice");
        assert!(table.remove("alice").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_bootstrap_accounts() {
        let table = AuthorizationTable::new();
        table.seed_root("hash".into(), PathBuf::from("/srv"));
        table.seed_anonymous(PathBuf::from("/srv"));
        table.insert("alice", "h".into(), PathBuf::new(), perms("e"));

        assert_eq!(table.usernames(), vec!["alice", "anonymous", "root"]);
        assert_eq!(table.directory_usernames(), vec!["alice"]);
        assert_eq!(table.get("root").unwrap().permissions.to_string(), "elradfmw");
        assert_eq!(table.get("anonymous").unwrap().permissions.to_string(), "elr");
    }

    #[test]
    fn test_validate_authentication() {
        let table = AuthorizationTable::new();
        table.insert(
            "alice",
            hash_password("s3cret!").unwrap(),
            PathBuf::new(),
            perms("elr"),
        );
        table.seed_anonymous(PathBuf::from("/srv"));

        assert!(table.validate_authentication("alice", "s3cret!"));
        assert!(!table.validate_authentication("alice", "wrong"));
        assert!(!table.validate_authentication("nobody", "s3cret!"));
        assert!(table.validate_authentication("anonymous", "anything@example.com"));
    }

    #[test]
    fn test_home_dir_and_perms() {
        let table = AuthorizationTable::new();
        table.insert("alice", "h".into(), PathBuf::from("/srv/alice"), perms("elr"));

        assert_eq!(table.home_dir("alice"), Some(PathBuf::from("/srv/alice")));
        assert_eq!(table.home_dir("bob"), None);
        assert!(table.has_perm("alice", Capability::Retrieve));
        assert!(!table.has_perm("alice", Capability::Store));
        assert!(!table.has_perm("bob", Capability::Retrieve));
    }

    #[test]
    fn test_entries_sorted_snapshot() {
        let table = AuthorizationTable::new();
        table.insert("zoe", "h".into(), PathBuf::new(), perms("e"));
        table.insert("adam", "h".into(), PathBuf::new(), perms("e"));

        let names: Vec<_> = table.entries().into_iter().map(|e| e.username).collect();
        assert_eq!(names, vec!["adam", "zoe"]);
    }

    #[test]
    fn test_bootstrap_home_is_cwd() {
        assert_eq!(bootstrap_home(Path::new("/srv/warden")), PathBuf::from("/srv/warden"));
    }
}
