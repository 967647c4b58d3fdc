//! User records and the operator-facing user directory.
//!
//! The directory lives under [`keys::USERS`] as a mapping of username to
//! [`UserRecord`]. Every mutating operation validates its input first and
//! then persists the whole mapping with a single store write, so a rejected
//! operation never leaves partial state behind.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::capability::Permissions;
use crate::error::{DirectoryError, Result};
use crate::password::{hash_password, validate_password};
use crate::store::{keys, CredentialStore, CredentialStoreExt};

/// Stored marker meaning "derive the home directory from the username".
pub const LOCAL_HOME_SENTINEL: &str = "<>local_user<>";

/// Operator input selecting the derived home directory.
const LOCAL_HOME_INPUT: &str = "local";

/// Usernames the CLI reserves for itself.
const FORBIDDEN_USERNAMES: &[&str] = &["cancel"];

static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]{3,20}$").expect("username pattern is valid"));

/// Validates a username: 3-20 characters of letters, digits, `_` or `.`.
pub fn validate_username(username: &str) -> Result<()> {
    if !USERNAME_RE.is_match(username) || FORBIDDEN_USERNAMES.contains(&username) {
        return Err(DirectoryError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Where a user's files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeDirectory {
    /// `<users_root>/<username>`.
    Derived,
    /// An explicit path; relative paths resolve against the working directory.
    Path(PathBuf),
}

impl HomeDirectory {
    /// Interprets operator input.
    ///
    /// - `local` selects the derived directory,
    /// - `~sub/dir` is `sub/dir` under `cwd`,
    /// - anything else is taken as a path.
    pub fn from_input(input: &str, cwd: &Path) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(DirectoryError::InvalidHomeDirectory(input.to_string()));
        }
        if input == LOCAL_HOME_INPUT || input == LOCAL_HOME_SENTINEL {
            return Ok(Self::Derived);
        }
        if let Some(rest) = input.strip_prefix('~') {
            let rest = rest.trim_start_matches(['/', '\\']);
            return Ok(Self::Path(cwd.join(rest)));
        }
        Ok(Self::Path(PathBuf::from(input)))
    }

    /// Resolves to an absolute path for `username`.
    pub fn resolve(&self, username: &str, users_root: &Path, cwd: &Path) -> PathBuf {
        let path = match self {
            Self::Derived => users_root.join(username),
            Self::Path(path) => path.clone(),
        };
        if path.is_absolute() {
            path
        } else {
            cwd.join(path)
        }
    }
}

impl fmt::Display for HomeDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Derived => f.write_str(LOCAL_HOME_SENTINEL),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Serialize for HomeDirectory {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HomeDirectory {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(serde::de::Error::custom("home directory cannot be empty"));
        }
        if raw == LOCAL_HOME_SENTINEL {
            Ok(Self::Derived)
        } else {
            Ok(Self::Path(PathBuf::from(raw)))
        }
    }
}

/// One principal in the persisted directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique login name.
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Home directory, explicit or derived.
    pub home_dir: HomeDirectory,
    /// Granted capabilities.
    pub permissions: Permissions,
}

/// A point-in-time read of the user directory.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    /// Well-formed records keyed by username.
    pub users: BTreeMap<String, UserRecord>,
    /// Entries that could not be decoded, as `(store key, reason)`.
    pub rejected: Vec<(String, String)>,
}

impl DirectorySnapshot {
    /// Builds a snapshot from records, mainly for tests and tooling.
    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: records
                .into_iter()
                .map(|record| (record.username.clone(), record))
                .collect(),
            rejected: Vec::new(),
        }
    }
}

/// Changes applied by [`UserDirectory::edit_user`].
#[derive(Debug, Clone, Default)]
pub struct UserEdit {
    /// New clear-text password.
    pub password: Option<String>,
    /// New home directory.
    pub home_dir: Option<HomeDirectory>,
    /// New permissions.
    pub permissions: Option<Permissions>,
    /// New username.
    pub rename: Option<String>,
}

impl UserEdit {
    /// Returns whether the edit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.home_dir.is_none()
            && self.permissions.is_none()
            && self.rename.is_none()
    }
}

/// Operator operations over the persisted user directory.
pub struct UserDirectory<S> {
    store: S,
}

impl<S: CredentialStore> UserDirectory<S> {
    /// Wraps a credential store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Reads the directory, isolating malformed entries.
    ///
    /// A store that cannot be read at all is an error. Individual entries that
    /// fail to decode are reported in [`DirectorySnapshot::rejected`] and do not
    /// affect the others.
    pub fn snapshot(&self) -> Result<DirectorySnapshot> {
        let raw: Map<String, Value> = self.store.get_or(keys::USERS, Map::new())?;
        let mut snapshot = DirectorySnapshot::default();

        for (key, value) in raw {
            let record: UserRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    snapshot.rejected.push((key, e.to_string()));
                    continue;
                }
            };
            if record.username != key {
                tracing::warn!(
                    key = %key,
                    username = %record.username,
                    "User entry key does not match its username; using the username"
                );
            }
            // The store is hand-editable; names end up in derived paths.
            if let Err(e) = validate_username(&record.username) {
                snapshot.rejected.push((key, e.to_string()));
                continue;
            }
            if snapshot.users.contains_key(&record.username) {
                snapshot
                    .rejected
                    .push((key, format!("duplicate username '{}'", record.username)));
                continue;
            }
            snapshot.users.insert(record.username.clone(), record);
        }

        Ok(snapshot)
    }

    /// Lists all well-formed users ordered by username.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        Ok(self.snapshot()?.users.into_values().collect())
    }

    /// Gets a single user.
    pub fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.snapshot()?.users.remove(username))
    }

    /// Adds a user, hashing `password` before it is stored.
    pub fn add_user(
        &self,
        username: &str,
        password: &str,
        home_dir: HomeDirectory,
        permissions: Permissions,
    ) -> Result<UserRecord> {
        validate_username(username)?;
        validate_password(password)?;
        if permissions.is_empty() {
            return Err(DirectoryError::InvalidPermissions(String::new()));
        }

        let mut users = self.raw_users()?;
        if users.contains_key(username) {
            return Err(DirectoryError::DuplicateUser(username.to_string()));
        }

        let record = UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            home_dir,
            permissions,
        };
        users.insert(username.to_string(), encode(&record)?);
        self.store.set(keys::USERS, &users)?;

        tracing::info!(username, permissions = %record.permissions, "User added");
        Ok(record)
    }

    /// Removes a user, returning the removed record.
    pub fn remove_user(&self, username: &str) -> Result<UserRecord> {
        let mut snapshot = self.snapshot()?;
        let record = snapshot
            .users
            .remove(username)
            .ok_or_else(|| DirectoryError::UserNotFound(username.to_string()))?;

        let mut users = self.raw_users()?;
        users.retain(|key, value| {
            key != username
                && value.get("username").and_then(Value::as_str) != Some(username)
        });
        self.store.set(keys::USERS, &users)?;

        tracing::info!(username, "User removed");
        Ok(record)
    }

    /// Applies `edit` to an existing user and returns the updated record.
    pub fn edit_user(&self, username: &str, edit: UserEdit) -> Result<UserRecord> {
        let mut record = self
            .get_user(username)?
            .ok_or_else(|| DirectoryError::UserNotFound(username.to_string()))?;
        let mut users = self.raw_users()?;

        if let Some(new_name) = &edit.rename {
            validate_username(new_name)?;
            if new_name != username && users.contains_key(new_name) {
                return Err(DirectoryError::DuplicateUser(new_name.clone()));
            }
        }
        if let Some(password) = &edit.password {
            validate_password(password)?;
        }
        if let Some(permissions) = edit.permissions {
            if permissions.is_empty() {
                return Err(DirectoryError::InvalidPermissions(String::new()));
            }
            record.permissions = permissions;
        }
        if let Some(home_dir) = edit.home_dir {
            record.home_dir = home_dir;
        }
        if let Some(password) = &edit.password {
            record.password_hash = hash_password(password)?;
        }
        if let Some(new_name) = edit.rename {
            users.remove(username);
            record.username = new_name;
        }

        users.insert(record.username.clone(), encode(&record)?);
        self.store.set(keys::USERS, &users)?;

        tracing::info!(
            username,
            new_username = %record.username,
            "User edited"
        );
        Ok(record)
    }

    fn raw_users(&self) -> Result<Map<String, Value>> {
        self.store.get_or(keys::USERS, Map::new())
    }
}

fn encode(record: &UserRecord) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| DirectoryError::MalformedValue {
        key: keys::USERS.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::verify_password;
    use crate::store::MemoryStore;

    fn directory() -> UserDirectory<MemoryStore> {
        UserDirectory::new(MemoryStore::new())
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("first.last_2").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("a".repeat(21).as_str()).is_err());
        assert!(validate_username("dash-name").is_err());
        assert!(validate_username("cancel").is_err());
    }

    #[test]
    fn test_home_from_input() {
        let cwd = Path::new("/srv/warden");
        assert_eq!(
            HomeDirectory::from_input("local", cwd).unwrap(),
            HomeDirectory::Derived
        );
        assert_eq!(
            HomeDirectory::from_input("~/shared", cwd).unwrap(),
            HomeDirectory::Path(PathBuf::from("/srv/warden/shared"))
        );
        assert_eq!(
            HomeDirectory::from_input("/data/ftp", cwd).unwrap(),
            HomeDirectory::Path(PathBuf::from("/data/ftp"))
        );
        assert!(HomeDirectory::from_input("  ", cwd).is_err());
    }

    #[test]
    fn test_home_resolve() {
        let cwd = Path::new("/srv/warden");
        let users_root = Path::new("users");

        assert_eq!(
            HomeDirectory::Derived.resolve("alice", users_root, cwd),
            PathBuf::from("/srv/warden/users/alice")
        );
        assert_eq!(
            HomeDirectory::Path(PathBuf::from("drop")).resolve("alice", users_root, cwd),
            PathBuf::from("/srv/warden/drop")
        );
        assert_eq!(
            HomeDirectory::Path(PathBuf::from("/abs")).resolve("alice", users_root, cwd),
            PathBuf::from("/abs")
        );
    }

    #[test]
    fn test_home_serde_uses_sentinel() {
        let json = serde_json::to_string(&HomeDirectory::Derived).unwrap();
        assert_eq!(json, format!("\"{}\"", LOCAL_HOME_SENTINEL));
        let back: HomeDirectory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HomeDirectory::Derived);
    }

    #[test]
    fn test_add_user_hashes_password() {
        let dir = directory();
        let record = dir
            .add_user("alice", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();

        assert_ne!(record.password_hash, "s3cret!");
        assert!(verify_password("s3cret!", &record.password_hash));
        assert_eq!(dir.list_users().unwrap(), vec![record]);
    }

    #[test]
    fn test_add_duplicate_rejected_without_write() {
        let dir = directory();
        dir.add_user("alice", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();

        let err = dir
            .add_user("alice", "other-pass", HomeDirectory::Derived, Permissions::ADMIN)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateUser(_)));

        let alice = dir.get_user("alice").unwrap().unwrap();
        assert_eq!(alice.permissions, Permissions::READ_ONLY);
    }

    #[test]
    fn test_add_invalid_input_rejected() {
        let dir = directory();
        assert!(dir
            .add_user("x", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .is_err());
        assert!(dir
            .add_user("bob", "abc", HomeDirectory::Derived, Permissions::READ_ONLY)
            .is_err());
        assert!(dir.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_remove_user() {
        let dir = directory();
        dir.add_user("alice", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();

        dir.remove_user("alice").unwrap();
        assert!(dir.list_users().unwrap().is_empty());

        let err = dir.remove_user("alice").unwrap_err();
        assert!(matches!(err, DirectoryError::UserNotFound(_)));
    }

    #[test]
    fn test_edit_user_fields() {
        let dir = directory();
        dir.add_user("bob", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();

        let edited = dir
            .edit_user(
                "bob",
                UserEdit {
                    permissions: Some(Permissions::READ_WRITE),
                    home_dir: Some(HomeDirectory::Path(PathBuf::from("/data/bob"))),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(edited.permissions.to_string(), "elradfmw");
        assert_eq!(dir.get_user("bob").unwrap().unwrap(), edited);
    }

    #[test]
    fn test_edit_user_rename() {
        let dir = directory();
        dir.add_user("bob", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();
        dir.add_user("carol", "s3cret!", HomeDirectory::Derived, Permissions::READ_ONLY)
            .unwrap();

        let err = dir
            .edit_user(
                "bob",
                UserEdit {
                    rename: Some("carol".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateUser(_)));

        dir.edit_user(
            "bob",
            UserEdit {
                rename: Some("robert".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let names: Vec<_> = dir
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["carol", "robert"]);
    }

    #[test]
    fn test_snapshot_isolates_malformed_entries() {
        let store = MemoryStore::new();
        store
            .set_value(
                keys::USERS,
                serde_json::json!({
                    "alice": {
                        "username": "alice",
                        "password_hash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
                        "home_dir": "<>local_user<>",
                        "permissions": "elr"
                    },
                    "broken": {
                        "username": "broken",
                        "password_hash": "x",
                        "home_dir": "/tmp",
                        "permissions": "zzz"
                    }
                }),
            )
            .unwrap();

        let snapshot = UserDirectory::new(store).snapshot().unwrap();
        assert_eq!(snapshot.users.len(), 1);
        assert!(snapshot.users.contains_key("alice"));
        assert_eq!(snapshot.rejected.len(), 1);
        assert_eq!(snapshot.rejected[0].0, "broken");
    }

    #[test]
    fn test_snapshot_rejects_invalid_stored_username() {
        let store = MemoryStore::new();
        store
            .set_value(
                keys::USERS,
                serde_json::json!({
                    "../../escaped dir": {
                        "username": "../../escaped dir",
                        "password_hash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
                        "home_dir": "<>local_user<>",
                        "permissions": "elr"
                    },
                    "carol": {
                        "username": "carol",
                        "password_hash": "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA",
                        "home_dir": "<>local_user<>",
                        "permissions": "elr"
                    }
                }),
            )
            .unwrap();

        let snapshot = UserDirectory::new(store).snapshot().unwrap();
        assert_eq!(snapshot.users.keys().collect::<Vec<_>>(), vec!["carol"]);
        assert_eq!(snapshot.rejected.len(), 1);
        assert_eq!(snapshot.rejected[0].0, "../../escaped dir");
    }
}
