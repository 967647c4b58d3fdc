//! Error types for the directory crate.

use std::path::PathBuf;

use thiserror::Error;

/// Directory error type covering store access, validation and lookups.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Store errors
    /// The backing store could not be read or written.
    #[error("store I/O error at {path}: {source}")]
    Io {
        /// Path of the store file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The backing store exists but does not parse.
    #[error("store at {path} is corrupt: {reason}")]
    Corrupt {
        /// Path of the store file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A stored value has the wrong shape for its key.
    #[error("value for key '{key}' is malformed: {reason}")]
    MalformedValue {
        /// Store key.
        key: String,
        /// Deserialization message.
        reason: String,
    },

    // Validation errors
    /// Username does not match the allowed grammar.
    #[error("invalid username '{0}': must be 3-20 characters of letters, digits, '_' or '.'")]
    InvalidUsername(String),

    /// Password does not meet the minimum requirements.
    #[error("invalid password: {0}")]
    InvalidPassword(String),

    /// Capability string contains unknown letters or has the wrong length.
    #[error("invalid permissions '{0}': expected 1-10 letters from 'elradfmwMT'")]
    InvalidPermissions(String),

    /// Home directory input could not be interpreted.
    #[error("invalid home directory '{0}'")]
    InvalidHomeDirectory(String),

    /// Permission set name or description is empty.
    #[error("invalid permission set: {0}")]
    InvalidPermissionSet(String),

    // Lookup errors
    /// A user with this name already exists.
    #[error("user '{0}' already exists")]
    DuplicateUser(String),

    /// No user with this name exists.
    #[error("user '{0}' not found")]
    UserNotFound(String),

    /// A bracket reference names a permission set that does not exist.
    #[error("permission set '<{0}>' not found")]
    PermissionSetNotFound(String),

    // Hashing errors
    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// Convenience result type for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DirectoryError::PermissionSetNotFound("ghost".into());
        assert_eq!(err.to_string(), "permission set '<ghost>' not found");

        let err = DirectoryError::DuplicateUser("alice".into());
        assert_eq!(err.to_string(), "user 'alice' already exists");
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err = DirectoryError::Io {
            path: PathBuf::from("/tmp/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/tmp/settings.json"));
    }
}
