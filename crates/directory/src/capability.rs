//! Capability letters and permission sets over them.
//!
//! A [`Permissions`] value is an order-independent set of [`Capability`]
//! letters. It always renders in the canonical order `elradfmwMT`, so two
//! grants written as `"rle"` and `"elr"` compare and display identically.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DirectoryError, Result};

/// A single file-transfer operation right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `e`: change directory.
    ChangeDir,
    /// `l`: list files.
    List,
    /// `r`: retrieve file.
    Retrieve,
    /// `a`: append data to a file.
    Append,
    /// `d`: delete file or directory.
    Delete,
    /// `f`: rename file or directory.
    Rename,
    /// `m`: create directory.
    MakeDir,
    /// `w`: store a file.
    Store,
    /// `M`: change file mode.
    ChangeMode,
    /// `T`: change file modification time.
    ChangeTime,
}

impl Capability {
    /// All capabilities in canonical order.
    pub const ALL: [Capability; 10] = [
        Capability::ChangeDir,
        Capability::List,
        Capability::Retrieve,
        Capability::Append,
        Capability::Delete,
        Capability::Rename,
        Capability::MakeDir,
        Capability::Store,
        Capability::ChangeMode,
        Capability::ChangeTime,
    ];

    /// Parses a single capability letter.
    pub fn from_letter(letter: char) -> Option<Self> {
        Some(match letter {
            'e' => Self::ChangeDir,
            'l' => Self::List,
            'r' => Self::Retrieve,
            'a' => Self::Append,
            'd' => Self::Delete,
            'f' => Self::Rename,
            'm' => Self::MakeDir,
            'w' => Self::Store,
            'M' => Self::ChangeMode,
            'T' => Self::ChangeTime,
            _ => return None,
        })
    }

    /// Returns the capability letter.
    pub fn letter(self) -> char {
        match self {
            Self::ChangeDir => 'e',
            Self::List => 'l',
            Self::Retrieve => 'r',
            Self::Append => 'a',
            Self::Delete => 'd',
            Self::Rename => 'f',
            Self::MakeDir => 'm',
            Self::Store => 'w',
            Self::ChangeMode => 'M',
            Self::ChangeTime => 'T',
        }
    }

    /// Human-readable description of the operation.
    pub fn description(self) -> &'static str {
        match self {
            Self::ChangeDir => "change directory",
            Self::List => "list files",
            Self::Retrieve => "retrieve file",
            Self::Append => "append data to file",
            Self::Delete => "delete file",
            Self::Rename => "rename file",
            Self::MakeDir => "create directory",
            Self::Store => "store file",
            Self::ChangeMode => "change file mode",
            Self::ChangeTime => "change file modification time",
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// Maximum length of a raw capability string.
const MAX_RAW_LEN: usize = 10;

/// An order-independent set of capabilities.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(u16);

impl Permissions {
    /// Read-only preset (`elr`).
    pub const READ_ONLY: Permissions = Permissions(0b0000_0000_0111);
    /// Read-write preset (`elradfmw`).
    pub const READ_WRITE: Permissions = Permissions(0b0000_1111_1111);
    /// Admin preset (`elradfmwMT`).
    pub const ADMIN: Permissions = Permissions(0b0011_1111_1111);

    /// Parses a raw capability string such as `"elradfmw"`.
    ///
    /// The string must be 1-10 characters long and every character must be
    /// a capability letter. Repeated letters collapse into one grant.
    pub fn parse(raw: &str) -> Result<Self> {
        let len = raw.chars().count();
        if len == 0 || len > MAX_RAW_LEN {
            return Err(DirectoryError::InvalidPermissions(raw.to_string()));
        }

        let mut bits = 0u16;
        for letter in raw.chars() {
            let cap = Capability::from_letter(letter)
                .ok_or_else(|| DirectoryError::InvalidPermissions(raw.to_string()))?;
            bits |= cap.bit();
        }
        Ok(Self(bits))
    }

    /// Looks up a preset alias (`read-only`, `read-write`, `admin`).
    pub fn preset(alias: &str) -> Option<Self> {
        match alias {
            "read-only" => Some(Self::READ_ONLY),
            "read-write" => Some(Self::READ_WRITE),
            "admin" => Some(Self::ADMIN),
            _ => None,
        }
    }

    /// Returns whether the set grants `cap`.
    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Returns whether no capability is granted.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates over granted capabilities in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|cap| self.contains(*cap))
    }

    /// One line per granted capability, `"<letter>: <description>"`.
    pub fn describe(&self) -> Vec<String> {
        self.iter()
            .map(|cap| format!("{}: {}", cap.letter(), cap.description()))
            .collect()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cap in self.iter() {
            write!(f, "{}", cap.letter())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions(\"{}\")", self)
    }
}

impl FromStr for Permissions {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Permissions {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalizes_order() {
        let a = Permissions::parse("rle").unwrap();
        let b = Permissions::parse("elr").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "elr");
    }

    #[test]
    fn test_presets_match_letters() {
        assert_eq!(Permissions::READ_ONLY.to_string(), "elr");
        assert_eq!(Permissions::READ_WRITE.to_string(), "elradfmw");
        assert_eq!(Permissions::ADMIN.to_string(), "elradfmwMT");
        assert_eq!(Permissions::preset("admin"), Some(Permissions::ADMIN));
        assert_eq!(Permissions::preset("superuser"), None);
    }

    #[test]
    fn test_parse_rejects_unknown_letters() {
        assert!(Permissions::parse("elrx").is_err());
        assert!(Permissions::parse("ELR").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        assert!(Permissions::parse("").is_err());
        assert!(Permissions::parse("elradfmwMTe").is_err());
        assert!(Permissions::parse("elradfmwMT").is_ok());
    }

    #[test]
    fn test_parse_collapses_repeats() {
        let perms = Permissions::parse("eeel").unwrap();
        assert_eq!(perms.to_string(), "el");
    }

    #[test]
    fn test_contains() {
        let perms = Permissions::parse("elr").unwrap();
        assert!(perms.contains(Capability::Retrieve));
        assert!(!perms.contains(Capability::Store));
    }

    #[test]
    fn test_letters_roundtrip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_letter(cap.letter()), Some(cap));
        }
    }

    #[test]
    fn test_describe() {
        let lines = Permissions::parse("wr").unwrap().describe();
        assert_eq!(lines, vec!["r: retrieve file", "w: store file"]);
    }

    #[test]
    fn test_serde_as_string() {
        let perms = Permissions::parse("wle").unwrap();
        let json = serde_json::to_string(&perms).unwrap();
        assert_eq!(json, "\"elw\"");

        let bad: std::result::Result<Permissions, _> = serde_json::from_str("\"xyz\"");
        assert!(bad.is_err());
    }
}
