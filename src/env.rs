//! Environment sets for launched children.
//!
//! An [`Env`] is a mutable collection of `KEY=VALUE` entries with unique
//! keys. A builder holds one only after the caller touches the environment;
//! until then the child inherits the parent's environment verbatim, which
//! is a different state from holding an empty set.
//!
//! # Key comparison
//!
//! Keys are compared byte-for-byte, case-sensitively, on every platform.
//! Windows-native tools may resolve variable names case-insensitively once
//! the child is running; this module does not normalize or fold case, so
//! `Path` and `PATH` are distinct entries here.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};

/// A set of environment variables destined for a child process.
///
/// Iteration order is unspecified. Entries are never shared between
/// builders; cloning an [`Env`] yields an independent copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: HashMap<OsString, OsString>,
}

impl Env {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a snapshot of the calling process's
    /// environment, one entry per `KEY=VALUE` string split at the first
    /// `=`.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.vars.get(key.as_ref()).map(OsString::as_os_str)
    }

    /// Inserts `key=value`, overwriting any existing entry for `key`.
    pub fn set(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Removes the entry for `key`. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: impl AsRef<OsStr>) {
        self.vars.remove(key.as_ref());
    }

    /// Renames the entry `old` to `new`, keeping its value.
    ///
    /// A no-op when `old` is absent. When `new` already exists its entry is
    /// overwritten by the renamed one.
    pub fn rename(&mut self, old: impl AsRef<OsStr>, new: impl Into<OsString>) {
        if let Some(value) = self.vars.remove(old.as_ref()) {
            self.vars.insert(new.into(), value);
        }
    }

    /// Removes every entry, leaving the set empty. A child launched with an
    /// empty set starts with an empty environment rather than an inherited
    /// one.
    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Number of entries in the set.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the set holds no entries.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates over `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_inserts_and_get_finds() {
        let mut env = Env::new();
        env.set("SPELL_A", "1");
        assert_eq!(env.get("SPELL_A"), Some(OsStr::new("1")));
        assert_eq!(env.get("SPELL_B"), None);
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut env = Env::new();
        env.set("SPELL_A", "2");
        env.set("SPELL_A", "1");
        assert_eq!(env.get("SPELL_A"), Some(OsStr::new("1")));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut env = Env::new();
        env.set("path", "lower");
        env.set("PATH", "upper");
        assert_eq!(env.get("path"), Some(OsStr::new("lower")));
        assert_eq!(env.get("PATH"), Some(OsStr::new("upper")));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn remove_is_a_no_op_when_absent() {
        let mut env = Env::new();
        env.set("SPELL_A", "1");
        env.remove("SPELL_MISSING");
        assert_eq!(env.len(), 1);
        env.remove("SPELL_A");
        assert!(env.is_empty());
    }

    #[test]
    fn rename_moves_the_value() {
        let mut env = Env::new();
        env.set("OLD", "kept");
        env.rename("OLD", "NEW");
        assert_eq!(env.get("OLD"), None);
        assert_eq!(env.get("NEW"), Some(OsStr::new("kept")));
    }

    #[test]
    fn rename_of_an_absent_key_is_a_no_op() {
        let mut env = Env::new();
        env.set("KEEP", "1");
        env.rename("MISSING", "KEEP");
        assert_eq!(env.get("KEEP"), Some(OsStr::new("1")));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn rename_onto_an_existing_key_overwrites_it() {
        let mut env = Env::new();
        env.set("SRC", "moved");
        env.set("DST", "obsolete");
        env.rename("SRC", "DST");
        assert_eq!(env.get("DST"), Some(OsStr::new("moved")));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn clear_empties_the_set() {
        let mut env = Env::new();
        env.set("SPELL_A", "1");
        env.set("SPELL_B", "2");
        env.clear();
        assert!(env.is_empty());
    }

    #[test]
    fn capture_snapshots_the_os_environment() {
        let env = Env::capture();
        assert!(!env.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn capture_includes_path() {
        let env = Env::capture();
        assert!(env.get("PATH").is_some());
    }
}
