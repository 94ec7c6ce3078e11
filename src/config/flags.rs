//! Passthrough flag bag for component install/upgrade commands

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form `--name=value` flags keyed by flag name.
///
/// Flags are carried through to the remote command untouched; the engine
/// only ever looks values up by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Flags {
    entries: BTreeMap<String, Option<String>>,
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a flag. `flag` may be `--name` or `--name=value`.
    pub fn add(&mut self, flag: &str) {
        let (name, value) = split_flag(flag);
        self.entries.insert(name, value);
    }

    /// Add a flag only when it is not already present
    pub fn add_unless_present(&mut self, flag: &str) {
        let (name, value) = split_flag(flag);
        self.entries.entry(name).or_insert(value);
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(&normalize(name));
    }

    pub fn include(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    /// Value of a flag, `None` when missing or valueless
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&normalize(name))
            .and_then(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Merge `other` on top of `self`
    pub fn merged(&self, other: &Flags) -> Flags {
        let mut out = self.clone();
        for (k, v) in &other.entries {
            out.entries.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{}={}", k, v),
                None => k.clone(),
            })
            .collect()
    }
}

fn normalize(name: &str) -> String {
    let name = name.trim_start_matches('-');
    format!("--{}", name)
}

fn split_flag(flag: &str) -> (String, Option<String>) {
    match flag.trim().split_once('=') {
        Some((name, value)) => (normalize(name), Some(value.to_string())),
        None => (normalize(flag.trim()), None),
    }
}

impl From<Vec<String>> for Flags {
    fn from(list: Vec<String>) -> Self {
        let mut flags = Flags::new();
        for f in list {
            flags.add(&f);
        }
        flags
    }
}

impl From<Flags> for Vec<String> {
    fn from(flags: Flags) -> Self {
        flags.to_vec()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_vec().join(" "))
    }
}
