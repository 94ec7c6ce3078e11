//! Component version parsing and comparison

use crate::error::{KeelError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A component version such as `3.3.0`, `v1.27.4+k0s.0`, `20.10` or `23.0.7-rc1`.
///
/// Pre-release identifiers are compared one dot-separated identifier at a
/// time, with digit runs compared numerically, so `rc2 < rc10` and
/// `alpha.2 < alpha.10`. Build metadata is carried for display but ignored
/// when comparing.
#[derive(Debug, Clone)]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse a version, accepting a leading `v` and a missing patch number
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let core_end = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
        let (core, rest) = trimmed.split_at(core_end);
        let padded = if core.matches('.').count() == 1 {
            format!("{}.0{}", core, rest)
        } else {
            trimmed.to_string()
        };

        semver::Version::parse(&padded)
            .map(Self)
            .map_err(|e| KeelError::InvalidVersion(format!("{}: {}", s, e)))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// Pre-release identifier, if any
    pub fn pre(&self) -> Option<&str> {
        Some(self.0.pre.as_str()).filter(|p| !p.is_empty())
    }

    /// Build metadata, if any
    pub fn build(&self) -> Option<&str> {
        Some(self.0.build.as_str()).filter(|b| !b.is_empty())
    }

    /// `major.minor` of the next minor release
    pub fn next_minor(&self) -> String {
        format!("{}.{}", self.0.major, self.0.minor + 1)
    }

    /// Number of minor releases between `self` and a newer `other` in the same major
    pub fn minor_distance(&self, other: &Version) -> Option<u64> {
        if self.0.major != other.0.major {
            return None;
        }
        other.0.minor.checked_sub(self.0.minor)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.0, &other.0);
        a.major
            .cmp(&b.major)
            .then(a.minor.cmp(&b.minor))
            .then(a.patch.cmp(&b.patch))
            .then_with(|| compare_pre(a.pre.as_str(), b.pre.as_str()))
    }
}

/// A release sorts after any of its pre-releases
fn compare_pre(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let mut left = a.split('.');
            let mut right = b.split('.');
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(x), Some(y)) => match compare_identifier(x, y) {
                        Ordering::Equal => continue,
                        other => return other,
                    },
                }
            }
        }
    }
}

/// Digit runs sort numerically and before letters
fn compare_identifier(a: &str, b: &str) -> Ordering {
    let (left, right) = (runs(a), runs(b));
    for (x, y) in left.iter().zip(right.iter()) {
        let x_digits = x.starts_with(|c: char| c.is_ascii_digit());
        let y_digits = y.starts_with(|c: char| c.is_ascii_digit());
        let ord = match (x_digits, y_digits) {
            (true, true) => {
                let (x, y) = (x.trim_start_matches('0'), y.trim_start_matches('0'));
                x.len().cmp(&y.len()).then_with(|| x.cmp(y))
            }
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

/// Split into alternating digit and non-digit runs
fn runs(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = s.as_bytes();
    for i in 1..bytes.len() {
        if bytes[i].is_ascii_digit() != bytes[i - 1].is_ascii_digit() {
            out.push(&s[start..i]);
            start = i;
        }
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Version {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_versions() {
        let parsed = v("3.3.0");
        assert_eq!((parsed.major(), parsed.minor(), parsed.patch()), (3, 3, 0));

        let parsed = v("v1.27.4+k0s.0");
        assert_eq!((parsed.major(), parsed.minor(), parsed.patch()), (1, 27, 4));
        assert_eq!(parsed.build(), Some("k0s.0"));

        assert_eq!(v("23.0.7-rc1").pre(), Some("rc1"));
        assert_eq!(v("23.0.7").pre(), None);

        assert_eq!(v("20.10"), Version::new(20, 10, 0));
        assert_eq!(v("20.10-beta.1").pre(), Some("beta.1"));

        assert!(Version::parse("latest").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(v("3.2.0") < v("3.3.0"));
        assert!(v("3.3.0-rc1") < v("3.3.0"));
        assert!(v("3.3.1") > v("3.3.0"));
        assert_eq!(v("1.27.4+k0s.0"), v("1.27.4"));
    }

    #[test]
    fn test_prerelease_ordering_is_numeric_per_identifier() {
        assert!(v("1.0.0-alpha.2") < v("1.0.0-alpha.10"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.10") < v("1.0.0-beta"));
        assert!(v("23.0.7-rc.2") < v("23.0.7-rc.10"));
        assert!(v("23.0.7-rc2") < v("23.0.7-rc10"));
        assert!(v("23.0.7-rc10") < v("23.0.7"));
        assert_eq!(v("23.0.7-rc02"), v("23.0.7-rc2"));
    }

    #[test]
    fn test_minor_distance() {
        assert_eq!(v("3.1.0").minor_distance(&v("3.3.0")), Some(2));
        assert_eq!(v("3.1.0").minor_distance(&v("4.0.0")), None);
        assert_eq!(v("3.1.0").next_minor(), "3.2");
    }

    #[test]
    fn test_display_round_trip() {
        assert_eq!(v("v3.3.0-rc1+b7").to_string(), "3.3.0-rc1+b7");
        assert_eq!(v("20.10").to_string(), "20.10.0");
    }
}
