// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dotted numeric version, e.g. `1.0.2.33`.
///
/// Missing trailing components compare as zero, so `1.0` equals `1.0.0`.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    components: Vec<u32>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid version string: {0:?}")]
pub struct InvalidVersion(pub String);

impl Version {
    /// Parse a version string, returning `None` for anything that isn't
    /// a non-empty list of dot separated unsigned integers.
    pub fn parse(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }

        let mut components = Vec::new();
        for part in value.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            components.push(part.parse::<u32>().ok()?);
        }

        Some(Self { components })
    }

    /// Returns true if `proposed` parses and is strictly newer than `self`.
    pub fn is_older_than(&self, proposed: &str) -> bool {
        Version::parse(proposed).is_some_and(|proposed| *self < proposed)
    }
}

impl Default for Version {
    /// `0.0.0.0`, the version of a component with nothing installed.
    fn default() -> Self {
        Self {
            components: vec![0; 4],
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s).ok_or_else(|| InvalidVersion(s.to_string()))
    }
}

impl PartialEq<&str> for Version {
    fn eq(&self, other: &&str) -> bool {
        Version::parse(other).is_some_and(|other| *self == other)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Version::parse(&value).ok_or_else(|| serde::de::Error::custom(InvalidVersion(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let version = Version::parse("1.0.2.33").unwrap();
        assert_eq!(version, "1.0.2.33.0");
        assert_eq!(version.to_string(), "1.0.2.33");
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(Version::parse(""), None);
        assert_eq!(Version::parse("1..0"), None);
        assert_eq!(Version::parse("1.0."), None);
        assert_eq!(Version::parse("1.a"), None);
        assert_eq!(Version::parse("+1.0"), None);
        assert_eq!(Version::parse("-1"), None);
        assert_eq!(Version::parse("99999999999"), None);
    }

    #[test]
    fn test_compare_pads_with_zeros() {
        assert_eq!(Version::parse("1.0").unwrap(), Version::parse("1.0.0").unwrap());
        assert!(Version::parse("0.9").unwrap() < Version::parse("1.0").unwrap());
        assert!(Version::parse("1.10").unwrap() > Version::parse("1.9.9").unwrap());
    }

    #[test]
    fn test_is_older_than() {
        let current = Version::parse("0.9").unwrap();
        assert!(current.is_older_than("1.0"));
        assert!(!current.is_older_than("0.9"));
        assert!(!current.is_older_than("0.8"));
        assert!(!current.is_older_than("garbage"));
    }

    #[test]
    fn test_eq_str() {
        assert_eq!(Version::parse("1.0").unwrap(), "1.0");
        assert_eq!(Version::parse("1.0").unwrap(), "1.0.0");
    }

    #[test]
    fn test_serde_as_string() {
        let version: Version = serde_json::from_str("\"2.1\"").unwrap();
        assert_eq!(serde_json::to_string(&version).unwrap(), "\"2.1\"");
        assert!(serde_json::from_str::<Version>("\"nope\"").is_err());
    }
}
