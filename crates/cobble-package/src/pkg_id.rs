//! Package identity: a name plus an exact version.

use crate::{Name, PackageError, Result};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A unique package ID: a simple name-version pair.
///
/// The textual form places an `@` between the two; `parse` and `Display`
/// round-trip.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PkgId {
    pub name: Name,
    pub version: Version,
}

impl PkgId {
    pub fn new(name: Name, version: Version) -> Self {
        PkgId { name, version }
    }

    /// Parse a `name@version` string.
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = s
            .split_once('@')
            .ok_or_else(|| PackageError::InvalidPkgId(s.to_string()))?;
        let name = Name::new(name).map_err(|_| PackageError::InvalidPkgId(s.to_string()))?;
        let version =
            Version::parse(version).map_err(|_| PackageError::InvalidPkgId(s.to_string()))?;
        Ok(PkgId { name, version })
    }
}

impl fmt::Display for PkgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for PkgId {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        PkgId::parse(s)
    }
}

impl PartialOrd for PkgId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PkgId {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.name, &self.version).cmp(&(&other.name, &other.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for s in ["foo@1.0.0", "neo-url@0.2.3", "x@1.2.3-beta.1", "y@1.0.0+build.5"] {
            let id = PkgId::parse(s).unwrap();
            assert_eq!(id.to_string(), s);
            assert_eq!(PkgId::parse(&id.to_string()).unwrap(), id);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for s in ["", "foo", "foo@", "@1.0.0", "foo@not.a.version", "fo o@1.0.0"] {
            assert!(PkgId::parse(s).is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn test_ordering_by_name_then_version() {
        let a1 = PkgId::parse("aaa@2.0.0").unwrap();
        let b1 = PkgId::parse("bbb@1.0.0").unwrap();
        let b2 = PkgId::parse("bbb@1.1.0").unwrap();
        assert!(a1 < b1);
        assert!(b1 < b2);
    }
}
