//! Dependency statements and half-open version intervals.

use crate::{Name, PackageError, Result};
use semver::Version;
use std::fmt;
use std::str::FromStr;

/// A half-open version interval `[low, high)`.
///
/// Intervals are never empty; `low < high` holds by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionInterval {
    pub low: Version,
    pub high: Version,
}

impl VersionInterval {
    pub fn new(low: Version, high: Version) -> Result<Self> {
        if low >= high {
            return Err(PackageError::InvalidDependency {
                spec: format!("[{low}, {high})"),
                reason: "the version interval is empty".into(),
            });
        }
        Ok(VersionInterval { low, high })
    }

    /// Does this interval contain `version`?
    pub fn contains(&self, version: &Version) -> bool {
        *version >= self.low && *version < self.high
    }

    /// Intersect two intervals. `None` means they do not overlap.
    pub fn intersect(&self, other: &VersionInterval) -> Option<VersionInterval> {
        let low = self.low.clone().max(other.low.clone());
        let high = self.high.clone().min(other.high.clone());
        if low < high {
            Some(VersionInterval { low, high })
        } else {
            None
        }
    }
}

impl fmt::Display for VersionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.low, self.high)
    }
}

/// A dependency on some version of a named package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub name: Name,
    pub interval: VersionInterval,
}

impl Dependency {
    pub fn new(name: Name, interval: VersionInterval) -> Self {
        Dependency { name, interval }
    }

    /// Parse a dependency statement of the form `<name> <range>` (an `@` may
    /// stand in for the space).
    ///
    /// `<range>` is semver-range syntax: `^1.2.3`, `~1.2.3`, `=1.2.3`,
    /// `>=1.2.3 <2.0.0`, or a bare version (equivalent to caret).
    pub fn parse(spec: &str) -> Result<Self> {
        let spec_trimmed = spec.trim();
        let split = spec_trimmed
            .split_once(char::is_whitespace)
            .or_else(|| spec_trimmed.split_once('@'));
        let (name_str, range_str) = split.ok_or_else(|| PackageError::InvalidDependency {
            spec: spec.to_string(),
            reason: "expected '<name> <version-range>'".into(),
        })?;
        let name = Name::new(name_str).map_err(|_| PackageError::InvalidDependency {
            spec: spec.to_string(),
            reason: format!("invalid package name '{name_str}'"),
        })?;
        let interval = parse_range(range_str.trim()).map_err(|reason| {
            PackageError::InvalidDependency {
                spec: spec.to_string(),
                reason,
            }
        })?;
        Ok(Dependency { name, interval })
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.interval)
    }
}

impl FromStr for Dependency {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        Dependency::parse(s)
    }
}

fn parse_range(range: &str) -> std::result::Result<VersionInterval, String> {
    if let Some(rest) = range.strip_prefix('^') {
        return Ok(caret(parse_version(rest)?));
    }
    if let Some(rest) = range.strip_prefix('~') {
        return Ok(tilde(parse_version(rest)?));
    }
    if let Some(rest) = range.strip_prefix('=') {
        return Ok(exact(parse_version(rest)?));
    }
    if let Some(rest) = range.strip_prefix(">=") {
        // ">=A <B" with an optional comma; "<B" may be omitted.
        let rest = rest.trim_start();
        let (low_str, high_part) = match rest.split_once('<') {
            Some((low, high)) => (low.trim().trim_end_matches(','), Some(high.trim())),
            None => (rest, None),
        };
        let low = parse_version(low_str.trim())?;
        let high = match high_part {
            Some(h) => parse_version(h)?,
            None => Version::new(u64::MAX, u64::MAX, u64::MAX),
        };
        if low >= high {
            return Err(format!("the interval [{low}, {high}) is empty"));
        }
        return Ok(VersionInterval { low, high });
    }
    // A bare version is shorthand for caret compatibility.
    Ok(caret(parse_version(range)?))
}

fn parse_version(s: &str) -> std::result::Result<Version, String> {
    Version::parse(s.trim()).map_err(|e| format!("invalid version '{}': {e}", s.trim()))
}

fn caret(low: Version) -> VersionInterval {
    let high = if low.major > 0 {
        Version::new(low.major + 1, 0, 0)
    } else if low.minor > 0 {
        Version::new(0, low.minor + 1, 0)
    } else {
        Version::new(0, 0, low.patch + 1)
    };
    VersionInterval { low, high }
}

fn tilde(low: Version) -> VersionInterval {
    let high = Version::new(low.major, low.minor + 1, 0);
    VersionInterval { low, high }
}

fn exact(low: Version) -> VersionInterval {
    let high = Version::new(low.major, low.minor, low.patch + 1);
    VersionInterval { low, high }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn iv(low: &str, high: &str) -> VersionInterval {
        VersionInterval::new(Version::parse(low).unwrap(), Version::parse(high).unwrap()).unwrap()
    }

    #[test]
    fn test_interval_rejects_empty() {
        let v1 = Version::new(1, 0, 0);
        assert!(VersionInterval::new(v1.clone(), v1).is_err());
    }

    #[test]
    fn test_interval_contains() {
        let interval = iv("1.0.0", "2.0.0");
        assert!(interval.contains(&Version::new(1, 0, 0)));
        assert!(interval.contains(&Version::new(1, 9, 9)));
        assert!(!interval.contains(&Version::new(2, 0, 0)));
        assert!(!interval.contains(&Version::new(0, 9, 0)));
    }

    #[test]
    fn test_interval_intersection() {
        let a = iv("1.0.0", "2.0.0");
        let b = iv("1.5.0", "3.0.0");
        assert_eq!(a.intersect(&b), Some(iv("1.5.0", "2.0.0")));

        let c = iv("2.0.0", "3.0.0");
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn test_parse_caret() {
        let dep = Dependency::parse("foo ^1.2.3").unwrap();
        assert_eq!(dep.name.as_str(), "foo");
        assert_eq!(dep.interval, iv("1.2.3", "2.0.0"));

        let zero = Dependency::parse("foo ^0.2.3").unwrap();
        assert_eq!(zero.interval, iv("0.2.3", "0.3.0"));

        let tiny = Dependency::parse("foo ^0.0.3").unwrap();
        assert_eq!(tiny.interval, iv("0.0.3", "0.0.4"));
    }

    #[test]
    fn test_parse_bare_version_is_caret() {
        let dep = Dependency::parse("bar 1.0.0").unwrap();
        assert_eq!(dep.interval, iv("1.0.0", "2.0.0"));
    }

    #[test]
    fn test_parse_tilde_and_exact() {
        assert_eq!(
            Dependency::parse("foo ~1.2.3").unwrap().interval,
            iv("1.2.3", "1.3.0")
        );
        assert_eq!(
            Dependency::parse("foo =1.2.3").unwrap().interval,
            iv("1.2.3", "1.2.4")
        );
    }

    #[test]
    fn test_parse_explicit_range() {
        let dep = Dependency::parse("foo >=1.0.0 <1.5.0").unwrap();
        assert_eq!(dep.interval, iv("1.0.0", "1.5.0"));

        let comma = Dependency::parse("foo >=1.0.0, <1.5.0").unwrap();
        assert_eq!(comma.interval, iv("1.0.0", "1.5.0"));
    }

    #[test]
    fn test_parse_at_separator() {
        let dep = Dependency::parse("bar@^1.0.0").unwrap();
        assert_eq!(dep.name.as_str(), "bar");
        assert_eq!(dep.interval, iv("1.0.0", "2.0.0"));
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        for bad in ["", "justname", "name notaversion", "na me 1.0.0"] {
            assert!(Dependency::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
