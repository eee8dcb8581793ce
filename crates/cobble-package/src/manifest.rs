//! Package and library manifests (`package.json5`, `library.json5`).

use crate::{Dependency, Name, PackageError, PkgId, Result};
use cobble_util::did_you_mean;
use semver::Version;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const PACKAGE_MANIFEST_FILENAME: &str = "package.json5";
pub const LIBRARY_MANIFEST_FILENAME: &str = "library.json5";

/// Possible values for `test_driver` in a `package.json5`.
///
/// `Catch` supplies the test harness header only; `CatchMain` additionally
/// supplies a prebuilt `main`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestDriver {
    Catch,
    CatchMain,
}

const TEST_DRIVER_NAMES: [&str; 2] = ["catch", "catch_main"];

impl TestDriver {
    fn parse(s: &str, origin: &Path) -> Result<Self> {
        match s {
            "catch" => Ok(TestDriver::Catch),
            "catch_main" => Ok(TestDriver::CatchMain),
            other => {
                let suggestion = did_you_mean(other, TEST_DRIVER_NAMES)
                    .map(|s| format!(" (did you mean '{s}'?)"))
                    .unwrap_or_default();
                Err(PackageError::manifest(
                    origin,
                    format!("unknown test_driver '{other}'{suggestion}"),
                ))
            }
        }
    }
}

/// A `namespace/name` pair identifying a consumable library.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsageKey {
    pub namespace: Name,
    pub name: Name,
}

impl UsageKey {
    pub fn new(namespace: Name, name: Name) -> Self {
        UsageKey { namespace, name }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (ns, name) = s.split_once('/').ok_or_else(|| PackageError::InvalidName(s.into()))?;
        Ok(UsageKey {
            namespace: Name::new(ns)?,
            name: Name::new(name)?,
        })
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for UsageKey {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        UsageKey::parse(s)
    }
}

#[derive(Deserialize)]
struct RawPackageManifest {
    name: String,
    version: String,
    namespace: String,
    #[serde(default)]
    test_driver: Option<String>,
    #[serde(default)]
    depends: Vec<String>,
}

/// The contents of a `package.json5` file.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageManifest {
    /// The package ID, from `name` and `version` together.
    pub id: PkgId,
    /// The declared namespace. Corresponds to the libman namespace of the
    /// package's libraries.
    pub namespace: Name,
    /// The declared `test_driver`, if any.
    pub test_driver: Option<TestDriver>,
    /// The dependencies declared by `depends`.
    pub dependencies: Vec<Dependency>,
}

impl PackageManifest {
    /// Parse a manifest from an in-memory JSON5 string. `origin` is used for
    /// error messages only.
    pub fn from_json5_str(text: &str, origin: &Path) -> Result<Self> {
        let raw: RawPackageManifest =
            json5::from_str(text).map_err(|e| PackageError::manifest(origin, e))?;
        let name = Name::new(raw.name).map_err(|e| PackageError::manifest(origin, e))?;
        let version =
            Version::parse(&raw.version).map_err(|e| PackageError::manifest(origin, e))?;
        let namespace =
            Name::new(raw.namespace).map_err(|e| PackageError::manifest(origin, e))?;
        let test_driver = raw
            .test_driver
            .as_deref()
            .map(|s| TestDriver::parse(s, origin))
            .transpose()?;
        let dependencies = raw
            .depends
            .iter()
            .map(|spec| Dependency::parse(spec).map_err(|e| PackageError::manifest(origin, e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(PackageManifest {
            id: PkgId::new(name, version),
            namespace,
            test_driver,
            dependencies,
        })
    }

    /// Load a package manifest from a file on disk.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PackageError::io(path, e))?;
        Self::from_json5_str(&text, path)
    }

    /// Find the manifest file within a directory, if present.
    pub fn find_in_directory(dir: &Path) -> Option<PathBuf> {
        let candidate = dir.join(PACKAGE_MANIFEST_FILENAME);
        candidate.is_file().then_some(candidate)
    }

    /// Load the manifest contained in `dir`, failing if there is none.
    pub fn load_from_directory(dir: &Path) -> Result<Self> {
        match Self::find_in_directory(dir) {
            Some(path) => Self::load_from_file(&path),
            None => Err(PackageError::manifest(
                dir,
                format!("no {PACKAGE_MANIFEST_FILENAME} found"),
            )),
        }
    }
}

#[derive(Deserialize)]
struct RawLibraryManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uses: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
}

/// The contents of a `library.json5` file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LibraryManifest {
    /// Explicit library name, overriding the directory-derived default.
    pub name: Option<Name>,
    /// Libraries whose headers this library consumes.
    pub uses: Vec<UsageKey>,
    /// Libraries that must additionally be linked into dependents.
    pub links: Vec<UsageKey>,
}

impl LibraryManifest {
    pub fn from_json5_str(text: &str, origin: &Path) -> Result<Self> {
        let raw: RawLibraryManifest =
            json5::from_str(text).map_err(|e| PackageError::manifest(origin, e))?;
        let name = raw
            .name
            .map(Name::new)
            .transpose()
            .map_err(|e| PackageError::manifest(origin, e))?;
        let parse_keys = |keys: &[String]| -> Result<Vec<UsageKey>> {
            keys.iter()
                .map(|k| {
                    UsageKey::parse(k).map_err(|_| {
                        PackageError::manifest(
                            origin,
                            format!("invalid usage key '{k}': expected 'namespace/name'"),
                        )
                    })
                })
                .collect()
        };
        Ok(LibraryManifest {
            name,
            uses: parse_keys(&raw.uses)?,
            links: parse_keys(&raw.links)?,
        })
    }

    /// Load the `library.json5` in `dir`, or a default manifest when absent.
    pub fn load_from_directory(dir: &Path) -> Result<Self> {
        let path = dir.join(LIBRARY_MANIFEST_FILENAME);
        if !path.is_file() {
            return Ok(LibraryManifest::default());
        }
        let text = fs::read_to_string(&path).map_err(|e| PackageError::io(&path, e))?;
        Self::from_json5_str(&text, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pkg(text: &str) -> Result<PackageManifest> {
        PackageManifest::from_json5_str(text, Path::new("package.json5"))
    }

    #[test]
    fn test_minimal_manifest() {
        let man = parse_pkg(r#"{ name: "foo", version: "1.2.3", namespace: "acme" }"#).unwrap();
        assert_eq!(man.id.to_string(), "foo@1.2.3");
        assert_eq!(man.namespace.as_str(), "acme");
        assert_eq!(man.test_driver, None);
        assert!(man.dependencies.is_empty());
    }

    #[test]
    fn test_manifest_with_depends_and_driver() {
        let man = parse_pkg(
            r#"{
                name: "foo",
                version: "1.0.0",
                namespace: "acme",
                test_driver: "catch_main",
                depends: ["bar ^1.0.0", "baz >=1.2.0 <2.0.0"],
            }"#,
        )
        .unwrap();
        assert_eq!(man.test_driver, Some(TestDriver::CatchMain));
        assert_eq!(man.dependencies.len(), 2);
        assert_eq!(man.dependencies[0].name.as_str(), "bar");
    }

    #[test]
    fn test_manifest_unknown_test_driver_suggests() {
        let err = parse_pkg(
            r#"{ name: "foo", version: "1.0.0", namespace: "ns", test_driver: "cach" }"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cach"), "{msg}");
        assert!(msg.contains("did you mean 'catch'"), "{msg}");
    }

    #[test]
    fn test_manifest_missing_fields_fail() {
        assert!(parse_pkg(r#"{ name: "foo", version: "1.0.0" }"#).is_err());
        assert!(parse_pkg(r#"{ version: "1.0.0", namespace: "ns" }"#).is_err());
    }

    #[test]
    fn test_usage_key_parse() {
        let key = UsageKey::parse("acme/widgets").unwrap();
        assert_eq!(key.namespace.as_str(), "acme");
        assert_eq!(key.name.as_str(), "widgets");
        assert_eq!(key.to_string(), "acme/widgets");
        assert!(UsageKey::parse("no-slash").is_err());
    }

    #[test]
    fn test_library_manifest() {
        let lib = LibraryManifest::from_json5_str(
            r#"{ uses: ["acme/base"], links: ["acme/platform"] }"#,
            Path::new("library.json5"),
        )
        .unwrap();
        assert_eq!(lib.uses.len(), 1);
        assert_eq!(lib.links[0].to_string(), "acme/platform");
        assert_eq!(lib.name, None);
    }
}
