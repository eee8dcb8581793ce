//! Source distributions: an extracted package directory plus its manifest.

use crate::{PackageManifest, PkgId, Result};
use std::path::{Path, PathBuf};

/// An extracted source distribution on disk.
#[derive(Clone, Debug)]
pub struct SourceDist {
    /// Directory holding the distribution contents.
    pub path: PathBuf,
    /// The parsed `package.json5`.
    pub manifest: PackageManifest,
}

impl SourceDist {
    /// Load the source distribution rooted at `path`.
    pub fn from_directory(path: &Path) -> Result<Self> {
        let manifest = PackageManifest::load_from_directory(path)?;
        Ok(SourceDist {
            path: path.to_path_buf(),
            manifest,
        })
    }

    pub fn id(&self) -> &PkgId {
        &self.manifest.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_directory_reads_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json5"),
            r#"{ name: "widgets", version: "0.3.0", namespace: "acme" }"#,
        )
        .unwrap();

        let sd = SourceDist::from_directory(dir.path()).unwrap();
        assert_eq!(sd.id().to_string(), "widgets@0.3.0");
        assert_eq!(sd.path, dir.path());
    }

    #[test]
    fn test_from_directory_without_manifest_fails() {
        let dir = TempDir::new().unwrap();
        assert!(SourceDist::from_directory(dir.path()).is_err());
    }
}
