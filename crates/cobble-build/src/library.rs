//! Library discovery within a source distribution.
//!
//! A directory is a library root when it contains a `src/` or `include/`
//! directory. The distribution root itself is one candidate; additional
//! libraries live under `libs/<dir>`. Each library may declare `uses` and
//! `links` in a `library.json5` next to its roots.

use crate::source::SourceFile;
use crate::{BuildError, BuildResult};
use cobble_package::{LibraryManifest, Name};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One library discovered in a source distribution.
#[derive(Clone, Debug)]
pub struct Library {
    /// The library root (contains `src/` and/or `include/`).
    pub root: PathBuf,
    pub name: Name,
    pub manifest: LibraryManifest,
}

impl Library {
    /// The include root exported to dependents: `include/` if present,
    /// otherwise `src/`.
    pub fn public_include_dir(&self) -> PathBuf {
        let include = self.root.join("include");
        if include.is_dir() {
            include
        } else {
            self.root.join("src")
        }
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Include directories used when compiling this library's own sources.
    pub fn private_include_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let include = self.root.join("include");
        if include.is_dir() {
            dirs.push(include);
        }
        let src = self.src_dir();
        if src.is_dir() {
            dirs.push(src);
        }
        dirs
    }

    /// Every classified source file under `src/`, in path order.
    pub fn sources(&self) -> BuildResult<Vec<SourceFile>> {
        let src = self.src_dir();
        if !src.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in WalkDir::new(&src).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&src).to_path_buf();
                BuildError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(sf) = SourceFile::from_path(entry.path()) {
                out.push(sf);
            }
        }
        Ok(out)
    }
}

fn is_library_root(dir: &Path) -> bool {
    dir.join("src").is_dir() || dir.join("include").is_dir()
}

fn load_library(root: &Path, default_name: &Name) -> BuildResult<Library> {
    let manifest = LibraryManifest::load_from_directory(root)?;
    let name = manifest.name.clone().unwrap_or_else(|| default_name.clone());
    Ok(Library {
        root: root.to_path_buf(),
        name,
        manifest,
    })
}

/// Discover the libraries of the source distribution rooted at `sdist_root`.
///
/// The root library (if any) takes the package name; `libs/<dir>` libraries
/// default to their directory name.
pub fn collect_libraries(sdist_root: &Path, pkg_name: &Name) -> BuildResult<Vec<Library>> {
    let mut libraries = Vec::new();
    if is_library_root(sdist_root) {
        libraries.push(load_library(sdist_root, pkg_name)?);
    }

    let libs_dir = sdist_root.join("libs");
    if libs_dir.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&libs_dir)
            .map_err(|e| BuildError::io(&libs_dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();
        for dir in entries {
            if !is_library_root(&dir) {
                continue;
            }
            let default_name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(Name::new)
                .transpose()?
                .unwrap_or_else(|| pkg_name.clone());
            libraries.push(load_library(&dir, &default_name)?);
        }
    }
    Ok(libraries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceKind;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_root_library_inherits_package_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/foo.cpp"));

        let pkg = Name::new("widgets").unwrap();
        let libs = collect_libraries(dir.path(), &pkg).unwrap();
        assert_eq!(libs.len(), 1);
        assert_eq!(libs[0].name.as_str(), "widgets");
        assert_eq!(libs[0].root, dir.path());
    }

    #[test]
    fn test_sub_libraries_named_after_directory() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/root.cpp"));
        touch(&dir.path().join("libs/extra/src/extra.cpp"));
        touch(&dir.path().join("libs/helper/include/helper/helper.hpp"));
        // Not a library: no src/ or include/.
        fs::create_dir_all(dir.path().join("libs/docs")).unwrap();

        let pkg = Name::new("widgets").unwrap();
        let libs = collect_libraries(dir.path(), &pkg).unwrap();
        let names: Vec<&str> = libs.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["widgets", "extra", "helper"]);
    }

    #[test]
    fn test_library_manifest_overrides_name() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/foo.cpp"));
        fs::write(
            dir.path().join("library.json5"),
            r#"{ name: "renamed", uses: ["other/base"] }"#,
        )
        .unwrap();

        let pkg = Name::new("widgets").unwrap();
        let libs = collect_libraries(dir.path(), &pkg).unwrap();
        assert_eq!(libs[0].name.as_str(), "renamed");
        assert_eq!(libs[0].manifest.uses.len(), 1);
    }

    #[test]
    fn test_public_include_dir_prefers_include() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/foo.cpp"));
        let pkg = Name::new("x").unwrap();
        let lib = &collect_libraries(dir.path(), &pkg).unwrap()[0];
        assert_eq!(lib.public_include_dir(), dir.path().join("src"));

        fs::create_dir_all(dir.path().join("include")).unwrap();
        let lib = &collect_libraries(dir.path(), &pkg).unwrap()[0];
        assert_eq!(lib.public_include_dir(), dir.path().join("include"));
    }

    #[test]
    fn test_sources_classified() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("src/foo.cpp"));
        touch(&dir.path().join("src/foo.hpp"));
        touch(&dir.path().join("src/foo.test.cpp"));
        touch(&dir.path().join("src/tool.main.cpp"));
        touch(&dir.path().join("src/README.md"));

        let pkg = Name::new("x").unwrap();
        let lib = &collect_libraries(dir.path(), &pkg).unwrap()[0];
        let sources = lib.sources().unwrap();
        let kinds: Vec<SourceKind> = sources.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::Source,
                SourceKind::Header,
                SourceKind::Test,
                SourceKind::App,
            ]
        );
    }
}
