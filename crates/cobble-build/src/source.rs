//! Classification of source files by suffix convention.

use std::path::{Path, PathBuf};

const HEADER_EXTS: [&str; 7] = ["h", "hpp", "hxx", "h++", "hh", "inl", "ipp"];
const SOURCE_EXTS: [&str; 5] = ["c", "cpp", "cxx", "c++", "cc"];

/// What role a file plays in a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Never compiled on its own; tracked as a compile input.
    Header,
    /// A regular translation unit, archived into its library.
    Source,
    /// A `*.test.<ext>` translation unit; compiled and linked into a test
    /// executable when tests are enabled.
    Test,
    /// A `*.main.<ext>` translation unit; compiled and linked into an
    /// application executable when apps are enabled.
    App,
}

/// Classify a path by its suffix. `None` means the file plays no role in a
/// build.
pub fn infer_source_kind(path: &Path) -> Option<SourceKind> {
    let ext = path.extension()?.to_str()?;
    if HEADER_EXTS.contains(&ext) {
        return Some(SourceKind::Header);
    }
    if !SOURCE_EXTS.contains(&ext) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.ends_with(".test") {
        Some(SourceKind::Test)
    } else if stem.ends_with(".main") {
        Some(SourceKind::App)
    } else {
        Some(SourceKind::Source)
    }
}

/// A classified source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl SourceFile {
    /// Classify `path`, returning `None` for files of no interest.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let kind = infer_source_kind(&path)?;
        Some(SourceFile { path, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers() {
        for name in [
            "foo.h", "foo.hpp", "foo.hxx", "foo.h++", "foo.hh", "foo.inl", "foo.ipp",
        ] {
            assert_eq!(
                infer_source_kind(Path::new(name)),
                Some(SourceKind::Header),
                "{name}"
            );
        }
    }

    #[test]
    fn test_sources() {
        for name in ["foo.c", "foo.cpp", "foo.cxx", "foo.c++", "foo.cc"] {
            assert_eq!(
                infer_source_kind(Path::new(name)),
                Some(SourceKind::Source),
                "{name}"
            );
        }
    }

    #[test]
    fn test_test_and_app_stems() {
        assert_eq!(
            infer_source_kind(Path::new("widget.test.cpp")),
            Some(SourceKind::Test)
        );
        assert_eq!(
            infer_source_kind(Path::new("tool.main.cc")),
            Some(SourceKind::App)
        );
        // The stem convention does not apply to headers.
        assert_eq!(
            infer_source_kind(Path::new("widget.test.hpp")),
            Some(SourceKind::Header)
        );
    }

    #[test]
    fn test_unknown_files() {
        for name in ["README.md", "notes.txt", "data.json5", "no_extension"] {
            assert_eq!(infer_source_kind(Path::new(name)), None, "{name}");
        }
    }

    #[test]
    fn test_classification_is_stable() {
        let path = Path::new("deep/nested/dir/thing.test.cxx");
        let first = infer_source_kind(path);
        assert_eq!(first, infer_source_kind(path));
        assert_eq!(first, Some(SourceKind::Test));
    }
}
