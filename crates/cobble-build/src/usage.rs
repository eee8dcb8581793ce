//! Usage requirements: what a dependent needs to consume a library.
//!
//! The map is keyed by `namespace/name` strings rather than by references
//! between library objects, so the plan graph stays acyclic. It is built
//! once from the plan, before execution begins, and is read-only thereafter.

use crate::{BuildError, BuildResult};
use cobble_package::UsageKey;
use cobble_util::did_you_mean;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// The public interface of one library.
#[derive(Clone, Debug, Default)]
pub struct LibraryUsage {
    /// Directories dependents must put on their include path.
    pub include_dirs: Vec<PathBuf>,
    /// The archive (or lone object) dependents must link, if any.
    pub linkable_path: Option<PathBuf>,
    /// Libraries this library's headers require in turn.
    pub uses: Vec<UsageKey>,
    /// Libraries that must additionally be linked into dependents.
    pub links: Vec<UsageKey>,
}

/// The frozen usage-requirements map for one build.
#[derive(Clone, Debug, Default)]
pub struct UsageRequirements {
    entries: BTreeMap<UsageKey, LibraryUsage>,
}

impl UsageRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: UsageKey, usage: LibraryUsage) {
        self.entries.insert(key, usage);
    }

    /// Look up one entry. Unknown keys fail with a did-you-mean hint.
    pub fn get(&self, key: &UsageKey) -> BuildResult<&LibraryUsage> {
        self.entries.get(key).ok_or_else(|| {
            let key_str = key.to_string();
            let suggestion =
                did_you_mean(&key_str, self.entries.keys().map(|k| k.to_string()));
            BuildError::UnknownUsage {
                key: key_str,
                suggestion,
            }
        })
    }

    pub fn contains(&self, key: &UsageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Include directories contributed by `keys` and the transitive closure
    /// of their `uses`, in discovery order.
    pub fn include_dirs_for(&self, keys: &[UsageKey]) -> BuildResult<Vec<PathBuf>> {
        let mut seen: BTreeSet<&UsageKey> = BTreeSet::new();
        let mut queue: Vec<&UsageKey> = keys.iter().collect();
        let mut dirs = Vec::new();
        while let Some(key) = queue.pop() {
            if !seen.insert(key) {
                continue;
            }
            let usage = self.get(key)?;
            for dir in &usage.include_dirs {
                if !dirs.contains(dir) {
                    dirs.push(dir.clone());
                }
            }
            queue.extend(usage.uses.iter());
        }
        Ok(dirs)
    }

    /// Linkable inputs contributed by `keys` and the transitive closure of
    /// their `uses` and `links`, dependents before dependencies.
    pub fn link_paths_for(&self, keys: &[UsageKey]) -> BuildResult<Vec<PathBuf>> {
        let mut seen: BTreeSet<UsageKey> = BTreeSet::new();
        let mut paths = Vec::new();
        for key in keys {
            self.visit_links(key, &mut seen, &mut paths)?;
        }
        Ok(paths)
    }

    fn visit_links(
        &self,
        key: &UsageKey,
        seen: &mut BTreeSet<UsageKey>,
        paths: &mut Vec<PathBuf>,
    ) -> BuildResult<()> {
        if !seen.insert(key.clone()) {
            return Ok(());
        }
        let usage = self.get(key)?;
        if let Some(linkable) = &usage.linkable_path {
            paths.push(linkable.clone());
        }
        for dep in usage.uses.iter().chain(usage.links.iter()) {
            self.visit_links(dep, seen, paths)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> UsageKey {
        UsageKey::parse(s).unwrap()
    }

    fn usage(
        include: &str,
        linkable: Option<&str>,
        uses: &[&str],
        links: &[&str],
    ) -> LibraryUsage {
        LibraryUsage {
            include_dirs: vec![PathBuf::from(include)],
            linkable_path: linkable.map(PathBuf::from),
            uses: uses.iter().map(|s| key(s)).collect(),
            links: links.iter().map(|s| key(s)).collect(),
        }
    }

    #[test]
    fn test_unknown_key_suggests() {
        let mut ureqs = UsageRequirements::new();
        ureqs.insert(key("acme/widgets"), LibraryUsage::default());

        let err = ureqs.get(&key("acme/wigdets")).unwrap_err();
        match err {
            BuildError::UnknownUsage { key, suggestion } => {
                assert_eq!(key, "acme/wigdets");
                assert_eq!(suggestion.as_deref(), Some("acme/widgets"));
            }
            other => panic!("expected UnknownUsage, got {other:?}"),
        }
    }

    #[test]
    fn test_include_dirs_follow_uses_transitively() {
        let mut ureqs = UsageRequirements::new();
        ureqs.insert(key("a/a"), usage("/inc/a", None, &["b/b"], &[]));
        ureqs.insert(key("b/b"), usage("/inc/b", None, &["c/c"], &[]));
        ureqs.insert(key("c/c"), usage("/inc/c", None, &[], &[]));

        let dirs = ureqs.include_dirs_for(&[key("a/a")]).unwrap();
        assert_eq!(dirs.len(), 3);
        assert!(dirs.contains(&PathBuf::from("/inc/c")));
    }

    #[test]
    fn test_link_paths_dependents_first() {
        let mut ureqs = UsageRequirements::new();
        ureqs.insert(
            key("app/app"),
            usage("/inc/app", Some("/lib/libapp.a"), &["base/base"], &[]),
        );
        ureqs.insert(
            key("base/base"),
            usage("/inc/base", Some("/lib/libbase.a"), &[], &["sys/z"]),
        );
        ureqs.insert(key("sys/z"), usage("/inc/z", Some("/lib/libz.a"), &[], &[]));

        let paths = ureqs.link_paths_for(&[key("app/app")]).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/lib/libapp.a"),
                PathBuf::from("/lib/libbase.a"),
                PathBuf::from("/lib/libz.a"),
            ]
        );
    }

    #[test]
    fn test_link_paths_deduplicate_diamonds() {
        let mut ureqs = UsageRequirements::new();
        ureqs.insert(key("a/a"), usage("/a", Some("/lib/a.a"), &["c/c"], &[]));
        ureqs.insert(key("b/b"), usage("/b", Some("/lib/b.a"), &["c/c"], &[]));
        ureqs.insert(key("c/c"), usage("/c", Some("/lib/c.a"), &[], &[]));

        let paths = ureqs.link_paths_for(&[key("a/a"), key("b/b")]).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/lib/a.a"),
                PathBuf::from("/lib/c.a"),
                PathBuf::from("/lib/b.a"),
            ]
        );
    }
}
