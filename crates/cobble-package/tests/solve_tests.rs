//! Dependency solving against the package cache and database together.

use cobble_package::{Dependency, PackageDb, PackageError, PkgCache, PkgId, PkgListing, RemotePkg};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn listing(id: &str, deps: &[&str]) -> PkgListing {
    PkgListing {
        id: PkgId::parse(id).unwrap(),
        deps: deps.iter().map(|d| Dependency::parse(d).unwrap()).collect(),
        description: "test".into(),
        remote_pkg: RemotePkg::from_url("git+https://example.com/x.git#main").unwrap(),
    }
}

fn empty_cache(work: &TempDir) -> PkgCache {
    PkgCache::open_read(&work.path().join("cache")).unwrap()
}

fn deps(specs: &[&str]) -> Vec<Dependency> {
    specs.iter().map(|d| Dependency::parse(d).unwrap()).collect()
}

#[test]
fn test_picks_highest_version_in_interval() {
    let work = TempDir::new().unwrap();
    let db = PackageDb::open_in_memory().unwrap();
    db.store(&listing("bar@1.0.0", &[])).unwrap();
    db.store(&listing("bar@1.2.0", &[])).unwrap();

    let cache = empty_cache(&work);
    let solution = cache.solve(&deps(&["bar >=1.0.0 <2.0.0"]), &db).unwrap();
    assert_eq!(solution.len(), 1);
    assert_eq!(solution[0].to_string(), "bar@1.2.0");
}

#[test]
fn test_conflicting_intervals_name_the_offender() {
    let db = PackageDb::open_in_memory().unwrap();
    db.store(&listing("bar@1.0.0", &["baz >=1.0.0 <1.1.0"]))
        .unwrap();
    db.store(&listing("qux@1.0.0", &["baz >=1.2.0 <2.0.0"]))
        .unwrap();
    db.store(&listing("baz@1.0.5", &[])).unwrap();
    db.store(&listing("baz@1.2.0", &[])).unwrap();

    let work = TempDir::new().unwrap();
    let cache = empty_cache(&work);
    let err = cache
        .solve(&deps(&["bar ^1.0.0", "qux ^1.0.0"]), &db)
        .unwrap_err();
    match err {
        PackageError::SolveFailure { name, .. } => assert_eq!(name, "baz"),
        other => panic!("expected SolveFailure, got {other:?}"),
    }
}

#[test]
fn test_cached_sdists_participate_in_solving() {
    fn make_sdist(dir: &Path, name: &str, version: &str) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("package.json5"),
            format!(r#"{{ name: "{name}", version: "{version}", namespace: "ns" }}"#),
        )
        .unwrap();
    }

    let work = TempDir::new().unwrap();
    let sdist_dir = work.path().join("work");
    make_sdist(&sdist_dir, "local-only", "0.1.0");

    let mut cache = PkgCache::open_write(&work.path().join("cache")).unwrap();
    let sd = cobble_package::SourceDist::from_directory(&sdist_dir).unwrap();
    cache.add_sdist(&sd, cobble_package::IfExists::Fail).unwrap();

    // The package exists only in the cache, not in the database.
    let db = PackageDb::open_in_memory().unwrap();
    let solution = cache.solve(&deps(&["local-only ^0.1.0"]), &db).unwrap();
    assert_eq!(solution.len(), 1);
    assert_eq!(solution[0].to_string(), "local-only@0.1.0");
}
