//! `cobble pkg` subcommands.

use anyhow::{Context, Result};
use cobble_package::{IfExists, PackageDb, PkgCache, PkgId, SourceDist};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn ls() -> Result<()> {
    let cache = PkgCache::open_read(&PkgCache::default_path())?;
    for sdist in cache.iter_sdists() {
        println!("{}", sdist.id());
    }
    Ok(())
}

pub fn get(ids: &[String]) -> Result<()> {
    let db = PackageDb::open(&PackageDb::default_path())?;
    let mut cache = PkgCache::open_write(&PkgCache::default_path())?;
    for id_str in ids {
        let id = PkgId::parse(id_str)?;
        crate::commands::build::materialize(&db, &mut cache, &id)?;
        info!("package {id} is available in the local cache");
    }
    Ok(())
}

pub fn import(paths: &[PathBuf], if_exists: IfExists) -> Result<()> {
    let mut cache = PkgCache::open_write(&PkgCache::default_path())?;
    for path in paths {
        let sdist = load_sdist(path)?;
        cache.add_sdist(&sdist, if_exists)?;
    }
    Ok(())
}

fn load_sdist(path: &Path) -> Result<SourceDist> {
    SourceDist::from_directory(path)
        .with_context(|| format!("'{}' is not a source distribution", path.display()))
}
