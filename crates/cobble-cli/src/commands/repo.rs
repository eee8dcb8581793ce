//! `cobble pkg repo` subcommands.

use anyhow::Result;
use cobble_package::{add_remote, remove_remote, update_all, PackageDb};
use tracing::info;

pub fn add(url: &str, no_update: bool) -> Result<()> {
    let db = PackageDb::open(&PackageDb::default_path())?;
    let remote = add_remote(&db, url)?;
    info!("added remote '{}' [{}]", remote.name(), remote.base_url());
    if !no_update {
        remote.update(&db, None, None)?;
    }
    Ok(())
}

pub fn rm(name: &str) -> Result<()> {
    let db = PackageDb::open(&PackageDb::default_path())?;
    remove_remote(&db, name)?;
    info!("removed remote '{name}'");
    Ok(())
}

pub fn update() -> Result<()> {
    let db = PackageDb::open(&PackageDb::default_path())?;
    update_all(&db)?;
    Ok(())
}
