//! The on-disk package cache.
//!
//! One directory per `name@version` holding an extracted source
//! distribution. A cooperative lock file under the cache root guards the
//! whole cache; imports stage into a dot-prefixed temporary directory and
//! land with a rename, so an interrupted import never leaves a half-written
//! entry under its canonical name.

use crate::{solver, Dependency, PackageDb, PackageError, PkgId, Result, SourceDist};
use cobble_util::user_data_dir;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const TEMP_IMPORT_DIR: &str = ".tmp-import";
const LOCK_FILENAME: &str = ".lock";

/// What `add_sdist` should do when the package is already cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfExists {
    Fail,
    Ignore,
    Replace,
}

/// An open handle to the package cache.
///
/// The cache lock is held for the lifetime of this value: shared for `read`
/// handles, exclusive for `write` handles.
pub struct PkgCache {
    root: PathBuf,
    write_enabled: bool,
    sdists: BTreeMap<PkgId, SourceDist>,
    _lock: File,
}

impl PkgCache {
    /// The default per-user cache location.
    pub fn default_path() -> PathBuf {
        user_data_dir().join("pkg")
    }

    /// Open the cache read-only.
    pub fn open_read(root: &Path) -> Result<Self> {
        Self::open(root, false)
    }

    /// Open the cache for mutation.
    pub fn open_write(root: &Path) -> Result<Self> {
        Self::open(root, true)
    }

    fn open(root: &Path, write_enabled: bool) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| PackageError::io(root, e))?;
        let lock = acquire_lock(root, write_enabled)?;

        let mut sdists = BTreeMap::new();
        let entries = fs::read_dir(root).map_err(|e| PackageError::io(root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PackageError::io(root, e))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match SourceDist::from_directory(&path) {
                Ok(sd) => {
                    sdists.insert(sd.manifest.id.clone(), sd);
                }
                Err(e) => {
                    error!(
                        "failed to load source distribution from '{}': {e}",
                        path.display()
                    );
                }
            }
        }

        Ok(PkgCache {
            root: root.to_path_buf(),
            write_enabled,
            sdists,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Import a source distribution under its `name@version` directory.
    pub fn add_sdist(&mut self, sd: &SourceDist, if_exists: IfExists) -> Result<()> {
        assert!(
            self.write_enabled,
            "attempted to write into a package cache that was opened read-only"
        );
        let id = sd.manifest.id.clone();
        let dest = self.root.join(id.to_string());
        if dest.exists() {
            match if_exists {
                IfExists::Fail => {
                    return Err(PackageError::SdistExists { id: id.to_string() });
                }
                IfExists::Ignore => {
                    warn!("package '{id}' is already available in the local cache");
                    return Ok(());
                }
                IfExists::Replace => {
                    info!("package '{id}' is already in the local cache - replacing");
                }
            }
        }

        let tmp = self.root.join(TEMP_IMPORT_DIR);
        if tmp.exists() {
            fs::remove_dir_all(&tmp).map_err(|e| PackageError::io(&tmp, e))?;
        }
        copy_dir_recursive(&sd.path, &tmp)?;
        if dest.exists() {
            fs::remove_dir_all(&dest).map_err(|e| PackageError::io(&dest, e))?;
        }
        fs::rename(&tmp, &dest).map_err(|e| PackageError::io(&dest, e))?;

        let imported = SourceDist::from_directory(&dest)?;
        info!("source distribution '{id}' imported");
        self.sdists.insert(id, imported);
        Ok(())
    }

    /// All cached source distributions, ordered by package ID.
    pub fn iter_sdists(&self) -> impl Iterator<Item = &SourceDist> {
        self.sdists.values()
    }

    pub fn find(&self, id: &PkgId) -> Option<&SourceDist> {
        self.sdists.get(id)
    }

    /// Resolve `deps` against this cache plus the package database.
    pub fn solve(&self, deps: &[Dependency], db: &PackageDb) -> Result<Vec<PkgId>> {
        solver::solve(
            deps,
            |name| {
                let mut all: Vec<PkgId> = self
                    .sdists
                    .keys()
                    .filter(|id| id.name.as_str() == name)
                    .cloned()
                    .collect();
                all.extend(db.by_name(name)?);
                all.sort();
                all.dedup();
                Ok(all)
            },
            |id| match self.find(id) {
                Some(sd) => Ok(sd.manifest.dependencies.clone()),
                None => db.dependencies_of(id),
            },
        )
    }
}

fn acquire_lock(root: &Path, exclusive: bool) -> Result<File> {
    let lock_path = root.join(LOCK_FILENAME);
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| PackageError::io(&lock_path, e))?;

    let attempt = if exclusive {
        lock.try_lock()
    } else {
        lock.try_lock_shared()
    };
    match attempt {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            warn!(
                "another process has the package cache directory locked [{}]",
                root.display()
            );
            warn!("waiting for the cache to be released...");
            let blocked = if exclusive {
                lock.lock()
            } else {
                lock.lock_shared()
            };
            blocked.map_err(|e| PackageError::io(&lock_path, e))?;
        }
        Err(TryLockError::Error(e)) => return Err(PackageError::io(&lock_path, e)),
    }
    Ok(lock)
}

pub(crate) fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| PackageError::io(dest, e))?;
    let entries = fs::read_dir(src).map_err(|e| PackageError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PackageError::io(src, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| PackageError::io(&from, e))?;
        if file_type.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| PackageError::io(&from, e))?;
        }
    }
    Ok(())
}
