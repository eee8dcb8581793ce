//! The local package database.
//!
//! Records every package listing known to this machine: its identity, its
//! dependency intervals, a description, and the remote it was imported from.

use crate::{Dependency, Name, PackageError, PkgId, RemotePkg, Result, VersionInterval};
use cobble_util::user_data_dir;
use rusqlite::{params, Connection, OptionalExtension};
use semver::Version;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Current package database schema version. A database reporting a newer
/// version is refused: package data must never be silently downgraded.
const SCHEMA_VERSION: i64 = 1;

/// A package known to the database.
#[derive(Clone, Debug)]
pub struct PkgListing {
    pub id: PkgId,
    pub deps: Vec<Dependency>,
    pub description: String,
    pub remote_pkg: RemotePkg,
}

/// Handle to the package database.
pub struct PackageDb {
    conn: Connection,
}

impl PackageDb {
    /// The default on-disk location of the database.
    pub fn default_path() -> PathBuf {
        user_data_dir().join("pkgs.db")
    }

    /// Open (and migrate) the database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PackageError::io(parent, e))?;
            }
        }
        debug!("opening package database [{}]", path.display());
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        ensure_migrated(&conn)?;
        trace!("package database ready");
        Ok(PackageDb { conn })
    }

    /// Record a package listing. Replaces any existing listing with the same
    /// name and version that has no remote association.
    pub fn store(&self, listing: &PkgListing) -> Result<()> {
        debug!("recording package {}", listing.id);
        let tx = self.conn.unchecked_transaction()?;
        // SQLite's UNIQUE constraint treats NULL remote_ids as distinct, so
        // the upsert for locally-recorded listings is spelled out.
        tx.execute(
            "DELETE FROM packages WHERE name = ?1 AND version = ?2 AND remote_id IS NULL",
            params![listing.id.name.as_str(), listing.id.version.to_string()],
        )?;
        tx.execute(
            "INSERT INTO packages (name, version, description, remote_url)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                listing.id.name.as_str(),
                listing.id.version.to_string(),
                listing.description,
                listing.remote_pkg.to_url_string(),
            ],
        )?;
        let pkg_row = tx.last_insert_rowid();
        for dep in &listing.deps {
            trace!("  depends on: {dep}");
            tx.execute(
                "INSERT OR REPLACE INTO deps (pkg_id, dep_name, low, high)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    pkg_row,
                    dep.name.as_str(),
                    dep.interval.low.to_string(),
                    dep.interval.high.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Look up the listing for an exact package ID. Fails with a
    /// did-you-mean suggestion when the package is unknown.
    pub fn get(&self, id: &PkgId) -> Result<PkgListing> {
        trace!("lookup package {id}");
        let row = self
            .conn
            .query_row(
                "SELECT description, remote_url
                   FROM packages
                  WHERE name = ?1 AND version = ?2
                  ORDER BY pkg_id DESC",
                params![id.name.as_str(), id.version.to_string()],
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;
        let (description, remote_url) = match row {
            Some(pair) => pair,
            None => {
                let all = self.all()?;
                return Err(PackageError::nonesuch(
                    "package",
                    id.to_string(),
                    all.iter().map(|p| p.to_string()),
                ));
            }
        };
        let deps = self.dependencies_of(id)?;
        Ok(PkgListing {
            id: id.clone(),
            deps,
            description,
            remote_pkg: RemotePkg::from_url(&remote_url)?,
        })
    }

    /// All known versions of `name`, most recently registered first.
    pub fn by_name(&self, name: &str) -> Result<Vec<PkgId>> {
        let mut st = self.conn.prepare(
            "SELECT name, version FROM packages WHERE name = ?1 ORDER BY pkg_id DESC",
        )?;
        let rows = st.query_map(params![name], name_version_row)?;
        collect_pkg_ids(rows)
    }

    /// Every package in the database.
    pub fn all(&self) -> Result<Vec<PkgId>> {
        let mut st = self.conn.prepare("SELECT name, version FROM packages")?;
        let rows = st.query_map([], name_version_row)?;
        collect_pkg_ids(rows)
    }

    /// The dependency intervals declared by a package.
    pub fn dependencies_of(&self, id: &PkgId) -> Result<Vec<Dependency>> {
        trace!("lookup dependencies of {id}");
        let mut st = self.conn.prepare(
            "WITH this_pkg AS (
                SELECT pkg_id FROM packages WHERE name = ?1 AND version = ?2
             )
             SELECT dep_name, low, high
               FROM deps
              WHERE pkg_id IN this_pkg
              ORDER BY dep_name",
        )?;
        let rows = st.query_map(params![id.name.as_str(), id.version.to_string()], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        let mut deps = Vec::new();
        for row in rows {
            let (name, low, high) = row?;
            let interval = VersionInterval::new(Version::parse(&low)?, Version::parse(&high)?)?;
            deps.push(Dependency::new(Name::new(name)?, interval));
        }
        Ok(deps)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn name_version_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((r.get(0)?, r.get(1)?))
}

fn collect_pkg_ids(
    rows: impl Iterator<Item = rusqlite::Result<(String, String)>>,
) -> Result<Vec<PkgId>> {
    let mut out = Vec::new();
    for row in rows {
        let (name, version) = row?;
        out.push(PkgId::new(Name::new(name)?, Version::parse(&version)?));
    }
    Ok(out)
}

fn ensure_migrated(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS meta (version INTEGER NOT NULL);")?;
    let tx = conn.unchecked_transaction()?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM meta", [], |r| r.get(0))
        .optional()?;
    let version = match version {
        Some(v) => v,
        None => {
            tx.execute("INSERT INTO meta (version) VALUES (0)", [])?;
            0
        }
    };
    if version > SCHEMA_VERSION {
        return Err(PackageError::DbTooNew {
            found: version,
            supported: SCHEMA_VERSION,
        });
    }
    if version < 1 {
        debug!("applying package database migration 1");
        migrate_1(&tx)?;
    }
    tx.execute("UPDATE meta SET version = ?1", params![SCHEMA_VERSION])?;
    tx.commit()?;
    Ok(())
}

fn migrate_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE remotes (
            remote_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            db_etag TEXT,
            db_mtime TEXT
        );

        CREATE TABLE packages (
            pkg_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            description TEXT NOT NULL,
            remote_url TEXT NOT NULL,
            remote_id INTEGER
                REFERENCES remotes (remote_id)
                ON DELETE CASCADE,
            UNIQUE (name, version, remote_id)
        );

        CREATE TABLE deps (
            dep_id INTEGER PRIMARY KEY AUTOINCREMENT,
            pkg_id INTEGER
                NOT NULL
                REFERENCES packages (pkg_id)
                ON DELETE CASCADE,
            dep_name TEXT NOT NULL,
            low TEXT NOT NULL,
            high TEXT NOT NULL,
            UNIQUE (pkg_id, dep_name)
        );",
    )?;
    Ok(())
}
