//! Remote package index synchronization.
//!
//! Each remote serves a SQLite index at `<base-url>/repo.db` with tables
//! `repo_meta(name)`, `repo_packages(package_id, name, version, description,
//! url)` and `repo_package_deps(package_id, dep_name, low, high)`. Syncing
//! downloads the index (with a conditional GET keyed on the stored ETag and
//! Last-Modified), then imports its listings into the package database in a
//! single validated transaction.

use crate::fetch::HTTP;
use crate::{PackageDb, PackageError, Result};
use reqwest::header;
use reqwest::StatusCode;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::io;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, trace};

/// A named, URL-addressable package index.
#[derive(Clone, Debug)]
pub struct PkgRemote {
    name: String,
    base_url: String,
}

enum RepoDbFetch {
    NotModified,
    Fresh {
        file: NamedTempFile,
        etag: Option<String>,
        last_modified: Option<String>,
    },
}

fn repo_db_url(base_url: &str) -> String {
    format!("{}/repo.db", base_url.trim_end_matches('/'))
}

fn fetch_repo_db(
    base_url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Result<RepoDbFetch> {
    let url = repo_db_url(base_url);
    let http_err = |reason: String| PackageError::Http {
        url: url.clone(),
        reason,
    };

    let mut req = HTTP.get(&url);
    if let Some(etag) = etag {
        req = req.header(header::IF_NONE_MATCH, etag);
    }
    if let Some(mtime) = last_modified {
        req = req.header(header::IF_MODIFIED_SINCE, mtime);
    }
    let mut resp = req.send().map_err(|e| http_err(e.to_string()))?;
    if resp.status() == StatusCode::NOT_MODIFIED {
        return Ok(RepoDbFetch::NotModified);
    }
    if !resp.status().is_success() {
        return Err(http_err(format!("HTTP status {}", resp.status())));
    }

    let header_string = |name: header::HeaderName| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let etag = header_string(header::ETAG);
    let last_modified = header_string(header::LAST_MODIFIED);

    let mut file =
        NamedTempFile::new().map_err(|e| PackageError::io(std::env::temp_dir(), e))?;
    io::copy(&mut resp, file.as_file_mut())
        .map_err(|e| http_err(format!("failed to read response body: {e}")))?;
    Ok(RepoDbFetch::Fresh {
        file,
        etag,
        last_modified,
    })
}

fn open_remote_index(path: &std::path::Path) -> Result<Connection> {
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY,
    )?)
}

impl PkgRemote {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        PkgRemote {
            name: name.into(),
            base_url: base_url.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Contact a remote and read its self-declared name from `repo_meta`.
    pub fn connect(url: &str) -> Result<PkgRemote> {
        let fetched = fetch_repo_db(url, None, None)?;
        let RepoDbFetch::Fresh { file, .. } = fetched else {
            return Err(PackageError::Http {
                url: repo_db_url(url),
                reason: "unexpected 304 response to an unconditional request".into(),
            });
        };
        let index = open_remote_index(file.path())?;
        let name: String = index.query_row("SELECT name FROM repo_meta", [], |r| r.get(0))?;
        Ok(PkgRemote::new(name, url))
    }

    /// Register (or re-point) this remote in the package database.
    pub fn store(&self, db: &PackageDb) -> Result<()> {
        db.conn().execute(
            "INSERT INTO remotes (name, url) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET url = excluded.url",
            params![self.name, self.base_url],
        )?;
        Ok(())
    }

    /// Synchronize the package database with this remote's index.
    ///
    /// Passing the previously-recorded ETag / Last-Modified makes the fetch
    /// conditional; a not-modified response leaves the database untouched.
    pub fn update(
        &self,
        db: &PackageDb,
        etag: Option<&str>,
        db_mtime: Option<&str>,
    ) -> Result<()> {
        info!("pulling repository contents for {} [{}]", self.name, self.base_url);

        let fetched = fetch_repo_db(&self.base_url, etag, db_mtime)?;
        let RepoDbFetch::Fresh {
            file,
            etag,
            last_modified,
        } = fetched
        else {
            info!("package index '{}' is up-to-date", self.name);
            return Ok(());
        };

        let conn = db.conn();
        let remote_id: i64 = conn
            .query_row(
                "SELECT remote_id FROM remotes WHERE name = ?1",
                params![self.name],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| PackageError::Nonesuch {
                kind: "remote",
                name: self.name.clone(),
                suggestion: None,
            })?;

        trace!("attaching downloaded index");
        conn.execute(
            "ATTACH DATABASE ?1 AS remote",
            params![file.path().to_string_lossy()],
        )?;
        let result = self.import_attached(conn, remote_id, etag, last_modified);
        let _ = conn.execute("DETACH DATABASE remote", []);
        result
    }

    fn import_attached(
        &self,
        conn: &Connection,
        remote_id: i64,
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<()> {
        let base_url = self.base_url.trim_end_matches('/');
        let tx = conn.unchecked_transaction()?;

        trace!("clearing prior contents");
        tx.execute("DELETE FROM packages WHERE remote_id = ?1", params![remote_id])?;

        trace!("importing packages");
        tx.execute(
            "INSERT INTO packages (name, version, description, remote_url, remote_id)
             SELECT name,
                    version,
                    description,
                    CASE
                      WHEN url LIKE 'dds:%@%' THEN
                        -- 'dds:name@ver' is shorthand for a package hosted by
                        -- this same repository.
                        printf('dds+%s/%s', ?2, substr(url, 5))
                      ELSE
                        url
                    END,
                    ?1
             FROM remote.repo_packages",
            params![remote_id, base_url],
        )?;

        trace!("importing dependencies");
        tx.execute(
            "INSERT OR REPLACE INTO deps (pkg_id, dep_name, low, high)
             SELECT local_pkgs.pkg_id, rdeps.dep_name, rdeps.low, rdeps.high
               FROM remote.repo_package_deps AS rdeps
               JOIN remote.repo_packages AS rpkgs USING (package_id)
               JOIN packages AS local_pkgs USING (name, version)",
            [],
        )?;

        trace!("running integrity checks");
        let mut any_failed = false;
        {
            let mut st = tx.prepare("PRAGMA foreign_key_check")?;
            let mut rows = st.query([])?;
            while let Some(row) = rows.next()? {
                let child: String = row.get(0)?;
                let rowid: i64 = row.get(1)?;
                let parent: String = row.get(2)?;
                error!("foreign key violation after import: {child} row {rowid} referencing {parent}");
                any_failed = true;
            }
        }
        {
            let mut st = tx.prepare("PRAGMA main.integrity_check")?;
            let mut rows = st.query([])?;
            while let Some(row) = rows.next()? {
                let message: String = row.get(0)?;
                if message != "ok" {
                    error!("database error after import: {message}");
                    any_failed = true;
                }
            }
        }
        if any_failed {
            // The transaction rolls back when dropped.
            return Err(PackageError::Integrity(
                "index import produced integrity errors".into(),
            ));
        }

        if let Some(etag) = etag {
            tx.execute(
                "UPDATE remotes SET db_etag = ?1 WHERE name = ?2",
                params![etag, self.name],
            )?;
        }
        if let Some(mtime) = last_modified {
            tx.execute(
                "UPDATE remotes SET db_mtime = ?1 WHERE name = ?2",
                params![mtime, self.name],
            )?;
        }
        tx.commit()?;
        debug!("imported package index for '{}'", self.name);
        Ok(())
    }
}

/// Synchronize every registered remote, then compact the database.
pub fn update_all(db: &PackageDb) -> Result<()> {
    info!("updating package index from all remotes");
    let remotes: Vec<(String, String, Option<String>, Option<String>)> = {
        let mut st = db
            .conn()
            .prepare("SELECT name, url, db_etag, db_mtime FROM remotes")?;
        let rows = st.query_map([], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for (name, url, etag, db_mtime) in remotes {
        let remote = PkgRemote::new(name, url);
        remote.update(db, etag.as_deref(), db_mtime.as_deref())?;
    }

    debug!("recompacting package database");
    db.conn().execute_batch("VACUUM")?;
    Ok(())
}

/// Register a new remote by URL and record it in the database.
pub fn add_remote(db: &PackageDb, url: &str) -> Result<PkgRemote> {
    let remote = PkgRemote::connect(url)?;
    remote.store(db)?;
    Ok(remote)
}

/// Remove a remote and (by cascade) every package imported from it.
pub fn remove_remote(db: &PackageDb, name: &str) -> Result<()> {
    let conn = db.conn();
    let tx = conn.unchecked_transaction()?;
    let remote_id: Option<i64> = tx
        .query_row(
            "SELECT remote_id FROM remotes WHERE name = ?1",
            params![name],
            |r| r.get(0),
        )
        .optional()?;
    let Some(remote_id) = remote_id else {
        let names: Vec<String> = {
            let mut st = tx.prepare("SELECT name FROM remotes")?;
            let rows = st.query_map([], |r| r.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        return Err(PackageError::nonesuch("remote", name, names));
    };
    tx.execute("DELETE FROM remotes WHERE remote_id = ?1", params![remote_id])?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_db_url_strips_trailing_slashes() {
        assert_eq!(
            repo_db_url("https://example.com/repo///"),
            "https://example.com/repo/repo.db"
        );
        assert_eq!(repo_db_url("https://example.com"), "https://example.com/repo.db");
    }

    #[test]
    fn test_remove_remote_missing_suggests() {
        let db = PackageDb::open_in_memory().unwrap();
        PkgRemote::new("upstream", "https://example.com")
            .store(&db)
            .unwrap();

        let err = remove_remote(&db, "upstrem").unwrap_err();
        match err {
            PackageError::Nonesuch { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("upstream"));
            }
            other => panic!("expected Nonesuch, got {other:?}"),
        }
    }

    #[test]
    fn test_store_remote_upserts_url() {
        let db = PackageDb::open_in_memory().unwrap();
        PkgRemote::new("upstream", "https://old.example.com")
            .store(&db)
            .unwrap();
        PkgRemote::new("upstream", "https://new.example.com")
            .store(&db)
            .unwrap();

        let url: String = db
            .conn()
            .query_row(
                "SELECT url FROM remotes WHERE name = 'upstream'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(url, "https://new.example.com");
    }
}
