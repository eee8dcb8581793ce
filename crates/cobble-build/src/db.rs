//! The per-build-tree metadata database.
//!
//! Records, for every source file ever compiled into this build tree, the
//! command used, the captured compiler output, a running average duration,
//! and the set of input files (headers) the compilation depended on with the
//! modification time observed for each. The staleness decision in the
//! execution engine is made entirely from this data.
//!
//! The database is a cache: when its schema does not match, or the file is
//! corrupt, it is deleted and recreated. That costs one full rebuild and is
//! not an error.

use crate::{BuildError, BuildResult};
use rusqlite::{named_params, params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info};

/// Name of the database file within the build output root.
pub const BUILD_DB_FILENAME: &str = ".dds.db";

const SCHEMA_VERSION: i64 = 1;

/// The record of a successful compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedCompilation {
    /// The command line, as a single quoted string.
    pub command: String,
    /// Combined stdout and stderr captured from the compiler.
    pub output: String,
    /// Duration in milliseconds. On read this is the stored running average.
    pub duration_ms: i64,
}

/// One recorded input of a compilation output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputFileInfo {
    pub path: PathBuf,
    /// Modification time observed when the output was produced, in
    /// nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
}

/// Convert a filesystem timestamp to the stored nanosecond form.
pub fn mtime_to_ns(mtime: SystemTime) -> i64 {
    mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

/// Handle to the build metadata database. Writes from worker threads are
/// serialized through an internal mutex.
pub struct BuildDatabase {
    conn: Mutex<Connection>,
}

impl BuildDatabase {
    /// Open the database at `path`, resetting it if it is unusable.
    pub fn open(path: &Path) -> BuildResult<Self> {
        let conn = match Self::try_open(path) {
            Ok(conn) => conn,
            Err(first) => {
                error!(
                    "failed to load the build database; it appears to be invalid or corrupted \
                     and will be recreated ({first})"
                );
                let _ = fs::remove_file(path);
                Self::try_open(path).map_err(BuildError::Db)?
            }
        };
        Ok(BuildDatabase {
            conn: Mutex::new(conn),
        })
    }

    fn try_open(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        ensure_migrated(&conn)?;
        Ok(conn)
    }

    /// Record (or replace) the compilation of `source`.
    ///
    /// The stored average duration is a bounded exponential average over at
    /// most ten samples; durations under 500ms are ignored so that warm
    /// recompiles of trivial files do not drag the estimate down.
    pub fn record_compilation(
        &self,
        source: &Path,
        compilation: &CompletedCompilation,
    ) -> BuildResult<()> {
        let conn = self.lock();
        let file_id = record_file(&conn, source)?;
        conn.execute(
            "INSERT INTO compilations (file_id, command, output, n_compilations, avg_duration)
                VALUES (:file_id, :command, :output, 1, :duration)
             ON CONFLICT (file_id) DO UPDATE SET
                command = :command,
                output = :output,
                n_compilations = CASE
                    WHEN :duration < 500 THEN n_compilations
                    ELSE min(10, n_compilations + 1)
                END,
                avg_duration = CASE
                    WHEN :duration < 500 THEN avg_duration
                    ELSE avg_duration + ((:duration - avg_duration) / min(10, n_compilations + 1))
                END",
            named_params! {
                ":file_id": file_id,
                ":command": compilation.command,
                ":output": compilation.output,
                ":duration": compilation.duration_ms,
            },
        )?;
        Ok(())
    }

    /// Record that producing `output` consumed `input` with the given
    /// modification time.
    pub fn record_input(
        &self,
        output: &Path,
        input: &Path,
        input_mtime: SystemTime,
    ) -> BuildResult<()> {
        let conn = self.lock();
        let in_id = record_file(&conn, input)?;
        let out_id = record_file(&conn, output)?;
        conn.execute(
            "INSERT OR REPLACE INTO compile_deps (input_file_id, output_file_id, input_mtime)
             VALUES (?1, ?2, ?3)",
            params![in_id, out_id, mtime_to_ns(input_mtime)],
        )?;
        Ok(())
    }

    /// Drop every recorded input of `output`. Called before recording a
    /// fresh input set.
    pub fn forget_inputs_of(&self, output: &Path) -> BuildResult<()> {
        let conn = self.lock();
        conn.execute(
            "WITH id_to_delete AS (
                SELECT file_id FROM source_files WHERE path = ?1
             )
             DELETE FROM compile_deps
              WHERE output_file_id IN id_to_delete",
            params![path_key(output)],
        )?;
        Ok(())
    }

    /// The recorded inputs of `output`, or `None` when nothing is recorded.
    pub fn inputs_of(&self, output: &Path) -> BuildResult<Option<Vec<InputFileInfo>>> {
        let conn = self.lock();
        let mut st = conn.prepare_cached(
            "WITH file AS (
                SELECT file_id FROM source_files WHERE path = ?1
             )
             SELECT path, input_mtime
               FROM compile_deps
               JOIN source_files ON input_file_id = file_id
              WHERE output_file_id IN file",
        )?;
        let rows = st.query_map(params![path_key(output)], |r| {
            Ok(InputFileInfo {
                path: PathBuf::from(r.get::<_, String>(0)?),
                mtime_ns: r.get(1)?,
            })
        })?;
        let inputs: Vec<InputFileInfo> = rows.collect::<rusqlite::Result<_>>()?;
        if inputs.is_empty() {
            return Ok(None);
        }
        Ok(Some(inputs))
    }

    /// The last recorded compilation of `source`, if any.
    pub fn command_of(&self, source: &Path) -> BuildResult<Option<CompletedCompilation>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "WITH file AS (
                    SELECT file_id FROM source_files WHERE path = ?1
                 )
                 SELECT command, output, avg_duration
                   FROM compilations
                  WHERE file_id IN file",
                params![path_key(source)],
                |r| {
                    Ok(CompletedCompilation {
                        command: r.get(0)?,
                        output: r.get(1)?,
                        duration_ms: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A worker panicked mid-write; that panic is already
                // propagating, so continuing here only affects cleanup.
                poisoned.into_inner()
            }
        }
    }
}

fn record_file(conn: &Connection, path: &Path) -> rusqlite::Result<i64> {
    let key = path_key(path);
    conn.execute(
        "INSERT OR IGNORE INTO source_files (path) VALUES (?1)",
        params![key],
    )?;
    conn.query_row(
        "SELECT file_id FROM source_files WHERE path = ?1",
        params![key],
        |r| r.get(0),
    )
}

/// Database key for a path. Paths are stored absolute so that a build
/// invoked from a different working directory still matches prior records.
fn path_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn ensure_migrated(conn: &Connection) -> rusqlite::Result<()> {
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
    if version != SCHEMA_VERSION {
        if version != 0 {
            info!("a prior version of the build database was found");
            info!("this is not an error, but incremental builds will be invalidated");
        }
        debug!("applying build database migration {SCHEMA_VERSION}");
        migrate_1(&tx)?;
        tx.execute("UPDATE meta SET version = ?1", params![SCHEMA_VERSION])?;
    }
    tx.commit()
}

fn migrate_1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS compile_deps;
        DROP TABLE IF EXISTS compilations;
        DROP TABLE IF EXISTS source_files;
        CREATE TABLE source_files (
            file_id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE
        );
        CREATE TABLE compilations (
            compile_id INTEGER PRIMARY KEY,
            file_id
                INTEGER NOT NULL
                UNIQUE REFERENCES source_files (file_id),
            command TEXT NOT NULL,
            output TEXT NOT NULL,
            n_compilations INTEGER NOT NULL DEFAULT 0,
            avg_duration INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE compile_deps (
            input_file_id
                INTEGER NOT NULL
                REFERENCES source_files (file_id),
            output_file_id
                INTEGER NOT NULL
                REFERENCES source_files (file_id),
            input_mtime INTEGER NOT NULL,
            UNIQUE (input_file_id, output_file_id)
        );",
    )
}
