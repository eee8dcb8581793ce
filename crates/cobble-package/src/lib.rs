//! Package management for cobble.
//!
//! Package identity and version intervals, `package.json5` manifests, the
//! local package database, remote index synchronization, the on-disk package
//! cache, and the dependency solver.

pub mod cache;
pub mod db;
pub mod dependency;
pub mod fetch;
pub mod manifest;
pub mod name;
pub mod pkg_id;
pub mod remote;
pub mod sdist;
pub mod solver;

pub use cache::{IfExists, PkgCache};
pub use db::{PackageDb, PkgListing};
pub use dependency::{Dependency, VersionInterval};
pub use fetch::RemotePkg;
pub use manifest::{LibraryManifest, PackageManifest, TestDriver, UsageKey};
pub use name::Name;
pub use pkg_id::PkgId;
pub use remote::{add_remote, remove_remote, update_all, PkgRemote};
pub use sdist::SourceDist;
pub use solver::solve;

use std::path::PathBuf;
use thiserror::Error;

/// Package management errors
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("invalid package name '{0}'")]
    InvalidName(String),

    #[error("invalid package ID '{0}': expected the form name@version")]
    InvalidPkgId(String),

    #[error("invalid version: {0}")]
    Version(#[from] semver::Error),

    #[error("invalid dependency '{spec}': {reason}")]
    InvalidDependency { spec: String, reason: String },

    #[error("malformed manifest at {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("no such {kind} '{name}'{}", fmt_suggestion(.suggestion))]
    Nonesuch {
        kind: &'static str,
        name: String,
        suggestion: Option<String>,
    },

    #[error("no version of '{name}' satisfies {}", fmt_intervals(.intervals))]
    SolveFailure {
        name: String,
        intervals: Vec<VersionInterval>,
    },

    #[error("package database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("package database schema version {found} is newer than this version of cobble supports ({supported})")]
    DbTooNew { found: i64, supported: i64 },

    #[error("package database integrity check failed: {0}")]
    Integrity(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error for {url}: {reason}")]
    Http { url: String, reason: String },

    #[error("invalid remote package URL '{url}': {reason}")]
    RemoteUrl { url: String, reason: String },

    #[error("failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },

    #[error("package '{id}' already exists in the local cache")]
    SdistExists { id: String },
}

impl PackageError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a manifest error
    pub fn manifest(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a not-found error with a did-you-mean suggestion drawn from
    /// `candidates`.
    pub fn nonesuch<I, S>(kind: &'static str, name: impl Into<String>, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = name.into();
        let suggestion = cobble_util::did_you_mean(&name, candidates);
        Self::Nonesuch {
            kind,
            name,
            suggestion,
        }
    }
}

fn fmt_suggestion(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

fn fmt_intervals(intervals: &[VersionInterval]) -> String {
    let parts: Vec<String> = intervals.iter().map(|iv| iv.to_string()).collect();
    parts.join(" and ")
}

pub type Result<T> = std::result::Result<T, PackageError>;
