//! The cobble build engine.
//!
//! Turns a set of source distributions into a plan of compile, archive, link
//! and test actions, and executes that plan with bounded parallelism and
//! incremental recompilation backed by a per-build-tree metadata database.

pub mod builder;
pub mod db;
pub mod exec;
pub mod library;
pub mod libman;
pub mod plan;
pub mod source;
pub mod testdriver;
pub mod toolchain;
pub mod usage;

pub use builder::{BuildParams, Builder, SdistParams, SdistTarget};
pub use db::{BuildDatabase, CompletedCompilation, InputFileInfo, BUILD_DB_FILENAME};
pub use exec::{default_jobs, BuildEnv, CancelFlag};
pub use library::{collect_libraries, Library};
pub use plan::{
    prepare_usage_requirements, BuildPlan, CompileFilePlan, CreateArchivePlan, LibraryBuildParams,
    LibraryPlan, LinkBinaryPlan, LinkKind, PackagePlan,
};
pub use source::{infer_source_kind, SourceFile, SourceKind};
pub use toolchain::Toolchain;
pub use usage::{LibraryUsage, UsageRequirements};

use std::path::PathBuf;
use thiserror::Error;

/// The failure of one compile, archive, or link command.
#[derive(Clone, Debug)]
pub struct CommandFailure {
    /// The file the command was producing or consuming.
    pub subject: PathBuf,
    /// The full command line, as a single string.
    pub command: String,
    /// Combined stdout and stderr.
    pub output: String,
    /// Exit status code, if the process ran at all.
    pub status: Option<i32>,
}

/// The failure of one test executable.
#[derive(Clone, Debug)]
pub struct TestFailure {
    pub executable: PathBuf,
    pub output: String,
    pub status: Option<i32>,
}

/// Build engine errors
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("build database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Package(#[from] cobble_package::PackageError),

    #[error("there is no library '{key}'{}", fmt_suggestion(.suggestion))]
    UnknownUsage {
        key: String,
        suggestion: Option<String>,
    },

    #[error("{} source file(s) failed to compile", .failures.len())]
    CompileFailure { failures: Vec<CommandFailure> },

    #[error("{} archive(s) failed to build", .failures.len())]
    ArchiveFailure { failures: Vec<CommandFailure> },

    #[error("{} binary link(s) failed", .failures.len())]
    LinkFailure { failures: Vec<CommandFailure> },

    #[error("{} test(s) failed", .failures.len())]
    TestsFailed { failures: Vec<TestFailure> },

    #[error("build cancelled")]
    Cancelled,
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn fmt_suggestion(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
