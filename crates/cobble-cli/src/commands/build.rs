//! `cobble build`

use anyhow::{Context, Result};
use clap::Args;
use cobble_build::{default_jobs, BuildParams, Builder, CancelFlag, SdistParams, Toolchain};
use cobble_package::{IfExists, PackageDb, PkgCache, PkgId, SourceDist};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct BuildArgs {
    /// Directory of the project to build
    #[arg(long, short = 'p', default_value = ".")]
    pub project: PathBuf,

    /// Directory for build results
    #[arg(long, short = 'o', default_value = "_build")]
    pub out: PathBuf,

    /// Parallel jobs (default: one per hardware thread)
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Do not build or run tests
    #[arg(long)]
    pub no_tests: bool,

    /// Do not build applications
    #[arg(long)]
    pub no_apps: bool,

    /// Enable compiler warnings for the project's own sources
    #[arg(long)]
    pub warnings: bool,

    /// Generate a libman export tree after a successful build
    #[arg(long)]
    pub export: bool,
}

pub fn run(args: BuildArgs, cancel: CancelFlag) -> Result<()> {
    let project = SourceDist::from_directory(&args.project)
        .with_context(|| format!("failed to load the project at {}", args.project.display()))?;

    let mut builder = Builder::new();
    builder.add_sdist(
        project.clone(),
        SdistParams {
            subdir: PathBuf::new(),
            build_tests: !args.no_tests,
            build_apps: !args.no_apps,
            enable_warnings: args.warnings,
        },
    );

    if !project.manifest.dependencies.is_empty() {
        let db = PackageDb::open(&PackageDb::default_path())?;
        let mut cache = PkgCache::open_write(&PkgCache::default_path())?;
        let solution = cache.solve(&project.manifest.dependencies, &db)?;
        info!(
            "dependency solution: {}",
            solution
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        for id in &solution {
            let sdist = materialize(&db, &mut cache, id)?;
            builder.add_sdist(
                sdist,
                SdistParams {
                    subdir: PathBuf::from("_deps").join(id.to_string()),
                    ..Default::default()
                },
            );
        }
    }

    builder.build(BuildParams {
        out_root: args.out,
        toolchain: Toolchain::gnu_default(),
        jobs: args.jobs.unwrap_or_else(default_jobs),
        export: args.export,
        cancel,
    })?;
    Ok(())
}

/// Find `id` in the cache, fetching it from its recorded remote if needed.
pub(crate) fn materialize(
    db: &PackageDb,
    cache: &mut PkgCache,
    id: &PkgId,
) -> Result<SourceDist> {
    if let Some(found) = cache.find(id) {
        return Ok(found.clone());
    }
    info!("obtaining package {id}");
    let listing = db.get(id)?;
    let staging = tempfile::TempDir::new().context("failed to create a staging directory")?;
    let dest = staging.path().join(id.to_string());
    listing.remote_pkg.materialize_into(&dest)?;
    let sdist = SourceDist::from_directory(&dest)?;
    cache.add_sdist(&sdist, IfExists::Replace)?;
    cache
        .find(id)
        .cloned()
        .with_context(|| format!("package {id} disappeared from the cache after import"))
}
