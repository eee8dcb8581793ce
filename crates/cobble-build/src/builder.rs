//! The top-level builder: sdists in, built tree out.

use crate::db::{BuildDatabase, BUILD_DB_FILENAME};
use crate::exec::{BuildEnv, CancelFlag};
use crate::library::collect_libraries;
use crate::libman;
use crate::plan::{
    prepare_usage_requirements, BuildPlan, LibraryBuildParams, LibraryPlan, PackagePlan,
};
use crate::testdriver::{
    prepare_test_driver, CATCH_LIB_NAME, CATCH_MAIN_LIB_NAME, DRIVER_NAMESPACE,
};
use crate::toolchain::Toolchain;
use crate::{BuildError, BuildResult};
use cobble_package::{Name, SourceDist, TestDriver, UsageKey};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Per-sdist build options.
#[derive(Clone, Debug, Default)]
pub struct SdistParams {
    /// Subdirectory of the output root for this sdist's artifacts.
    pub subdir: PathBuf,
    pub build_tests: bool,
    pub build_apps: bool,
    pub enable_warnings: bool,
}

/// One source distribution scheduled into a build.
#[derive(Clone, Debug)]
pub struct SdistTarget {
    pub sdist: SourceDist,
    pub params: SdistParams,
}

/// Whole-build options.
pub struct BuildParams {
    pub out_root: PathBuf,
    pub toolchain: Toolchain,
    pub jobs: usize,
    /// Generate the `.lpk` export tree after a successful build.
    pub export: bool,
    pub cancel: CancelFlag,
}

/// Builds a set of source distributions into one output tree.
#[derive(Debug, Default)]
pub struct Builder {
    sdists: Vec<SdistTarget>,
}

struct DriverState {
    need_catch: bool,
    need_catch_main: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sdist(&mut self, sdist: SourceDist, params: SdistParams) {
        self.sdists.push(SdistTarget { sdist, params });
    }

    /// Run the full build: plan, compile, archive, link, test, and
    /// optionally export.
    pub fn build(&self, params: BuildParams) -> BuildResult<()> {
        fs::create_dir_all(&params.out_root)
            .map_err(|e| BuildError::io(&params.out_root, e))?;
        let db = BuildDatabase::open(&params.out_root.join(BUILD_DB_FILENAME))?;

        let mut drivers = DriverState {
            need_catch: false,
            need_catch_main: false,
        };
        let plan = self.prepare_plan(&mut drivers)?;
        if plan.compile_files().next().is_none() {
            warn!("nothing found to build!");
            return Ok(());
        }

        let mut ureqs = prepare_usage_requirements(&plan, &params.out_root, &params.toolchain);
        if drivers.need_catch_main {
            let usage = prepare_test_driver(
                TestDriver::CatchMain,
                &params.out_root,
                &params.toolchain,
                &db,
            )?;
            ureqs.insert(driver_key(CATCH_MAIN_LIB_NAME), usage);
        }
        if drivers.need_catch {
            let usage =
                prepare_test_driver(TestDriver::Catch, &params.out_root, &params.toolchain, &db)?;
            ureqs.insert(driver_key(CATCH_LIB_NAME), usage);
        }

        let env = BuildEnv {
            toolchain: params.toolchain,
            out_root: params.out_root,
            db,
            ureqs,
            cancel: params.cancel,
        };

        let sw = Instant::now();
        plan.compile_all(&env, params.jobs)?;
        info!("compilation completed in {}ms", sw.elapsed().as_millis());

        let sw = Instant::now();
        plan.archive_all(&env, params.jobs)?;
        info!("archiving completed in {}ms", sw.elapsed().as_millis());

        let sw = Instant::now();
        plan.link_all(&env, params.jobs)?;
        info!("binary linking completed in {}ms", sw.elapsed().as_millis());

        let sw = Instant::now();
        let test_failures = plan.run_all_tests(&env, params.jobs)?;
        info!("test execution finished in {}ms", sw.elapsed().as_millis());

        for failure in &test_failures {
            error!(
                "test {} failed! Output:\n{}[test output end]",
                failure.executable.display(),
                failure.output
            );
        }
        if !test_failures.is_empty() {
            return Err(BuildError::TestsFailed {
                failures: test_failures,
            });
        }

        if params.export {
            for pkg in &plan.packages {
                libman::export_package(pkg, &env)?;
            }
        }
        Ok(())
    }

    fn prepare_plan(&self, drivers: &mut DriverState) -> BuildResult<BuildPlan> {
        let mut plan = BuildPlan::new();
        for target in &self.sdists {
            let manifest = &target.sdist.manifest;
            let mut pkg_plan = PackagePlan::new(
                manifest.id.name.clone(),
                manifest.namespace.clone(),
            );

            let mut test_uses = Vec::new();
            if target.params.build_tests {
                match manifest.test_driver {
                    Some(TestDriver::Catch) => {
                        drivers.need_catch = true;
                        test_uses.push(driver_key(CATCH_LIB_NAME));
                    }
                    Some(TestDriver::CatchMain) => {
                        drivers.need_catch = true;
                        drivers.need_catch_main = true;
                        test_uses.push(driver_key(CATCH_LIB_NAME));
                        test_uses.push(driver_key(CATCH_MAIN_LIB_NAME));
                    }
                    None => {}
                }
            }

            let libs = collect_libraries(&target.sdist.path, &manifest.id.name)?;
            for lib in &libs {
                let rel = lib
                    .root
                    .strip_prefix(&target.sdist.path)
                    .unwrap_or(&lib.root);
                let lib_params = LibraryBuildParams {
                    out_subdir: target.params.subdir.join(rel),
                    build_tests: target.params.build_tests,
                    build_apps: target.params.build_apps,
                    enable_warnings: target.params.enable_warnings,
                    test_uses: test_uses.clone(),
                };
                pkg_plan.add_library(LibraryPlan::create(lib, &manifest.namespace, &lib_params)?);
            }
            plan.add_package(pkg_plan);
        }
        Ok(plan)
    }
}

fn driver_key(name: &str) -> UsageKey {
    // Both components are fixed, valid names.
    UsageKey::parse(&format!("{DRIVER_NAMESPACE}/{name}"))
        .unwrap_or_else(|_| unreachable!("driver usage keys are statically valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_keys_parse() {
        assert_eq!(driver_key(CATCH_LIB_NAME).to_string(), ".dds/Catch");
        assert_eq!(
            driver_key(CATCH_MAIN_LIB_NAME).to_string(),
            ".dds/Catch-Main"
        );
    }
}
