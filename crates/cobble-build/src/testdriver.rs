//! Test-driver preparation.
//!
//! Packages declaring `test_driver: "catch"` get a synthetic `.dds/Catch`
//! library whose single header is written into the output root the first
//! time it is needed. `"catch_main"` additionally registers
//! `.dds/Catch-Main`, a one-file library compiled once whose object
//! supplies `main()` to every test executable.

use crate::db::BuildDatabase;
use crate::exec;
use crate::source::{SourceFile, SourceKind};
use crate::toolchain::{CompileParams, Toolchain};
use crate::usage::LibraryUsage;
use crate::{BuildError, BuildResult, CommandFailure};
use cobble_package::TestDriver;
use std::fs;
use std::path::Path;
use tracing::info;

const CATCH_HEADER: &str = include_str!("catch.hpp");

/// Namespace under which the synthetic driver libraries are registered.
pub const DRIVER_NAMESPACE: &str = ".dds";
pub const CATCH_LIB_NAME: &str = "Catch";
pub const CATCH_MAIN_LIB_NAME: &str = "Catch-Main";

/// Emit (and for `catch_main`, compile) the requested driver, returning the
/// usage entry test executables consume.
pub fn prepare_test_driver(
    driver: TestDriver,
    out_root: &Path,
    toolchain: &Toolchain,
    db: &BuildDatabase,
) -> BuildResult<LibraryUsage> {
    let include_root = out_root.join("_catch");
    let header = include_root.join("catch2/catch.hpp");
    if !header.exists() {
        write_file(&header, CATCH_HEADER)?;
    }

    let mut usage = LibraryUsage {
        include_dirs: vec![include_root.clone()],
        ..Default::default()
    };
    if driver == TestDriver::Catch {
        // Header-only; nothing to compile.
        return Ok(usage);
    }

    let main_source = include_root.join("catch2/catch-main.cpp");
    if !main_source.exists() {
        write_file(&main_source, "#include \"./catch.hpp\"\n")?;
    }

    let object = out_root.join("_test-driver/catch-main.cpp.o");
    if !object.exists() {
        info!("compiling the test-driver main object (this only happens once)");
        let source = SourceFile {
            path: main_source.clone(),
            kind: SourceKind::Source,
        };
        compile_driver_object(&source, &object, &include_root, toolchain, db)?;
    }
    usage.linkable_path = Some(object);
    Ok(usage)
}

fn compile_driver_object(
    source: &SourceFile,
    object: &Path,
    include_root: &Path,
    toolchain: &Toolchain,
    db: &BuildDatabase,
) -> BuildResult<()> {
    if let Some(parent) = object.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    let depfile = crate::plan::append_suffix(object, ".d");
    let include_dirs = vec![include_root.to_path_buf()];
    let definitions = vec!["CATCH_CONFIG_MAIN".to_string()];
    let tmp_object = crate::plan::append_suffix(object, ".tmp");
    let command = toolchain.compile_command(&CompileParams {
        source: &source.path,
        object: &tmp_object,
        depfile: &depfile,
        include_dirs: &include_dirs,
        definitions: &definitions,
        enable_warnings: false,
    });
    exec::compile_single(&source.path, object, &command, db)
}

fn write_file(path: &Path, content: &str) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| BuildError::io(path, e))
}

/// Map a compile failure of the driver itself into the standard aggregate.
pub(crate) fn driver_failure(failure: CommandFailure) -> BuildError {
    BuildError::CompileFailure {
        failures: vec![failure],
    }
}
