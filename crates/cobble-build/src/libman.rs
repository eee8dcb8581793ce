//! libman export: `.lml` / `package.lmp` descriptors and the `.lpk` export
//! tree.
//!
//! The descriptor files are plain `Key: Value` lines; repeated keys are
//! meaningful. Exporting a package copies its public headers and archives
//! into `<out-root>/<name>.lpk` and writes one `.lml` per library plus a
//! `package.lmp`.

use crate::exec::BuildEnv;
use crate::plan::{LibraryPlan, PackagePlan};
use crate::source::{infer_source_kind, SourceKind};
use crate::{BuildError, BuildResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Write a libman key-value file.
pub fn write_pairs(path: &Path, pairs: &[(String, String)]) -> BuildResult<()> {
    let mut text = String::new();
    for (key, value) in pairs {
        text.push_str(key);
        text.push_str(": ");
        text.push_str(value);
        text.push('\n');
    }
    fs::write(path, text).map_err(|e| BuildError::io(path, e))
}

fn copy_headers(source: &Path, dest: &Path) -> BuildResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            BuildError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if infer_source_kind(entry.path()) != Some(SourceKind::Header) {
            continue;
        }
        let relpath = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path());
        debug!("export header: {}", relpath.display());
        let dest_fpath = dest.join(relpath);
        if let Some(parent) = dest_fpath.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        fs::copy(entry.path(), &dest_fpath).map_err(|e| BuildError::io(&dest_fpath, e))?;
    }
    Ok(())
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).unwrap_or(path).to_path_buf()
}

fn export_library(
    lib: &LibraryPlan,
    env: &BuildEnv,
    export_root: &Path,
) -> BuildResult<PathBuf> {
    let lib_out_root = export_root.join(lib.name.as_str());
    let lml_path = export_root.join(format!("{}.lml", lib.name));

    let mut pairs: Vec<(String, String)> = vec![
        ("Type".into(), "Library".into()),
        ("Name".into(), lib.name.as_str().into()),
    ];

    if lib.public_include_dir.is_dir() {
        let header_dest = lib_out_root.join("include");
        copy_headers(&lib.public_include_dir, &header_dest)?;
        pairs.push((
            "Include-Path".into(),
            relative_to(&header_dest, export_root).display().to_string(),
        ));
    }

    if let Some(archive) = &lib.archive {
        let ar_path = archive.archive_file_path(&env.out_root, &env.toolchain);
        let ar_dest = lib_out_root.join(
            ar_path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("archive")),
        );
        if let Some(parent) = ar_dest.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        fs::copy(&ar_path, &ar_dest).map_err(|e| BuildError::io(&ar_path, e))?;
        pairs.push((
            "Path".into(),
            relative_to(&ar_dest, export_root).display().to_string(),
        ));
    }

    for usage in &lib.uses {
        pairs.push(("Uses".into(), usage.to_string()));
    }
    for link in &lib.links {
        pairs.push(("Links".into(), link.to_string()));
    }

    write_pairs(&lml_path, &pairs)?;
    Ok(lml_path)
}

/// Export a built package as `<out-root>/<name>.lpk`.
pub fn export_package(pkg: &PackagePlan, env: &BuildEnv) -> BuildResult<PathBuf> {
    let export_root = env.out_root.join(format!("{}.lpk", pkg.name));
    info!("generating package export: {}", export_root.display());
    if export_root.exists() {
        fs::remove_dir_all(&export_root).map_err(|e| BuildError::io(&export_root, e))?;
    }
    fs::create_dir_all(&export_root).map_err(|e| BuildError::io(&export_root, e))?;

    for lib in &pkg.libraries {
        export_library(lib, env, &export_root)?;
    }

    let pairs: Vec<(String, String)> = vec![
        ("Type".into(), "Package".into()),
        ("Name".into(), pkg.name.as_str().into()),
        ("Namespace".into(), pkg.namespace.as_str().into()),
    ];
    write_pairs(&export_root.join("package.lmp"), &pairs)?;
    Ok(export_root)
}
