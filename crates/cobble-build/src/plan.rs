//! The build plan.
//!
//! `BuildPlan` → `PackagePlan` → `LibraryPlan` → compile / archive / link
//! nodes. The planner owns the whole graph for the duration of a build; the
//! execution engine walks it read-only.

use crate::exec::BuildEnv;
use crate::library::Library;
use crate::source::{SourceFile, SourceKind};
use crate::toolchain::{command_to_string, CompileParams, Toolchain};
use crate::usage::{LibraryUsage, UsageRequirements};
use crate::BuildResult;
use cobble_package::{Name, UsageKey};
use std::path::{Path, PathBuf};

/// Per-library build options chosen by the caller.
#[derive(Clone, Debug, Default)]
pub struct LibraryBuildParams {
    /// Subdirectory of the output root for this library's artifacts.
    pub out_subdir: PathBuf,
    pub build_tests: bool,
    pub build_apps: bool,
    pub enable_warnings: bool,
    /// Extra usages injected into test translation units (the test driver).
    pub test_uses: Vec<UsageKey>,
}

/// Plan to compile one translation unit.
#[derive(Clone, Debug)]
pub struct CompileFilePlan {
    pub source: SourceFile,
    /// The library root, for deriving the object path from the
    /// source-relative path.
    pub lib_root: PathBuf,
    pub out_subdir: PathBuf,
    /// Include directories belonging to the owning library itself.
    pub own_include_dirs: Vec<PathBuf>,
    /// Usage keys contributing further include directories.
    pub uses: Vec<UsageKey>,
    pub enable_warnings: bool,
    /// `namespace/library` qualifier for log messages.
    pub qualifier: String,
}

impl CompileFilePlan {
    fn rel_source(&self) -> &Path {
        self.source
            .path
            .strip_prefix(&self.lib_root)
            .unwrap_or(&self.source.path)
    }

    /// Where the object file lands: the source-relative path with the
    /// toolchain's object suffix appended, under `<subdir>/obj/`.
    pub fn object_file_path(&self, out_root: &Path, toolchain: &Toolchain) -> PathBuf {
        let rel = self.rel_source();
        let file_name = format!(
            "{}{}",
            rel.file_name().unwrap_or_default().to_string_lossy(),
            toolchain.object_suffix
        );
        let mut path = out_root.join(&self.out_subdir).join("obj");
        if let Some(parent) = rel.parent() {
            path.push(parent);
        }
        path.join(file_name)
    }

    pub fn depfile_path(&self, out_root: &Path, toolchain: &Toolchain) -> PathBuf {
        append_suffix(&self.object_file_path(out_root, toolchain), ".d")
    }

    /// Assemble the full compile command for this node.
    ///
    /// The compiler writes to a temporary object that the executor renames
    /// into place on success, so an interrupted compile never leaves a
    /// half-written object.
    pub fn command(&self, env: &BuildEnv) -> BuildResult<Vec<String>> {
        let object = self.object_file_path(&env.out_root, &env.toolchain);
        let depfile = self.depfile_path(&env.out_root, &env.toolchain);
        let mut include_dirs = self.own_include_dirs.clone();
        for dir in env.ureqs.include_dirs_for(&self.uses)? {
            if !include_dirs.contains(&dir) {
                include_dirs.push(dir);
            }
        }
        Ok(env.toolchain.compile_command(&CompileParams {
            source: &self.source.path,
            object: &append_suffix(&object, ".tmp"),
            depfile: &depfile,
            include_dirs: &include_dirs,
            definitions: &[],
            enable_warnings: self.enable_warnings,
        }))
    }

    /// The command as the single string stored in (and compared against)
    /// the build database.
    pub fn command_string(&self, env: &BuildEnv) -> BuildResult<String> {
        Ok(command_to_string(&self.command(env)?))
    }
}

/// Plan to archive a library's objects.
#[derive(Clone, Debug)]
pub struct CreateArchivePlan {
    pub name: String,
    pub out_subdir: PathBuf,
}

impl CreateArchivePlan {
    pub fn archive_file_path(&self, out_root: &Path, toolchain: &Toolchain) -> PathBuf {
        out_root
            .join(&self.out_subdir)
            .join(format!("lib{}{}", self.name, toolchain.archive_suffix))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    App,
    Test,
}

impl LinkKind {
    fn out_dir_name(self) -> &'static str {
        match self {
            LinkKind::App => "app",
            LinkKind::Test => "test",
        }
    }
}

/// Plan to link one test or application executable.
#[derive(Clone, Debug)]
pub struct LinkBinaryPlan {
    /// The entry translation unit (also present among the library's
    /// compile nodes).
    pub entry: CompileFilePlan,
    pub kind: LinkKind,
    pub name: String,
    pub out_subdir: PathBuf,
    /// The owning library, whose archive and transitive links feed the
    /// linker input list.
    pub owner: UsageKey,
    /// Extra usages linked into this binary only (the test driver).
    pub extra_uses: Vec<UsageKey>,
}

impl LinkBinaryPlan {
    pub fn output_path(&self, out_root: &Path, toolchain: &Toolchain) -> PathBuf {
        out_root
            .join(&self.out_subdir)
            .join(self.kind.out_dir_name())
            .join(format!("{}{}", self.name, toolchain.executable_suffix))
    }

    /// Linker inputs in link order: the entry object, then the owning
    /// library's archive and the transitive closure of its usages.
    pub fn link_inputs(&self, env: &BuildEnv) -> BuildResult<Vec<PathBuf>> {
        let mut inputs = vec![self.entry.object_file_path(&env.out_root, &env.toolchain)];
        let mut keys = vec![self.owner.clone()];
        keys.extend(self.extra_uses.iter().cloned());
        for path in env.ureqs.link_paths_for(&keys)? {
            if !inputs.contains(&path) {
                inputs.push(path);
            }
        }
        Ok(inputs)
    }
}

/// The plan for one library of one package.
#[derive(Clone, Debug)]
pub struct LibraryPlan {
    pub name: Name,
    pub key: UsageKey,
    pub root: PathBuf,
    pub out_subdir: PathBuf,
    pub public_include_dir: PathBuf,
    pub uses: Vec<UsageKey>,
    pub links: Vec<UsageKey>,
    pub compile_files: Vec<CompileFilePlan>,
    pub archive: Option<CreateArchivePlan>,
    pub link_binaries: Vec<LinkBinaryPlan>,
}

impl LibraryPlan {
    /// Build the plan for `lib` under the namespace of its owning package.
    pub fn create(
        lib: &Library,
        namespace: &Name,
        params: &LibraryBuildParams,
    ) -> BuildResult<Self> {
        let key = UsageKey::new(namespace.clone(), lib.name.clone());
        let qualifier = key.to_string();
        let own_include_dirs = lib.private_include_dirs();

        let mut compile_files = Vec::new();
        let mut link_binaries = Vec::new();
        let mut any_archived = false;

        for source in lib.sources()? {
            let (enabled, uses, extra_uses) = match source.kind {
                SourceKind::Header => continue,
                SourceKind::Source => {
                    any_archived = true;
                    (true, lib.manifest.uses.clone(), Vec::new())
                }
                SourceKind::Test => {
                    let mut uses = lib.manifest.uses.clone();
                    uses.extend(params.test_uses.iter().cloned());
                    (params.build_tests, uses, params.test_uses.clone())
                }
                SourceKind::App => (params.build_apps, lib.manifest.uses.clone(), Vec::new()),
            };
            if !enabled {
                continue;
            }
            let plan = CompileFilePlan {
                source: source.clone(),
                lib_root: lib.root.clone(),
                out_subdir: params.out_subdir.clone(),
                own_include_dirs: own_include_dirs.clone(),
                uses,
                enable_warnings: params.enable_warnings,
                qualifier: qualifier.clone(),
            };
            match source.kind {
                SourceKind::Test => link_binaries.push(LinkBinaryPlan {
                    entry: plan.clone(),
                    kind: LinkKind::Test,
                    name: binary_name(&source.path, ".test"),
                    out_subdir: params.out_subdir.clone(),
                    owner: key.clone(),
                    extra_uses,
                }),
                SourceKind::App => link_binaries.push(LinkBinaryPlan {
                    entry: plan.clone(),
                    kind: LinkKind::App,
                    name: binary_name(&source.path, ".main"),
                    out_subdir: params.out_subdir.clone(),
                    owner: key.clone(),
                    extra_uses,
                }),
                _ => {}
            }
            compile_files.push(plan);
        }

        let archive = any_archived.then(|| CreateArchivePlan {
            name: lib.name.as_str().to_string(),
            out_subdir: params.out_subdir.clone(),
        });

        Ok(LibraryPlan {
            name: lib.name.clone(),
            key,
            root: lib.root.clone(),
            out_subdir: params.out_subdir.clone(),
            public_include_dir: lib.public_include_dir(),
            uses: lib.manifest.uses.clone(),
            links: lib.manifest.links.clone(),
            compile_files,
            archive,
            link_binaries,
        })
    }

    /// The compile nodes whose objects belong in this library's archive.
    pub fn archive_inputs(&self) -> impl Iterator<Item = &CompileFilePlan> {
        self.compile_files
            .iter()
            .filter(|cf| cf.source.kind == SourceKind::Source)
    }
}

/// Strip the `.test` / `.main` marker from an entry point's stem.
fn binary_name(source: &Path, marker: &str) -> String {
    let stem = source
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    stem.strip_suffix(marker).unwrap_or(&stem).to_string()
}

/// The plan for one package (one source distribution).
#[derive(Clone, Debug)]
pub struct PackagePlan {
    pub name: Name,
    pub namespace: Name,
    pub libraries: Vec<LibraryPlan>,
}

impl PackagePlan {
    pub fn new(name: Name, namespace: Name) -> Self {
        PackagePlan {
            name,
            namespace,
            libraries: Vec::new(),
        }
    }

    pub fn add_library(&mut self, lib: LibraryPlan) {
        self.libraries.push(lib);
    }
}

/// The full plan for one build invocation.
#[derive(Clone, Debug, Default)]
pub struct BuildPlan {
    pub packages: Vec<PackagePlan>,
}

impl BuildPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, pkg: PackagePlan) {
        self.packages.push(pkg);
    }

    /// Every compile node in the plan.
    pub fn compile_files(&self) -> impl Iterator<Item = &CompileFilePlan> {
        self.libraries().flat_map(|lib| lib.compile_files.iter())
    }

    /// Every library plan.
    pub fn libraries(&self) -> impl Iterator<Item = &LibraryPlan> {
        self.packages.iter().flat_map(|pkg| pkg.libraries.iter())
    }

    /// Every link node.
    pub fn link_binaries(&self) -> impl Iterator<Item = &LinkBinaryPlan> {
        self.libraries().flat_map(|lib| lib.link_binaries.iter())
    }
}

/// Build the frozen usage-requirements map for a plan.
pub fn prepare_usage_requirements(
    plan: &BuildPlan,
    out_root: &Path,
    toolchain: &Toolchain,
) -> UsageRequirements {
    let mut ureqs = UsageRequirements::new();
    for lib in plan.libraries() {
        let linkable_path = lib
            .archive
            .as_ref()
            .map(|ar| ar.archive_file_path(out_root, toolchain));
        ureqs.insert(
            lib.key.clone(),
            LibraryUsage {
                include_dirs: vec![lib.public_include_dir.clone()],
                linkable_path,
                uses: lib.uses.clone(),
                links: lib.links.clone(),
            },
        );
    }
    ureqs
}

pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}
