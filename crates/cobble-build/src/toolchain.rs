//! Toolchain command assembly.
//!
//! The build engine treats the toolchain as an opaque collaborator that can
//! produce compile, archive, and link command lines. The descriptor loading
//! that populates one of these lives outside the engine; a GNU-style default
//! is provided here.

use std::path::{Path, PathBuf};

/// Parameters for assembling one compile command.
pub struct CompileParams<'a> {
    pub source: &'a Path,
    pub object: &'a Path,
    pub depfile: &'a Path,
    pub include_dirs: &'a [PathBuf],
    pub definitions: &'a [String],
    pub enable_warnings: bool,
}

/// An opaque compiler/archiver/linker front end.
#[derive(Clone, Debug)]
pub struct Toolchain {
    /// Launcher for C translation units, e.g. `["gcc"]`.
    pub c_compiler: Vec<String>,
    /// Launcher for C++ translation units, e.g. `["g++"]`.
    pub cxx_compiler: Vec<String>,
    /// Archiver launcher, e.g. `["ar"]`.
    pub archiver: Vec<String>,
    /// Linker launcher, e.g. `["g++"]`.
    pub linker: Vec<String>,
    /// Flags applied to every compilation.
    pub compile_flags: Vec<String>,
    /// Flags added when warnings are requested.
    pub warning_flags: Vec<String>,
    pub object_suffix: String,
    pub archive_suffix: String,
    pub executable_suffix: String,
}

impl Toolchain {
    /// A GNU-style toolchain using `gcc`/`g++`/`ar` from `PATH`.
    pub fn gnu_default() -> Self {
        Toolchain {
            c_compiler: vec!["gcc".into()],
            cxx_compiler: vec!["g++".into()],
            archiver: vec!["ar".into()],
            linker: vec!["g++".into()],
            compile_flags: vec!["-fPIC".into(), "-pthread".into()],
            warning_flags: vec!["-Wall".into(), "-Wextra".into(), "-Wpedantic".into()],
            object_suffix: ".o".into(),
            archive_suffix: ".a".into(),
            executable_suffix: String::new(),
        }
    }

    fn compiler_for(&self, source: &Path) -> &[String] {
        match source.extension().and_then(|e| e.to_str()) {
            Some("c") => &self.c_compiler,
            _ => &self.cxx_compiler,
        }
    }

    /// Assemble the command to compile one translation unit.
    pub fn compile_command(&self, params: &CompileParams<'_>) -> Vec<String> {
        let mut cmd: Vec<String> = self.compiler_for(params.source).to_vec();
        cmd.extend(self.compile_flags.iter().cloned());
        cmd.push("-MD".into());
        cmd.push("-MF".into());
        cmd.push(params.depfile.to_string_lossy().into_owned());
        for dir in params.include_dirs {
            cmd.push("-I".into());
            cmd.push(dir.to_string_lossy().into_owned());
        }
        for def in params.definitions {
            cmd.push(format!("-D{def}"));
        }
        if params.enable_warnings {
            cmd.extend(self.warning_flags.iter().cloned());
        }
        cmd.push("-c".into());
        cmd.push(params.source.to_string_lossy().into_owned());
        cmd.push("-o".into());
        cmd.push(params.object.to_string_lossy().into_owned());
        cmd
    }

    /// Assemble the command to create an archive from objects.
    pub fn archive_command(&self, objects: &[PathBuf], archive: &Path) -> Vec<String> {
        let mut cmd: Vec<String> = self.archiver.to_vec();
        cmd.push("rcs".into());
        cmd.push(archive.to_string_lossy().into_owned());
        cmd.extend(objects.iter().map(|o| o.to_string_lossy().into_owned()));
        cmd
    }

    /// Assemble the command to link an executable. `inputs` must already be
    /// in link order (dependents before their dependencies).
    pub fn link_command(&self, inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut cmd: Vec<String> = self.linker.to_vec();
        cmd.extend(self.compile_flags.iter().cloned());
        cmd.extend(inputs.iter().map(|i| i.to_string_lossy().into_owned()));
        cmd.push("-o".into());
        cmd.push(output.to_string_lossy().into_owned());
        cmd
    }
}

/// Render a command vector as a single string. This string is what the
/// build database compares to decide staleness, so it must be identical for
/// identical commands.
pub fn command_to_string(cmd: &[String]) -> String {
    let quoted: Vec<String> = cmd
        .iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '"') {
                format!("\"{}\"", arg.replace('"', "\\\""))
            } else {
                arg.clone()
            }
        })
        .collect();
    quoted.join(" ")
}

/// Parse Makefile-style dependency output (`-MD -MF`) into the list of
/// input paths.
pub fn parse_depfile(content: &str) -> Vec<PathBuf> {
    // Join continuation lines, then everything after the first ':' is a
    // whitespace-separated path list with backslash-escaped spaces.
    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
    let Some((_, inputs)) = joined.split_once(':') else {
        return Vec::new();
    };

    let mut paths = Vec::new();
    let mut current = String::new();
    let mut chars = inputs.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some(' ')) => {
                chars.next();
                current.push(' ');
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    paths.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        paths.push(PathBuf::from(current));
    }
    paths
}
