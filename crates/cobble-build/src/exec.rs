//! Plan execution.
//!
//! The four stages (compile → archive → link → test) run strictly in order;
//! parallelism lives inside a stage, where a bounded pool of worker threads
//! drains a queue of independent nodes. A node failure is captured and its
//! peers run to completion; the stage then reports one aggregated error,
//! which stops later stages from starting. Cancellation is polled between
//! nodes; in-flight subprocesses are allowed to finish, which is safe
//! because every output is written to a temporary path and renamed.

use crate::db::{mtime_to_ns, BuildDatabase, CompletedCompilation};
use crate::plan::{append_suffix, BuildPlan, CompileFilePlan, LinkKind};
use crate::toolchain::{command_to_string, parse_depfile, Toolchain};
use crate::usage::UsageRequirements;
use crate::{BuildError, BuildResult, CommandFailure, TestFailure};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Cooperative cancellation flag, set from a signal handler and polled
/// between nodes.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the execution engine needs besides the plan itself.
pub struct BuildEnv {
    pub toolchain: Toolchain,
    pub out_root: PathBuf,
    pub db: BuildDatabase,
    pub ureqs: UsageRequirements,
    pub cancel: CancelFlag,
}

/// The default worker count: one per hardware thread.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

enum NodeOutcome {
    Done,
    Failed(CommandFailure),
    Fatal(BuildError),
}

struct CommandResult {
    output: String,
    status: Option<i32>,
    success: bool,
}

fn run_command(cmd: &[String]) -> io::Result<CommandResult> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| io::Error::other("empty command line"))?;
    let out = Command::new(program).args(args).output()?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    Ok(CommandResult {
        output: text,
        status: out.status.code(),
        success: out.status.success(),
    })
}

/// Drain `items` through `jobs` worker threads. When the cancellation flag
/// is raised, queued items are discarded but in-flight work completes.
fn run_parallel<T, R, F>(items: Vec<T>, jobs: usize, cancel: &CancelFlag, work: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let jobs = jobs.max(1).min(items.len());
    let (task_tx, task_rx) = crossbeam_channel::unbounded::<T>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<R>();
    for item in items {
        let _ = task_tx.send(item);
    }
    drop(task_tx);

    let work = &work;
    std::thread::scope(|scope| {
        for _ in 0..jobs {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                while let Ok(item) = task_rx.recv() {
                    if cancel.is_set() {
                        continue;
                    }
                    let _ = result_tx.send(work(item));
                }
            });
        }
    });
    drop(result_tx);
    result_rx.into_iter().collect()
}

fn finish_stage(
    outcomes: Vec<NodeOutcome>,
    cancel: &CancelFlag,
    wrap: impl FnOnce(Vec<CommandFailure>) -> BuildError,
) -> BuildResult<()> {
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            NodeOutcome::Done => {}
            NodeOutcome::Failed(f) => failures.push(f),
            NodeOutcome::Fatal(e) => return Err(e),
        }
    }
    if cancel.is_set() {
        return Err(BuildError::Cancelled);
    }
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by(|a, b| a.subject.cmp(&b.subject));
    Err(wrap(failures))
}

/// Is `output` missing or older than any of `inputs`?
fn needs_update(output: &Path, inputs: &[PathBuf]) -> BuildResult<bool> {
    let Ok(out_meta) = fs::metadata(output) else {
        return Ok(true);
    };
    let out_mtime = out_meta.modified().map_err(|e| BuildError::io(output, e))?;
    for input in inputs {
        let Ok(meta) = fs::metadata(input) else {
            return Ok(true);
        };
        let mtime = meta.modified().map_err(|e| BuildError::io(input, e))?;
        if mtime > out_mtime {
            return Ok(true);
        }
    }
    Ok(false)
}

struct CompileTask<'a> {
    plan: &'a CompileFilePlan,
    command: Vec<String>,
    command_str: String,
}

impl BuildPlan {
    /// Compile every out-of-date translation unit.
    pub fn compile_all(&self, env: &BuildEnv, jobs: usize) -> BuildResult<()> {
        let mut tasks = Vec::new();
        let mut total = 0usize;
        for cf in self.compile_files() {
            total += 1;
            let command = cf.command(env)?;
            let command_str = command_to_string(&command);
            if compile_is_up_to_date(env, cf, &command_str)? {
                trace!("up-to-date: {}", cf.source.path.display());
                continue;
            }
            tasks.push(CompileTask {
                plan: cf,
                command,
                command_str,
            });
        }
        if tasks.is_empty() {
            debug!("all {total} object file(s) are up-to-date");
            if env.cancel.is_set() {
                return Err(BuildError::Cancelled);
            }
            return Ok(());
        }
        info!(
            "compiling {} of {} translation unit(s)",
            tasks.len(),
            total
        );
        let outcomes = run_parallel(tasks, jobs, &env.cancel, |task| compile_one(env, task));
        finish_stage(outcomes, &env.cancel, |failures| BuildError::CompileFailure {
            failures,
        })
    }

    /// Create every out-of-date library archive.
    pub fn archive_all(&self, env: &BuildEnv, jobs: usize) -> BuildResult<()> {
        struct ArchiveTask {
            archive: PathBuf,
            objects: Vec<PathBuf>,
        }
        let mut tasks = Vec::new();
        for lib in self.libraries() {
            let Some(ar) = &lib.archive else {
                continue;
            };
            let archive = ar.archive_file_path(&env.out_root, &env.toolchain);
            let objects: Vec<PathBuf> = lib
                .archive_inputs()
                .map(|cf| cf.object_file_path(&env.out_root, &env.toolchain))
                .collect();
            if !needs_update(&archive, &objects)? {
                trace!("up-to-date: {}", archive.display());
                continue;
            }
            tasks.push(ArchiveTask { archive, objects });
        }
        let outcomes = run_parallel(tasks, jobs, &env.cancel, |task| {
            debug!("archive: {}", task.archive.display());
            run_output_command(&task.archive, |tmp| {
                env.toolchain.archive_command(&task.objects, tmp)
            })
        });
        finish_stage(outcomes, &env.cancel, |failures| BuildError::ArchiveFailure {
            failures,
        })
    }

    /// Link every out-of-date test and application executable.
    pub fn link_all(&self, env: &BuildEnv, jobs: usize) -> BuildResult<()> {
        struct LinkTask {
            output: PathBuf,
            inputs: Vec<PathBuf>,
        }
        let mut tasks = Vec::new();
        for link in self.link_binaries() {
            let output = link.output_path(&env.out_root, &env.toolchain);
            let inputs = link.link_inputs(env)?;
            if !needs_update(&output, &inputs)? {
                trace!("up-to-date: {}", output.display());
                continue;
            }
            tasks.push(LinkTask { output, inputs });
        }
        let outcomes = run_parallel(tasks, jobs, &env.cancel, |task| {
            debug!("link: {}", task.output.display());
            run_output_command(&task.output, |tmp| {
                env.toolchain.link_command(&task.inputs, tmp)
            })
        });
        finish_stage(outcomes, &env.cancel, |failures| BuildError::LinkFailure {
            failures,
        })
    }

    /// Run every test executable, collecting the failures.
    pub fn run_all_tests(&self, env: &BuildEnv, jobs: usize) -> BuildResult<Vec<TestFailure>> {
        let binaries: Vec<PathBuf> = self
            .link_binaries()
            .filter(|l| l.kind == LinkKind::Test)
            .map(|l| l.output_path(&env.out_root, &env.toolchain))
            .collect();
        if binaries.is_empty() {
            return Ok(Vec::new());
        }
        info!("running {} test(s)", binaries.len());
        let outcomes = run_parallel(binaries, jobs, &env.cancel, run_test);
        if env.cancel.is_set() {
            return Err(BuildError::Cancelled);
        }
        let mut failures: Vec<TestFailure> = outcomes.into_iter().flatten().collect();
        failures.sort_by(|a, b| a.executable.cmp(&b.executable));
        Ok(failures)
    }
}

fn compile_is_up_to_date(
    env: &BuildEnv,
    cf: &CompileFilePlan,
    planned_command: &str,
) -> BuildResult<bool> {
    let object = cf.object_file_path(&env.out_root, &env.toolchain);
    if !object.exists() {
        return Ok(false);
    }
    let Some(prev) = env.db.command_of(&cf.source.path)? else {
        return Ok(false);
    };
    if prev.command != planned_command {
        return Ok(false);
    }
    let Some(inputs) = env.db.inputs_of(&object)? else {
        return Ok(false);
    };
    for input in inputs {
        let Ok(meta) = fs::metadata(&input.path) else {
            return Ok(false);
        };
        let Ok(mtime) = meta.modified() else {
            return Ok(false);
        };
        if mtime_to_ns(mtime) > input.mtime_ns {
            return Ok(false);
        }
    }
    Ok(true)
}

fn compile_one(env: &BuildEnv, task: CompileTask<'_>) -> NodeOutcome {
    let cf = task.plan;
    debug!("[{}] compile: {}", cf.qualifier, cf.source.path.display());
    let object = cf.object_file_path(&env.out_root, &env.toolchain);
    let tmp_object = append_suffix(&object, ".tmp");
    if let Some(parent) = object.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return NodeOutcome::Fatal(BuildError::io(parent, e));
        }
    }

    let start = Instant::now();
    let result = match run_command(&task.command) {
        Ok(result) => result,
        Err(e) => {
            return NodeOutcome::Failed(CommandFailure {
                subject: cf.source.path.clone(),
                command: task.command_str,
                output: format!("failed to spawn compiler: {e}"),
                status: None,
            })
        }
    };
    let duration_ms = start.elapsed().as_millis() as i64;

    if !result.success {
        return NodeOutcome::Failed(CommandFailure {
            subject: cf.source.path.clone(),
            command: task.command_str,
            output: result.output,
            status: result.status,
        });
    }
    if let Err(e) = fs::rename(&tmp_object, &object) {
        return NodeOutcome::Fatal(BuildError::io(&object, e));
    }
    if !result.output.trim().is_empty() {
        warn!(
            "output from compiling {}:\n{}",
            cf.source.path.display(),
            result.output
        );
    }
    match record_compile_results(env, cf, &object, &task.command_str, &result.output, duration_ms)
    {
        Ok(()) => NodeOutcome::Done,
        Err(e) => NodeOutcome::Fatal(e),
    }
}

fn record_compile_results(
    env: &BuildEnv,
    cf: &CompileFilePlan,
    object: &Path,
    command_str: &str,
    output: &str,
    duration_ms: i64,
) -> BuildResult<()> {
    let depfile = cf.depfile_path(&env.out_root, &env.toolchain);
    let mut inputs: Vec<PathBuf> = match fs::read_to_string(&depfile) {
        Ok(content) => parse_depfile(&content),
        // A toolchain without dependency output still gets the source
        // itself tracked, so edits to it are seen.
        Err(_) => Vec::new(),
    };
    inputs.retain(|p| p.exists());
    if inputs.is_empty() {
        inputs.push(cf.source.path.clone());
    }

    env.db.forget_inputs_of(object)?;
    for input in &inputs {
        let meta = fs::metadata(input).map_err(|e| BuildError::io(input, e))?;
        let mtime = meta.modified().map_err(|e| BuildError::io(input, e))?;
        env.db.record_input(object, input, mtime)?;
    }
    env.db.record_compilation(
        &cf.source.path,
        &CompletedCompilation {
            command: command_str.to_string(),
            output: output.to_string(),
            duration_ms,
        },
    )?;
    Ok(())
}

/// Run a command that produces `output`, writing to a temporary path and
/// renaming into place on success.
fn run_output_command(
    output: &Path,
    make_command: impl FnOnce(&Path) -> Vec<String>,
) -> NodeOutcome {
    if let Some(parent) = output.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            return NodeOutcome::Fatal(BuildError::io(parent, e));
        }
    }
    let tmp = append_suffix(output, ".tmp");
    let command = make_command(&tmp);
    let command_str = command_to_string(&command);
    let result = match run_command(&command) {
        Ok(result) => result,
        Err(e) => {
            return NodeOutcome::Failed(CommandFailure {
                subject: output.to_path_buf(),
                command: command_str,
                output: format!("failed to spawn: {e}"),
                status: None,
            })
        }
    };
    if !result.success {
        return NodeOutcome::Failed(CommandFailure {
            subject: output.to_path_buf(),
            command: command_str,
            output: result.output,
            status: result.status,
        });
    }
    if let Err(e) = fs::rename(&tmp, output) {
        return NodeOutcome::Fatal(BuildError::io(output, e));
    }
    NodeOutcome::Done
}

/// Compile one file synchronously, outside the plan flow. The command must
/// target `<object>.tmp`; the object is renamed into place on success. Used
/// for the one-shot test-driver object.
pub(crate) fn compile_single(
    source: &Path,
    object: &Path,
    command: &[String],
    db: &BuildDatabase,
) -> BuildResult<()> {
    let command_str = command_to_string(command);
    let start = Instant::now();
    let result = run_command(command).map_err(|e| BuildError::io(source, e))?;
    if !result.success {
        return Err(crate::testdriver::driver_failure(CommandFailure {
            subject: source.to_path_buf(),
            command: command_str,
            output: result.output,
            status: result.status,
        }));
    }
    let tmp = append_suffix(object, ".tmp");
    fs::rename(&tmp, object).map_err(|e| BuildError::io(object, e))?;
    db.record_compilation(
        source,
        &CompletedCompilation {
            command: command_str,
            output: result.output,
            duration_ms: start.elapsed().as_millis() as i64,
        },
    )?;
    Ok(())
}

fn run_test(path: PathBuf) -> Option<TestFailure> {
    debug!("running test {}", path.display());
    match run_command(std::slice::from_ref(&path.to_string_lossy().into_owned())) {
        Ok(result) if result.success => None,
        Ok(result) => Some(TestFailure {
            executable: path,
            output: result.output,
            status: result.status,
        }),
        Err(e) => Some(TestFailure {
            executable: path,
            output: format!("failed to start test: {e}"),
            status: None,
        }),
    }
}
