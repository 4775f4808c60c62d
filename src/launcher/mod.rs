//! Array-level orchestration: a single array task, every task in-process, or
//! submission of the whole array to the scheduler.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::dispatch::Dispatcher;
use crate::pipeline::{RunRequest, RunResult, StepRunner, StepSet};
use crate::samples::{GroupingError, SampleSet};
use crate::tools::{Invocation, ToolLog, ToolOutcome, ToolRunner};
use crate::workspace::RunWorkspace;
use crate::PipelineError;

/// Array script used when none is given; resolved against the pipeline root.
pub const DEFAULT_RUN_SCRIPT: &str = "run_pipeline.sh";

/// Log directory name (under `{run}/logs`) for launcher invocations.
pub const LAUNCHER_LOG: &str = "launcher";

/// Execute array task `task_index`: dispatch its sample, run the requested
/// steps in the task's scratch directory, then release the scratch whatever
/// the outcome.
pub fn run_task<R: ToolRunner>(
    config: &RunConfig,
    workspace: &RunWorkspace,
    samples: &SampleSet,
    task_index: usize,
    request: &RunRequest,
    tools: R,
) -> Result<RunResult, PipelineError> {
    let sample = Dispatcher::new(samples).resolve(task_index)?;
    let scratch = workspace.scratch_for(task_index)?;

    let mut runner = StepRunner::new(config, workspace, tools);
    let outcome = runner.run(&sample, request, &scratch);
    let released = workspace.release(&scratch);

    match (outcome, released) {
        (Ok(result), Ok(())) => Ok(result),
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(err), released) => {
            if let Err(release_err) = released {
                warn!(task_index, error = %release_err, "scratch not released");
            }
            Err(err.into())
        }
    }
}

/// One failed task of a local array run.
#[derive(Debug)]
pub struct TaskFailure {
    /// Array index.
    pub task_index: usize,
    /// Why it failed.
    pub error: PipelineError,
}

/// Outcome of [`run_local`].
#[derive(Debug, Default)]
pub struct LocalSummary {
    /// Successful tasks, in index order.
    pub completed: Vec<RunResult>,
    /// Failed tasks, in index order.
    pub failed: Vec<TaskFailure>,
}

impl LocalSummary {
    /// `true` when no task failed.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run every array index sequentially, continuing past failures.
pub fn run_local<R: ToolRunner>(
    config: &RunConfig,
    workspace: &RunWorkspace,
    samples: &SampleSet,
    request: &RunRequest,
    tools: &mut R,
) -> LocalSummary {
    let mut summary = LocalSummary::default();
    for task_index in 0..samples.len() {
        info!(task_index, total = samples.len(), "running local task");
        match run_task(config, workspace, samples, task_index, request, &mut *tools) {
            Ok(result) => summary.completed.push(result),
            Err(err) => {
                error!(task_index, error = %err, "local task failed");
                summary.failed.push(TaskFailure {
                    task_index,
                    error: err,
                });
            }
        }
    }
    info!(
        completed = summary.completed.len(),
        failed = summary.failed.len(),
        "local array finished"
    );
    summary
}

/// Parameters forwarded to every array task.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Pipeline root.
    pub root: PathBuf,
    /// Input FASTQ directory.
    pub indir: PathBuf,
    /// Steps each task runs.
    pub steps: StepSet,
    /// Array script; relative paths resolve against `root`.
    pub run_script: PathBuf,
    /// Config file, when not `{root}/config.yaml`.
    pub config_path: Option<PathBuf>,
}

/// Build the `sbatch` call sizing the array to the sample count, CPUs to the
/// largest tool thread count and memory to `sortMemory × threads`.
pub fn array_job(
    config: &RunConfig,
    samples: &SampleSet,
    submission: &Submission,
) -> Result<Invocation, GroupingError> {
    if samples.is_empty() {
        return Err(GroupingError::NoInputFiles {
            dir: submission.indir.clone(),
        });
    }
    let threads = config.tools.max_threads();
    let memory = config.tools.samtools.sort_memory.total_for(threads);
    let run_script = resolve(&submission.root, &submission.run_script);

    let mut inv = Invocation::new("sbatch", "sbatch")
        .arg(format!("--array=0-{}", samples.len() - 1))
        .arg(format!("--cpus-per-task={threads}"))
        .arg(format!("--mem={memory}"))
        .arg(format!("--job-name={}", config.project.name))
        .arg(run_script)
        .opt("--root", &submission.root)
        .opt("--indir", &submission.indir)
        .arg("--steps");
    for step in submission.steps.iter() {
        inv = inv.arg(step.as_str());
    }
    Ok(inv
        .opt_some("--config", submission.config_path.as_deref())
        .opt_some("--conda-env", config.project.conda_env.as_deref()))
}

/// Run the submission and record it in `{run}/logs/launcher`.
pub fn submit<R: ToolRunner>(
    workspace: &RunWorkspace,
    invocation: &Invocation,
    tools: &mut R,
) -> Result<ToolOutcome, PipelineError> {
    let log = ToolLog::in_dir(&workspace.sample_logs_dir(LAUNCHER_LOG)?);
    let outcome = tools.invoke(invocation)?;
    if let Err(err) = log.record(LAUNCHER_LOG, invocation, &outcome) {
        warn!(log = %log.path().display(), error = %err, "could not write launcher log");
    }
    if !outcome.success() {
        return Err(PipelineError::ExternalTool {
            tool: invocation.label.clone(),
            exit_code: outcome.exit_code,
            stderr: outcome.stderr.trim().to_string(),
        });
    }
    info!(response = %outcome.stdout.trim(), "array job submitted");
    Ok(outcome)
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
