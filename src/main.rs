use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rnaseq_bulk::config::{coerce_bool, ConfigError, RunConfig};
use rnaseq_bulk::dispatch::{SchedulerContext, TASK_ID_VAR};
use rnaseq_bulk::launcher::{self, Submission, DEFAULT_RUN_SCRIPT};
use rnaseq_bulk::pipeline::{RunRequest, StepSet};
use rnaseq_bulk::reference::fetch_references;
use rnaseq_bulk::samples::{self, SampleSet};
use rnaseq_bulk::tools::{CancelToken, ProcessRunner};
use rnaseq_bulk::workspace::RunWorkspace;

#[derive(Parser, Debug)]
#[command(
    name = "rnaseq-bulk",
    about = "Bulk RNA-seq pipeline: one scheduler array task per sample (trim, align, count)"
)]
struct Cli {
    /// Only log warnings and errors (ignored when RUST_LOG is set).
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the steps for the sample of one array task.
    Run {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        steps: StepArgs,
        /// Array task index.
        #[arg(long, env = TASK_ID_VAR)]
        task_index: Option<usize>,
        /// Conda environment activated by the array script; informational here.
        #[arg(long)]
        conda_env: Option<String>,
    },
    /// Run every array task sequentially on this machine.
    Local {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        steps: StepArgs,
    },
    /// Submit the whole array with sbatch.
    Submit {
        #[command(flatten)]
        input: InputArgs,
        /// Steps every task runs.
        #[arg(long, num_args = 1.., default_values = ["trim", "align", "count"])]
        steps: Vec<String>,
        /// Array script, relative to --root unless absolute.
        #[arg(long, default_value = DEFAULT_RUN_SCRIPT)]
        run_script: PathBuf,
    },
    /// Print the task index → sample mapping.
    Samples {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Download and decompress the reference genome and annotation.
    FetchRefs {
        /// Pipeline root directory.
        #[arg(long)]
        root: PathBuf,
        /// Config file (default: {root}/config.yaml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Pipeline root directory.
    #[arg(long)]
    root: PathBuf,
    /// Directory containing the FASTQ files.
    #[arg(long)]
    indir: PathBuf,
    /// Config file (default: {root}/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Explicit forward read, bypassing directory scanning.
    #[arg(long)]
    sample1: Option<PathBuf>,
    /// Explicit reverse read.
    #[arg(long, requires = "sample1")]
    sample2: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StepArgs {
    /// Steps to run, in any order: trim align count.
    #[arg(long, num_args = 1.., default_values = ["trim", "align", "count"])]
    steps: Vec<String>,
    /// Delete intermediates once consumed (True/False); overrides project.save_files.
    #[arg(long)]
    cleanup: Option<String>,
    /// Existing alignment to count when the align step is not run.
    #[arg(long)]
    alignment: Option<PathBuf>,
}

impl InputArgs {
    fn config_path(&self) -> PathBuf {
        config_path(&self.root, self.config.as_deref())
    }

    fn group(&self) -> Result<SampleSet> {
        let samples = samples::group(&self.indir, self.sample1.as_deref(), self.sample2.as_deref())
            .with_context(|| format!("failed to group reads in {}", self.indir.display()))?;
        info!(
            samples = samples.len(),
            fingerprint = %samples.fingerprint(),
            "grouped input reads"
        );
        Ok(samples)
    }
}

impl StepArgs {
    fn request(&self) -> Result<RunRequest> {
        let steps = StepSet::parse(&self.steps)?;
        if steps.is_empty() {
            bail!("--steps must name at least one of trim, align, count");
        }
        Ok(RunRequest {
            steps,
            alignment: self.alignment.clone(),
        })
    }
}

fn config_path(root: &Path, config: Option<&Path>) -> PathBuf {
    config.map_or_else(|| root.join("config.yaml"), Path::to_path_buf)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let scheduler = SchedulerContext::from_env();

    match cli.command {
        Commands::Run {
            input,
            steps,
            task_index,
            conda_env,
        } => {
            if let Some(env) = conda_env {
                info!(conda_env = %env, "running inside conda environment");
            }
            let task_index = task_index.ok_or(rnaseq_bulk::DispatchError::MissingTaskIndex)?;
            run_one(&input, &steps, task_index, &scheduler)
        }
        Commands::Local { input, steps } => run_all(&input, &steps, &scheduler),
        Commands::Submit {
            input,
            steps,
            run_script,
        } => submit(&input, &steps, run_script),
        Commands::Samples { input } => list_samples(&input),
        Commands::FetchRefs { root, config } => fetch(&root, config.as_deref()),
    }
}

/// Load the config and apply the scheduler and CLI overrides.
fn load_task_config(
    input: &InputArgs,
    steps: &StepArgs,
    scheduler: &SchedulerContext,
) -> Result<RunConfig> {
    let path = input.config_path();
    let mut config = RunConfig::load(&path, &input.root)
        .with_context(|| format!("invalid config {}", path.display()))?;
    if let Some(cpus) = scheduler.cpus_per_task {
        info!(cpus, "using scheduler CPU allocation for every tool");
        config = config.with_thread_override(cpus);
    }
    match steps.cleanup.as_deref() {
        Some(text) => {
            let cleanup = coerce_bool(text).ok_or_else(|| ConfigError::InvalidBoolean {
                field: "--cleanup",
                value: text.to_string(),
            })?;
            config = config.with_save_files(!cleanup);
        }
        None => warn!(
            save_files = config.project.save_files,
            "--cleanup not given, keeping project.save_files from config"
        ),
    }
    Ok(config)
}

fn prepare_workspace(
    root: &Path,
    config: &RunConfig,
    scheduler: &SchedulerContext,
) -> Result<RunWorkspace> {
    let scratch = scheduler.scratch_base();
    RunWorkspace::prepare(root, &config.project.name, scratch.as_deref())
        .context("failed to prepare run directory")
}

fn process_runner() -> Result<ProcessRunner> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || handler.cancel())
        .context("failed to install termination handler")?;
    Ok(ProcessRunner::new(cancel))
}

fn run_one(
    input: &InputArgs,
    steps: &StepArgs,
    task_index: usize,
    scheduler: &SchedulerContext,
) -> Result<()> {
    let config = load_task_config(input, steps, scheduler)?;
    let request = steps.request()?;
    let samples = input.group()?;
    let workspace = prepare_workspace(&input.root, &config, scheduler)?;

    let result = launcher::run_task(
        &config,
        &workspace,
        &samples,
        task_index,
        &request,
        process_runner()?,
    )
    .with_context(|| format!("array task {task_index} failed"))?;

    info!(
        sample = %result.sample,
        persisted = result.persisted.len(),
        counts = ?result.counts,
        "array task finished"
    );
    Ok(())
}

fn run_all(input: &InputArgs, steps: &StepArgs, scheduler: &SchedulerContext) -> Result<()> {
    let config = load_task_config(input, steps, scheduler)?;
    let request = steps.request()?;
    let samples = input.group()?;
    let workspace = prepare_workspace(&input.root, &config, scheduler)?;

    let mut tools = process_runner()?;
    let summary = launcher::run_local(&config, &workspace, &samples, &request, &mut tools);
    for failure in &summary.failed {
        eprintln!("task {}: {}", failure.task_index, failure.error);
    }
    if !summary.all_succeeded() {
        bail!(
            "{} of {} task(s) failed",
            summary.failed.len(),
            samples.len()
        );
    }
    Ok(())
}

fn submit(input: &InputArgs, steps: &[String], run_script: PathBuf) -> Result<()> {
    let path = input.config_path();
    let config = RunConfig::load(&path, &input.root)
        .with_context(|| format!("invalid config {}", path.display()))?;
    let samples = input.group()?;
    let workspace = RunWorkspace::prepare(&input.root, &config.project.name, None)
        .context("failed to prepare run directory")?;

    let submission = Submission {
        root: input.root.clone(),
        indir: input.indir.clone(),
        steps: StepSet::parse(steps)?,
        run_script,
        config_path: input.config.clone(),
    };
    let job = launcher::array_job(&config, &samples, &submission)?;
    info!(command = %job.command_line(), "submitting array job");
    let outcome = launcher::submit(&workspace, &job, &mut ProcessRunner::default())
        .context("array submission failed")?;
    println!("{}", outcome.stdout.trim());
    Ok(())
}

fn list_samples(input: &InputArgs) -> Result<()> {
    let samples = input.group()?;
    for (index, sample) in samples.iter().enumerate() {
        let reverse = sample
            .reverse
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{index}\t{}\t{}\t{reverse}",
            sample.name,
            sample.forward.display()
        );
    }
    println!("# fingerprint {}", samples.fingerprint());
    Ok(())
}

fn fetch(root: &Path, config: Option<&Path>) -> Result<()> {
    let path = config_path(root, config);
    let config = RunConfig::load(&path, root)
        .with_context(|| format!("invalid config {}", path.display()))?;
    let workspace = RunWorkspace::prepare(root, &config.project.name, None)
        .context("failed to prepare run directory")?;
    let files = fetch_references(&config.reference, &workspace, &mut process_runner()?)
        .context("reference download failed")?;
    for file in files {
        println!("{}", file.display());
    }
    Ok(())
}
