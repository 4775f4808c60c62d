//! # Bulk RNA-seq job-array orchestration
//!
//! Turns a directory of FASTQ files into one scheduler array task per sample
//! and runs a fixed trim → align → count pipeline inside each task.
//!
//! ## Flow
//!
//! 1. **Config**: a loosely typed YAML file is resolved once into a strict
//!    [`RunConfig`](config::RunConfig).
//! 2. **Grouping**: FASTQ files are paired into a deterministic, byte-wise
//!    sorted [`SampleSet`](samples::SampleSet).
//! 3. **Dispatch**: array task `i` runs sample `i` of that ordering.
//! 4. **Steps**: the [`StepRunner`](pipeline::StepRunner) executes the
//!    requested steps, passing artifacts forward and deleting or persisting
//!    intermediates as soon as they are consumed.
//!
//! ## Usage Example
//!
//! ```ignore
//! use rnaseq_bulk::{config::RunConfig, samples, launcher, tools::ProcessRunner};
//!
//! let config = RunConfig::load(&root.join("config.yaml"), &root)?;
//! let samples = samples::group(&indir, None, None)?;
//! let workspace = RunWorkspace::prepare(&root, &config.project.name, None)?;
//! let result = launcher::run_task(&config, &workspace, &samples, 1, &request, ProcessRunner::default())?;
//! ```

#![warn(missing_debug_implementations)]

pub mod config;     // YAML loading and strict resolution
pub mod samples;    // FASTQ pairing
pub mod dispatch;   // Array task → sample
pub mod workspace;  // Run and scratch directories
pub mod tools;      // External tool invocation
pub mod pipeline;   // Per-sample step execution
pub mod launcher;   // Task, local array and sbatch orchestration
pub mod reference;  // Reference download

pub use config::{ConfigError, RunConfig};
pub use dispatch::{DispatchError, Dispatcher, SchedulerContext};
pub use pipeline::{RunRequest, RunResult, RunState, Step, StepError, StepRunner, StepSet};
pub use samples::{group, GroupingError, Pairing, Sample, SampleSet};
pub use workspace::{RunWorkspace, WorkspaceError};

use thiserror::Error;

/// Any failure surfaced by the library.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input files could not be grouped into samples.
    #[error(transparent)]
    Grouping(#[from] GroupingError),

    /// Task index could not be mapped onto a sample.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A pipeline step failed.
    #[error(transparent)]
    Step(#[from] StepError),

    /// Run or scratch directories could not be managed.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// A launcher-level tool could not be started.
    #[error(transparent)]
    Tool(#[from] tools::ToolError),

    /// A launcher-level tool (sbatch, wget, gunzip) exited unsuccessfully.
    #[error("`{tool}` exited with status {}: {stderr}", .exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ExternalTool {
        /// Invocation label.
        tool: String,
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
}
