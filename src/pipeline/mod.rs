//! Step pipeline for one sample: trim → align → count.
//!
//! [`StepRunner`] executes any ordered subset of [`Step`]s, hands each
//! step's [`Artifact`] to the next, and disposes of intermediates as soon as
//! they are consumed (or persists them when `save_files` is set).

mod artifact;
mod runner;
mod step;

use std::path::PathBuf;

use thiserror::Error;

use crate::tools::ToolError;
use crate::workspace::WorkspaceError;

pub use artifact::{Artifact, ArtifactKind};
pub use runner::{RunRequest, RunResult, RunState, StepRunner};
pub use step::{ParseStepError, Step, StepSet};

/// Failure of a step; the run ends in [`RunState::Failed`].
#[derive(Debug, Error)]
pub enum StepError {
    /// An external tool exited unsuccessfully.
    #[error("{step} failed for sample {sample}: `{tool}` exited with {}", status_text(.exit_code))]
    ToolFailed {
        /// Sample name.
        sample: String,
        /// Step that was running.
        step: Step,
        /// Invocation label.
        tool: String,
        /// Exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Last line of the tool's stderr.
        stderr_tail: String,
    },

    /// A step could not find the artifact it consumes.
    #[error("{step} for sample {sample} needs {needed}{}", missing_path_text(.path))]
    MissingArtifact {
        /// Sample name.
        sample: String,
        /// Step that needed the input.
        step: Step,
        /// Required artifact.
        needed: ArtifactKind,
        /// Expected location, when one was known.
        path: Option<PathBuf>,
    },

    /// A tool could not be run at all.
    #[error("{step} for sample {sample}: {source}")]
    Tool {
        /// Sample name.
        sample: String,
        /// Step that was running.
        step: Step,
        /// Underlying failure.
        #[source]
        source: ToolError,
    },

    /// Termination signal received while the step was running.
    #[error("{step} for sample {sample} interrupted")]
    Interrupted {
        /// Sample name.
        sample: String,
        /// Step that was running.
        step: Step,
    },

    /// Filesystem failure while moving or deleting artifacts.
    #[error("{step} for sample {sample}: {action} {}: {source}", .path.display())]
    Io {
        /// Sample name.
        sample: String,
        /// Step that was running.
        step: Step,
        /// What was being attempted.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Run directory could not be prepared.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl StepError {
    /// Step the error is attributed to, if any.
    pub fn step(&self) -> Option<Step> {
        match self {
            StepError::ToolFailed { step, .. }
            | StepError::MissingArtifact { step, .. }
            | StepError::Tool { step, .. }
            | StepError::Interrupted { step, .. }
            | StepError::Io { step, .. } => Some(*step),
            StepError::Workspace(_) => None,
        }
    }
}

fn status_text(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn missing_path_text(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" at {}", path.display()),
        None => " but no earlier step produced it and none was supplied".to_string(),
    }
}
