//! External tool invocation.
//!
//! The pipeline never shells out directly; it describes each call as an
//! [`Invocation`] and hands it to a [`ToolRunner`]. [`ProcessRunner`] runs real
//! processes, tests substitute fakes.

pub mod commands;
mod log;
mod process;

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use thiserror::Error;

pub use log::ToolLog;
pub use process::{CancelToken, ProcessRunner};

/// Failure to run a tool at all (as opposed to a non-zero exit).
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on or reading from the child failed.
    #[error("lost track of `{program}`: {source}")]
    Io {
        /// Program name.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled by a termination signal.
    #[error("`{program}` interrupted by termination signal")]
    Interrupted {
        /// Program name.
        program: String,
    },
}

/// One command line plus the files it is expected to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Short name used in logs, e.g. `samtools_sort`.
    pub label: String,
    /// Executable.
    pub program: String,
    /// Arguments.
    pub args: Vec<OsString>,
    /// Declared output files; removed if the invocation fails.
    pub outputs: Vec<PathBuf>,
}

impl Invocation {
    /// Start an invocation of `program`.
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append a flag followed by its value.
    pub fn opt(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Append a flag and value when the value is present.
    pub fn opt_some<V: AsRef<OsStr>>(self, flag: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.opt(flag, value),
            None => self,
        }
    }

    /// Append a bare flag when `enabled`.
    pub fn flag_if(self, flag: &str, enabled: bool) -> Self {
        if enabled {
            self.arg(flag)
        } else {
            self
        }
    }

    /// Declare an output file.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Arguments rendered for logs.
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    /// Whole command line rendered for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(self.display_args())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `true` if `arg` appears verbatim.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, if present.
    pub fn arg_after(&self, flag: &str) -> Option<&OsStr> {
        let at = self.args.iter().position(|a| a == flag)?;
        self.args.get(at + 1).map(OsString::as_os_str)
    }
}

/// Completion record of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutcome {
    /// Exit code; `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Declared outputs that exist after the run.
    pub artifacts: Vec<PathBuf>,
}

impl ToolOutcome {
    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Collect the declared outputs of `invocation` that now exist.
    pub fn existing_outputs(invocation: &Invocation) -> Vec<PathBuf> {
        invocation
            .outputs
            .iter()
            .filter(|path| path.exists())
            .cloned()
            .collect()
    }
}

/// Capability to run external tools.
pub trait ToolRunner {
    /// Run `invocation` to completion. A non-zero exit is reported through
    /// [`ToolOutcome::exit_code`], not as an error.
    fn invoke(&mut self, invocation: &Invocation) -> Result<ToolOutcome, ToolError>;
}

impl<T: ToolRunner + ?Sized> ToolRunner for &mut T {
    fn invoke(&mut self, invocation: &Invocation) -> Result<ToolOutcome, ToolError> {
        (**self).invoke(invocation)
    }
}
