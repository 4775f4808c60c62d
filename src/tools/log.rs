use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::{Invocation, ToolOutcome};

/// Appends one JSON line per tool invocation to `subprocess_log.jsonl`.
#[derive(Debug, Clone)]
pub struct ToolLog {
    path: PathBuf,
}

#[derive(Serialize)]
struct Record<'a> {
    step: &'a str,
    label: &'a str,
    program: &'a str,
    args: Vec<String>,
    status: Option<i32>,
    log_ts: String,
    stdout: &'a str,
    stderr: &'a str,
}

impl ToolLog {
    /// File name used inside each log directory.
    pub const FILE_NAME: &'static str = "subprocess_log.jsonl";

    /// Log into `dir/subprocess_log.jsonl`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
        }
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record for a completed invocation.
    pub fn record(
        &self,
        step: &str,
        invocation: &Invocation,
        outcome: &ToolOutcome,
    ) -> io::Result<()> {
        let record = Record {
            step,
            label: &invocation.label,
            program: &invocation.program,
            args: invocation.display_args(),
            status: outcome.exit_code,
            log_ts: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            stdout: &outcome.stdout,
            stderr: &outcome.stderr,
        };
        let line = serde_json::to_string(&record).map_err(io::Error::from)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}
