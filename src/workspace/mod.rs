//! Per-run directory layout and per-task scratch space.
//!
//! Layout under the pipeline root:
//!
//! ```text
//! {root}/runs/{project}/data/{sample}/    persisted outputs
//! {root}/runs/{project}/logs/{sample}/    QC reports and subprocess logs
//! {root}/runs/{project}/reference/        reference copies (CRAM decoding)
//! {scratch}/{project}/task-{index}/       exclusively owned by one task
//! ```
//!
//! Tasks only write below their own sample or task subdirectory, so no
//! locking is needed between concurrently running array tasks.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Filesystem failure while preparing or tearing down the workspace.
#[derive(Debug, Error)]
#[error("{action} {}: {source}", .path.display())]
pub struct WorkspaceError {
    /// What was being attempted.
    pub action: &'static str,
    /// Path involved.
    pub path: PathBuf,
    /// Underlying IO error.
    #[source]
    pub source: io::Error,
}

fn create_dir(path: &Path) -> Result<(), WorkspaceError> {
    fs::create_dir_all(path).map_err(|source| WorkspaceError {
        action: "failed to create",
        path: path.to_path_buf(),
        source,
    })
}

/// Directory layout of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_dir: PathBuf,
    scratch_root: PathBuf,
}

impl RunWorkspace {
    /// Create `{root}/runs/{project}/{data,logs,reference}`. Scratch lives under
    /// `{run}/scratch` unless a scheduler scratch base is given.
    pub fn prepare(
        root: &Path,
        project: &str,
        scratch_base: Option<&Path>,
    ) -> Result<Self, WorkspaceError> {
        let run_dir = root.join("runs").join(project);
        let scratch_root = match scratch_base {
            Some(base) => base.join(project),
            None => run_dir.join("scratch"),
        };
        let workspace = Self {
            run_dir,
            scratch_root,
        };
        for dir in [
            workspace.data_dir(),
            workspace.logs_dir(),
            workspace.reference_dir(),
        ] {
            create_dir(&dir)?;
        }
        debug!(run_dir = %workspace.run_dir.display(), "prepared run workspace");
        Ok(workspace)
    }

    /// `{root}/runs/{project}`.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Persisted outputs.
    pub fn data_dir(&self) -> PathBuf {
        self.run_dir.join("data")
    }

    /// Logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir.join("logs")
    }

    /// Reference copies shared read-only between tasks.
    pub fn reference_dir(&self) -> PathBuf {
        self.run_dir.join("reference")
    }

    /// Persisted outputs of one sample, created on demand.
    pub fn sample_data_dir(&self, sample: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.data_dir().join(sample);
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Logs of one sample (or of the launcher), created on demand.
    pub fn sample_logs_dir(&self, sample: &str) -> Result<PathBuf, WorkspaceError> {
        let dir = self.logs_dir().join(sample);
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Scratch directory owned by `task_id`; unique per task within the run.
    pub fn scratch_for(&self, task_id: usize) -> Result<PathBuf, WorkspaceError> {
        let dir = self.scratch_root.join(format!("task-{task_id}"));
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Remove a scratch directory and everything below it. A directory that
    /// never existed is not an error.
    pub fn release(&self, scratch: &Path) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(scratch) {
            Ok(()) => {
                debug!(scratch = %scratch.display(), "released scratch");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError {
                action: "failed to remove",
                path: scratch.to_path_buf(),
                source,
            }),
        }
    }
}

/// Move a file, falling back to copy + delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Delete a file, ignoring one that is already gone.
pub fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Best-effort removal used on failure paths.
pub(crate) fn discard(paths: &[PathBuf]) {
    for path in paths {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            remove_file_if_exists(path).map(|_| ())
        };
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "could not remove partial output");
        }
    }
}
