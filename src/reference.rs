//! Download of the genome FASTA and GTF named in the `reference` section.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{ConfigError, ReferenceConfig};
use crate::tools::{commands, Invocation, ToolLog, ToolRunner};
use crate::workspace::{RunWorkspace, WorkspaceError};
use crate::PipelineError;

/// Log directory name (under `{run}/logs`) for download invocations.
pub const REFERENCE_LOG: &str = "references";

/// Fetch `genome_url` and `gtf_url` into `ref_dir` and decompress them.
/// Files already present are left alone. Returns the reference files.
pub fn fetch_references<R: ToolRunner>(
    reference: &ReferenceConfig,
    workspace: &RunWorkspace,
    tools: &mut R,
) -> Result<Vec<PathBuf>, PipelineError> {
    let genome_url = reference
        .genome_url
        .as_deref()
        .ok_or(ConfigError::MissingRequired("reference.genome_url"))?;
    let gtf_url = reference
        .gtf_url
        .as_deref()
        .ok_or(ConfigError::MissingRequired("reference.gtf_url"))?;

    fs::create_dir_all(&reference.ref_dir).map_err(|source| WorkspaceError {
        action: "failed to create",
        path: reference.ref_dir.clone(),
        source,
    })?;
    let log = ToolLog::in_dir(&workspace.sample_logs_dir(REFERENCE_LOG)?);

    let mut fetched = Vec::with_capacity(2);
    for (url, target) in [
        (genome_url, &reference.genome_fasta),
        (gtf_url, &reference.gtf_file),
    ] {
        if target.is_file() {
            info!(file = %target.display(), "reference already present");
        } else {
            let archive = gz_path(target);
            run_logged(tools, &log, &commands::wget(url, &archive))?;
            run_logged(tools, &log, &commands::gunzip(&archive))?;
            info!(file = %target.display(), %url, "reference downloaded");
        }
        fetched.push(target.clone());
    }
    Ok(fetched)
}

fn gz_path(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

fn run_logged<R: ToolRunner>(
    tools: &mut R,
    log: &ToolLog,
    inv: &Invocation,
) -> Result<(), PipelineError> {
    let outcome = tools.invoke(inv)?;
    if let Err(err) = log.record(REFERENCE_LOG, inv, &outcome) {
        warn!(log = %log.path().display(), error = %err, "could not write download log");
    }
    if outcome.success() {
        Ok(())
    } else {
        Err(PipelineError::ExternalTool {
            tool: inv.label.clone(),
            exit_code: outcome.exit_code,
            stderr: outcome.stderr.trim().to_string(),
        })
    }
}
