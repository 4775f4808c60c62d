//! Mapping of a scheduler array task onto exactly one sample.
//!
//! Scheduler state (task id, granted CPUs, scratch locations) is captured once
//! in [`SchedulerContext`] at the process boundary and passed in explicitly.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::samples::{Pairing, ReadFileName, ReadMarker, Sample, SampleSet};

/// Environment variable carrying the array task id.
pub const TASK_ID_VAR: &str = "SLURM_ARRAY_TASK_ID";
/// Environment variable carrying the CPUs granted to the task.
pub const CPUS_VAR: &str = "SLURM_CPUS_PER_TASK";

/// Errors raised while resolving the sample of an array task.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The task index does not address a sample.
    #[error("array task index {index} out of range for {len} sample(s)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of samples in the set.
        len: usize,
    },

    /// The forward read's mate vanished between grouping and dispatch.
    #[error("sample `{sample}`: mate read {} is missing", .path.display())]
    MissingMate {
        /// Sample name.
        sample: String,
        /// Expected mate path.
        path: PathBuf,
    },

    /// No task index was supplied and none is available from the scheduler.
    #[error("no array task index given (pass --task-index or set {TASK_ID_VAR})")]
    MissingTaskIndex,
}

/// Values the scheduler hands to a task through its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerContext {
    /// Array task index.
    pub task_index: Option<usize>,
    /// CPUs granted per task.
    pub cpus_per_task: Option<u32>,
    /// Node-local scratch (`TMPDIR`).
    pub local_scratch: Option<PathBuf>,
    /// Shared parallel filesystem scratch (`PFSDIR`).
    pub shared_scratch: Option<PathBuf>,
}

impl SchedulerContext {
    /// Capture the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut ctx = Self::default();
        for (key, value) in vars {
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.as_ref() {
                TASK_ID_VAR => ctx.task_index = value.parse().ok(),
                CPUS_VAR => ctx.cpus_per_task = value.parse().ok(),
                "TMPDIR" => ctx.local_scratch = Some(PathBuf::from(value)),
                "PFSDIR" => ctx.shared_scratch = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        ctx
    }

    /// Preferred scratch base: node-local first, then shared.
    pub fn scratch_base(&self) -> Option<PathBuf> {
        self.local_scratch
            .clone()
            .or_else(|| self.shared_scratch.clone())
    }
}

/// Resolves array task indices against a sample set.
#[derive(Debug)]
pub struct Dispatcher<'a> {
    samples: &'a SampleSet,
}

impl<'a> Dispatcher<'a> {
    /// Wrap a freshly grouped sample set.
    pub fn new(samples: &'a SampleSet) -> Self {
        Self { samples }
    }

    /// Sample for `task_index`, re-checking that its mate is still on disk.
    /// Convention-paired `_R1` reads get their `_R2` re-derived; an explicit
    /// reverse read is checked as given.
    pub fn resolve(&self, task_index: usize) -> Result<Sample, DispatchError> {
        let sample = self
            .samples
            .get(task_index)
            .ok_or(DispatchError::IndexOutOfRange {
                index: task_index,
                len: self.samples.len(),
            })?;
        let sample = verify_mate(sample)?;
        info!(
            task_index,
            sample = %sample.name,
            paired = sample.is_paired(),
            fingerprint = %self.samples.fingerprint(),
            "dispatched array task"
        );
        Ok(sample)
    }
}

fn verify_mate(sample: &Sample) -> Result<Sample, DispatchError> {
    match (sample.pairing, &sample.reverse) {
        (Pairing::Explicit, Some(reverse)) => {
            if !reverse.is_file() {
                return Err(DispatchError::MissingMate {
                    sample: sample.name.clone(),
                    path: reverse.clone(),
                });
            }
            Ok(sample.clone())
        }
        (Pairing::Explicit, None) => Ok(sample.clone()),
        (Pairing::Convention, _) => derive_mate(sample),
    }
}

/// Re-derive the `_R2` mate of an `_R1` forward read and require it to exist.
fn derive_mate(sample: &Sample) -> Result<Sample, DispatchError> {
    let forward = match ReadFileName::from_path(&sample.forward) {
        Ok(name) => name,
        Err(_) => return Ok(sample.clone()),
    };
    let Some((ReadMarker::R1, _)) = forward.marker else {
        return Ok(sample.clone());
    };
    let Some(mate_name) = forward.mate_file_name() else {
        return Ok(sample.clone());
    };
    let mate = sample.forward.with_file_name(mate_name);
    if !mate.is_file() {
        return Err(DispatchError::MissingMate {
            sample: sample.name.clone(),
            path: mate,
        });
    }
    debug!(sample = %sample.name, mate = %mate.display(), "mate present at dispatch");
    Ok(Sample {
        reverse: Some(mate),
        ..sample.clone()
    })
}
