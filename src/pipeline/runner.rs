use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{RunConfig, SaveType};
use crate::samples::Sample;
use crate::tools::commands::{self, STAR_INDEX_MARKER};
use crate::tools::{Invocation, ToolError, ToolLog, ToolOutcome, ToolRunner};
use crate::workspace::{discard, move_file, remove_file_if_exists, RunWorkspace};

use super::{Artifact, ArtifactKind, Step, StepError, StepSet};

/// Lifecycle of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not started.
    Pending,
    /// fastp running.
    Trimming,
    /// STAR and samtools running.
    Aligning,
    /// featureCounts running.
    Counting,
    /// All requested steps succeeded.
    Done,
    /// A step failed; terminal.
    Failed,
}

impl RunState {
    fn running(step: Step) -> Self {
        match step {
            Step::Trim => RunState::Trimming,
            Step::Align => RunState::Aligning,
            Step::Count => RunState::Counting,
        }
    }

    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// What to run for a sample.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Steps to execute, always in pipeline order.
    pub steps: StepSet,
    /// Pre-existing alignment for runs that count without aligning. Never
    /// moved or deleted.
    pub alignment: Option<PathBuf>,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Sample name.
    pub sample: String,
    /// Terminal state (`Done`).
    pub state: RunState,
    /// States visited, starting at `Pending`.
    pub history: Vec<RunState>,
    /// Steps that completed.
    pub completed: Vec<Step>,
    /// Files moved into the run's data directory.
    pub persisted: Vec<PathBuf>,
    /// Persisted count table, when counting ran.
    pub counts: Option<PathBuf>,
}

/// Per-sample bookkeeping for one run.
struct SampleRun<'s> {
    sample: &'s Sample,
    scratch: &'s Path,
    logs_dir: PathBuf,
    log: ToolLog,
    /// Output of the last completed step, not yet consumed.
    pending: Option<Artifact>,
    /// Files written by the step in progress.
    partial: Vec<PathBuf>,
    completed: Vec<Step>,
    persisted: Vec<PathBuf>,
    counts: Option<PathBuf>,
}

impl SampleRun<'_> {
    fn name(&self) -> &str {
        &self.sample.name
    }

    fn missing(&self, step: Step, needed: ArtifactKind, path: Option<PathBuf>) -> StepError {
        StepError::MissingArtifact {
            sample: self.sample.name.clone(),
            step,
            needed,
            path,
        }
    }

    fn io(&self, step: Step, action: &'static str, path: &Path, source: io::Error) -> StepError {
        StepError::Io {
            sample: self.sample.name.clone(),
            step,
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Runs the requested steps for one sample through a [`ToolRunner`].
#[derive(Debug)]
pub struct StepRunner<'a, R> {
    config: &'a RunConfig,
    workspace: &'a RunWorkspace,
    tools: R,
    history: Vec<RunState>,
}

impl<'a, R: ToolRunner> StepRunner<'a, R> {
    /// Create a runner bound to a resolved config and run workspace.
    pub fn new(config: &'a RunConfig, workspace: &'a RunWorkspace, tools: R) -> Self {
        Self {
            config,
            workspace,
            tools,
            history: Vec::new(),
        }
    }

    /// States visited by the most recent [`run`](Self::run), including a
    /// trailing `Failed` when it returned an error.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Current state of the most recent run.
    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Pending)
    }

    /// Give back the tool runner.
    pub fn into_tools(self) -> R {
        self.tools
    }

    /// Execute `request` for `sample`, using `scratch` for intermediates.
    ///
    /// On failure the failing step's partial outputs are removed and the last
    /// completed, unconsumed artifact is moved into the data directory so the
    /// caller can release `scratch` unconditionally.
    pub fn run(
        &mut self,
        sample: &Sample,
        request: &RunRequest,
        scratch: &Path,
    ) -> Result<RunResult, StepError> {
        self.history = vec![RunState::Pending];
        let logs_dir = self.workspace.sample_logs_dir(&sample.name)?;
        let mut run = SampleRun {
            sample,
            scratch,
            log: ToolLog::in_dir(&logs_dir),
            logs_dir,
            pending: None,
            partial: Vec::new(),
            completed: Vec::new(),
            persisted: Vec::new(),
            counts: None,
        };
        info!(sample = %sample.name, steps = %request.steps, paired = sample.is_paired(), "starting sample");

        match self.drive(&mut run, request) {
            Ok(()) => {
                self.history.push(RunState::Done);
                info!(sample = %sample.name, persisted = run.persisted.len(), "sample done");
                Ok(RunResult {
                    sample: sample.name.clone(),
                    state: RunState::Done,
                    history: self.history.clone(),
                    completed: run.completed,
                    persisted: run.persisted,
                    counts: run.counts,
                })
            }
            Err(err) => {
                self.history.push(RunState::Failed);
                warn!(sample = %sample.name, step = ?err.step(), error = %err, "sample failed");
                self.abort(&mut run);
                Err(err)
            }
        }
    }

    fn drive(&mut self, run: &mut SampleRun<'_>, request: &RunRequest) -> Result<(), StepError> {
        // Counting without aligning needs a supplied alignment; check it
        // before any tool runs.
        if request.steps.contains(Step::Count) && !request.steps.contains(Step::Align) {
            match request.alignment.as_deref() {
                None => return Err(run.missing(Step::Count, ArtifactKind::Alignment, None)),
                Some(path) if !path.is_file() => {
                    return Err(run.missing(
                        Step::Count,
                        ArtifactKind::Alignment,
                        Some(path.to_path_buf()),
                    ))
                }
                Some(_) => {}
            }
        }

        for step in request.steps.iter() {
            self.history.push(RunState::running(step));
            info!(sample = %run.name(), %step, "step started");
            match step {
                Step::Trim => self.trim(run)?,
                Step::Align => self.align(run)?,
                Step::Count => self.count(run, request.alignment.as_deref())?,
            }
            run.partial.clear();
            run.completed.push(step);
            info!(sample = %run.name(), %step, "step finished");
        }

        // A skipped downstream step means this output is the deliverable.
        if let Some(terminal) = run.pending.clone() {
            self.persist(run, &terminal)?;
            run.pending = None;
            run.partial.clear();
        }
        Ok(())
    }

    fn trim(&mut self, run: &mut SampleRun<'_>) -> Result<(), StepError> {
        let config = self.config;
        let fastp = &config.tools.fastp;
        let sample = run.sample;
        let reads = self.raw_reads(run, Step::Trim)?;

        let dir = self.step_dir(run, Step::Trim)?;
        let trimmed: Vec<PathBuf> = if sample.is_paired() {
            ["R1", "R2"]
                .iter()
                .map(|mate| dir.join(format!("{}_{mate}_trimmed.fastq.gz", sample.name)))
                .collect()
        } else {
            vec![dir.join(format!("{}_trimmed.fastq.gz", sample.name))]
        };
        let read_refs: Vec<&Path> = reads.iter().map(PathBuf::as_path).collect();
        let inv = commands::fastp(
            fastp,
            &read_refs,
            &trimmed,
            &run.logs_dir.join("fastp.html"),
            &run.logs_dir.join("fastp.json"),
        );
        self.invoke(run, Step::Trim, &inv)?;

        let artifact = Artifact::produced(ArtifactKind::TrimmedReads, Step::Trim, trimmed);
        self.require(run, Step::Trim, &artifact)?;

        if !fastp.save_inputs {
            for read in &reads {
                remove_file_if_exists(read)
                    .map_err(|e| run.io(Step::Trim, "failed to remove", read, e))?;
            }
            info!(sample = %sample.name, "removed raw reads after trimming");
        }
        run.pending = Some(artifact);
        Ok(())
    }

    fn align(&mut self, run: &mut SampleRun<'_>) -> Result<(), StepError> {
        let config = self.config;
        let samtools = &config.tools.samtools;
        let name = run.name().to_string();

        let reads = match &run.pending {
            Some(artifact) if artifact.kind == ArtifactKind::TrimmedReads => {
                self.require(run, Step::Align, artifact)?;
                artifact.files.clone()
            }
            _ => self.raw_reads(run, Step::Align)?,
        };

        self.ensure_star_index(run)?;

        let dir = self.step_dir(run, Step::Align)?;
        let prefix = dir.join(&name);
        let read_refs: Vec<&Path> = reads.iter().map(PathBuf::as_path).collect();
        let star = commands::star_align(
            &config.tools.star,
            &config.reference.star_index,
            &read_refs,
            &prefix,
            &dir.join("star_tmp"),
        );
        let aligned = commands::star_output_path(&prefix, &config.tools.star.output);
        self.invoke(run, Step::Align, &star)?;
        self.expect_file(run, Step::Align, &aligned)?;
        self.report(run, Step::Align, &commands::samtools_flagstat(&aligned, "raw"))?;

        let sorted = dir.join(format!("{name}_sorted.bam"));
        let sort = commands::samtools_sort(samtools, &aligned, &sorted, &dir.join("sort_tmp"));
        self.invoke(run, Step::Align, &sort)?;
        self.expect_file(run, Step::Align, &sorted)?;
        self.consume(run, Step::Align, &aligned)?;
        self.report(run, Step::Align, &commands::samtools_flagstat(&sorted, "sorted"))?;

        let filtered = dir.join(format!("{name}_filtered.bam"));
        let filter = commands::samtools_filter(samtools, &sorted, &filtered);
        self.invoke(run, Step::Align, &filter)?;
        self.expect_file(run, Step::Align, &filtered)?;
        self.consume(run, Step::Align, &sorted)?;
        self.report(run, Step::Align, &commands::samtools_flagstat(&filtered, "filtered"))?;
        run.partial.clear();

        let alignment = Artifact::produced(ArtifactKind::Alignment, Step::Align, vec![filtered]);
        if let Some(consumed) = run.pending.replace(alignment) {
            self.retire(run, Step::Align, consumed)?;
        }
        Ok(())
    }

    fn count(&mut self, run: &mut SampleRun<'_>, external: Option<&Path>) -> Result<(), StepError> {
        let config = self.config;
        let input = match (&run.pending, external) {
            (Some(artifact), _) if artifact.kind == ArtifactKind::Alignment => artifact.clone(),
            (_, Some(path)) => Artifact::external_alignment(path.to_path_buf()),
            _ => return Err(run.missing(Step::Count, ArtifactKind::Alignment, None)),
        };
        self.require(run, Step::Count, &input)?;
        if !input.owned {
            info!(sample = %run.name(), alignment = %input.primary().display(), "counting supplied alignment");
        }

        let dir = self.step_dir(run, Step::Count)?;
        let table = dir.join(format!("{}_counts.txt", run.name()));
        let inv = commands::feature_counts(
            &config.tools.feature_counts,
            &config.reference.gtf_file,
            input.primary(),
            &table,
        );
        self.invoke(run, Step::Count, &inv)?;
        self.expect_file(run, Step::Count, &table)?;
        let counts = Artifact::produced(
            ArtifactKind::CountTable,
            Step::Count,
            ToolOutcome::existing_outputs(&inv),
        );
        let persisted = self.persist(run, &counts)?;
        run.partial.clear();
        run.counts = persisted.into_iter().next();

        // The alignment stays pending until it is retired, so a failed
        // conversion still leaves it to be preserved.
        if input.owned {
            if let Some(consumed) = run.pending.clone() {
                self.retire(run, Step::Count, consumed)?;
                run.pending = None;
            }
        }
        Ok(())
    }

    /// Generate the STAR index when absent. Builds into a private sibling
    /// directory and renames it into place so concurrent tasks never see a
    /// half-written index.
    fn ensure_star_index(&mut self, run: &mut SampleRun<'_>) -> Result<(), StepError> {
        let config = self.config;
        let index = &config.reference.star_index;
        if index.join(STAR_INDEX_MARKER).is_file() {
            debug!(index = %index.display(), "STAR index present");
            return Ok(());
        }

        let task = run
            .scratch
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("task");
        let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let staging = sibling(
            index,
            &format!(".staging-{task}-{}-{stamp}", std::process::id()),
        );
        fs::create_dir_all(&staging)
            .map_err(|e| run.io(Step::Align, "failed to create", &staging, e))?;
        let mut reference = config.reference.clone();
        reference.star_index = staging.clone();
        info!(index = %index.display(), "STAR index missing, generating");
        let inv = commands::star_genome_generate(
            &config.tools.star,
            &reference,
            &run.scratch.join("star_index_tmp"),
        );
        if let Err(err) = self.execute(run, Step::Align, &inv) {
            discard(&[staging]);
            return Err(err);
        }

        if index.join(STAR_INDEX_MARKER).is_file() {
            debug!("another task published the STAR index first");
            discard(&[staging]);
            return Ok(());
        }
        if is_empty_dir(index) {
            match fs::remove_dir(index) {
                Ok(()) => debug!(index = %index.display(), "removed empty index placeholder"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    debug!(index = %index.display(), error = %err, "could not remove index placeholder")
                }
            }
        }
        match fs::rename(&staging, index) {
            Ok(()) => Ok(()),
            Err(_) if index.join(STAR_INDEX_MARKER).is_file() => {
                discard(&[staging]);
                Ok(())
            }
            Err(e) => {
                discard(&[staging.clone()]);
                Err(run.io(Step::Align, "failed to publish STAR index at", index, e))
            }
        }
    }

    /// Dispose of a consumed artifact according to `save_files`.
    fn retire(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        artifact: Artifact,
    ) -> Result<(), StepError> {
        if !artifact.owned {
            return Ok(());
        }
        if self.config.project.save_files {
            self.persist(run, &artifact)?;
            return Ok(());
        }
        for file in &artifact.files {
            remove_file_if_exists(file).map_err(|e| run.io(step, "failed to remove", file, e))?;
        }
        debug!(sample = %run.name(), kind = %artifact.kind, "deleted consumed artifact");
        Ok(())
    }

    /// Move an artifact into `data/{sample}`, converting alignments to the
    /// configured save type first.
    fn persist(
        &mut self,
        run: &mut SampleRun<'_>,
        artifact: &Artifact,
    ) -> Result<Vec<PathBuf>, StepError> {
        if !artifact.owned {
            return Ok(Vec::new());
        }
        let step = artifact.producer;
        let files = match artifact.kind {
            ArtifactKind::Alignment => self.finalize_alignment(run, step, artifact.primary())?,
            _ => artifact.files.clone(),
        };
        let kept = self.move_to_data(run, step, &files)?;
        info!(
            sample = %run.name(),
            kind = %artifact.kind,
            files = kept.len(),
            "persisted artifact"
        );
        Ok(kept)
    }

    fn move_to_data(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        files: &[PathBuf],
    ) -> Result<Vec<PathBuf>, StepError> {
        let data_dir = self.workspace.sample_data_dir(run.name())?;
        let mut kept = Vec::with_capacity(files.len());
        for file in files {
            let target = match file.file_name() {
                Some(name) => data_dir.join(name),
                None => continue,
            };
            move_file(file, &target).map_err(|e| run.io(step, "failed to move", file, e))?;
            kept.push(target);
        }
        run.persisted.extend(kept.iter().cloned());
        Ok(kept)
    }

    /// Index the BAM, or recompress it to CRAM against the reference.
    ///
    /// The alignment belongs to a completed step, so nothing here is tracked
    /// as a partial output: on failure only the derived files are dropped and
    /// the BAM stays where it was. The BAM is removed once the CRAM and its
    /// index both exist.
    fn finalize_alignment(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        bam: &Path,
    ) -> Result<Vec<PathBuf>, StepError> {
        let config = self.config;
        let save_type = config.project.save_type;
        match save_type {
            SaveType::Bam => {
                let index = with_extra_extension(bam, save_type.index_extension());
                let inv = commands::samtools_index(&config.tools.samtools, bam, &index, None);
                if let Err(err) = self.execute(run, step, &inv) {
                    discard(&[index]);
                    return Err(err);
                }
                Ok(vec![bam.to_path_buf(), index])
            }
            SaveType::Cram => {
                let cram = bam.with_extension(save_type.extension());
                let index = with_extra_extension(&cram, save_type.index_extension());
                if let Err(err) = self.convert_to_cram(run, step, bam, &cram, &index) {
                    discard(&[cram, index]);
                    return Err(err);
                }
                self.consume(run, step, bam)?;
                Ok(vec![cram, index])
            }
        }
    }

    fn convert_to_cram(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        bam: &Path,
        cram: &Path,
        index: &Path,
    ) -> Result<(), StepError> {
        let config = self.config;
        let samtools = &config.tools.samtools;
        let fasta = config.reference.genome_fasta.as_path();
        self.execute(run, step, &commands::samtools_cram(samtools, bam, cram, fasta))?;
        self.expect_file(run, step, cram)?;
        let inv = commands::samtools_index(samtools, cram, index, Some(fasta));
        self.execute(run, step, &inv)?;
        self.copy_reference(run, step, fasta)
    }

    /// CRAM files decode only against their reference, so keep a copy with
    /// the run.
    fn copy_reference(
        &self,
        run: &SampleRun<'_>,
        step: Step,
        fasta: &Path,
    ) -> Result<(), StepError> {
        let Some(name) = fasta.file_name() else {
            return Ok(());
        };
        let target = self.workspace.reference_dir().join(name);
        if target.is_file() {
            return Ok(());
        }
        let part = sibling(&target, &format!(".{}.part", std::process::id()));
        fs::copy(fasta, &part).map_err(|e| run.io(step, "failed to copy reference", fasta, e))?;
        fs::rename(&part, &target).map_err(|e| run.io(step, "failed to publish", &target, e))?;
        info!(reference = %target.display(), "copied reference for CRAM decoding");
        Ok(())
    }

    /// Undo the failing step and keep whatever the last completed step made.
    fn abort(&mut self, run: &mut SampleRun<'_>) {
        discard(&run.partial);
        run.partial.clear();
        let Some(artifact) = run.pending.take() else {
            return;
        };
        if !artifact.owned || !artifact.is_present() {
            return;
        }
        match self.move_to_data(run, artifact.producer, &artifact.files) {
            Ok(kept) => info!(
                sample = %run.name(),
                kind = %artifact.kind,
                files = kept.len(),
                "preserved completed artifact"
            ),
            Err(err) => warn!(sample = %run.name(), error = %err, "could not preserve artifact"),
        }
    }

    fn raw_reads(&self, run: &SampleRun<'_>, step: Step) -> Result<Vec<PathBuf>, StepError> {
        let reads: Vec<PathBuf> = run.sample.reads().into_iter().map(Path::to_path_buf).collect();
        match reads.iter().find(|read| !read.is_file()) {
            Some(missing) => Err(run.missing(step, ArtifactKind::RawReads, Some(missing.clone()))),
            None => Ok(reads),
        }
    }

    fn step_dir(&self, run: &SampleRun<'_>, step: Step) -> Result<PathBuf, StepError> {
        let dir = run.scratch.join(step.as_str());
        fs::create_dir_all(&dir).map_err(|e| run.io(step, "failed to create", &dir, e))?;
        Ok(dir)
    }

    fn require(&self, run: &SampleRun<'_>, step: Step, artifact: &Artifact) -> Result<(), StepError> {
        match artifact.files.iter().find(|file| !file.is_file()) {
            Some(missing) => Err(run.missing(step, artifact.kind, Some(missing.clone()))),
            None if artifact.files.is_empty() => Err(run.missing(step, artifact.kind, None)),
            None => Ok(()),
        }
    }

    fn expect_file(&self, run: &SampleRun<'_>, step: Step, path: &Path) -> Result<(), StepError> {
        if path.is_file() {
            Ok(())
        } else {
            let kind = match step {
                Step::Trim => ArtifactKind::TrimmedReads,
                Step::Align => ArtifactKind::Alignment,
                Step::Count => ArtifactKind::CountTable,
            };
            Err(run.missing(step, kind, Some(path.to_path_buf())))
        }
    }

    /// Delete a sub-stage input once the next sub-stage succeeded.
    fn consume(&self, run: &SampleRun<'_>, step: Step, path: &Path) -> Result<(), StepError> {
        remove_file_if_exists(path)
            .map(|_| ())
            .map_err(|e| run.io(step, "failed to remove", path, e))
    }

    /// Run a tool whose outputs belong to the step in progress.
    fn invoke(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        inv: &Invocation,
    ) -> Result<ToolOutcome, StepError> {
        run.partial.extend(inv.outputs.iter().cloned());
        self.execute(run, step, inv)
    }

    /// Run a QC-only tool; a non-zero exit is logged, not fatal.
    fn report(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        inv: &Invocation,
    ) -> Result<(), StepError> {
        match self.execute(run, step, inv) {
            Ok(_) => Ok(()),
            Err(StepError::ToolFailed { tool, exit_code, .. }) => {
                warn!(sample = %run.name(), %step, %tool, ?exit_code, "QC report failed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn execute(
        &mut self,
        run: &mut SampleRun<'_>,
        step: Step,
        inv: &Invocation,
    ) -> Result<ToolOutcome, StepError> {
        debug!(sample = %run.name(), %step, command = %inv.command_line(), "running tool");
        let outcome = self.tools.invoke(inv).map_err(|source| match source {
            ToolError::Interrupted { .. } => StepError::Interrupted {
                sample: run.name().to_string(),
                step,
            },
            source => StepError::Tool {
                sample: run.name().to_string(),
                step,
                source,
            },
        })?;
        if let Err(err) = run.log.record(step.as_str(), inv, &outcome) {
            warn!(log = %run.log.path().display(), error = %err, "could not write subprocess log");
        }
        if outcome.success() {
            return Ok(outcome);
        }
        let stderr_tail = outcome
            .stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .to_string();
        Err(StepError::ToolFailed {
            sample: run.name().to_string(),
            step,
            tool: inv.label.clone(),
            exit_code: outcome.exit_code,
            stderr_tail,
        })
    }
}

fn with_extra_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map_or(false, |mut entries| entries.next().is_none())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
