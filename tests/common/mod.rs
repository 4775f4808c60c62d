#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use rnaseq_bulk::config::RunConfig;
use rnaseq_bulk::tools::{Invocation, ToolError, ToolOutcome, ToolRunner};
use rnaseq_bulk::workspace::RunWorkspace;
use tempfile::TempDir;

pub const PAIRED_AB: [&str; 4] = [
    "sampleA_R1.fastq.gz",
    "sampleA_R2.fastq.gz",
    "sampleB_R1.fastq.gz",
    "sampleB_R2.fastq.gz",
];

/// Stands in for real tools: records every invocation and writes a small
/// placeholder for each declared output.
#[derive(Debug, Default)]
pub struct FakeToolRunner {
    pub calls: Vec<Invocation>,
    failures: Vec<Failure>,
    interrupted: Vec<String>,
}

#[derive(Debug)]
struct Failure {
    label: String,
    needle: Option<String>,
    exit_code: i32,
}

impl FakeToolRunner {
    /// Make every invocation labelled `label` exit with `exit_code`, after
    /// having written its outputs (as a crashing tool would).
    pub fn failing(label: &str, exit_code: i32) -> Self {
        let mut runner = Self::default();
        runner.fail(label, None, exit_code);
        runner
    }

    /// Fail `label` only when one of its arguments contains `needle`.
    pub fn fail(&mut self, label: &str, needle: Option<&str>, exit_code: i32) {
        self.failures.push(Failure {
            label: label.to_string(),
            needle: needle.map(str::to_string),
            exit_code,
        });
    }

    /// Report `label` as killed by a termination signal once it has started
    /// writing its outputs.
    pub fn interrupt(&mut self, label: &str) {
        self.interrupted.push(label.to_string());
    }

    pub fn labels(&self) -> Vec<&str> {
        self.calls.iter().map(|inv| inv.label.as_str()).collect()
    }

    pub fn find(&self, label: &str) -> Option<&Invocation> {
        self.calls.iter().find(|inv| inv.label == label)
    }

    fn exit_code_for(&self, inv: &Invocation) -> i32 {
        self.failures
            .iter()
            .find(|failure| {
                failure.label == inv.label
                    && failure.needle.as_ref().map_or(true, |needle| {
                        inv.display_args().iter().any(|arg| arg.contains(needle.as_str()))
                    })
            })
            .map_or(0, |failure| failure.exit_code)
    }
}

impl ToolRunner for FakeToolRunner {
    fn invoke(&mut self, inv: &Invocation) -> Result<ToolOutcome, ToolError> {
        self.calls.push(inv.clone());
        for output in &inv.outputs {
            if let Some(parent) = output.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(output, format!("{}\n", inv.label)).unwrap();
        }
        if self.interrupted.contains(&inv.label) {
            return Err(ToolError::Interrupted {
                program: inv.program.clone(),
            });
        }
        let exit_code = self.exit_code_for(inv);
        Ok(ToolOutcome {
            exit_code: Some(exit_code),
            stdout: format!("{} ok", inv.label),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} crashed\n", inv.label)
            },
            artifacts: ToolOutcome::existing_outputs(inv),
        })
    }
}

/// Pipeline root with `fastq/` input and `refs/` reference directories.
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub indir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let indir = root.join("fastq");
        fs::create_dir_all(&indir).unwrap();
        fs::create_dir_all(root.join("refs")).unwrap();
        fs::write(root.join("refs/genome.fa"), ">chr1\nACGT\n").unwrap();
        fs::write(root.join("refs/genes.gtf"), "chr1\tdemo\texon\t1\t4\n").unwrap();
        Self {
            _dir: dir,
            root,
            indir,
        }
    }

    pub fn touch_reads(&self, names: &[&str]) {
        for name in names {
            fs::write(self.indir.join(name), b"@r\nACGT\n+\nIIII\n").unwrap();
        }
    }

    /// Pretend the STAR index was built already.
    pub fn star_index(&self) {
        let index = self.root.join("refs/star_index");
        fs::create_dir_all(&index).unwrap();
        fs::write(index.join("SA"), b"index").unwrap();
    }

    pub fn config(&self, project_extra: &str) -> RunConfig {
        RunConfig::from_yaml_str(&config_yaml(project_extra), &self.root).unwrap()
    }

    pub fn workspace(&self, config: &RunConfig) -> RunWorkspace {
        RunWorkspace::prepare(&self.root, &config.project.name, None).unwrap()
    }
}

/// Minimal config; `project_extra` is spliced into the `project` mapping.
pub fn config_yaml(project_extra: &str) -> String {
    format!(
        "project:
  name: demo
  {project_extra}
reference:
  ref_dir: refs
tools:
  samtools:
    threads: 2
    sortMemory: 1G
"
    )
}

/// Every regular file below `dir`, relative to it and sorted.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect(dir, dir, &mut found);
    found.sort();
    found
}

fn collect(base: &Path, dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(base, &path, found);
        } else if let Ok(relative) = path.strip_prefix(base) {
            found.push(relative.to_path_buf());
        }
    }
}
