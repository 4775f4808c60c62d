use std::fmt;
use std::path::PathBuf;

use super::Step;

/// What an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Reads as delivered in the input directory.
    RawReads,
    /// Trimmed FASTQ reads (one file per read direction).
    TrimmedReads,
    /// Sorted, quality-filtered alignment.
    Alignment,
    /// featureCounts table and its summary.
    CountTable,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::RawReads => "raw reads",
            ArtifactKind::TrimmedReads => "trimmed reads",
            ArtifactKind::Alignment => "alignment",
            ArtifactKind::CountTable => "count table",
        })
    }
}

/// Files produced by one step and handed to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Content type.
    pub kind: ArtifactKind,
    /// Step that produced it.
    pub producer: Step,
    /// Files, primary file first.
    pub files: Vec<PathBuf>,
    /// Produced during this run. Externally supplied artifacts are never
    /// moved or deleted.
    pub owned: bool,
}

impl Artifact {
    /// Artifact produced by `producer` in this run.
    pub fn produced(kind: ArtifactKind, producer: Step, files: Vec<PathBuf>) -> Self {
        Self {
            kind,
            producer,
            files,
            owned: true,
        }
    }

    /// Pre-existing alignment supplied by the caller.
    pub fn external_alignment(path: PathBuf) -> Self {
        Self {
            kind: ArtifactKind::Alignment,
            producer: Step::Align,
            files: vec![path],
            owned: false,
        }
    }

    /// Primary file.
    pub fn primary(&self) -> &PathBuf {
        &self.files[0]
    }

    /// `true` when every file is present on disk.
    pub fn is_present(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|file| file.is_file())
    }
}
