//! Run configuration: loading, boolean normalisation, defaults and validation.
//!
//! `config.yaml` is parsed into a loosely typed tree and resolved exactly once
//! into [`RunConfig`]. Nothing downstream ever sees the textual booleans.

mod flags;
mod raw;

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use flags::{coerce_bool, RawFlag, Scalar};
use raw::RawConfig;

/// Errors raised while resolving the run configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A boolean field did not start with `T`/`F`.
    #[error("invalid boolean for `{field}`: {value} (expected True/False or T/F)")]
    InvalidBoolean {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Raw value as written.
        value: String,
    },

    /// Two fields are individually valid but contradict each other.
    #[error("invalid combination: {0}")]
    InvalidCombination(String),

    /// A field without a default is absent.
    #[error("missing required config field `{0}`")]
    MissingRequired(&'static str),

    /// A field has a value outside its accepted vocabulary.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for the expected layout.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Output format for persisted alignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveType {
    /// Keep the filtered BAM with a `.bai` index.
    Bam,
    /// Recompress against the reference FASTA with a `.crai` index.
    Cram,
}

impl SaveType {
    /// File extension of the alignment itself.
    pub fn extension(self) -> &'static str {
        match self {
            SaveType::Bam => "bam",
            SaveType::Cram => "cram",
        }
    }

    /// File extension of the companion index.
    pub fn index_extension(self) -> &'static str {
        match self {
            SaveType::Bam => "bai",
            SaveType::Cram => "crai",
        }
    }
}

impl fmt::Display for SaveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// `project` section.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Run name; also the directory name under `{root}/runs`.
    pub name: String,
    /// Persist intermediates instead of deleting them once consumed.
    pub save_files: bool,
    /// Format of persisted alignments.
    pub save_type: SaveType,
    /// Conda environment forwarded to the array script, if any.
    pub conda_env: Option<String>,
}

/// `reference` section with paths already joined onto `ref_dir`.
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    /// Directory holding the reference files.
    pub ref_dir: PathBuf,
    /// Genome FASTA.
    pub genome_fasta: PathBuf,
    /// Gene annotation.
    pub gtf_file: PathBuf,
    /// STAR genome index directory.
    pub star_index: PathBuf,
    /// Download location of the gzipped genome FASTA.
    pub genome_url: Option<String>,
    /// Download location of the gzipped GTF.
    pub gtf_url: Option<String>,
}

/// fastp parameters.
#[derive(Debug, Clone)]
pub struct FastpConfig {
    pub threads: u32,
    pub length_required: u32,
    pub qualified_quality_phred: u32,
    /// Pass explicit adapter sequences to fastp.
    pub specify_adapter: bool,
    pub adapter_sequence: Option<String>,
    pub adapter_sequence_r2: Option<String>,
    /// Keep the raw reads after trimming.
    pub save_inputs: bool,
}

/// Container format and sort order requested from STAR via `outSAMtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarOutput {
    /// `true` for BAM, `false` for SAM.
    pub bam: bool,
    /// Sort order STAR applies itself.
    pub sorting: StarSorting,
}

/// Sort order component of `outSAMtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarSorting {
    Unsorted,
    ByCoordinate,
    ByName,
}

impl StarOutput {
    /// Parse `outSAMtype` values such as `BAM SortedByCoordinate`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let bam = match parts.next()? {
            "BAM" => true,
            "SAM" => false,
            _ => return None,
        };
        let sorting = match parts.next() {
            None | Some("Unsorted") => StarSorting::Unsorted,
            Some("SortedByCoordinate") => StarSorting::ByCoordinate,
            Some("SortedByName") => StarSorting::ByName,
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { bam, sorting })
    }

    /// Suffix STAR appends to `--outFileNamePrefix`.
    pub fn file_suffix(&self) -> String {
        let ext = if self.bam { "bam" } else { "sam" };
        match self.sorting {
            StarSorting::Unsorted => format!("_Aligned.out.{ext}"),
            StarSorting::ByCoordinate => format!("_Aligned.sortedByCoord.out.{ext}"),
            StarSorting::ByName => format!("_Aligned.sortedByName.out.{ext}"),
        }
    }

    /// Value passed back to STAR's `--outSAMtype` (may be two words).
    pub fn star_args(&self) -> Vec<&'static str> {
        let container = if self.bam { "BAM" } else { "SAM" };
        match self.sorting {
            StarSorting::Unsorted => vec![container, "Unsorted"],
            StarSorting::ByCoordinate => vec![container, "SortedByCoordinate"],
            StarSorting::ByName => vec![container, "SortedByName"],
        }
    }
}

/// STAR parameters.
#[derive(Debug, Clone)]
pub struct StarConfig {
    pub threads: u32,
    /// `--readFilesCommand`, e.g. `zcat` for gzipped reads.
    pub read_files_command: String,
    pub output: StarOutput,
    pub genome_load: String,
    pub out_filter_multimap_max: u32,
    pub twopass_mode: String,
    pub sjdb_overhang: u32,
    pub align_intron_max: u64,
    pub out_reads_unmapped: String,
    pub out_filter_mismatch_nover_lmax: Option<Scalar>,
}

/// Memory per samtools sort thread, e.g. `2G`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortMemory {
    /// Numeric part.
    pub amount: f64,
    /// `G` or `M`.
    pub unit: char,
}

impl SortMemory {
    /// Parse `<number><G|M>` (unit case-insensitive).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let unit = text.chars().last()?.to_ascii_uppercase();
        if unit != 'G' && unit != 'M' {
            return None;
        }
        let amount: f64 = text[..text.len() - 1].parse().ok()?;
        (amount > 0.0).then_some(Self { amount, unit })
    }

    /// Total memory for `threads` sort workers, rounded down, e.g. `8G`.
    pub fn total_for(&self, threads: u32) -> String {
        format!("{}{}", (self.amount * f64::from(threads)) as u64, self.unit)
    }
}

impl fmt::Display for SortMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

/// samtools parameters.
#[derive(Debug, Clone)]
pub struct SamtoolsConfig {
    pub threads: u32,
    pub sort_memory: SortMemory,
    pub min_map_quality: u32,
    /// `-f` required flag bits.
    pub filter_f: Option<Scalar>,
    /// `-F` excluded flag bits.
    pub filter_upper_f: Option<Scalar>,
}

/// featureCounts parameters.
#[derive(Debug, Clone)]
pub struct FeatureCountsConfig {
    pub threads: u32,
    pub strand_specific: u8,
    pub feature_type: String,
    pub gtf_attr_type: String,
    pub ignore_dup: bool,
    pub is_paired_end: bool,
}

/// `tools` section.
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub fastp: FastpConfig,
    pub star: StarConfig,
    pub samtools: SamtoolsConfig,
    pub feature_counts: FeatureCountsConfig,
}

impl ToolsConfig {
    /// Largest thread count requested by any tool.
    pub fn max_threads(&self) -> u32 {
        [
            self.fastp.threads,
            self.star.threads,
            self.samtools.threads,
            self.feature_counts.threads,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
    }
}

/// Fully resolved, strictly typed run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub project: ProjectConfig,
    pub reference: ReferenceConfig,
    pub tools: ToolsConfig,
}

impl RunConfig {
    /// Read and resolve a config file. Relative reference paths are joined
    /// onto `root`.
    pub fn load(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(config = %path.display(), "loaded run configuration");
        Self::from_yaml_str(&text, root)
    }

    /// Resolve a YAML document.
    pub fn from_yaml_str(text: &str, root: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        resolve(&raw, root)
    }

    /// Replace every tool's thread count, as the scheduler does when it
    /// grants a fixed number of CPUs per task.
    pub fn with_thread_override(mut self, threads: u32) -> Self {
        let threads = threads.max(1);
        self.tools.fastp.threads = threads;
        self.tools.star.threads = threads;
        self.tools.samtools.threads = threads;
        self.tools.feature_counts.threads = threads;
        self
    }

    /// Override `project.save_files`.
    pub fn with_save_files(mut self, save_files: bool) -> Self {
        self.project.save_files = save_files;
        self
    }
}

fn flag(
    field: &'static str,
    value: Option<&RawFlag>,
    default: bool,
) -> Result<bool, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.resolve().ok_or_else(|| ConfigError::InvalidBoolean {
            field,
            value: raw.to_string(),
        }),
    }
}

fn threads(field: &'static str, value: Option<u32>) -> Result<u32, ConfigError> {
    match value {
        None => Ok(1),
        Some(0) => Err(ConfigError::InvalidValue {
            field,
            reason: "thread count must be at least 1".to_string(),
        }),
        Some(n) => Ok(n),
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn resolve(raw: &RawConfig, root: &Path) -> Result<RunConfig, ConfigError> {
    let name = non_empty(raw.project.name.as_ref())
        .ok_or(ConfigError::MissingRequired("project.name"))?
        .to_string();
    let save_files = flag("project.save_files", raw.project.save_files.as_ref(), false)?;
    let save_type = match non_empty(raw.project.save_type.as_ref()) {
        None => SaveType::Bam,
        Some(text) if text.eq_ignore_ascii_case("bam") => SaveType::Bam,
        Some(text) if text.eq_ignore_ascii_case("cram") => SaveType::Cram,
        Some(other) => {
            return Err(ConfigError::InvalidValue {
                field: "project.save_type",
                reason: format!("`{other}` is neither bam nor cram"),
            })
        }
    };
    let project = ProjectConfig {
        name,
        save_files,
        save_type,
        conda_env: non_empty(raw.project.conda_env.as_ref()).map(str::to_string),
    };

    let ref_dir = non_empty(raw.reference.ref_dir.as_ref())
        .ok_or(ConfigError::MissingRequired("reference.ref_dir"))?;
    let ref_dir = root.join(ref_dir);
    let in_ref_dir = |value: Option<&String>, default: &str| {
        ref_dir.join(non_empty(value).unwrap_or(default))
    };
    let reference = ReferenceConfig {
        genome_fasta: in_ref_dir(raw.reference.genome_fasta.as_ref(), "genome.fa"),
        gtf_file: in_ref_dir(raw.reference.gtf_file.as_ref(), "genes.gtf"),
        star_index: in_ref_dir(raw.reference.star_index.as_ref(), "star_index"),
        genome_url: non_empty(raw.reference.genome_url.as_ref()).map(str::to_string),
        gtf_url: non_empty(raw.reference.gtf_url.as_ref()).map(str::to_string),
        ref_dir,
    };

    let fastp = &raw.tools.fastp;
    let fastp = FastpConfig {
        threads: threads("tools.fastp.threads", fastp.threads)?,
        length_required: fastp.length_required.unwrap_or(15),
        qualified_quality_phred: fastp.qualified_quality_phred.unwrap_or(15),
        specify_adapter: flag(
            "tools.fastp.specify_adapter",
            fastp.specify_adapter.as_ref(),
            false,
        )?,
        adapter_sequence: non_empty(fastp.adapter_sequence.as_ref()).map(str::to_string),
        adapter_sequence_r2: non_empty(fastp.adapter_sequence_r2.as_ref()).map(str::to_string),
        save_inputs: flag("tools.fastp.save_inputs", fastp.save_inputs.as_ref(), true)?,
    };

    let star = &raw.tools.star;
    let out_sam_type = non_empty(star.out_sam_type.as_ref()).unwrap_or("BAM Unsorted");
    let output = StarOutput::parse(out_sam_type).ok_or_else(|| ConfigError::InvalidValue {
        field: "tools.STAR.outSAMtype",
        reason: format!("unsupported outSAMtype `{out_sam_type}`"),
    })?;
    let star = StarConfig {
        threads: threads("tools.STAR.threads", star.threads)?,
        read_files_command: non_empty(star.file_type.as_ref())
            .unwrap_or("zcat")
            .to_string(),
        output,
        genome_load: non_empty(star.genome_load.as_ref())
            .unwrap_or("NoSharedMemory")
            .to_string(),
        out_filter_multimap_max: star.out_filter_multimap_max.unwrap_or(10),
        twopass_mode: non_empty(star.twopass_mode.as_ref())
            .unwrap_or("Basic")
            .to_string(),
        sjdb_overhang: star.sjdb_overhang.unwrap_or(100),
        align_intron_max: star.align_intron_max.unwrap_or(1_000_000),
        out_reads_unmapped: non_empty(star.out_reads_unmapped.as_ref())
            .unwrap_or("None")
            .to_string(),
        out_filter_mismatch_nover_lmax: star.out_filter_mismatch_nover_lmax.clone(),
    };

    let samtools = &raw.tools.samtools;
    let sort_memory_text = non_empty(samtools.sort_memory.as_ref()).unwrap_or("768M");
    let sort_memory =
        SortMemory::parse(sort_memory_text).ok_or_else(|| ConfigError::InvalidValue {
            field: "tools.samtools.sortMemory",
            reason: format!("`{sort_memory_text}` must be a number followed by G or M"),
        })?;
    let samtools = SamtoolsConfig {
        threads: threads("tools.samtools.threads", samtools.threads)?,
        sort_memory,
        min_map_quality: samtools.min_map_quality.unwrap_or(10),
        filter_f: samtools.filter_f.clone(),
        filter_upper_f: samtools.filter_upper_f.clone(),
    };

    let counts = &raw.tools.feature_counts;
    let feature_counts = FeatureCountsConfig {
        threads: threads("tools.featureCounts.threads", counts.threads)?,
        strand_specific: counts.strand_specific.unwrap_or(0),
        feature_type: non_empty(counts.feature_type.as_ref())
            .unwrap_or("exon")
            .to_string(),
        gtf_attr_type: non_empty(counts.gtf_attr_type.as_ref())
            .unwrap_or("gene_id")
            .to_string(),
        ignore_dup: flag(
            "tools.featureCounts.ignoreDup",
            counts.ignore_dup.as_ref(),
            false,
        )?,
        is_paired_end: flag(
            "tools.featureCounts.isPairedEnd",
            counts.is_paired_end.as_ref(),
            true,
        )?,
    };
    if feature_counts.strand_specific > 2 {
        return Err(ConfigError::InvalidValue {
            field: "tools.featureCounts.strand_specific",
            reason: "must be 0, 1 or 2".to_string(),
        });
    }

    let config = RunConfig {
        project,
        reference,
        tools: ToolsConfig {
            fastp,
            star,
            samtools,
            feature_counts,
        },
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &RunConfig) -> Result<(), ConfigError> {
    if config.project.save_type == SaveType::Cram {
        let fasta = &config.reference.genome_fasta;
        let compressed = fasta
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"))
            .unwrap_or(false);
        if compressed {
            return Err(ConfigError::InvalidCombination(format!(
                "save_type=cram needs a decompressed reference FASTA, got {}",
                fasta.display()
            )));
        }
    }
    if config.tools.fastp.specify_adapter
        && config.tools.fastp.adapter_sequence.is_none()
        && config.tools.fastp.adapter_sequence_r2.is_none()
    {
        return Err(ConfigError::InvalidCombination(
            "tools.fastp.specify_adapter is set but no adapter sequence is given".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "
project:
  name: demo
reference:
  ref_dir: refs
";

    #[test]
    fn defaults_fill_every_tool() {
        let config = RunConfig::from_yaml_str(MINIMAL, Path::new("/data")).unwrap();
        assert!(!config.project.save_files);
        assert_eq!(config.project.save_type, SaveType::Bam);
        assert_eq!(config.reference.genome_fasta, Path::new("/data/refs/genome.fa"));
        assert_eq!(config.reference.gtf_file, Path::new("/data/refs/genes.gtf"));
        assert_eq!(config.tools.star.twopass_mode, "Basic");
        assert_eq!(config.tools.samtools.sort_memory.to_string(), "768M");
        assert!(config.tools.feature_counts.is_paired_end);
        assert!(config.tools.fastp.save_inputs);
    }

    #[test]
    fn absolute_ref_dir_is_kept() {
        let text = "project: {name: demo}\nreference: {ref_dir: /refs}\n";
        let config = RunConfig::from_yaml_str(text, Path::new("/data")).unwrap();
        assert_eq!(config.reference.ref_dir, Path::new("/refs"));
    }

    #[test]
    fn missing_name_is_reported() {
        let err = RunConfig::from_yaml_str("reference: {ref_dir: r}", Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("project.name")));
    }

    #[test]
    fn cram_with_gzipped_fasta_is_rejected() {
        let text = "
project: {name: demo, save_files: T, save_type: cram}
reference: {ref_dir: refs, genome_fasta: genome.fa.gz}
";
        let err = RunConfig::from_yaml_str(text, Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCombination(_)));
    }

    #[test]
    fn sort_memory_scales_with_threads() {
        let memory = SortMemory::parse("1.5g").unwrap();
        assert_eq!(memory.total_for(4), "6G");
        assert!(SortMemory::parse("2K").is_none());
        assert!(SortMemory::parse("G").is_none());
    }

    #[test]
    fn thread_override_applies_everywhere() {
        let config = RunConfig::from_yaml_str(MINIMAL, Path::new("/"))
            .unwrap()
            .with_thread_override(8);
        assert_eq!(config.tools.max_threads(), 8);
        assert_eq!(config.tools.fastp.threads, 8);
        assert_eq!(config.tools.feature_counts.threads, 8);
    }
}
