//! Command lines for the external tools, built from the resolved config.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::{
    FastpConfig, FeatureCountsConfig, ReferenceConfig, SamtoolsConfig, StarConfig, StarOutput,
};

use super::Invocation;

/// File STAR writes first when generating an index; its presence marks a
/// complete index.
pub const STAR_INDEX_MARKER: &str = "SA";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// fastp QC and trimming. `reads` and `trimmed` hold one (single-end) or two
/// (paired) entries each.
pub fn fastp(
    cfg: &FastpConfig,
    reads: &[&Path],
    trimmed: &[PathBuf],
    html_report: &Path,
    json_report: &Path,
) -> Invocation {
    let mut inv = Invocation::new("fastp", "fastp")
        .opt("-i", reads[0])
        .opt("-o", &trimmed[0]);
    if let (Some(r2), Some(t2)) = (reads.get(1), trimmed.get(1)) {
        inv = inv.opt("-I", r2).opt("-O", t2);
    }
    inv = inv
        .opt("-h", html_report)
        .opt("-j", json_report)
        .opt("-w", cfg.threads.to_string())
        .opt("--length_required", cfg.length_required.to_string())
        .opt(
            "--qualified_quality_phred",
            cfg.qualified_quality_phred.to_string(),
        );
    if cfg.specify_adapter {
        inv = inv
            .opt_some("--adapter_sequence", cfg.adapter_sequence.as_deref())
            .opt_some("--adapter_sequence_r2", cfg.adapter_sequence_r2.as_deref());
    }
    trimmed
        .iter()
        .fold(inv, |inv, path| inv.output(path))
        .output(html_report)
        .output(json_report)
}

/// STAR genome generation into `reference.star_index`.
pub fn star_genome_generate(
    cfg: &StarConfig,
    reference: &ReferenceConfig,
    tmp_dir: &Path,
) -> Invocation {
    let index = &reference.star_index;
    Invocation::new("STAR_index", "STAR")
        .opt("--runThreadN", cfg.threads.to_string())
        .opt("--runMode", "genomeGenerate")
        .opt("--genomeDir", index)
        .opt("--genomeFastaFiles", &reference.genome_fasta)
        .opt("--sjdbGTFfile", &reference.gtf_file)
        .opt("--sjdbOverhang", cfg.sjdb_overhang.to_string())
        .opt("--outFileNamePrefix", with_suffix(index, "/"))
        .opt("--outTmpDir", tmp_dir)
        .output(index.join(STAR_INDEX_MARKER))
}

/// Path STAR writes the alignment to for a given `--outFileNamePrefix`.
pub fn star_output_path(prefix: &Path, output: &StarOutput) -> PathBuf {
    with_suffix(prefix, &output.file_suffix())
}

/// STAR alignment of one sample. `tmp_dir` must not exist yet; STAR creates
/// and removes it.
pub fn star_align(
    cfg: &StarConfig,
    index: &Path,
    reads: &[&Path],
    prefix: &Path,
    tmp_dir: &Path,
) -> Invocation {
    let mut inv = Invocation::new("STAR_align", "STAR")
        .opt("--runThreadN", cfg.threads.to_string())
        .opt("--genomeDir", index)
        .arg("--readFilesIn");
    for read in reads {
        inv = inv.arg(read);
    }
    let gzipped = reads
        .first()
        .map(|read| read.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false);
    if gzipped {
        inv = inv.opt("--readFilesCommand", &cfg.read_files_command);
    }
    inv = inv.opt("--outFileNamePrefix", prefix).arg("--outSAMtype");
    for part in cfg.output.star_args() {
        inv = inv.arg(part);
    }
    inv = inv
        .opt("--genomeLoad", &cfg.genome_load)
        .opt(
            "--outFilterMultimapNmax",
            cfg.out_filter_multimap_max.to_string(),
        )
        .opt("--twopassMode", &cfg.twopass_mode)
        .opt("--sjdbOverhang", cfg.sjdb_overhang.to_string())
        .opt("--alignIntronMax", cfg.align_intron_max.to_string())
        .opt("--outTmpDir", tmp_dir);
    if matches!(cfg.out_reads_unmapped.as_str(), "Within" | "Fastx") {
        inv = inv.opt("--outReadsUnmapped", &cfg.out_reads_unmapped);
    }
    inv.opt_some(
        "--outFilterMismatchNoverLmax",
        cfg.out_filter_mismatch_nover_lmax
            .as_ref()
            .map(ToString::to_string),
    )
    .output(star_output_path(prefix, &cfg.output))
}

/// `samtools sort`.
pub fn samtools_sort(
    cfg: &SamtoolsConfig,
    input: &Path,
    output: &Path,
    tmp_prefix: &Path,
) -> Invocation {
    Invocation::new("samtools_sort", "samtools")
        .arg("sort")
        .opt("-@", cfg.threads.to_string())
        .opt("-m", cfg.sort_memory.to_string())
        .opt("-T", tmp_prefix)
        .opt("-o", output)
        .arg(input)
        .output(output)
}

/// `samtools view -b -q` quality filter with optional flag filters.
pub fn samtools_filter(cfg: &SamtoolsConfig, input: &Path, output: &Path) -> Invocation {
    Invocation::new("samtools_filter", "samtools")
        .arg("view")
        .arg("-b")
        .opt("-@", cfg.threads.to_string())
        .opt("-q", cfg.min_map_quality.to_string())
        .opt("-o", output)
        .opt_some("-f", cfg.filter_f.as_ref().map(ToString::to_string))
        .opt_some("-F", cfg.filter_upper_f.as_ref().map(ToString::to_string))
        .arg(input)
        .output(output)
}

/// `samtools flagstat`; the report is captured from stdout.
pub fn samtools_flagstat(input: &Path, stage: &str) -> Invocation {
    Invocation::new(format!("flagstat_{stage}"), "samtools")
        .arg("flagstat")
        .arg(input)
}

/// `samtools index`. CRAM inputs need the reference FASTA.
pub fn samtools_index(
    cfg: &SamtoolsConfig,
    input: &Path,
    output: &Path,
    reference: Option<&Path>,
) -> Invocation {
    Invocation::new("samtools_index", "samtools")
        .arg("index")
        .opt("-@", cfg.threads.to_string())
        .opt_some("-T", reference)
        .opt("-o", output)
        .arg(input)
        .output(output)
}

/// `samtools view -C` recompression of a BAM against the reference.
pub fn samtools_cram(
    cfg: &SamtoolsConfig,
    input: &Path,
    output: &Path,
    reference: &Path,
) -> Invocation {
    Invocation::new("samtools_cram", "samtools")
        .arg("view")
        .arg("-C")
        .opt("-@", cfg.threads.to_string())
        .opt("-T", reference)
        .opt("-o", output)
        .arg(input)
        .output(output)
}

/// Summary file featureCounts writes next to the count table.
pub fn feature_counts_summary(table: &Path) -> PathBuf {
    with_suffix(table, ".summary")
}

/// featureCounts gene-level counting.
pub fn feature_counts(
    cfg: &FeatureCountsConfig,
    gtf: &Path,
    input: &Path,
    output: &Path,
) -> Invocation {
    Invocation::new("featureCounts", "featureCounts")
        .opt("-T", cfg.threads.to_string())
        .opt("-s", cfg.strand_specific.to_string())
        .opt("-t", &cfg.feature_type)
        .opt("-g", &cfg.gtf_attr_type)
        .opt("-a", gtf)
        .opt("-o", output)
        .flag_if("--ignoreDup", cfg.ignore_dup)
        .flag_if("-p", cfg.is_paired_end)
        .arg(input)
        .output(output)
        .output(feature_counts_summary(output))
}

/// `wget -O` download.
pub fn wget(url: &str, output: &Path) -> Invocation {
    Invocation::new("wget", "wget")
        .opt("-O", output)
        .arg(url)
        .output(output)
}

/// `gunzip` in place; writes the file without its `.gz` suffix.
pub fn gunzip(input: &Path) -> Invocation {
    let inv = Invocation::new("gunzip", "gunzip").arg("-f").arg(input);
    match input.to_str().and_then(|s| s.strip_suffix(".gz")) {
        Some(plain) => inv.output(plain),
        None => inv,
    }
}
