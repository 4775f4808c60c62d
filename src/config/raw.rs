//! Loosely typed mirror of `config.yaml` as written by hand.
//!
//! Every field is optional here; required fields and defaults are enforced by
//! [`super::resolve`].

use serde::Deserialize;

use super::flags::{RawFlag, Scalar};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub project: RawProject,
    pub reference: RawReference,
    pub tools: RawTools,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProject {
    pub name: Option<String>,
    pub save_files: Option<RawFlag>,
    pub save_type: Option<String>,
    pub conda_env: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawReference {
    pub ref_dir: Option<String>,
    pub genome_fasta: Option<String>,
    pub gtf_file: Option<String>,
    pub star_index: Option<String>,
    pub genome_url: Option<String>,
    pub gtf_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTools {
    pub fastp: RawFastp,
    #[serde(rename = "STAR", alias = "star")]
    pub star: RawStar,
    pub samtools: RawSamtools,
    #[serde(rename = "featureCounts", alias = "featurecounts")]
    pub feature_counts: RawFeatureCounts,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawFastp {
    pub threads: Option<u32>,
    pub length_required: Option<u32>,
    pub qualified_quality_phred: Option<u32>,
    pub specify_adapter: Option<RawFlag>,
    pub adapter_sequence: Option<String>,
    pub adapter_sequence_r2: Option<String>,
    pub save_inputs: Option<RawFlag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStar {
    pub threads: Option<u32>,
    pub file_type: Option<String>,
    #[serde(rename = "outSAMtype")]
    pub out_sam_type: Option<String>,
    #[serde(rename = "genomeLoad")]
    pub genome_load: Option<String>,
    #[serde(rename = "outFilterMultimapMax")]
    pub out_filter_multimap_max: Option<u32>,
    #[serde(rename = "twopassMode")]
    pub twopass_mode: Option<String>,
    #[serde(rename = "sjdbOverhang")]
    pub sjdb_overhang: Option<u32>,
    #[serde(rename = "alignIntronMax")]
    pub align_intron_max: Option<u64>,
    #[serde(rename = "outReadsUnmapped")]
    pub out_reads_unmapped: Option<String>,
    #[serde(rename = "outFilterMismatchNoverLmax")]
    pub out_filter_mismatch_nover_lmax: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSamtools {
    pub threads: Option<u32>,
    #[serde(rename = "sortMemory")]
    pub sort_memory: Option<String>,
    #[serde(rename = "minMapQuality")]
    pub min_map_quality: Option<u32>,
    pub filter_f: Option<Scalar>,
    #[serde(rename = "filter_F")]
    pub filter_upper_f: Option<Scalar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawFeatureCounts {
    pub threads: Option<u32>,
    pub strand_specific: Option<u8>,
    pub feature_type: Option<String>,
    pub gtf_attr_type: Option<String>,
    #[serde(rename = "ignoreDup")]
    pub ignore_dup: Option<RawFlag>,
    #[serde(rename = "isPairedEnd")]
    pub is_paired_end: Option<RawFlag>,
}
