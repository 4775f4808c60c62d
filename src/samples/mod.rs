//! Discovery and pairing of raw read files into samples.
//!
//! The ordered [`SampleSet`] is the contract between array tasks: every task
//! recomputes it independently and picks entry `i`, so the order must be a
//! pure function of the directory listing.

mod naming;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

pub use naming::{ReadFileName, ReadMarker, READ_EXTENSIONS};

/// Errors raised while building the sample set.
#[derive(Debug, Error)]
pub enum GroupingError {
    /// A read file name breaks the naming convention.
    #[error("invalid read file name `{file_name}`: {reason}")]
    InvalidFilename {
        /// Offending file name.
        file_name: String,
        /// Which rule was broken.
        reason: String,
    },

    /// The input directory contains no read files.
    #[error("no .fastq/.fastq.gz files found in {}", .dir.display())]
    NoInputFiles {
        /// Directory that was scanned.
        dir: PathBuf,
    },

    /// An explicitly named reverse read does not exist.
    #[error("reverse read {} not found", .path.display())]
    MissingMate {
        /// Expected path of the mate.
        path: PathBuf,
    },

    /// An explicitly named forward read does not exist.
    #[error("forward read {} not found", .path.display())]
    MissingRead {
        /// Expected path of the read.
        path: PathBuf,
    },

    /// Explicit forward/reverse reads do not share a sample stem.
    #[error("`{forward}` and `{reverse}` do not share a sample name")]
    StemMismatch {
        /// Forward file name.
        forward: String,
        /// Reverse file name.
        reverse: String,
    },

    /// Two files claim the same direction of the same sample.
    #[error("sample `{sample}` has more than one {marker:?} read: `{first}`, `{second}`")]
    AmbiguousPair {
        /// Pairing key.
        sample: String,
        /// Direction that is duplicated.
        marker: Option<ReadMarker>,
        /// First file name.
        first: String,
        /// Second file name.
        second: String,
    },

    /// Listing the input directory failed.
    #[error("failed to scan {}: {source}", .dir.display())]
    Io {
        /// Directory that was scanned.
        dir: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// How a sample's reverse read was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pairing {
    /// Derived from the `_R1`/`_R2` naming convention.
    #[default]
    Convention,
    /// Both reads were named on the command line.
    Explicit,
}

/// One unit of work: a forward read and, for paired data, its mate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Shared file stem with the read marker removed.
    pub name: String,
    /// Forward (`_R1`, or unmarked single-end) read.
    pub forward: PathBuf,
    /// Reverse (`_R2`) read.
    pub reverse: Option<PathBuf>,
    pub pairing: Pairing,
}

impl Sample {
    /// `true` when both reads are present.
    pub fn is_paired(&self) -> bool {
        self.reverse.is_some()
    }

    /// All read files of the sample, forward first.
    pub fn reads(&self) -> Vec<&Path> {
        std::iter::once(self.forward.as_path())
            .chain(self.reverse.as_deref())
            .collect()
    }

    /// File name of the forward read.
    pub fn forward_file_name(&self) -> &str {
        self.forward
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

/// Samples ordered by forward read file name (byte-wise ascending).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    /// Build a set, sorting by forward read file name.
    pub fn new(mut samples: Vec<Sample>) -> Self {
        samples.sort_by(|a, b| {
            a.forward_file_name()
                .as_bytes()
                .cmp(b.forward_file_name().as_bytes())
        });
        Self { samples }
    }

    /// Number of samples, i.e. the array size.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at `index`.
    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    /// Iterate in array order.
    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Content fingerprint of the ordered set.
    ///
    /// Tasks of one array job log this value; differing fingerprints mean the
    /// input directory changed between task launches.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for sample in &self.samples {
            hasher.update(sample.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(sample.forward_file_name().as_bytes());
            hasher.update(&[0]);
            if let Some(name) = sample
                .reverse
                .as_deref()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
            {
                hasher.update(name.as_bytes());
            }
            hasher.update(&[0xff]);
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

impl<'a> IntoIterator for &'a SampleSet {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

/// Build the sample set for a run.
///
/// With an explicit forward read only that sample is returned; its mate is
/// `explicit_reverse` when given, otherwise the `_R1`→`_R2` substitution if
/// that file exists. Without explicit reads `indir` is scanned.
pub fn group(
    indir: &Path,
    explicit_forward: Option<&Path>,
    explicit_reverse: Option<&Path>,
) -> Result<SampleSet, GroupingError> {
    match explicit_forward {
        Some(forward) => group_explicit(indir, forward, explicit_reverse),
        None => scan(indir),
    }
}

fn in_dir(indir: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        indir.join(file)
    }
}

fn group_explicit(
    indir: &Path,
    forward: &Path,
    reverse: Option<&Path>,
) -> Result<SampleSet, GroupingError> {
    let forward = in_dir(indir, forward);
    let forward_name = ReadFileName::from_path(&forward)?;
    if !forward.is_file() {
        return Err(GroupingError::MissingRead { path: forward });
    }

    let pairing = if reverse.is_some() {
        Pairing::Explicit
    } else {
        Pairing::Convention
    };
    let reverse = match reverse {
        Some(reverse) => {
            let reverse = in_dir(indir, reverse);
            let reverse_name = ReadFileName::from_path(&reverse)?;
            if !reverse.is_file() {
                return Err(GroupingError::MissingMate { path: reverse });
            }
            if reverse_name.pairing_key() != forward_name.pairing_key() {
                return Err(GroupingError::StemMismatch {
                    forward: forward_name.file_name,
                    reverse: reverse_name.file_name,
                });
            }
            Some(reverse)
        }
        None => forward_name
            .mate_file_name()
            .map(|mate| forward.with_file_name(mate))
            .filter(|mate| mate.is_file()),
    };

    Ok(SampleSet::new(vec![Sample {
        name: forward_name.pairing_key(),
        forward,
        reverse,
        pairing,
    }]))
}

#[derive(Default)]
struct PairSlots {
    r1: Option<ReadFileName>,
    r2: Option<ReadFileName>,
    single: Option<ReadFileName>,
}

impl PairSlots {
    fn insert(&mut self, key: &str, name: ReadFileName) -> Result<(), GroupingError> {
        let marker = name.marker.map(|(marker, _)| marker);
        let slot = match marker {
            Some(ReadMarker::R1) => &mut self.r1,
            Some(ReadMarker::R2) => &mut self.r2,
            None => &mut self.single,
        };
        if let Some(existing) = slot {
            return Err(GroupingError::AmbiguousPair {
                sample: key.to_string(),
                marker,
                first: existing.file_name.clone(),
                second: name.file_name,
            });
        }
        *slot = Some(name);
        Ok(())
    }
}

fn scan(indir: &Path) -> Result<SampleSet, GroupingError> {
    let io_err = |source| GroupingError::Io {
        dir: indir.to_path_buf(),
        source,
    };

    let mut candidates = Vec::new();
    for entry in fs::read_dir(indir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            warn!(file = ?file_name, "skipping non UTF-8 file name");
            continue;
        };
        if ReadFileName::candidate(file_name).is_some() {
            candidates.push(file_name.to_string());
        }
    }
    if candidates.is_empty() {
        return Err(GroupingError::NoInputFiles {
            dir: indir.to_path_buf(),
        });
    }
    candidates.sort();

    // Validate everything before grouping so no partial set is produced.
    let parsed = candidates
        .iter()
        .map(|name| ReadFileName::parse(name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut groups: BTreeMap<String, PairSlots> = BTreeMap::new();
    for name in parsed {
        let key = name.pairing_key();
        groups.entry(key.clone()).or_default().insert(&key, name)?;
    }

    let mut samples = Vec::with_capacity(groups.len());
    for (key, slots) in groups {
        let sample = match slots {
            PairSlots {
                r1: Some(r1),
                r2,
                single: None,
            } => Sample {
                name: key,
                forward: indir.join(&r1.file_name),
                reverse: r2.map(|r2| indir.join(r2.file_name)),
                pairing: Pairing::Convention,
            },
            PairSlots {
                r1: None,
                r2: Some(r2),
                single: None,
            } => {
                warn!(file = %r2.file_name, "reverse read without forward mate; treating as single-end");
                Sample {
                    name: key,
                    forward: indir.join(r2.file_name),
                    reverse: None,
                    pairing: Pairing::Convention,
                }
            }
            PairSlots {
                r1: None,
                r2: None,
                single: Some(single),
            } => Sample {
                name: key,
                forward: indir.join(single.file_name),
                reverse: None,
                pairing: Pairing::Convention,
            },
            PairSlots {
                single: Some(single),
                r1,
                r2,
            } => {
                let other = r1.or(r2).map(|name| name.file_name).unwrap_or_default();
                return Err(GroupingError::AmbiguousPair {
                    sample: key,
                    marker: None,
                    first: single.file_name,
                    second: other,
                });
            }
            PairSlots {
                r1: None,
                r2: None,
                single: None,
            } => continue,
        };
        samples.push(sample);
    }

    let set = SampleSet::new(samples);
    debug!(
        dir = %indir.display(),
        samples = set.len(),
        fingerprint = %set.fingerprint(),
        "grouped read files"
    );
    Ok(set)
}
