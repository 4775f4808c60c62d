//! Read file naming convention.
//!
//! Input reads are named `<stem>.fastq` or `<stem>.fastq.gz`, where the stem
//! carries an `_R1`/`_R2` marker for paired data and no other `.` character.

use std::path::Path;

use super::GroupingError;

/// Extensions recognised as read files, longest first.
pub const READ_EXTENSIONS: [&str; 2] = [".fastq.gz", ".fastq"];

/// Read direction marker embedded in a file stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadMarker {
    /// `_R1`, forward read.
    R1,
    /// `_R2`, reverse read.
    R2,
}

impl ReadMarker {
    /// Literal text of the marker.
    pub fn as_str(self) -> &'static str {
        match self {
            ReadMarker::R1 => "_R1",
            ReadMarker::R2 => "_R2",
        }
    }

    /// The opposite direction.
    pub fn mate(self) -> Self {
        match self {
            ReadMarker::R1 => ReadMarker::R2,
            ReadMarker::R2 => ReadMarker::R1,
        }
    }
}

/// A validated read file name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFileName {
    /// Full file name as found on disk.
    pub file_name: String,
    /// File name without the read extension.
    pub stem: String,
    /// Recognised extension, including the leading dot.
    pub extension: &'static str,
    /// First marker in the stem and its byte offset.
    pub marker: Option<(ReadMarker, usize)>,
}

impl ReadFileName {
    /// Return `Some` when `file_name` ends in a read extension; the name is
    /// not validated yet.
    pub fn candidate(file_name: &str) -> Option<(&str, &'static str)> {
        READ_EXTENSIONS.iter().find_map(|ext| {
            file_name
                .strip_suffix(ext)
                .filter(|stem| !stem.is_empty())
                .map(|stem| (stem, *ext))
        })
    }

    /// Parse and validate a read file name.
    pub fn parse(file_name: &str) -> Result<Self, GroupingError> {
        let (stem, extension) =
            Self::candidate(file_name).ok_or_else(|| GroupingError::InvalidFilename {
                file_name: file_name.to_string(),
                reason: "expected a .fastq or .fastq.gz extension".to_string(),
            })?;
        if stem.contains('.') {
            return Err(GroupingError::InvalidFilename {
                file_name: file_name.to_string(),
                reason: "'.' is only allowed in the extension".to_string(),
            });
        }
        Ok(Self {
            file_name: file_name.to_string(),
            stem: stem.to_string(),
            extension,
            marker: first_marker(stem),
        })
    }

    /// Parse the final component of a path.
    pub fn from_path(path: &Path) -> Result<Self, GroupingError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| GroupingError::InvalidFilename {
                file_name: path.display().to_string(),
                reason: "not a valid UTF-8 file name".to_string(),
            })?;
        Self::parse(file_name)
    }

    /// Stem with the first marker removed; equal keys belong to one sample.
    pub fn pairing_key(&self) -> String {
        match self.marker {
            Some((marker, at)) => {
                let mut key = String::with_capacity(self.stem.len());
                key.push_str(&self.stem[..at]);
                key.push_str(&self.stem[at + marker.as_str().len()..]);
                key
            }
            None => self.stem.clone(),
        }
    }

    /// File name of the mate read, substituting the first marker.
    pub fn mate_file_name(&self) -> Option<String> {
        let (marker, at) = self.marker?;
        let mut name = String::with_capacity(self.file_name.len());
        name.push_str(&self.file_name[..at]);
        name.push_str(marker.mate().as_str());
        name.push_str(&self.file_name[at + marker.as_str().len()..]);
        Some(name)
    }
}

/// Earliest occurrence of either marker.
fn first_marker(stem: &str) -> Option<(ReadMarker, usize)> {
    [ReadMarker::R1, ReadMarker::R2]
        .into_iter()
        .filter_map(|marker| stem.find(marker.as_str()).map(|at| (marker, at)))
        .min_by_key(|&(_, at)| at)
}
