use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Pipeline stage. The derived order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// Quality and adapter trimming (fastp).
    Trim,
    /// Two-pass alignment, sort, filter (STAR + samtools).
    Align,
    /// Gene-level read counting (featureCounts).
    Count,
}

impl Step {
    /// Every step in execution order.
    pub const ALL: [Step; 3] = [Step::Trim, Step::Align, Step::Count];

    /// Lowercase name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Trim => "trim",
            Step::Align => "align",
            Step::Count => "count",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown step name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown step `{0}` (expected trim, align or count)")]
pub struct ParseStepError(pub String);

impl FromStr for Step {
    type Err = ParseStepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStepError(s.to_string()))
    }
}

/// Requested subset of steps; iterates in execution order no matter how it
/// was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSet(BTreeSet<Step>);

impl StepSet {
    /// All three steps.
    pub fn all() -> Self {
        Self(Step::ALL.into_iter().collect())
    }

    /// Parse names such as `["count", "trim"]` or `["trim,align"]`.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ParseStepError> {
        let mut steps = BTreeSet::new();
        for name in names {
            for part in name.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
                steps.insert(part.parse()?);
            }
        }
        Ok(Self(steps))
    }

    /// Whether `step` was requested.
    pub fn contains(&self, step: Step) -> bool {
        self.0.contains(&step)
    }

    /// Requested steps in execution order.
    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.0.iter().copied()
    }

    /// `true` when nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for StepSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Step> for StepSet {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StepSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.iter().map(Step::as_str).collect();
        f.write_str(&names.join(" "))
    }
}
