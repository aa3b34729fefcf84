//! Units of work of an incremental analysis and the containers their results land in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::AnalysisError;

/// Reserved label of the baseline job of a contribution breakdown.
pub const FULL_CONTRIBUTION: &str = "full";

/// Maximum number of peaks per typical flight the bounded engine accepts.
pub const MAX_PEAKS: usize = 100_000;

/// Identifies what one job computes: a sweep angle or a named contribution variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobLabel {
    Angle(i32),
    Contribution(String),
}

impl JobLabel {
    pub fn full() -> Self {
        JobLabel::Contribution(FULL_CONTRIBUTION.to_owned())
    }

    pub fn is_full(&self) -> bool {
        matches!(self, JobLabel::Contribution(name) if name == FULL_CONTRIBUTION)
    }

    /// A file-name-safe rendering of the label.
    pub fn file_stem(&self) -> String {
        match self {
            JobLabel::Angle(angle) => format!("angle_{}", angle),
            JobLabel::Contribution(name) => name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect(),
        }
    }
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobLabel::Angle(angle) => write!(f, "increment angle {}", angle),
            JobLabel::Contribution(name) => write!(f, "contribution '{}'", name),
        }
    }
}

/// One input of a request: the load data file a job analyses and its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    pub label: JobLabel,
    pub file: PathBuf,
}

impl JobInput {
    pub fn new<P: Into<PathBuf>>(label: JobLabel, file: P) -> Self {
        JobInput {
            label,
            file: file.into(),
        }
    }
}

/// Omission filtering applied to the load data before the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct OmissionPolicy {
    pub apply: bool,
    pub level: f64,
}

impl OmissionPolicy {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn at(level: f64) -> Self {
        OmissionPolicy { apply: true, level }
    }

    /// Omission only runs when enabled with a positive level.
    pub fn is_active(&self) -> bool {
        self.apply && self.level > 0.0
    }
}

/// Whether the engine has to cope with more peaks per flight than the bounded engine allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCapability {
    Bounded,
    Unbounded,
}

impl EngineCapability {
    pub fn for_peaks(peaks_per_flight: usize) -> Self {
        if peaks_per_flight > MAX_PEAKS {
            EngineCapability::Unbounded
        } else {
            EngineCapability::Bounded
        }
    }
}

/// Everything a runner needs to execute one sub-analysis.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Position in the aggregate. Contiguous `0..N` within a request.
    pub index: usize,
    pub label: JobLabel,
    pub input_file: PathBuf,
    /// Typical flight definitions shared by every job of the request.
    pub flight_file: Arc<PathBuf>,
    /// Rendered material file, read-only and shared by every job of the request.
    pub material_file: Arc<PathBuf>,
    pub validity: u32,
    pub omission: OmissionPolicy,
    pub capability: EngineCapability,
}

impl JobDescriptor {
    /// Directory holding this job's intermediate files, unique within the request.
    pub fn work_dir(&self, working_directory: &Path) -> PathBuf {
        working_directory.join(format!("job_{}_{}", self.index, self.label.file_stem()))
    }
}

/// What a runner produced for one job.
#[derive(Debug)]
pub enum JobResult<T> {
    Success { index: usize, value: T },
    Failure { index: usize, error: AnalysisError },
    Cancelled { index: usize },
}

/// Index-keyed results of a request. Absent slots are jobs that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate<T> {
    slots: Vec<Option<T>>,
}

impl<T> Aggregate<T> {
    pub fn with_len(len: usize) -> Self {
        Aggregate {
            slots: (0..len).map(|_| None).collect(),
        }
    }

    /// Stores `value` at `index`. Out-of-range indices are ignored.
    pub fn insert(&mut self, index: usize, value: T) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(value);
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn populated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn missing(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    /// Populated slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    pub fn slots(&self) -> &[Option<T>] {
        &self.slots
    }
}

/// Control outcome of a request that got past setup.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(Aggregate<T>),
    /// Cancelled before collection finished. Carries no partial results.
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<Aggregate<T>> {
        match self {
            Outcome::Completed(aggregate) => Some(aggregate),
            Outcome::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_file_stems() {
        assert_eq!(JobLabel::Angle(-45).file_stem(), "angle_-45");
        assert_eq!(JobLabel::Contribution("1g + dp".into()).file_stem(), "1g___dp");
        assert!(JobLabel::full().is_full());
        assert!(!JobLabel::Contribution("Full".into()).is_full());
    }

    #[test]
    fn test_label_deserializes_untagged() {
        let labels: Vec<JobLabel> = serde_yaml::from_str("[0, 45, full, gust]").unwrap();
        assert_eq!(
            labels,
            vec![
                JobLabel::Angle(0),
                JobLabel::Angle(45),
                JobLabel::full(),
                JobLabel::Contribution("gust".into()),
            ]
        );
    }

    #[test]
    fn test_aggregate_slots() {
        let mut aggregate = Aggregate::with_len(3);
        aggregate.insert(2, "c");
        aggregate.insert(0, "a");
        aggregate.insert(7, "ignored");
        assert_eq!(aggregate.len(), 3);
        assert_eq!(aggregate.populated(), 2);
        assert_eq!(aggregate.missing(), vec![1]);
        assert_eq!(aggregate.get(1), None);
        let collected: Vec<(usize, &&str)> = aggregate.iter().collect();
        assert_eq!(collected, vec![(0, &"a"), (2, &"c")]);
    }

    #[test]
    fn test_capability_threshold() {
        assert_eq!(EngineCapability::for_peaks(MAX_PEAKS), EngineCapability::Bounded);
        assert_eq!(EngineCapability::for_peaks(MAX_PEAKS + 1), EngineCapability::Unbounded);
    }

    #[test]
    fn test_omission_activity() {
        assert!(!OmissionPolicy::disabled().is_active());
        assert!(!OmissionPolicy::at(0.0).is_active());
        assert!(OmissionPolicy::at(2.5).is_active());
    }

    #[test]
    fn test_work_dirs_are_distinct() {
        let base = Path::new("/work");
        let descriptor = |index, label| JobDescriptor {
            index,
            label,
            input_file: PathBuf::from("in.sth"),
            flight_file: Arc::new(PathBuf::from("in.fls")),
            material_file: Arc::new(PathBuf::from("material.mat")),
            validity: 1,
            omission: OmissionPolicy::disabled(),
            capability: EngineCapability::Bounded,
        };
        let a = descriptor(0, JobLabel::full()).work_dir(base);
        let b = descriptor(1, JobLabel::Contribution("full".into())).work_dir(base);
        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("/work/job_0_full"));
    }
}
