use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A pipeline stage, in the order a job moves through them.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Download,
    Compression,
    Decompression,
    Upload,
}

impl Stage {
    /// The stage a job enters after completing this one.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Download => Some(Stage::Compression),
            Stage::Compression => Some(Stage::Decompression),
            Stage::Decompression => Some(Stage::Upload),
            Stage::Upload => None,
        }
    }

    /// Optional stages are skipped when the job does not ask for them.
    pub fn is_optional(self) -> bool {
        matches!(self, Stage::Compression | Stage::Decompression)
    }

    pub fn as_static(self) -> &'static str {
        self.into()
    }
}

/// Where a job is inside a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Queued,
    Active,
    Progressing,
    Complete,
    Error,
}

/// Status of a mirror job.
///
/// The wire form is `created`, `cancelled` or `<stage>.<phase>`,
/// e.g. `download.queued` or `compression.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobStatus {
    Created,
    Queued(Stage),
    Active(Stage),
    Progressing(Stage),
    Complete(Stage),
    Error(Stage),
    Cancelled,
}

impl JobStatus {
    pub fn stage(self) -> Option<Stage> {
        self.split().map(|(stage, _)| stage)
    }

    fn split(self) -> Option<(Stage, Phase)> {
        match self {
            JobStatus::Created | JobStatus::Cancelled => None,
            JobStatus::Queued(s) => Some((s, Phase::Queued)),
            JobStatus::Active(s) => Some((s, Phase::Active)),
            JobStatus::Progressing(s) => Some((s, Phase::Progressing)),
            JobStatus::Complete(s) => Some((s, Phase::Complete)),
            JobStatus::Error(s) => Some((s, Phase::Error)),
        }
    }

    fn join(stage: Stage, phase: Phase) -> Self {
        match phase {
            Phase::Queued => JobStatus::Queued(stage),
            Phase::Active => JobStatus::Active(stage),
            Phase::Progressing => JobStatus::Progressing(stage),
            Phase::Complete => JobStatus::Complete(stage),
            Phase::Error => JobStatus::Error(stage),
        }
    }

    /// Whether a job in this status may move to `next`.
    ///
    /// Any live status may be cancelled. Everything else follows the stage
    /// order, including the skip from an optional stage's queue straight into
    /// the following stage's queue.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Created, Queued(Stage::Download)) => true,
            (Queued(a), Active(b)) => a == b,
            (Queued(a), Queued(b)) => a.is_optional() && a.next() == Some(b),
            (Active(a), Progressing(b)) | (Active(a), Error(b)) => a == b,
            (Progressing(a), Complete(b)) | (Progressing(a), Error(b)) => a == b,
            (Complete(a), Queued(b)) => a.next() == Some(b),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.split() {
            Some((stage, phase)) => write!(f, "{stage}.{phase}"),
            None if *self == JobStatus::Created => f.write_str("created"),
            None => f.write_str("cancelled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => return Ok(JobStatus::Created),
            "cancelled" => return Ok(JobStatus::Cancelled),
            _ => {}
        }

        let (stage, phase) = s
            .split_once('.')
            .ok_or_else(|| ParseStatusError(s.to_string()))?;
        let stage = Stage::from_str(stage).map_err(|_| ParseStatusError(s.to_string()))?;
        let phase = Phase::from_str(phase).map_err(|_| ParseStatusError(s.to_string()))?;
        Ok(JobStatus::join(stage, phase))
    }
}

impl TryFrom<String> for JobStatus {
    type Error = ParseStatusError;

    fn try_from(value: String) -> Result<Self, ParseStatusError> {
        value.parse()
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);
