//! The job record and its state machine.
//!
//! ```text
//! pending -> processing -> completed
//!                       -> failed
//! ```
//!
//! No transition skips a state and terminal states are final. Progress
//! only moves forward while the job is processing.

use std::fmt;
use std::str::FromStr;

use jiff::Timestamp;
use plotline_pipeline::{
    Device, DocumentStats, ErrorKind, ExportFormat, PipelineDiagnostics, PipelineError, StageKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable description of why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl From<&PipelineError> for JobError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage: err.stage(),
            provider: err.provider().map(str::to_owned),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// What a completed job produced, minus the serialized documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Stable handle of the exported document.
    pub result_ref: String,
    /// Formats available through `get_result`.
    pub formats: Vec<ExportFormat>,
    pub stats: DocumentStats,
    pub diagnostics: PipelineDiagnostics,
}

/// One job, as seen by status pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    /// Whole percent, never decreasing.
    pub progress: u8,
    /// Last stage that finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageKind>,
    /// Set once processing starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    /// Set only when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Set only when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: Timestamp,
    /// Time of the last status or progress change.
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// A fresh pending record, created now.
    #[must_use]
    pub fn new(id: JobId) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            stage: None,
            device: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn result_ref(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.result_ref.as_str())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_become(next) {
            return Err(PipelineError::Internal(format!(
                "job `{}` cannot move from {} to {next}",
                self.id, self.status
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now().max(self.updated_at);
    }

    /// `pending -> processing`, recording the device.
    pub(crate) fn start(&mut self, device: Device) -> Result<(), PipelineError> {
        self.transition(JobStatus::Processing)?;
        self.device = Some(device);
        Ok(())
    }

    /// Record a finished stage. Returns `false` (and changes nothing) when
    /// the job is not processing or `percent` would lower the progress.
    pub(crate) fn advance(&mut self, stage: StageKind, percent: u8) -> bool {
        if self.status != JobStatus::Processing || percent < self.progress {
            return false;
        }
        self.progress = percent.min(100);
        self.stage = Some(stage);
        self.touch();
        true
    }

    /// `processing -> completed`.
    pub(crate) fn complete(&mut self, result: JobResult) -> Result<(), PipelineError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    /// `processing -> failed`.
    pub(crate) fn fail(&mut self, error: JobError) -> Result<(), PipelineError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn result() -> JobResult {
        JobResult {
            result_ref: "plt-0000000000000001".to_owned(),
            formats: vec![ExportFormat::Svg],
            stats: DocumentStats {
                path_count: 0,
                point_count: 0,
                total_length_mm: 0.0,
                travel_length_mm: 0.0,
                bounds: None,
                width_mm: 0.0,
                height_mm: 0.0,
            },
            diagnostics: PipelineDiagnostics::default(),
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut record = JobRecord::new(JobId::new());
        record.start(Device::Cpu).unwrap();
        assert!(record.advance(StageKind::Preprocess, 20));
        record.complete(result()).unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result_ref(), Some("plt-0000000000000001"));
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut record = JobRecord::new(JobId::new());
        assert!(record.complete(result()).is_err());
        let err = PipelineError::Cancelled;
        assert!(record.fail(JobError::from(&err)).is_err());
        assert_eq!(record.status, JobStatus::Pending);
    }

    #[test]
    fn terminal_states_are_final() {
        let mut record = JobRecord::new(JobId::new());
        record.start(Device::Cpu).unwrap();
        record.fail(JobError::from(&PipelineError::Cancelled)).unwrap();
        assert!(record.start(Device::Cpu).is_err());
        assert!(record.complete(result()).is_err());
        assert!(!record.advance(StageKind::Export, 100));
        assert_eq!(record.status, JobStatus::Failed);
    }

    #[test]
    fn progress_never_decreases() {
        let mut record = JobRecord::new(JobId::new());
        assert!(!record.advance(StageKind::Preprocess, 20));
        record.start(Device::Cpu).unwrap();
        assert!(record.advance(StageKind::LineExtract, 40));
        assert!(!record.advance(StageKind::Preprocess, 20));
        assert_eq!(record.progress, 40);
        assert_eq!(record.stage, Some(StageKind::LineExtract));
    }

    #[test]
    fn job_error_keeps_stage_and_provider() {
        let err = PipelineError::ProviderExecutionFailed {
            stage: StageKind::Vectorize,
            provider: "skeleton_trace".to_owned(),
            message: "boom".to_owned(),
        };
        let job_error = JobError::from(&err);
        assert_eq!(job_error.kind, ErrorKind::ProviderExecutionFailed);
        assert_eq!(job_error.stage, Some(StageKind::Vectorize));
        assert_eq!(job_error.provider.as_deref(), Some("skeleton_trace"));
    }

    #[test]
    fn transitions_move_the_update_time_forward() {
        let mut record = JobRecord::new(JobId::new());
        assert_eq!(record.created_at, record.updated_at);
        record.start(Device::Cpu).unwrap();
        let started = record.updated_at;
        assert!(started >= record.created_at);
        record.fail(JobError::from(&PipelineError::Cancelled)).unwrap();
        assert!(record.updated_at >= started);
        assert!(!record.advance(StageKind::Export, 100));
        assert!(record.updated_at >= started);
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn record_serializes_status_snake_case() {
        let json = serde_json::to_value(JobRecord::new(JobId::new())).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("error").is_none());
        assert!(json["created_at"].is_string());
    }
}
