//! Progress notifications pushed to subscribers.

use plotline_pipeline::StageKind;
use serde::{Deserialize, Serialize};

use crate::record::{JobError, JobId};

/// One notification about one job.
///
/// Serialized with a `kind` tag: `progress`, `complete`, or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// `stage` finished and the job is `percent` done.
    Progress {
        job_id: JobId,
        percent: u8,
        stage: StageKind,
    },
    Complete { job_id: JobId, result_ref: String },
    Error { job_id: JobId, error: JobError },
}

impl ProgressEvent {
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        match self {
            Self::Progress { job_id, .. }
            | Self::Complete { job_id, .. }
            | Self::Error { job_id, .. } => *job_id,
        }
    }

    /// `true` for the last event a job emits.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use plotline_pipeline::{ErrorKind, PipelineError};

    use super::*;

    #[test]
    fn progress_is_tagged() {
        let id = JobId::new();
        let json = serde_json::to_value(ProgressEvent::Progress {
            job_id: id,
            percent: 40,
            stage: StageKind::LineExtract,
        })
        .unwrap();
        assert_eq!(json["kind"], "progress");
        assert_eq!(json["percent"], 40);
        assert_eq!(json["stage"], "line_extract");
        assert_eq!(json["job_id"], id.to_string());
    }

    #[test]
    fn error_carries_kind_and_message() {
        let event = ProgressEvent::Error {
            job_id: JobId::new(),
            error: JobError::from(&PipelineError::Cancelled),
        };
        assert!(event.is_terminal());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "error");
        assert_eq!(json["error"]["kind"], "cancelled");
        let back: ProgressEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ProgressEvent::Error { error, .. } if error.kind == ErrorKind::Cancelled));
    }
}
