//! Error taxonomy shared by every stage, the orchestrator, and the job
//! service.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::StageKind;

/// Machine-readable error kind, surfaced verbatim to status pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    UnsupportedFormat,
    PayloadTooLarge,
    NoProviderAvailable,
    ProviderExecutionFailed,
    Cancelled,
    Timeout,
    InternalError,
    NotFound,
    NotReady,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::UnsupportedFormat => "unsupported_format",
            Self::PayloadTooLarge => "payload_too_large",
            Self::NoProviderAvailable => "no_provider_available",
            Self::ProviderExecutionFailed => "provider_execution_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::InternalError => "internal_error",
            Self::NotFound => "not_found",
            Self::NotReady => "not_ready",
        }
    }

    /// `true` for kinds caused by the caller's input rather than a
    /// system fault.
    #[must_use]
    pub const fn is_bad_input(self) -> bool {
        matches!(
            self,
            Self::ValidationError | Self::UnsupportedFormat | Self::PayloadTooLarge
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while validating, running, or querying a pipeline job.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// A processing parameter is missing, out of range, or inconsistent.
    #[error("invalid parameter `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// The input bytes are not a decodable image.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The input exceeds a configured size limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// A stage has zero usable providers.
    #[error("no provider available for stage `{stage}`")]
    NoProviderAvailable { stage: StageKind },

    /// A provider failed while executing.
    #[error("provider `{provider}` failed in stage `{stage}`: {message}")]
    ProviderExecutionFailed {
        stage: StageKind,
        provider: String,
        message: String,
    },

    /// The job was cancelled between stages.
    #[error("job cancelled")]
    Cancelled,

    /// A stage ran past the configured time limit.
    #[error("stage `{stage}` exceeded its time limit of {limit_ms} ms")]
    Timeout { stage: StageKind, limit_ms: u64 },

    /// An unexpected failure inside the core.
    #[error("internal error: {0}")]
    Internal(String),

    /// No job with the given id exists.
    #[error("job `{0}` not found")]
    NotFound(String),

    /// The job has not produced a result.
    #[error("job `{id}` has no result: {reason}")]
    NotReady { id: String, reason: String },
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Validation`].
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Self::NoProviderAvailable { .. } => ErrorKind::NoProviderAvailable,
            Self::ProviderExecutionFailed { .. } => ErrorKind::ProviderExecutionFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::InternalError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotReady { .. } => ErrorKind::NotReady,
        }
    }

    /// Stage the error is attributed to, where one applies.
    #[must_use]
    pub const fn stage(&self) -> Option<StageKind> {
        match self {
            Self::NoProviderAvailable { stage }
            | Self::ProviderExecutionFailed { stage, .. }
            | Self::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Provider the error is attributed to, where one applies.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderExecutionFailed { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

/// Failure reported by a provider's `execute`.
///
/// The stage translates these into [`PipelineError`] values carrying the
/// stage and provider identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Failed(String),

    /// The stage handed the provider a payload of the wrong shape.
    #[error("expected {expected} payload, got {actual}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: &'static str,
    },
}

impl ProviderError {
    /// Attach stage and provider identity.
    ///
    /// Input errors keep their kind; the stage and provider go into the
    /// message.
    #[must_use]
    pub fn into_pipeline_error(self, stage: StageKind, provider: &str) -> PipelineError {
        let located = |msg: String| format!("{msg} (stage `{stage}`, provider `{provider}`)");
        match self {
            Self::UnsupportedFormat(msg) => PipelineError::UnsupportedFormat(located(msg)),
            Self::PayloadTooLarge(msg) => PipelineError::PayloadTooLarge(located(msg)),
            Self::Failed(message) => PipelineError::ProviderExecutionFailed {
                stage,
                provider: provider.to_owned(),
                message,
            },
            err @ Self::UnexpectedPayload { .. } => PipelineError::Internal(format!(
                "stage `{stage}` handed provider `{provider}` the wrong input: {err}"
            )),
        }
    }
}
