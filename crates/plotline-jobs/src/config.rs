//! Service-level configuration.
//!
//! Loaded from JSON; every key is optional and falls back to the
//! `DEFAULT_*` constant of the same name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use plotline_pipeline::Limits;
use serde::{Deserialize, Serialize};

/// Errors produced while loading a [`ServiceConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Limits and buffer sizes for a [`JobService`](crate::JobService).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Largest accepted canvas side, in millimetres.
    pub max_canvas_mm: f64,
    /// Largest accepted encoded image, in bytes.
    pub max_payload_bytes: usize,
    /// Largest accepted decoded image, in pixels.
    pub max_image_pixels: u64,
    /// Progress events buffered per subscriber before old ones are dropped.
    pub event_capacity: usize,
    /// Longest a single stage may run before the job fails, in
    /// milliseconds.
    pub stage_timeout_ms: u64,
}

impl ServiceConfig {
    pub const DEFAULT_MAX_CANVAS_MM: f64 = Limits::DEFAULT_MAX_CANVAS_MM;
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 50 * 1024 * 1024;
    pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = Limits::DEFAULT_MAX_IMAGE_PIXELS;
    pub const DEFAULT_EVENT_CAPACITY: usize = 64;
    pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 5 * 60 * 1000;

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check every value is usable.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_canvas_mm.is_finite() || self.max_canvas_mm <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "max_canvas_mm",
                reason: format!("{} is not a positive size", self.max_canvas_mm),
            });
        }
        for (field, is_zero) in [
            ("max_payload_bytes", self.max_payload_bytes == 0),
            ("max_image_pixels", self.max_image_pixels == 0),
            ("event_capacity", self.event_capacity == 0),
            ("stage_timeout_ms", self.stage_timeout_ms == 0),
        ] {
            if is_zero {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_owned(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// The pipeline-facing subset.
    #[must_use]
    pub const fn limits(&self) -> Limits {
        Limits {
            max_canvas_mm: self.max_canvas_mm,
            max_image_pixels: self.max_image_pixels,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_canvas_mm: Self::DEFAULT_MAX_CANVAS_MM,
            max_payload_bytes: Self::DEFAULT_MAX_PAYLOAD_BYTES,
            max_image_pixels: Self::DEFAULT_MAX_IMAGE_PIXELS,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            stage_timeout_ms: Self::DEFAULT_STAGE_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        assert_eq!(ServiceConfig::from_json_str("{}").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn partial_object_overrides_named_keys() {
        let config = ServiceConfig::from_json_str(r#"{"max_payload_bytes": 1024}"#).unwrap();
        assert_eq!(config.max_payload_bytes, 1024);
        assert_eq!(config.event_capacity, ServiceConfig::DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ServiceConfig::from_json_str(r#"{"event_capacity": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "event_capacity", .. }));
    }

    #[test]
    fn stage_timeout_is_configurable_and_nonzero() {
        let config = ServiceConfig::from_json_str(r#"{"stage_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.stage_timeout(), Duration::from_millis(1500));
        let err = ServiceConfig::from_json_str(r#"{"stage_timeout_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "stage_timeout_ms", .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ServiceConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = ServiceConfig::from_json_file("/nonexistent/plotline.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn limits_carry_the_configured_values() {
        let config = ServiceConfig {
            max_canvas_mm: 300.0,
            ..ServiceConfig::default()
        };
        assert!((config.limits().max_canvas_mm - 300.0).abs() < f64::EPSILON);
    }
}
