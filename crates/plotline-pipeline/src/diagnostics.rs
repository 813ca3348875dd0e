//! Per-stage timing and provider records for one pipeline run.
//!
//! Durations are measured with the `web-time` crate and serialized as
//! fractional seconds (`f64`), since `std::time::Duration` does not
//! implement serde traits.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::provider::StageKind;

/// Serde support for `std::time::Duration` as fractional seconds.
pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage: StageKind,
    /// Provider that ran.
    pub provider: String,
    /// Wall-clock duration including hooks (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Values hooks attached to the stage output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Diagnostics collected from a single pipeline run, in stage order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub stages: Vec<StageMetrics>,
    /// Working raster size after Preprocess.
    pub raster_width: u32,
    pub raster_height: u32,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl PipelineDiagnostics {
    /// The record for `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: StageKind) -> Option<&StageMetrics> {
        self.stages.iter().find(|m| m.stage == stage)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Working raster: {}x{}",
            self.raster_width, self.raster_height
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<14} {:<20} {:>10} {:>8}",
            "Stage", "Provider", "Duration", "% Total"
        ));
        lines.push("-".repeat(60));

        let total_ms = duration_ms(self.total_duration);
        for m in &self.stages {
            let ms = duration_ms(m.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let mut line = format!("{:<14} {:<20} {ms:>8.3}ms {pct:>7.1}%", m.stage, m.provider);
            if let Some(count) = m.metadata.get("path_count") {
                line.push_str(&format!("  paths={count}"));
            }
            lines.push(line);
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
