//! Run statistics threaded through the pipeline context.
//!
//! This is an explicit value owned by the in-flight operation. Nothing here
//! is global; two concurrent runs each carry their own copy.

use std::time::Duration;

use serde::Serialize;

use crate::error::SecretsSummary;

/// Counters and timings accumulated across the stages of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    /// Files yielded by discovery before any downstream filtering.
    pub discovered: usize,
    /// Files removed by profile include/exclude filtering.
    pub excluded_by_filter: usize,
    /// Files removed by version-control intersection.
    pub excluded_by_vcs: usize,
    /// Files removed as content-hash duplicates.
    pub deduplicated: usize,
    /// Files dropped by the secrets guard (inline redaction disabled).
    pub excluded_by_secrets: usize,
    /// Files classified binary by the loading stage.
    pub binary_files: usize,
    /// Files whose content was cut at the per-file ceiling.
    pub truncated_files: usize,
    /// Sum of on-disk sizes of the surviving files.
    pub total_bytes: u64,
    /// Bytes of content currently held in memory across descriptors.
    pub loaded_bytes: u64,
    /// Findings retained for reporting (coordinates only, never text).
    pub secrets: SecretsSummary,
    /// Non-fatal problems noted along the way.
    pub warnings: Vec<String>,
    /// Per-stage wall time, in execution order.
    pub stage_timings: Vec<StageTiming>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTiming {
    pub stage: &'static str,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Change in `loaded_bytes` across the stage; the engine's cheap proxy
    /// for the stage's memory footprint.
    pub loaded_bytes_delta: i64,
}

impl ScanStats {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Total files removed between discovery and serialization.
    pub fn excluded_total(&self) -> usize {
        self.excluded_by_filter
            + self.excluded_by_vcs
            + self.deduplicated
            + self.excluded_by_secrets
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
