//! Mutable context threaded stage-to-stage.
//!
//! The engine never inspects this beyond passing it along and recording
//! timing and loaded-byte deltas; every field belongs to the stages.

use std::path::PathBuf;

use crate::core::cancel::CancelToken;
use crate::core::file::FileDescriptor;
use crate::core::profile::Profile;
use crate::core::stats::ScanStats;
use crate::infra::config::Settings;
use crate::infra::git::VcsMeta;

/// Everything one operation owns while it is in flight.
#[derive(Debug)]
pub struct PipelineContext {
    /// Base directory the snapshot is taken from.
    pub base: PathBuf,
    /// Merged filtering policy for this run.
    pub profile: Profile,
    /// Per-operation configuration instance.
    pub settings: Settings,
    /// Current working set of files.
    pub files: Vec<FileDescriptor>,
    /// Running statistics.
    pub stats: ScanStats,
    /// Branch/commit/dirty metadata, when version control was consulted.
    pub vcs: Option<VcsMeta>,
    /// Free-form instructions text forwarded to the serializers.
    pub instructions: Option<String>,
    /// Cooperative cancellation signal for this run.
    pub cancel: CancelToken,
}

impl PipelineContext {
    pub fn new(base: PathBuf, profile: Profile, settings: Settings) -> Self {
        Self {
            base,
            profile,
            settings,
            files: Vec::new(),
            stats: ScanStats::default(),
            vcs: None,
            instructions: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Recompute `stats.loaded_bytes` from the descriptors currently held.
    pub fn refresh_loaded_bytes(&mut self) {
        self.stats.loaded_bytes = self
            .files
            .iter()
            .filter_map(|f| f.content.as_ref())
            .map(|c| c.len() as u64)
            .sum();
    }
}
