//! **dirsnap** - Directory-tree snapshots packaged for LLM consumption
//!
//! A staged pipeline turns a base directory into an ordered, filtered,
//! content-loaded file set, then serializes it to XML, JSON, Markdown,
//! tree, NDJSON, or SARIF. Discovery is gitignore-aware with a sequential
//! and a parallel walker that yield identical results.

/// Error taxonomy shared across the crate
pub mod error;

/// Core pipeline - stages, context, events, and the one-call facade
pub mod core {
    /// Cooperative cancellation token with ordered listeners
    pub mod cancel;
    pub use self::cancel::CancelToken;

    /// Per-run context threaded stage-to-stage
    pub mod context;
    pub use self::context::PipelineContext;

    /// Lifecycle events and the observer registry
    pub mod events;
    pub use self::events::{EventBus, EventKind, PipelineEvent};

    /// File descriptor, content, and encoding types
    pub mod file;
    pub use self::file::{FileContent, FileDescriptor, TextEncoding};

    /// Stage contract and the sequential engine
    pub mod pipeline;
    pub use self::pipeline::{PipelineEngine, Stage};

    /// Layered filtering profile (defaults, file, environment, overrides)
    pub mod profile;
    pub use self::profile::{PROFILE_FILE, Profile, ProfileOptions, ProfileOverrides};

    /// One-call snapshot facade over the default stage list
    pub mod run;
    pub use self::run::{Snapshot, SnapshotOutput, SnapshotStream};

    /// Run statistics and per-stage timings
    pub mod stats;
    pub use self::stats::{ScanStats, StageTiming};

    /// Concrete stages composed by the engine
    pub mod stages;
}

/// Infrastructure - walking, config, encoding, subprocesses, worker pool
pub mod infra {
    /// Per-operation configuration instance (isolated, never global)
    pub mod config;
    pub use self::config::Settings;

    /// Encoding detection, decoding, and newline normalization
    pub mod detect;

    /// Version-control collaborator over the `git` subprocess
    pub mod git;
    pub use self::git::{GitVcs, VcsMeta, VcsProvider};

    /// Ignore-aware walkers (sequential and bounded-parallel)
    pub mod walk;
    pub use self::walk::{WalkStrategy, Walker};

    /// Bounded worker queue and retry-with-backoff helper
    pub mod workq;
    pub use self::workq::{RetryPolicy, retry_with_backoff, run_pool};
}

/// Output serializers - streaming where the format allows it
pub mod output;

// Strategic re-exports for consumers
pub use crate::core::{
    CancelToken, EventKind, FileDescriptor, PipelineEngine, Profile, ProfileOverrides, Snapshot,
    SnapshotOutput, Stage,
};
pub use crate::core::stages::{
    SecretScanner, SecretsConfig, SortDirection, SortKey, Transformer, VcsFilterMode,
};
pub use crate::error::{Result, SnapError};
pub use crate::infra::{WalkStrategy, Walker};
pub use crate::output::{BinaryPolicy, OutputFormat, RenderMeta, RenderOptions};
