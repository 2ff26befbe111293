//! One-call snapshot facade.
//!
//! Assembles the default stage list over a base directory and runs it,
//! either buffered (contents loaded up front) or streaming (contents
//! attached lazily as the iterator is pulled). Everything the builder does
//! can also be done by composing stages by hand on a `PipelineEngine`.

use std::path::{Path, PathBuf};

use crate::core::cancel::CancelToken;
use crate::core::context::PipelineContext;
use crate::core::file::FileDescriptor;
use crate::core::pipeline::{PipelineEngine, Stage};
use crate::core::profile::{Profile, ProfileOverrides};
use crate::core::stages::load::LazyLoader;
use crate::core::stages::{
    AlwaysIncludeStage, DedupeStage, DiscoveryStage, LoadConfig, LoadStage, ProfileFilterStage,
    SecretScanner, SecretsConfig, SecretsStage, SortDirection, SortKey, SortStage,
    TransformStage, Transformer, VcsFilterMode, VcsFilterStage,
};
use crate::core::stats::ScanStats;
use crate::error::Result;
use crate::infra::config::Settings;
use crate::infra::git::{GitVcs, VcsMeta};
use crate::infra::walk::WalkStrategy;

/// Builder for a snapshot run.
pub struct Snapshot {
    base: PathBuf,
    overrides: ProfileOverrides,
    settings: Settings,
    strategy: WalkStrategy,
    always_include: Vec<String>,
    vcs_mode: Option<VcsFilterMode>,
    annotate_vcs: bool,
    dedupe: bool,
    sort_key: SortKey,
    sort_direction: SortDirection,
    load: LoadConfig,
    scanner: Option<(Box<dyn SecretScanner>, SecretsConfig)>,
    transformers: Vec<Box<dyn Transformer>>,
    instructions: Option<String>,
    cancel: CancelToken,
}

/// Everything a finished buffered run hands back.
#[derive(Debug)]
pub struct SnapshotOutput {
    pub base: PathBuf,
    pub files: Vec<FileDescriptor>,
    pub stats: ScanStats,
    pub vcs: Option<VcsMeta>,
    pub instructions: Option<String>,
}

impl Snapshot {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
            overrides: ProfileOverrides::default(),
            settings: Settings::new(),
            strategy: WalkStrategy::Sequential,
            always_include: Vec::new(),
            vcs_mode: None,
            annotate_vcs: false,
            dedupe: false,
            sort_key: SortKey::Path,
            sort_direction: SortDirection::Ascending,
            load: LoadConfig::default(),
            scanner: None,
            transformers: Vec::new(),
            instructions: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn overrides(mut self, overrides: ProfileOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn strategy(mut self, strategy: WalkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Patterns pinned past every downstream filter.
    pub fn always_include(mut self, patterns: Vec<String>) -> Self {
        self.always_include = patterns;
        self
    }

    /// Intersect with a version-control change set.
    pub fn vcs_filter(mut self, mode: VcsFilterMode) -> Self {
        self.vcs_mode = Some(mode);
        self
    }

    /// Annotate survivors with their per-path version-control status.
    pub fn annotate_vcs(mut self, on: bool) -> Self {
        self.annotate_vcs = on;
        self
    }

    pub fn dedupe(mut self, on: bool) -> Self {
        self.dedupe = on;
        self
    }

    pub fn sort(mut self, key: SortKey, direction: SortDirection) -> Self {
        self.sort_key = key;
        self.sort_direction = direction;
        self
    }

    pub fn load_config(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    pub fn secrets(mut self, scanner: Box<dyn SecretScanner>, config: SecretsConfig) -> Self {
        self.scanner = Some((scanner, config));
        self
    }

    pub fn transformers(mut self, transformers: Vec<Box<dyn Transformer>>) -> Self {
        self.transformers = transformers;
        self
    }

    /// Free-form instructions text carried through to the serializers.
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Buffered run: discover, filter, load, transform, guard, sort.
    pub fn run(self) -> Result<SnapshotOutput> {
        self.run_with(|_| {})
    }

    /// Buffered run with access to the event registry before execution.
    pub fn run_with(
        mut self,
        configure: impl FnOnce(&mut PipelineEngine),
    ) -> Result<SnapshotOutput> {
        let stages = self.build_stages(true);
        self.finish(stages, configure)
    }

    /// Streaming run: the pipeline runs without the loading, dedupe,
    /// secrets, and transform passes (all of which need content up front);
    /// contents are attached one file at a time as the iterator is pulled.
    pub fn stream(mut self) -> Result<SnapshotStream> {
        let stages = self.build_stages(false);
        let max_bytes = self.load.max_content_bytes;
        let out = self.finish(stages, |_| {})?;
        Ok(SnapshotStream {
            base: out.base,
            stats: out.stats,
            vcs: out.vcs,
            instructions: out.instructions,
            files: LazyLoader::new(out.files.into_iter(), max_bytes),
        })
    }

    fn build_stages(&mut self, with_content: bool) -> Vec<Box<dyn Stage>> {
        let mut stages: Vec<Box<dyn Stage>> =
            vec![Box::new(DiscoveryStage::new(self.strategy))];

        if !self.always_include.is_empty() {
            stages.push(Box::new(AlwaysIncludeStage::new(std::mem::take(
                &mut self.always_include,
            ))));
        }
        stages.push(Box::new(ProfileFilterStage::new()));

        if self.vcs_mode.is_some() || self.annotate_vcs {
            stages.push(Box::new(VcsFilterStage::new(
                Box::new(GitVcs::new()),
                self.vcs_mode.take(),
                self.annotate_vcs,
            )));
        }

        if with_content {
            stages.push(Box::new(LoadStage::new(self.load.clone())));
            if self.dedupe {
                stages.push(Box::new(DedupeStage));
            }
            // Transformers run before the guard so their output is scanned
            // like any other content.
            if !self.transformers.is_empty() {
                stages.push(Box::new(TransformStage::new(std::mem::take(
                    &mut self.transformers,
                ))));
            }
            if let Some((scanner, config)) = self.scanner.take() {
                stages.push(Box::new(SecretsStage::new(scanner, config)));
            }
        }

        stages.push(Box::new(SortStage::new(self.sort_key, self.sort_direction)));
        stages
    }

    fn finish(
        self,
        stages: Vec<Box<dyn Stage>>,
        configure: impl FnOnce(&mut PipelineEngine),
    ) -> Result<SnapshotOutput> {
        let profile = Profile::resolve(&self.base, &self.overrides)
            .map_err(|err| crate::error::SnapError::InvalidArgument(format!("{err:#}")))?;

        let ctx = {
            let mut ctx = PipelineContext::new(self.base.clone(), profile, self.settings)
                .with_cancel(self.cancel);
            if let Some(text) = self.instructions {
                ctx = ctx.with_instructions(text);
            }
            ctx
        };

        let mut engine = PipelineEngine::new(stages);
        configure(&mut engine);
        let ctx = engine.execute(ctx)?;

        Ok(SnapshotOutput {
            base: ctx.base,
            files: ctx.files,
            stats: ctx.stats,
            vcs: ctx.vcs,
            instructions: ctx.instructions,
        })
    }
}

/// Result of a streaming run; `files` loads lazily, so only one file's
/// content is alive per pull.
pub struct SnapshotStream {
    pub base: PathBuf,
    pub stats: ScanStats,
    pub vcs: Option<VcsMeta>,
    pub instructions: Option<String>,
    pub files: LazyLoader<std::vec::IntoIter<FileDescriptor>>,
}
