//! Compositional filter stages: each is a pure `files -> files'` pass plus
//! derived counts on the stats.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexSet;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use crate::core::context::PipelineContext;
use crate::core::file::FileContent;
use crate::core::pipeline::Stage;
use crate::error::{Result, SnapError};
use crate::infra::git::VcsProvider;

/// Filesystems on these platforms are conventionally case-insensitive.
pub(crate) fn platform_case_insensitive() -> bool {
    cfg!(any(windows, target_os = "macos"))
}

fn build_globset_ci(patterns: &[String], case_insensitive: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|err| SnapError::InvalidArgument(format!("bad glob {pattern:?}: {err}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| SnapError::InvalidArgument(err.to_string()))
}

/// Sets the non-removable `always_include` flag on descriptors matching any
/// pattern by exact relative path, basename, or glob.
pub struct AlwaysIncludeStage {
    patterns: Vec<String>,
    matcher: Option<GlobSet>,
}

impl AlwaysIncludeStage {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns,
            matcher: None,
        }
    }
}

impl Stage for AlwaysIncludeStage {
    fn name(&self) -> &'static str {
        "always-include"
    }

    fn on_init(&mut self, _ctx: &PipelineContext) -> anyhow::Result<()> {
        if !self.patterns.is_empty() {
            self.matcher = Some(build_globset_ci(&self.patterns, platform_case_insensitive())?);
        }
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let Some(matcher) = &self.matcher else {
            return Ok(ctx);
        };
        let fold = platform_case_insensitive();
        let mut marked = 0_usize;
        for fd in &mut ctx.files {
            let exact = if fold {
                self.patterns
                    .iter()
                    .any(|p| p.eq_ignore_ascii_case(fd.rel_path.as_str()))
            } else {
                self.patterns.iter().any(|p| p == fd.rel_path.as_str())
            };
            let by_name = matcher.is_match(fd.name());
            let by_glob = matcher.is_match(fd.rel_path.as_std_path());
            if exact || by_name || by_glob {
                fd.always_include = true;
                marked += 1;
            }
        }
        debug!(marked, "always-include marking done");
        Ok(ctx)
    }
}

/// Removes files not matching the profile's `filter` list (when non-empty)
/// or matching its `exclude` list; `always_include` survivors are exempt
/// from both constraints.
pub struct ProfileFilterStage {
    filter: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl ProfileFilterStage {
    pub fn new() -> Self {
        Self {
            filter: None,
            exclude: None,
        }
    }
}

impl Default for ProfileFilterStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ProfileFilterStage {
    fn name(&self) -> &'static str {
        "profile-filter"
    }

    fn on_init(&mut self, ctx: &PipelineContext) -> anyhow::Result<()> {
        if !ctx.profile.filter.is_empty() {
            self.filter = Some(build_globset_ci(&ctx.profile.filter, false)?);
        }
        if !ctx.profile.exclude.is_empty() {
            self.exclude = Some(build_globset_ci(&ctx.profile.exclude, false)?);
        }
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let before = ctx.files.len();
        let filter = self.filter.as_ref();
        let exclude = self.exclude.as_ref();

        ctx.files.retain(|fd| {
            if fd.always_include {
                return true;
            }
            let path = fd.rel_path.as_std_path();
            if let Some(filter) = filter
                && !filter.is_match(path)
            {
                return false;
            }
            if let Some(exclude) = exclude
                && exclude.is_match(path)
            {
                return false;
            }
            true
        });

        ctx.stats.excluded_by_filter += before - ctx.files.len();
        Ok(ctx)
    }
}

/// Which change set the version-control filter intersects with.
#[derive(Debug, Clone)]
pub enum VcsFilterMode {
    /// Uncommitted modifications.
    Modified,
    /// Changes against a reference (branch, tag, commit).
    ChangedSince(String),
}

/// Intersects the file list with the version-control change set and
/// optionally annotates survivors with a per-path status.
pub struct VcsFilterStage {
    provider: Box<dyn VcsProvider>,
    mode: Option<VcsFilterMode>,
    annotate: bool,
    is_repo: bool,
}

impl VcsFilterStage {
    pub fn new(
        provider: Box<dyn VcsProvider>,
        mode: Option<VcsFilterMode>,
        annotate: bool,
    ) -> Self {
        Self {
            provider,
            mode,
            annotate,
            is_repo: false,
        }
    }
}

impl Stage for VcsFilterStage {
    fn name(&self) -> &'static str {
        "vcs-filter"
    }

    fn on_init(&mut self, ctx: &PipelineContext) -> anyhow::Result<()> {
        self.is_repo = self.provider.is_repository(&ctx.base);
        if !self.is_repo && self.mode.is_some() {
            warn!("version-control filter requested outside a repository; skipping");
        }
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        // Skipped entirely when not a repository or no filter was requested.
        if !self.is_repo {
            return Ok(ctx);
        }

        match self.provider.meta(&ctx.base) {
            Ok(meta) => ctx.vcs = Some(meta),
            Err(err) => ctx.stats.warn(format!("vcs metadata unavailable: {err}")),
        }

        if let Some(mode) = &self.mode {
            let changed = match mode {
                VcsFilterMode::Modified => self.provider.modified_files(&ctx.base),
                VcsFilterMode::ChangedSince(reference) => {
                    self.provider.changed_files(&ctx.base, reference)
                }
            }
            .map_err(|err| SnapError::stage(self.name(), err))?;

            let changed: IndexSet<&str> = changed.iter().map(String::as_str).collect();
            let before = ctx.files.len();
            ctx.files
                .retain(|fd| fd.always_include || changed.contains(fd.rel_path.as_str()));
            ctx.stats.excluded_by_vcs += before - ctx.files.len();
        }

        if self.annotate && !ctx.files.is_empty() {
            let paths: Vec<String> = ctx
                .files
                .iter()
                .map(|fd| fd.rel_path.to_string())
                .collect();
            let statuses = self
                .provider
                .file_statuses(&ctx.base, &paths)
                .map_err(|err| SnapError::stage(self.name(), err))?;
            for fd in &mut ctx.files {
                // Paths absent from the status report default to "unknown".
                let status = statuses
                    .get(fd.rel_path.as_str())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                fd.vcs_status = Some(status);
            }
        }
        Ok(ctx)
    }

    /// Version control being unavailable is not worth failing a snapshot.
    fn on_error(
        &mut self,
        error: &SnapError,
        ctx: &PipelineContext,
    ) -> Option<PipelineContext> {
        if self.mode.is_some() {
            // An explicit filter request must not silently yield everything.
            return None;
        }
        let mut substitute = PipelineContext {
            base: ctx.base.clone(),
            profile: ctx.profile.clone(),
            settings: ctx.settings.clone(),
            files: ctx.files.clone(),
            stats: ctx.stats.clone(),
            vcs: None,
            instructions: ctx.instructions.clone(),
            cancel: ctx.cancel.clone(),
        };
        substitute
            .stats
            .warn(format!("vcs annotation skipped: {error}"));
        Some(substitute)
    }
}

/// Drops files whose content hash was already seen; first-seen path wins.
/// Files without content are never deduplicated.
pub struct DedupeStage;

impl Stage for DedupeStage {
    fn name(&self) -> &'static str {
        "dedupe"
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let before = ctx.files.len();
        let mut seen: IndexSet<u64> = IndexSet::new();
        ctx.files.retain(|fd| match &fd.content {
            Some(FileContent::Text(s)) => seen.insert(xxh64(s.as_bytes(), 0)),
            Some(FileContent::Binary(b)) => seen.insert(xxh64(b, 0)),
            None => true,
        });
        ctx.stats.deduplicated += before - ctx.files.len();
        Ok(ctx)
    }
}

/// Sort key for the final ordering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Path,
    Name,
    Size,
    Modified,
    Extension,
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Stable ordering by one key; path and name comparison is numeric-aware
/// (`file2` sorts before `file10`).
pub struct SortStage {
    key: SortKey,
    direction: SortDirection,
}

impl SortStage {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }
}

impl Default for SortStage {
    fn default() -> Self {
        Self::new(SortKey::Path, SortDirection::Ascending)
    }
}

impl Stage for SortStage {
    fn name(&self) -> &'static str {
        "sorting"
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let key = self.key;
        ctx.files.sort_by(|a, b| {
            let ordering = match key {
                SortKey::Path => natural_cmp(a.rel_path.as_str(), b.rel_path.as_str()),
                SortKey::Name => natural_cmp(a.name(), b.name()),
                SortKey::Size => a.size.cmp(&b.size),
                SortKey::Modified => a.modified.cmp(&b.modified),
                SortKey::Extension => a
                    .extension()
                    .cmp(&b.extension())
                    .then_with(|| natural_cmp(a.rel_path.as_str(), b.rel_path.as_str())),
                SortKey::Depth => a
                    .depth()
                    .cmp(&b.depth())
                    .then_with(|| natural_cmp(a.rel_path.as_str(), b.rel_path.as_str())),
            };
            match self.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
        Ok(ctx)
    }
}

/// Locale/numeric-aware comparison: digit runs compare as numbers.
pub fn natural_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut na = 0_u128;
                while let Some(d) = ca.peek().and_then(|c| c.to_digit(10)) {
                    na = na.saturating_mul(10).saturating_add(d as u128);
                    ca.next();
                }
                let mut nb = 0_u128;
                while let Some(d) = cb.peek().and_then(|c| c.to_digit(10)) {
                    nb = nb.saturating_mul(10).saturating_add(d as u128);
                    cb.next();
                }
                match na.cmp(&nb) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            (Some(x), Some(y)) => {
                match x.cmp(&y) {
                    Ordering::Equal => {
                        ca.next();
                        cb.next();
                    }
                    other => return other,
                }
            }
        }
    }
}
