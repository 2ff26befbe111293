//! Directory walking with two interchangeable strategies.
//!
//! Both the sequential single-pass recursion and the bounded-concurrency
//! worker-pool traversal must produce the same descriptor set for the same
//! inputs; that equivalence is a tested property, not an implementation
//! detail. Ignore files (`.snapignore`, plus `.gitignore` when enabled) are
//! read at each directory level and scoped to that subtree, gitignore-style,
//! via the `ignore` crate's matchers. A sibling `.snapkeep` file lists
//! force-include patterns: bare names without glob metacharacters expand to
//! `name/**`, and a leading `/` anchors the pattern to the base path.
//!
//! Count and total-size ceilings are applied over the path-sorted candidate
//! stream so both strategies stay equivalent; all other ceilings (depth,
//! hidden, per-file size) are enforced per entry during the walk. The count
//! ceiling additionally prunes during the walk through a shared window of
//! the smallest paths seen, so candidates that cannot make the final cut
//! are dropped at emission time.

use std::collections::{BinaryHeap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result as AnyResult};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use crossbeam_channel::unbounded;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::core::file::{FileDescriptor, to_rel_utf8};
use crate::core::profile::Profile;
use crate::error::{Result, SnapError};
use crate::infra::workq::run_pool;

/// Per-directory exclusion file, gitignore syntax.
pub const IGNORE_FILE: &str = ".snapignore";
/// Per-directory force-include file, same line format.
pub const KEEP_FILE: &str = ".snapkeep";

/// Walking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStrategy {
    Sequential,
    Parallel,
}

/// One level of scoped ignore/keep matchers, linked to its parent.
struct MatcherChain {
    parent: Option<Arc<MatcherChain>>,
    ignores: Vec<Gitignore>,
    keeps: Vec<Gitignore>,
    has_keeps: bool,
}

impl MatcherChain {
    fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            ignores: Vec::new(),
            keeps: Vec::new(),
            has_keeps: false,
        })
    }

    /// Extend the chain with the matcher files found in `dir`.
    fn descend(
        self: &Arc<Self>,
        dir: &Path,
        base: &Path,
        respect_ignore_files: bool,
    ) -> Arc<Self> {
        let mut ignores = Vec::new();
        let mut keeps = Vec::new();

        if respect_ignore_files {
            for name in [IGNORE_FILE, ".gitignore"] {
                let file = dir.join(name);
                if file.is_file() {
                    let mut builder = GitignoreBuilder::new(dir);
                    if let Some(err) = builder.add(&file) {
                        warn!(file = %file.display(), %err, "skipping unparsable ignore file");
                        continue;
                    }
                    match builder.build() {
                        Ok(matcher) => ignores.push(matcher),
                        Err(err) => {
                            warn!(file = %file.display(), %err, "skipping ignore file")
                        }
                    }
                }
            }

            let keep_file = dir.join(KEEP_FILE);
            if keep_file.is_file() {
                match read_keep_file(&keep_file, dir, base) {
                    Ok(matchers) => keeps.extend(matchers),
                    Err(err) => warn!(file = %keep_file.display(), %err, "skipping keep file"),
                }
            }
        }

        if ignores.is_empty() && keeps.is_empty() {
            return Arc::clone(self);
        }
        let has_keeps = self.has_keeps || !keeps.is_empty();
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            ignores,
            keeps,
            has_keeps,
        })
    }

    /// Gitignore semantics: the deepest level that matches decides, and a
    /// whitelist (`!pattern`) match at that level un-ignores.
    fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        for matcher in &self.ignores {
            let matched = matcher.matched(path, is_dir);
            if matched.is_whitelist() {
                return false;
            }
            if matched.is_ignore() {
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.is_ignored(path, is_dir),
            None => false,
        }
    }

    /// True when any keep matcher at any level matches.
    fn is_kept(&self, path: &Path, is_dir: bool) -> bool {
        for matcher in &self.keeps {
            if matcher.matched(path, is_dir).is_ignore() {
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.is_kept(path, is_dir),
            None => false,
        }
    }
}

/// Parse a keep file into matchers: non-anchored patterns are scoped to the
/// containing directory, `/`-anchored patterns to the base path.
fn read_keep_file(file: &Path, dir: &Path, base: &Path) -> AnyResult<Vec<Gitignore>> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let mut local = GitignoreBuilder::new(dir);
    let mut anchored = GitignoreBuilder::new(base);
    let mut has_local = false;
    let mut has_anchored = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (builder, has) = if line.starts_with('/') {
            (&mut anchored, &mut has_anchored)
        } else {
            (&mut local, &mut has_local)
        };
        for pattern in expand_keep_pattern(line) {
            builder
                .add_line(None, &pattern)
                .with_context(|| format!("bad keep pattern {pattern:?}"))?;
            *has = true;
        }
    }

    let mut matchers = Vec::new();
    if has_local {
        matchers.push(local.build()?);
    }
    if has_anchored {
        matchers.push(anchored.build()?);
    }
    Ok(matchers)
}

/// A bare directory name (no glob metacharacters, no trailing slash) means
/// "everything under this directory": expand to the name itself plus a
/// recursive glob.
fn expand_keep_pattern(line: &str) -> Vec<String> {
    let bare = !line.ends_with('/')
        && !line.contains(['*', '?', '[', ']', '{', '}', '!'])
        && !line.trim_start_matches('/').contains('/');
    if bare {
        vec![line.to_string(), format!("{line}/**")]
    } else {
        vec![line.to_string()]
    }
}

/// Rolling window over the count ceiling, shared by the walk's workers.
///
/// Holds the path-wise smallest candidates seen so far, at most `cap` of
/// them. Once full, a new path is admitted only by evicting a greater one,
/// so any rejected candidate provably cannot survive `finalize`'s sorted
/// trim; emission stops early for it instead of waiting for the post-walk
/// pass.
struct CountWindow {
    cap: usize,
    paths: Mutex<BinaryHeap<Utf8PathBuf>>,
}

impl CountWindow {
    fn new(cap: usize) -> Self {
        Self {
            cap,
            paths: Mutex::new(BinaryHeap::new()),
        }
    }

    fn admit(&self, path: &Utf8Path) -> bool {
        if self.cap == 0 {
            return false;
        }
        let mut paths = self.paths.lock().unwrap_or_else(|p| p.into_inner());
        if paths.len() < self.cap {
            paths.push(path.to_path_buf());
            return true;
        }
        match paths.peek() {
            Some(max) if path < max.as_path() => {
                paths.pop();
                paths.push(path.to_path_buf());
                true
            }
            _ => false,
        }
    }
}

/// Directory unit of work shared by both strategies.
struct DirUnit {
    dir: PathBuf,
    depth: usize,
    chain: Arc<MatcherChain>,
    /// An ancestor was excluded; only kept files survive below.
    suppressed: bool,
}

/// Configured walker over one base directory.
pub struct Walker {
    base: PathBuf,
    include: Option<GlobSet>,
    exclude: GlobSet,
    /// Matchers for the profile's force-include list, rooted at the base.
    force: Vec<Gitignore>,
    respect_ignore_files: bool,
    include_hidden: bool,
    follow_symlinks: bool,
    max_depth: Option<usize>,
    min_file_size: Option<u64>,
    max_file_size: Option<u64>,
    max_total_size: Option<u64>,
    max_file_count: Option<usize>,
    workers: usize,
}

impl Walker {
    pub fn new(base: &Path, profile: &Profile) -> Result<Self> {
        let include = if profile.include.is_empty() {
            None
        } else {
            Some(build_globset(&profile.include)?)
        };
        let exclude = build_globset(&profile.exclude)?;

        let force = if profile.force_include.is_empty() {
            Vec::new()
        } else {
            let mut builder = GitignoreBuilder::new(base);
            for line in &profile.force_include {
                for pattern in expand_keep_pattern(line) {
                    builder.add_line(None, &pattern).map_err(|err| {
                        SnapError::InvalidArgument(format!(
                            "bad force-include pattern {line:?}: {err}"
                        ))
                    })?;
                }
            }
            vec![
                builder
                    .build()
                    .map_err(|err| SnapError::InvalidArgument(err.to_string()))?,
            ]
        };

        let o = &profile.options;
        Ok(Self {
            base: base.to_path_buf(),
            include,
            exclude,
            force,
            respect_ignore_files: o.respect_ignore_files,
            include_hidden: o.include_hidden,
            follow_symlinks: o.follow_symlinks,
            max_depth: o.max_depth,
            min_file_size: o.min_file_size,
            max_file_size: o.max_file_size,
            max_total_size: o.max_total_size,
            max_file_count: o.max_file_count,
            workers: profile.worker_count(),
        })
    }

    /// Traverse and return descriptors (no content), sorted by relative
    /// path, with count/total-size ceilings applied.
    #[instrument(skip(self, cancel), fields(base = %self.base.display()))]
    pub fn walk(&self, strategy: WalkStrategy, cancel: &CancelToken) -> Result<Vec<FileDescriptor>> {
        if !self.base.is_dir() {
            return Err(SnapError::BasePathMissing(self.base.clone()));
        }

        let candidates = match strategy {
            WalkStrategy::Sequential => self.walk_sequential(cancel)?,
            WalkStrategy::Parallel => self.walk_parallel(cancel)?,
        };
        debug!(candidates = candidates.len(), ?strategy, "walk finished");
        Ok(self.finalize(candidates))
    }

    fn walk_sequential(&self, cancel: &CancelToken) -> Result<Vec<FileDescriptor>> {
        let mut out = Vec::new();
        let visited = Mutex::new(HashSet::new());
        let window = self.max_file_count.map(CountWindow::new);
        let mut stack = vec![DirUnit {
            dir: self.base.clone(),
            depth: 0,
            chain: MatcherChain::root(),
            suppressed: false,
        }];

        while let Some(unit) = stack.pop() {
            cancel.check()?;
            self.process_dir(
                unit,
                &visited,
                window.as_ref(),
                &mut |fd| out.push(fd),
                &mut |child| stack.push(child),
            )?;
        }
        Ok(out)
    }

    fn walk_parallel(&self, cancel: &CancelToken) -> Result<Vec<FileDescriptor>> {
        let visited = Mutex::new(HashSet::new());
        let window = self.max_file_count.map(CountWindow::new);
        let (tx, rx) = unbounded::<FileDescriptor>();
        let seed = DirUnit {
            dir: self.base.clone(),
            depth: 0,
            chain: MatcherChain::root(),
            suppressed: false,
        };

        let errors = Mutex::new(Vec::<SnapError>::new());
        run_pool(self.workers, vec![seed], tx, |unit, enqueue, results| {
            if cancel.is_cancelled() {
                return;
            }
            let outcome = self.process_dir(
                unit,
                &visited,
                window.as_ref(),
                &mut |fd| {
                    let _ = results.send(fd);
                },
                &mut |child| enqueue(child),
            );
            if let Err(err) = outcome {
                errors.lock().unwrap_or_else(|p| p.into_inner()).push(err);
            }
        });

        cancel.check()?;
        let mut errors = errors.into_inner().unwrap_or_else(|p| p.into_inner());
        if let Some(err) = errors.drain(..).next() {
            return Err(err);
        }
        Ok(rx.try_iter().collect())
    }

    /// Process one directory: list entries, emit surviving files, hand
    /// subdirectories back for traversal.
    fn process_dir(
        &self,
        unit: DirUnit,
        visited: &Mutex<HashSet<PathBuf>>,
        window: Option<&CountWindow>,
        emit: &mut dyn FnMut(FileDescriptor),
        recurse: &mut dyn FnMut(DirUnit),
    ) -> Result<()> {
        let DirUnit {
            dir,
            depth,
            chain,
            suppressed,
        } = unit;

        // Revisit suppression keeps symlink cycles finite.
        if self.follow_symlinks {
            let identity = dunce::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
            let mut seen = visited.lock().unwrap_or_else(|p| p.into_inner());
            if !seen.insert(identity) {
                return Ok(());
            }
        }

        let chain = chain.descend(&dir, &self.base, self.respect_ignore_files);

        let mut entries: Vec<fs::DirEntry> = match fs::read_dir(&dir) {
            Ok(iter) => iter.filter_map(|e| e.ok()).collect(),
            Err(err) => {
                warn!(dir = %dir.display(), %err, "skipping unreadable directory");
                return Ok(());
            }
        };
        // Deterministic order for the sequential strategy; harmless for the
        // parallel one, which sorts at the end anyway.
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable entry");
                    continue;
                }
            };
            let is_symlink = file_type.is_symlink();
            if is_symlink && !self.follow_symlinks {
                continue;
            }

            // Resolve through the link when following.
            let metadata = if is_symlink {
                match fs::metadata(&path) {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping dangling symlink");
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping unreadable entry");
                        continue;
                    }
                }
            };

            if metadata.is_dir() {
                // `.git` internals are never part of a snapshot.
                if name == ".git" {
                    continue;
                }
                let child_depth = depth + 1;
                if let Some(max) = self.max_depth
                    && child_depth > max
                {
                    continue;
                }
                let hidden = name.starts_with('.');
                let kept_dir = chain.is_kept(&path, true) || self.force_matches(&path, true);
                if hidden && !self.include_hidden && !kept_dir {
                    continue;
                }
                let excluded = suppressed
                    || chain.is_ignored(&path, true)
                    || self.exclude_matches(&path, true);
                // Excluded directories are still descended: a keep pattern
                // (here or deeper) can force files back in below them.
                recurse(DirUnit {
                    dir: path,
                    depth: child_depth,
                    chain: Arc::clone(&chain),
                    suppressed: excluded && !kept_dir,
                });
                continue;
            }

            if !metadata.is_file() {
                continue;
            }

            let kept = chain.is_kept(&path, false) || self.force_matches(&path, false);
            let hidden = name.starts_with('.');
            if hidden && !self.include_hidden && !kept {
                continue;
            }

            let excluded = suppressed
                || chain.is_ignored(&path, false)
                || self.exclude_matches(&path, false);
            if excluded && !kept {
                continue;
            }

            let Some(rel) = to_rel_utf8(&self.base, &path) else {
                warn!(path = %path.display(), "skipping non-UTF-8 path");
                continue;
            };

            if let Some(include) = &self.include
                && !include.is_match(rel.as_std_path())
                && !kept
            {
                continue;
            }

            // Size floor/ceiling, boundary-inclusive.
            let size = metadata.len();
            if let Some(min) = self.min_file_size
                && size < min
            {
                continue;
            }
            if let Some(max) = self.max_file_size
                && size > max
            {
                continue;
            }

            if let Some(window) = window
                && !window.admit(&rel)
            {
                continue;
            }

            let mut fd = FileDescriptor::new(rel, path, size);
            fd.modified = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            fd.always_include = kept;
            emit(fd);
        }
        Ok(())
    }

    fn force_matches(&self, path: &Path, is_dir: bool) -> bool {
        self.force
            .iter()
            .any(|m| m.matched(path, is_dir).is_ignore())
    }

    fn exclude_matches(&self, path: &Path, _is_dir: bool) -> bool {
        match path.strip_prefix(&self.base) {
            Ok(rel) => self.exclude.is_match(rel),
            Err(_) => false,
        }
    }

    /// Sort by relative path, drop duplicate identities, then apply the
    /// count and total-size ceilings over the ordered stream.
    fn finalize(&self, mut candidates: Vec<FileDescriptor>) -> Vec<FileDescriptor> {
        candidates.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        candidates.dedup_by(|a, b| a.rel_path == b.rel_path);

        let mut out = Vec::with_capacity(candidates.len());
        let mut total: u64 = 0;
        for fd in candidates {
            if let Some(max) = self.max_file_count
                && out.len() >= max
            {
                break;
            }
            if let Some(ceiling) = self.max_total_size
                && total + fd.size > ceiling
            {
                break;
            }
            total += fd.size;
            out.push(fd);
        }
        out
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            SnapError::InvalidArgument(format!("bad glob {pattern:?}: {err}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| SnapError::InvalidArgument(err.to_string()))
}
