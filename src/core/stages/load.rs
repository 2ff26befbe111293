//! Loading stage: attach content to the surviving descriptors.
//!
//! Reads bytes in parallel, classifies binary vs text (BOM probe + NUL
//! heuristic), decodes UTF-16 variants, normalizes line endings to `\n`,
//! and truncates at the per-file content ceiling. Structure-only matches
//! (lock files and friends) skip I/O entirely and carry a fixed
//! placeholder, marked binary.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::context::PipelineContext;
use crate::core::file::{FileContent, FileDescriptor, TextEncoding};
use crate::core::pipeline::Stage;
use crate::core::stages::filters::platform_case_insensitive;
use crate::error::{Result, SnapError};
use crate::infra::detect;

/// Placeholder carried by structure-only files instead of their content.
pub const STRUCTURE_ONLY_PLACEHOLDER: &str = "[structure only: content omitted]";

/// Settings key for extra structure-only patterns.
const STRUCTURE_ONLY_KEY: &str = "load.structure_only";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Per-file content ceiling in bytes; larger files are truncated with
    /// `truncated = true` and `original_length` recorded.
    pub max_content_bytes: usize,

    /// Globs whose matches bypass loading and get the placeholder.
    pub structure_only: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 1024 * 1024,
            structure_only: vec![
                "**/Cargo.lock".to_string(),
                "**/package-lock.json".to_string(),
                "**/yarn.lock".to_string(),
                "**/pnpm-lock.yaml".to_string(),
                "**/poetry.lock".to_string(),
                "**/Gemfile.lock".to_string(),
            ],
        }
    }
}

pub struct LoadStage {
    config: LoadConfig,
    structure_only: Option<GlobSet>,
}

impl LoadStage {
    pub fn new(config: LoadConfig) -> Self {
        Self {
            config,
            structure_only: None,
        }
    }
}

impl Default for LoadStage {
    fn default() -> Self {
        Self::new(LoadConfig::default())
    }
}

impl Stage for LoadStage {
    fn name(&self) -> &'static str {
        "loading"
    }

    fn on_init(&mut self, ctx: &PipelineContext) -> anyhow::Result<()> {
        // The configuration instance may add patterns for this run.
        let mut patterns = self.config.structure_only.clone();
        patterns.extend(ctx.settings.get_or::<Vec<String>>(STRUCTURE_ONLY_KEY, Vec::new()));

        if patterns.is_empty() {
            return Ok(());
        }
        // Case-sensitive except on conventionally case-insensitive hosts.
        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(
                GlobBuilder::new(pattern)
                    .case_insensitive(platform_case_insensitive())
                    .build()?,
            );
        }
        self.structure_only = Some(builder.build()?);
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let cancel = ctx.cancel.clone();
        let max_bytes = self.config.max_content_bytes;
        let structure_only = self.structure_only.as_ref();

        ctx.files
            .par_iter_mut()
            .try_for_each(|fd| -> Result<()> {
                cancel.check()?;
                if let Some(matcher) = structure_only
                    && (matcher.is_match(fd.rel_path.as_std_path())
                        || matcher.is_match(fd.name()))
                {
                    fd.content = Some(FileContent::Text(STRUCTURE_ONLY_PLACEHOLDER.to_string()));
                    fd.binary = true;
                    fd.encoding = TextEncoding::Binary;
                    return Ok(());
                }
                load_one(fd, max_bytes);
                Ok(())
            })
            .map_err(|err| match err {
                SnapError::Cancelled => SnapError::Cancelled,
                other => SnapError::stage("loading", anyhow::Error::new(other)),
            })?;

        ctx.stats.binary_files = ctx.files.iter().filter(|f| f.binary).count();
        ctx.stats.truncated_files = ctx.files.iter().filter(|f| f.truncated).count();
        debug!(
            binary = ctx.stats.binary_files,
            truncated = ctx.stats.truncated_files,
            "loading complete"
        );
        Ok(ctx)
    }
}

/// Read, classify, decode, normalize, truncate. Unreadable files keep an
/// empty content and a warning in the log; they stay in the snapshot as
/// structure.
fn load_one(fd: &mut FileDescriptor, max_bytes: usize) {
    let bytes = match std::fs::read(&fd.abs_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %fd.rel_path, %err, "unreadable file kept without content");
            return;
        }
    };

    let encoding = detect::detect_encoding(&bytes);
    let original_len = bytes.len() as u64;

    if encoding == TextEncoding::Binary {
        fd.binary = true;
        fd.encoding = TextEncoding::Binary;
        if bytes.len() > max_bytes {
            fd.truncated = true;
            fd.original_length = Some(original_len);
            fd.content = Some(FileContent::Binary(bytes[..max_bytes].to_vec()));
        } else {
            fd.content = Some(FileContent::Binary(bytes));
        }
        return;
    }

    let Some(text) = detect::decode(&bytes, encoding) else {
        // Declared text by the probe but undecodable; treat as binary.
        fd.binary = true;
        fd.encoding = TextEncoding::Binary;
        let end = bytes.len().min(max_bytes);
        fd.truncated = end < bytes.len();
        if fd.truncated {
            fd.original_length = Some(original_len);
        }
        fd.content = Some(FileContent::Binary(bytes[..end].to_vec()));
        return;
    };

    let text = detect::normalize_newlines(&text);
    fd.encoding = encoding;

    let truncated = detect::truncate_on_boundary(&text, max_bytes);
    if truncated.len() < text.len() {
        fd.truncated = true;
        fd.original_length = Some(original_len);
        fd.content = Some(FileContent::Text(truncated.to_string()));
    } else {
        fd.content = Some(FileContent::Text(text));
    }
}

/// Lazy per-file loading for the streaming output path: descriptors are
/// loaded one at a time as the iterator is pulled, so only a bounded number
/// of contents are alive at once.
pub struct LazyLoader<I> {
    inner: I,
    max_bytes: usize,
}

impl<I> LazyLoader<I> {
    pub fn new(inner: I, max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for LazyLoader<I> {
    type Item = FileDescriptor;

    fn next(&mut self) -> Option<FileDescriptor> {
        let mut fd = self.inner.next()?;
        if fd.content.is_none() {
            load_one(&mut fd, self.max_bytes);
        }
        Some(fd)
    }
}
