//! Filtering profile: the merged policy for one discovery run.
//!
//! Built once per operation from three precedence layers (highest first):
//! explicit caller overrides, a directory-local `dirsnap.toml`, and built-in
//! defaults. Environment variables with a `DIRSNAP_` prefix slot in between
//! the file and the defaults. Immutable once built.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the per-directory profile document.
pub const PROFILE_FILE: &str = "dirsnap.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Globs a file must match to be considered at all (empty = everything).
    pub include: Vec<String>,

    /// Globs that exclude files during discovery and profile filtering.
    pub exclude: Vec<String>,

    /// Globs applied by the profile-filter stage (empty = no constraint).
    pub filter: Vec<String>,

    /// Globs force-included even when matched by an exclusion rule.
    pub force_include: Vec<String>,

    /// Walk and ceiling options.
    pub options: ProfileOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    /// Read `.snapignore` / `.gitignore` files during the walk.
    pub respect_ignore_files: bool,

    /// Include dotfiles and dot-directories.
    pub include_hidden: bool,

    /// Follow symbolic links (with inode-based cycle suppression).
    pub follow_symlinks: bool,

    /// Maximum directory depth, inclusive; `None` = unbounded. Depth 0 is
    /// the base directory itself, so `max_depth = 0` yields root-level files.
    pub max_depth: Option<usize>,

    /// Per-file size floor in bytes, boundary-inclusive.
    pub min_file_size: Option<u64>,

    /// Per-file size ceiling in bytes, boundary-inclusive.
    pub max_file_size: Option<u64>,

    /// Running total-size ceiling across the sorted candidate stream.
    pub max_total_size: Option<u64>,

    /// Maximum number of files yielded.
    pub max_file_count: Option<usize>,

    /// Worker count for the bounded-concurrency walker (0 = one per CPU).
    pub workers: usize,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            respect_ignore_files: true,
            include_hidden: false,
            follow_symlinks: false,
            max_depth: None,
            min_file_size: None,
            max_file_size: None,
            max_total_size: None,
            max_file_count: None,
            workers: 0,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: vec![
                "target/**".to_string(),
                "node_modules/**".to_string(),
                "dist/**".to_string(),
                "build/**".to_string(),
                ".git/**".to_string(),
                "**/*.pyc".to_string(),
                "**/__pycache__/**".to_string(),
                "**/.DS_Store".to_string(),
                "**/Thumbs.db".to_string(),
            ],
            filter: Vec::new(),
            force_include: Vec::new(),
            options: ProfileOptions::default(),
        }
    }
}

/// Caller-supplied layer; every field optional, `Some` wins over the file
/// and the defaults.
#[derive(Debug, Clone, Default)]
pub struct ProfileOverrides {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub filter: Option<Vec<String>>,
    pub force_include: Option<Vec<String>>,
    pub respect_ignore_files: Option<bool>,
    pub include_hidden: Option<bool>,
    pub follow_symlinks: Option<bool>,
    pub max_depth: Option<Option<usize>>,
    pub min_file_size: Option<Option<u64>>,
    pub max_file_size: Option<Option<u64>>,
    pub max_total_size: Option<Option<u64>>,
    pub max_file_count: Option<Option<usize>>,
    pub workers: Option<usize>,
}

impl Profile {
    /// Resolve the profile for `base`: defaults, then `dirsnap.toml` found in
    /// `base` (if any), then `DIRSNAP_*` environment, then caller overrides.
    pub fn resolve(base: &Path, overrides: &ProfileOverrides) -> Result<Self> {
        let file = base.join(PROFILE_FILE);
        let loaded = if file.is_file() {
            Self::load_file(&file)?
        } else {
            Self::load_layers(None)?
        };
        Ok(loaded.apply_overrides(overrides))
    }

    /// Load a profile document explicitly by path (bypasses discovery by
    /// name), then apply environment overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load_layers(Some(path))
    }

    fn load_layers(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder =
                builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        // Environment layer, e.g. DIRSNAP_OPTIONS__INCLUDE_HIDDEN=true
        builder =
            builder.add_source(config::Environment::with_prefix("DIRSNAP").separator("__"));

        let cfg = builder.build().context("failed to load profile layers")?;

        // Deserialize over serde defaults so absent keys fall back cleanly.
        let parsed: Profile = cfg
            .try_deserialize()
            .context("failed to parse profile document")?;
        Ok(parsed)
    }

    fn apply_overrides(mut self, o: &ProfileOverrides) -> Self {
        if let Some(v) = &o.include {
            self.include = v.clone();
        }
        if let Some(v) = &o.exclude {
            self.exclude = v.clone();
        }
        if let Some(v) = &o.filter {
            self.filter = v.clone();
        }
        if let Some(v) = &o.force_include {
            self.force_include = v.clone();
        }
        if let Some(v) = o.respect_ignore_files {
            self.options.respect_ignore_files = v;
        }
        if let Some(v) = o.include_hidden {
            self.options.include_hidden = v;
        }
        if let Some(v) = o.follow_symlinks {
            self.options.follow_symlinks = v;
        }
        if let Some(v) = o.max_depth {
            self.options.max_depth = v;
        }
        if let Some(v) = o.min_file_size {
            self.options.min_file_size = v;
        }
        if let Some(v) = o.max_file_size {
            self.options.max_file_size = v;
        }
        if let Some(v) = o.max_total_size {
            self.options.max_total_size = v;
        }
        if let Some(v) = o.max_file_count {
            self.options.max_file_count = v;
        }
        if let Some(v) = o.workers {
            self.options.workers = v;
        }
        self
    }

    /// Effective worker count for the parallel walker.
    pub fn worker_count(&self) -> usize {
        if self.options.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.options.workers
        }
    }
}
