//! Version-control status collaborator, backed by the `git` subprocess.
//!
//! Consumers depend on the `VcsProvider` trait; tests substitute their own
//! implementation. The git-backed one shells out the same way the rest of
//! the toolchain does, parses porcelain output, and batches per-path status
//! lookups through the bounded worker queue with retry on transient exit
//! codes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::debug;

use crate::infra::workq::{RetryPolicy, retry_with_backoff, run_pool};

/// Paths per `git status` invocation when batching lookups.
const STATUS_BATCH: usize = 200;
/// Concurrent `git` subprocesses for batched lookups.
const STATUS_WORKERS: usize = 4;

/// Branch/commit metadata surfaced to the serializers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VcsMeta {
    pub branch: String,
    pub last_commit: String,
    pub has_uncommitted_changes: bool,
}

/// The status interface the version-control filter stage consumes.
pub trait VcsProvider {
    /// Whether `base` lives inside a working tree.
    fn is_repository(&self, base: &Path) -> bool;

    /// Paths with uncommitted modifications, relative to `base`.
    fn modified_files(&self, base: &Path) -> Result<Vec<String>>;

    /// Paths changed against `reference` (e.g. a branch or commit).
    fn changed_files(&self, base: &Path, reference: &str) -> Result<Vec<String>>;

    /// Per-path status strings for the given relative paths.
    fn file_statuses(&self, base: &Path, paths: &[String]) -> Result<HashMap<String, String>>;

    fn current_branch(&self, base: &Path) -> Result<String>;

    fn last_commit(&self, base: &Path) -> Result<String>;

    fn has_uncommitted_changes(&self, base: &Path) -> Result<bool>;

    /// Convenience bundle for serializer metadata.
    fn meta(&self, base: &Path) -> Result<VcsMeta> {
        Ok(VcsMeta {
            branch: self.current_branch(base)?,
            last_commit: self.last_commit(base)?,
            has_uncommitted_changes: self.has_uncommitted_changes(base)?,
        })
    }
}

/// `git`-subprocess-backed provider.
#[derive(Debug, Default)]
pub struct GitVcs {
    retry: RetryPolicy,
}

impl GitVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_git(&self, base: &Path, args: &[&str]) -> Result<String> {
        retry_with_backoff(self.retry, is_transient, || self.run_git_once(base, args))
    }

    fn run_git_once(&self, base: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(base)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn git {args:?}"))?;

        if !output.status.success() {
            return Err(anyhow!(
                "git {:?} exited with {}: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Index/worktree lock contention is worth a retry; everything else is not.
fn is_transient(err: &anyhow::Error) -> bool {
    let text = err.to_string();
    text.contains("index.lock") || text.contains("could not lock")
}

impl VcsProvider for GitVcs {
    fn is_repository(&self, base: &Path) -> bool {
        self.run_git_once(base, &["rev-parse", "--is-inside-work-tree"])
            .map(|out| out.trim() == "true")
            .unwrap_or(false)
    }

    fn modified_files(&self, base: &Path) -> Result<Vec<String>> {
        let out = self.run_git(base, &["status", "--porcelain"])?;
        Ok(parse_porcelain(&out).into_iter().map(|(path, _)| path).collect())
    }

    fn changed_files(&self, base: &Path, reference: &str) -> Result<Vec<String>> {
        let out = self.run_git(base, &["diff", "--name-only", reference])?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    fn file_statuses(&self, base: &Path, paths: &[String]) -> Result<HashMap<String, String>> {
        // Batch lookups through the worker pool; each unit is one chunk of
        // paths handed to a single `git status` invocation.
        let chunks: Vec<Vec<String>> = paths
            .chunks(STATUS_BATCH)
            .map(|c| c.to_vec())
            .collect();
        let (tx, rx) = unbounded::<Result<Vec<(String, String)>>>();

        let base = base.to_path_buf();
        let this = &*self;
        run_pool(STATUS_WORKERS, chunks, tx, |chunk, _enqueue, results| {
            let batch = this.status_batch(&base, &chunk);
            let _ = results.send(batch);
        });

        let mut statuses = HashMap::new();
        for batch in rx.try_iter() {
            for (path, status) in batch? {
                statuses.insert(path, status);
            }
        }
        Ok(statuses)
    }

    fn current_branch(&self, base: &Path) -> Result<String> {
        Ok(self
            .run_git(base, &["rev-parse", "--abbrev-ref", "HEAD"])?
            .trim()
            .to_string())
    }

    fn last_commit(&self, base: &Path) -> Result<String> {
        Ok(self
            .run_git(base, &["log", "-1", "--format=%H %s"])?
            .trim()
            .to_string())
    }

    fn has_uncommitted_changes(&self, base: &Path) -> Result<bool> {
        Ok(!self.run_git(base, &["status", "--porcelain"])?.trim().is_empty())
    }
}

impl GitVcs {
    fn status_batch(&self, base: &Path, chunk: &[String]) -> Result<Vec<(String, String)>> {
        let mut args = vec!["status", "--porcelain", "--"];
        args.extend(chunk.iter().map(String::as_str));
        let out = self.run_git(base, &args)?;
        debug!(paths = chunk.len(), "status batch resolved");
        Ok(parse_porcelain(&out))
    }
}

/// Parse `git status --porcelain` lines into (path, status-word) pairs.
fn parse_porcelain(out: &str) -> Vec<(String, String)> {
    out.lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let code = &line[..2];
            let path = line[3..].trim();
            // Renames are reported as "old -> new"; keep the new path.
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            (path.to_string(), status_word(code).to_string())
        })
        .collect()
}

fn status_word(code: &str) -> &'static str {
    match code.trim() {
        "M" | "MM" | "AM" => "modified",
        "A" => "added",
        "D" => "deleted",
        "R" => "renamed",
        "C" => "copied",
        "??" => "untracked",
        "UU" => "conflicted",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_parsing() {
        let out = " M src/lib.rs\n?? notes.txt\nR  old.rs -> new.rs\n";
        let parsed = parse_porcelain(out);
        assert_eq!(
            parsed,
            vec![
                ("src/lib.rs".to_string(), "modified".to_string()),
                ("notes.txt".to_string(), "untracked".to_string()),
                ("new.rs".to_string(), "renamed".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_codes_fall_back() {
        assert_eq!(status_word("XY"), "unknown");
        assert_eq!(status_word("??"), "untracked");
    }
}
