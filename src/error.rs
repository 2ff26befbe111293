//! Crate-wide error taxonomy.
//!
//! Caller-input problems (bad path, unknown format) are fatal and reported
//! immediately. Stage failures are recoverable only through the failing
//! stage's own `on_error` hook; anything unrecovered bubbles up with the
//! original error preserved as the source. Cancellation is a distinguished
//! variant and is never reinterpreted as a generic failure.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = SnapError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SnapError {
    /// Base path handed to discovery does not exist or is not a directory.
    #[error("base path does not exist or is not a directory: {0}")]
    BasePathMissing(PathBuf),

    /// Caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output format name is not one of the supported set.
    #[error("unknown output format: {0:?}")]
    UnknownFormat(String),

    /// The operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Secret findings aborted the run (fail-on-secrets mode).
    ///
    /// The payload is sanitized at construction: it carries file, line, and
    /// rule id only. The matched text is never stored, so no Display or
    /// serde output of this variant can leak it.
    #[error("{0}")]
    SecretsDetected(SecretsSummary),

    /// A pipeline stage failed and defined no recovery (or recovery failed).
    #[error("stage {stage:?} failed")]
    Stage {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SnapError {
    /// True for the distinguished cancellation variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SnapError::Cancelled)
    }

    /// Wrap a stage-internal error, keeping it as the source.
    pub fn stage(stage: &'static str, source: anyhow::Error) -> Self {
        // Cancellation must survive stage wrapping untouched.
        match source.downcast::<SnapError>() {
            Ok(SnapError::Cancelled) => SnapError::Cancelled,
            Ok(other) => SnapError::Stage {
                stage,
                source: anyhow::Error::new(other),
            },
            Err(source) => SnapError::Stage { stage, source },
        }
    }
}

/// One secret finding, stripped down to reportable coordinates.
///
/// Deliberately has no field for the matched text; see
/// [`SnapError::SecretsDetected`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SecretsFinding {
    pub file: String,
    pub line: usize,
    pub rule_id: String,
}

/// Aggregate of all findings that triggered a fail-on-secrets abort.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SecretsSummary {
    pub findings: Vec<SecretsFinding>,
}

impl SecretsSummary {
    pub fn file_count(&self) -> usize {
        let mut files: Vec<&str> = self.findings.iter().map(|f| f.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }
}

impl std::fmt::Display for SecretsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "secrets detected: {} finding(s) in {} file(s)",
            self.findings.len(),
            self.file_count()
        )?;
        for finding in &self.findings {
            write!(
                f,
                "\n  {}:{} [{}]",
                finding.file, finding.line, finding.rule_id
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_summary_reports_coordinates_only() {
        let summary = SecretsSummary {
            findings: vec![
                SecretsFinding {
                    file: "src/config.rs".into(),
                    line: 12,
                    rule_id: "aws-access-key".into(),
                },
                SecretsFinding {
                    file: "src/config.rs".into(),
                    line: 40,
                    rule_id: "generic-api-key".into(),
                },
            ],
        };
        assert_eq!(summary.file_count(), 1);

        let err = SnapError::SecretsDetected(summary);
        let text = format!("{err}");
        assert!(text.contains("2 finding(s) in 1 file(s)"));
        assert!(text.contains("aws-access-key"));
    }

    #[test]
    fn stage_wrap_preserves_cancellation() {
        let inner = anyhow::Error::new(SnapError::Cancelled);
        let wrapped = SnapError::stage("loading", inner);
        assert!(wrapped.is_cancelled());
    }
}
