//! Secrets guard stage.
//!
//! Text content is handed to an external detection engine; per finding the
//! span is redacted in place, or (with inline redaction disabled) the whole
//! file is dropped and counted as excluded. In fail-on-secrets mode any
//! finding aborts the run with a sanitized error: the matched text is never
//! stored, so it cannot appear in any message or serialized form.

use camino::Utf8Path;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::context::PipelineContext;
use crate::core::file::FileContent;
use crate::core::pipeline::Stage;
use crate::error::{Result, SecretsFinding, SecretsSummary, SnapError};

/// One finding reported by the detection engine. Spans are 1-based;
/// `end_column` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretFinding {
    pub rule_id: String,
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

/// External secret-detection engine. Availability is probed once at init;
/// an unavailable engine disables the stage for the run.
pub trait SecretScanner: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn scan(&self, text: &str, path: &Utf8Path) -> anyhow::Result<Vec<SecretFinding>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Redact spans in place; when false, any finding drops the whole file.
    pub inline_redaction: bool,

    /// Use `[REDACTED:<rule>]` placeholders instead of the generic token.
    pub typed_placeholders: bool,

    /// Abort the run on any finding.
    pub fail_on_secrets: bool,

    /// Files above this size are not scanned.
    pub max_scan_bytes: usize,

    /// Caller allow-list; matching paths are never scanned.
    pub allow: Vec<String>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            inline_redaction: true,
            typed_placeholders: true,
            fail_on_secrets: false,
            max_scan_bytes: 1024 * 1024,
            allow: Vec::new(),
        }
    }
}

/// Well-known secret-bearing filenames, skipped by the scanner on the
/// assumption the caller excludes them outright.
const SKIP_PATTERNS: &[&str] = &[
    "**/.env",
    "**/.env.*",
    "**/*.pem",
    "**/*.key",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/*.p12",
    "**/*.pfx",
    "**/credentials",
    "**/credentials.*",
    "**/.netrc",
];

pub struct SecretsStage {
    scanner: Box<dyn SecretScanner>,
    config: SecretsConfig,
    skip: Option<GlobSet>,
    allow: Option<GlobSet>,
    enabled: bool,
}

impl SecretsStage {
    pub fn new(scanner: Box<dyn SecretScanner>, config: SecretsConfig) -> Self {
        Self {
            scanner,
            config,
            skip: None,
            allow: None,
            enabled: true,
        }
    }

    fn is_skipped(&self, path: &Utf8Path) -> bool {
        let std_path = path.as_std_path();
        if let Some(skip) = &self.skip
            && skip.is_match(std_path)
        {
            return true;
        }
        if let Some(allow) = &self.allow
            && allow.is_match(std_path)
        {
            return true;
        }
        false
    }
}

fn build_set(patterns: impl IntoIterator<Item = String>) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(&pattern)?);
    }
    Ok(builder.build()?)
}

impl Stage for SecretsStage {
    fn name(&self) -> &'static str {
        "secrets-guard"
    }

    fn on_init(&mut self, _ctx: &PipelineContext) -> anyhow::Result<()> {
        // Probe once; a missing engine disables the stage, it does not
        // fail the run.
        self.enabled = self.scanner.is_available();
        if !self.enabled {
            warn!("secret-detection engine unavailable; stage disabled");
            return Ok(());
        }
        self.skip = Some(build_set(SKIP_PATTERNS.iter().map(|s| s.to_string()))?);
        if !self.config.allow.is_empty() {
            self.allow = Some(build_set(self.config.allow.iter().cloned())?);
        }
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        if !self.enabled {
            return Ok(ctx);
        }

        let mut summary = SecretsSummary::default();
        let mut dropped: Vec<usize> = Vec::new();

        for (index, fd) in ctx.files.iter_mut().enumerate() {
            ctx.cancel.check()?;
            if fd.binary || fd.size as usize > self.config.max_scan_bytes {
                continue;
            }
            if self.is_skipped(&fd.rel_path) {
                debug!(path = %fd.rel_path, "path skipped by secrets policy");
                continue;
            }
            let Some(text) = fd.text() else {
                continue;
            };

            let findings = self
                .scanner
                .scan(text, &fd.rel_path)
                .map_err(|err| SnapError::stage("secrets-guard", err))?;
            if findings.is_empty() {
                continue;
            }

            for finding in &findings {
                summary.findings.push(SecretsFinding {
                    file: fd.rel_path.to_string(),
                    line: finding.start_line,
                    rule_id: finding.rule_id.clone(),
                });
            }

            if self.config.fail_on_secrets {
                // Keep collecting so the abort reports every affected file.
                continue;
            }

            if self.config.inline_redaction {
                let redacted =
                    redact(text, &findings, self.config.typed_placeholders);
                fd.content = Some(FileContent::Text(redacted));
                fd.secrets_redacted = true;
            } else {
                dropped.push(index);
            }
        }

        if self.config.fail_on_secrets && !summary.findings.is_empty() {
            info!(findings = summary.findings.len(), "aborting on detected secrets");
            return Err(SnapError::SecretsDetected(summary));
        }

        if !dropped.is_empty() {
            let mut keep_index = 0_usize;
            let dropped_set: std::collections::HashSet<usize> = dropped.iter().copied().collect();
            ctx.files.retain(|_| {
                let keep = !dropped_set.contains(&keep_index);
                keep_index += 1;
                keep
            });
            ctx.stats.excluded_by_secrets += dropped_set.len();
        }

        ctx.stats.secrets = summary;
        Ok(ctx)
    }
}

/// Replace each finding's span with a placeholder. Findings are applied
/// bottom-up so earlier replacements do not shift later coordinates.
fn redact(text: &str, findings: &[SecretFinding], typed: bool) -> String {
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();

    let mut ordered: Vec<&SecretFinding> = findings.iter().collect();
    ordered.sort_by(|a, b| {
        (b.start_line, b.start_column).cmp(&(a.start_line, a.start_column))
    });

    for finding in ordered {
        let placeholder = if typed {
            format!("[REDACTED:{}]", finding.rule_id)
        } else {
            "[REDACTED]".to_string()
        };

        let first = finding.start_line.saturating_sub(1);
        let last = finding.end_line.saturating_sub(1).min(lines.len().saturating_sub(1));
        if first >= lines.len() {
            continue;
        }

        if first == last {
            let line = &lines[first];
            let start = byte_index(line, finding.start_column.saturating_sub(1));
            let end = byte_index(line, finding.end_column.saturating_sub(1)).max(start);
            lines[first] = format!("{}{}{}", &line[..start], placeholder, &line[end..]);
        } else {
            // Multi-line span: collapse to head + placeholder + tail.
            let head = {
                let line = &lines[first];
                line[..byte_index(line, finding.start_column.saturating_sub(1))].to_string()
            };
            let tail = {
                let line = &lines[last];
                line[byte_index(line, finding.end_column.saturating_sub(1))..].to_string()
            };
            lines.splice(first..=last, [format!("{head}{placeholder}{tail}")]);
        }
    }
    lines.join("\n")
}

/// Byte offset of the given char position, clamped to the line length.
fn byte_index(line: &str, char_pos: usize) -> usize {
    line.char_indices()
        .nth(char_pos)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::core::file::FileDescriptor;
    use crate::core::profile::Profile;
    use crate::infra::config::Settings;

    /// Flags every occurrence of `hunter2` as a finding.
    struct FixedScanner;

    impl SecretScanner for FixedScanner {
        fn scan(&self, text: &str, _path: &Utf8Path) -> anyhow::Result<Vec<SecretFinding>> {
            let mut findings = Vec::new();
            for (line_no, line) in text.split('\n').enumerate() {
                if let Some(pos) = line.find("hunter2") {
                    let col = line[..pos].chars().count() + 1;
                    findings.push(SecretFinding {
                        rule_id: "password-in-code".to_string(),
                        start_line: line_no + 1,
                        end_line: line_no + 1,
                        start_column: col,
                        end_column: col + "hunter2".chars().count(),
                    });
                }
            }
            Ok(findings)
        }
    }

    struct OfflineScanner;

    impl SecretScanner for OfflineScanner {
        fn is_available(&self) -> bool {
            false
        }
        fn scan(&self, _text: &str, _path: &Utf8Path) -> anyhow::Result<Vec<SecretFinding>> {
            anyhow::bail!("should never be called")
        }
    }

    fn ctx_with(files: Vec<FileDescriptor>) -> PipelineContext {
        let mut ctx =
            PipelineContext::new(PathBuf::from("."), Profile::default(), Settings::new());
        ctx.files = files;
        ctx
    }

    fn text_fd(rel: &str, text: &str) -> FileDescriptor {
        let mut fd =
            FileDescriptor::new(Utf8PathBuf::from(rel), PathBuf::from(rel), text.len() as u64);
        fd.content = Some(FileContent::Text(text.to_string()));
        fd
    }

    #[test]
    fn inline_redaction_replaces_span_only() {
        let mut stage = SecretsStage::new(Box::new(FixedScanner), SecretsConfig::default());
        let ctx = ctx_with(vec![text_fd("cfg.rs", "let pw = \"hunter2\";\nok line")]);
        stage.on_init(&ctx).unwrap();
        let ctx = stage.process(ctx).unwrap();

        let text = ctx.files[0].text().unwrap();
        assert_eq!(text, "let pw = \"[REDACTED:password-in-code]\";\nok line");
        assert!(ctx.files[0].secrets_redacted);
        assert_eq!(ctx.stats.secrets.findings.len(), 1);
    }

    #[test]
    fn disabled_inline_redaction_drops_the_whole_file() {
        let config = SecretsConfig {
            inline_redaction: false,
            ..Default::default()
        };
        let mut stage = SecretsStage::new(Box::new(FixedScanner), config);
        let ctx = ctx_with(vec![
            text_fd("clean.rs", "nothing here"),
            text_fd("leaky.rs", "token = hunter2"),
        ]);
        stage.on_init(&ctx).unwrap();
        let ctx = stage.process(ctx).unwrap();

        let paths: Vec<&str> = ctx.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(paths, vec!["clean.rs"]);
        assert_eq!(ctx.stats.excluded_by_secrets, 1);
    }

    #[test]
    fn fail_on_secrets_never_leaks_the_match() {
        let config = SecretsConfig {
            fail_on_secrets: true,
            ..Default::default()
        };
        let mut stage = SecretsStage::new(Box::new(FixedScanner), config);
        let ctx = ctx_with(vec![text_fd("leaky.rs", "password = \"hunter2\"")]);
        stage.on_init(&ctx).unwrap();
        let err = stage.process(ctx).unwrap_err();

        let SnapError::SecretsDetected(summary) = &err else {
            panic!("expected SecretsDetected, got {err:?}");
        };
        assert_eq!(summary.findings.len(), 1);
        assert_eq!(summary.findings[0].rule_id, "password-in-code");

        // The literal secret must not appear in any rendering of the error.
        let display = format!("{err}");
        let debug = format!("{err:?}");
        let json = serde_json::to_string(summary).unwrap();
        assert!(!display.contains("hunter2"));
        assert!(!debug.contains("hunter2"));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn well_known_secret_files_are_not_scanned() {
        let mut stage = SecretsStage::new(Box::new(FixedScanner), SecretsConfig::default());
        let ctx = ctx_with(vec![text_fd(".env", "PASSWORD=hunter2")]);
        stage.on_init(&ctx).unwrap();
        let ctx = stage.process(ctx).unwrap();
        // Untouched: skipped paths are never scanned or redacted.
        assert_eq!(ctx.files[0].text(), Some("PASSWORD=hunter2"));
        assert!(!ctx.files[0].secrets_redacted);
    }

    #[test]
    fn unavailable_engine_disables_the_stage() {
        let mut stage = SecretsStage::new(Box::new(OfflineScanner), SecretsConfig::default());
        let ctx = ctx_with(vec![text_fd("a.rs", "hunter2")]);
        stage.on_init(&ctx).unwrap();
        let ctx = stage.process(ctx).unwrap();
        assert_eq!(ctx.files[0].text(), Some("hunter2"));
    }
}
