// Secrets guard end to end: redaction through a full run, and the
// guarantee that an abort on findings never carries the matched text in
// any rendering of the error.

use std::fs;

use camino::Utf8Path;
use dirsnap::core::stages::SecretFinding;
use dirsnap::core::{FileContent, FileDescriptor};
use dirsnap::{SecretScanner, SecretsConfig, Snapshot, SnapError, Transformer};
use tempfile::TempDir;

const SECRET: &str = "sk-live-9f8e7d6c5b4a";

/// Flags every occurrence of the fixed token above.
struct TokenScanner;

impl SecretScanner for TokenScanner {
    fn scan(&self, text: &str, _path: &Utf8Path) -> anyhow::Result<Vec<SecretFinding>> {
        let mut findings = Vec::new();
        for (line_no, line) in text.split('\n').enumerate() {
            if let Some(pos) = line.find(SECRET) {
                let col = line[..pos].chars().count() + 1;
                findings.push(SecretFinding {
                    rule_id: "api-key".to_string(),
                    start_line: line_no + 1,
                    end_line: line_no + 1,
                    start_column: col,
                    end_column: col + SECRET.chars().count(),
                });
            }
        }
        Ok(findings)
    }
}

fn fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.rs"),
        format!("const KEY: &str = \"{SECRET}\";\n"),
    )
    .unwrap();
    fs::write(tmp.path().join("clean.rs"), "fn ok() {}\n").unwrap();
    tmp
}

#[test]
fn redaction_is_applied_through_a_full_run() {
    let tmp = fixture();
    let out = Snapshot::new(tmp.path())
        .secrets(Box::new(TokenScanner), SecretsConfig::default())
        .run()
        .unwrap();

    let config = out
        .files
        .iter()
        .find(|f| f.rel_path == "config.rs")
        .unwrap();
    let text = config.text().unwrap();
    assert!(!text.contains(SECRET));
    assert!(text.contains("[REDACTED:api-key]"));
    assert!(config.secrets_redacted);
    assert_eq!(out.stats.secrets.findings.len(), 1);
}

#[test]
fn abort_on_findings_never_leaks_the_secret() {
    let tmp = fixture();
    let config = SecretsConfig {
        fail_on_secrets: true,
        ..Default::default()
    };
    let err = Snapshot::new(tmp.path())
        .secrets(Box::new(TokenScanner), config)
        .run()
        .unwrap_err();

    let SnapError::SecretsDetected(summary) = &err else {
        panic!("expected SecretsDetected, got {err:?}");
    };
    assert_eq!(summary.findings[0].file, "config.rs");
    assert_eq!(summary.findings[0].rule_id, "api-key");

    for rendering in [
        format!("{err}"),
        format!("{err:?}"),
        serde_json::to_string(summary).unwrap(),
    ] {
        assert!(!rendering.contains(SECRET), "leaked in: {rendering}");
    }
}

/// Rewrites every `.rs` file to a summary that happens to quote the token.
struct LeakySummarizer;

impl Transformer for LeakySummarizer {
    fn id(&self) -> &str {
        "summarizer"
    }
    fn applies_to(&self, fd: &FileDescriptor) -> bool {
        fd.extension() == "rs"
    }
    fn transform(&self, _fd: &FileDescriptor) -> anyhow::Result<FileContent> {
        Ok(FileContent::Text(format!("summary includes {SECRET}\n")))
    }
}

#[test]
fn transformer_output_is_scanned_and_redacted() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("clean.rs"), "fn ok() {}\n").unwrap();

    let out = Snapshot::new(tmp.path())
        .transformers(vec![Box::new(LeakySummarizer)])
        .secrets(Box::new(TokenScanner), SecretsConfig::default())
        .run()
        .unwrap();

    let file = &out.files[0];
    assert_eq!(file.transformed_by.as_deref(), Some("summarizer"));
    let text = file.text().unwrap();
    assert!(!text.contains(SECRET));
    assert!(text.contains("[REDACTED:api-key]"));
    assert!(file.secrets_redacted);
}

#[test]
fn transformer_introduced_secret_still_aborts_the_run() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("clean.rs"), "fn ok() {}\n").unwrap();

    let config = SecretsConfig {
        fail_on_secrets: true,
        ..Default::default()
    };
    let err = Snapshot::new(tmp.path())
        .transformers(vec![Box::new(LeakySummarizer)])
        .secrets(Box::new(TokenScanner), config)
        .run()
        .unwrap_err();

    let SnapError::SecretsDetected(summary) = &err else {
        panic!("expected SecretsDetected, got {err:?}");
    };
    assert_eq!(summary.findings[0].file, "clean.rs");
    assert!(!format!("{err:?}").contains(SECRET));
}

#[test]
fn whole_file_exclusion_when_inline_redaction_is_off() {
    let tmp = fixture();
    let config = SecretsConfig {
        inline_redaction: false,
        ..Default::default()
    };
    let out = Snapshot::new(tmp.path())
        .secrets(Box::new(TokenScanner), config)
        .run()
        .unwrap();

    let paths: Vec<&str> = out.files.iter().map(|f| f.rel_path.as_str()).collect();
    assert_eq!(paths, vec!["clean.rs"]);
    assert_eq!(out.stats.excluded_by_secrets, 1);
}
