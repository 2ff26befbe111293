//! File descriptor: the unit of work threaded through the pipeline.
//!
//! Created without content by discovery, mutated in place by each downstream
//! stage (content attached, flags set, or dropped from the collection), then
//! read-only input to the serializers.

use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Detected text encoding of a loaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    /// Not text at all; content, if kept, is raw bytes.
    Binary,
}

impl TextEncoding {
    pub fn as_str(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Utf8Bom => "utf-8-bom",
            TextEncoding::Utf16Le => "utf-16le",
            TextEncoding::Utf16Be => "utf-16be",
            TextEncoding::Binary => "binary",
        }
    }
}

/// In-memory content attached by the loading stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Decoded, newline-normalized text.
    Text(String),
    /// Raw bytes of a binary file (base64-encoded at render time).
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn len(&self) -> usize {
        match self {
            FileContent::Text(s) => s.len(),
            FileContent::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(s) => Some(s),
            FileContent::Binary(_) => None,
        }
    }
}

/// One discovered file, identified by its POSIX-style relative path.
///
/// The relative path is unique within one operation. Once a descriptor is
/// filtered out of the working set, no stage reintroduces it; the
/// `always_include` flag is the only override filters must honor.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    /// Relative path from the base, always forward-slash separated.
    pub rel_path: Utf8PathBuf,
    /// Absolute filesystem path.
    pub abs_path: PathBuf,
    /// Size in bytes as reported by metadata at discovery time.
    pub size: u64,
    /// Modification time, when the platform reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Binary classification from the loading stage.
    pub binary: bool,
    /// Detected encoding; `Utf8` until loading runs.
    pub encoding: TextEncoding,
    /// Content attached by the loading stage; `None` until then, and `None`
    /// forever for structure-only matches rendered via placeholder.
    pub content: Option<FileContent>,
    /// Per-path status string from the version-control stage.
    pub vcs_status: Option<String>,
    /// Force-include marker; filters must keep this file unconditionally.
    pub always_include: bool,
    /// Content was cut at the per-file ceiling.
    pub truncated: bool,
    /// Pre-truncation length in bytes, when `truncated` is set.
    pub original_length: Option<u64>,
    /// At least one secret span was redacted in place.
    pub secrets_redacted: bool,
    /// Identifier of the transformer that last rewrote the content.
    pub transformed_by: Option<String>,
}

impl FileDescriptor {
    pub fn new(rel_path: Utf8PathBuf, abs_path: PathBuf, size: u64) -> Self {
        Self {
            rel_path,
            abs_path,
            size,
            modified: None,
            binary: false,
            encoding: TextEncoding::Utf8,
            content: None,
            vcs_status: None,
            always_include: false,
            truncated: false,
            original_length: None,
            secrets_redacted: false,
            transformed_by: None,
        }
    }

    /// File name component of the relative path.
    pub fn name(&self) -> &str {
        self.rel_path.file_name().unwrap_or(self.rel_path.as_str())
    }

    /// Extension, lowercased, empty when absent.
    pub fn extension(&self) -> String {
        self.rel_path
            .extension()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Number of directory components above the file.
    pub fn depth(&self) -> usize {
        self.rel_path.components().count().saturating_sub(1)
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(FileContent::as_text)
    }
}

/// Convert a filesystem-relative path into the POSIX form used as identity.
pub fn to_rel_utf8(base: &Path, abs: &Path) -> Option<Utf8PathBuf> {
    let rel = abs.strip_prefix(base).ok()?;
    let utf8 = Utf8Path::from_path(rel)?;
    // Normalize separators on platforms that use backslashes.
    if utf8.as_str().contains('\\') {
        Some(Utf8PathBuf::from(utf8.as_str().replace('\\', "/")))
    } else {
        Some(utf8.to_path_buf())
    }
}
