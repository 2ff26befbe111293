//! Output serializers.
//!
//! Every format renders the same inputs: an ordered descriptor list plus a
//! `RenderMeta` header block. XML, JSON, Markdown, and NDJSON are streaming
//! formats: they emit an ordered sequence of chunks whose concatenation IS
//! the buffered output (the buffered entry point just collects the stream).
//! Tree and SARIF need the whole list and only render buffered.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::file::FileDescriptor;
use crate::core::run::SnapshotOutput;
use crate::error::{Result, SnapError};
use crate::infra::git::VcsMeta;

pub mod json;
pub mod markdown;
pub mod ndjson;
pub mod sarif;
pub mod tree;
pub mod xml;

/// Supported serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Xml,
    Json,
    Markdown,
    Tree,
    Ndjson,
    Sarif,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Xml => "xml",
            OutputFormat::Json => "json",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Tree => "tree",
            OutputFormat::Ndjson => "ndjson",
            OutputFormat::Sarif => "sarif",
        }
    }

    /// Whether the format has a chunked variant.
    pub fn supports_streaming(self) -> bool {
        !matches!(self, OutputFormat::Tree | OutputFormat::Sarif)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xml" => Ok(OutputFormat::Xml),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "tree" => Ok(OutputFormat::Tree),
            "ndjson" | "jsonl" => Ok(OutputFormat::Ndjson),
            "sarif" => Ok(OutputFormat::Sarif),
            other => Err(SnapError::UnknownFormat(other.to_string())),
        }
    }
}

/// How binary file content is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryPolicy {
    /// A short `[binary file: N bytes]` placeholder.
    #[default]
    Placeholder,
    /// Inline base64 of the (possibly truncated) bytes.
    Base64,
    /// The file entry stays, its content is replaced by an exclusion note.
    ExcludeComment,
}

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Human-oriented indentation where the format has a compact form.
    pub pretty: bool,
    /// Annotate tree entries with on-disk sizes.
    pub show_sizes: bool,
    /// Prefix content lines with 1-based line numbers (Markdown only).
    pub line_numbers: bool,
    pub binary: BinaryPolicy,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            pretty: true,
            show_sizes: false,
            line_numbers: false,
            binary: BinaryPolicy::default(),
        }
    }
}

/// Header block shared by every format.
#[derive(Debug, Clone)]
pub struct RenderMeta {
    /// Base directory, display form.
    pub base: String,
    pub generated_at: DateTime<Utc>,
    pub instructions: Option<String>,
    pub vcs: Option<VcsMeta>,
    pub file_count: usize,
    pub total_size: u64,
}

impl RenderMeta {
    pub fn from_output(out: &SnapshotOutput) -> Self {
        Self {
            base: out.base.display().to_string(),
            generated_at: Utc::now(),
            instructions: out.instructions.clone(),
            vcs: out.vcs.clone(),
            file_count: out.files.len(),
            total_size: out.files.iter().map(|f| f.size).sum(),
        }
    }

    /// Pin the timestamp; with it pinned, rendering is fully deterministic.
    pub fn pinned(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    pub(crate) fn timestamp(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// Buffered rendering. Streaming formats collect their own chunk stream, so
/// both paths produce identical bytes by construction.
pub fn render(
    format: OutputFormat,
    files: &[FileDescriptor],
    meta: &RenderMeta,
    options: &RenderOptions,
) -> Result<String> {
    match format {
        OutputFormat::Xml => Ok(xml::stream(files.to_vec().into_iter(), meta, options).collect()),
        OutputFormat::Json => Ok(json::stream(files.to_vec().into_iter(), meta, options).collect()),
        OutputFormat::Markdown => {
            Ok(markdown::stream(files.to_vec().into_iter(), meta, options).collect())
        }
        OutputFormat::Ndjson => {
            Ok(ndjson::stream(files.to_vec().into_iter(), meta, options).collect())
        }
        OutputFormat::Tree => Ok(tree::render(files, options)),
        OutputFormat::Sarif => sarif::render(files, meta, options),
    }
}

/// Chunked rendering for the streaming formats; `Tree` and `Sarif` refuse.
pub fn render_stream<I>(
    format: OutputFormat,
    files: I,
    meta: &RenderMeta,
    options: &RenderOptions,
) -> Result<Box<dyn Iterator<Item = String>>>
where
    I: Iterator<Item = FileDescriptor> + 'static,
{
    match format {
        OutputFormat::Xml => Ok(Box::new(xml::stream(files, meta, options))),
        OutputFormat::Json => Ok(Box::new(json::stream(files, meta, options))),
        OutputFormat::Markdown => Ok(Box::new(markdown::stream(files, meta, options))),
        OutputFormat::Ndjson => Ok(Box::new(ndjson::stream(files, meta, options))),
        OutputFormat::Tree | OutputFormat::Sarif => Err(SnapError::InvalidArgument(format!(
            "format {format} does not support streaming"
        ))),
    }
}

/// Content to place for a binary descriptor under the active policy, or
/// `None` when the entry should carry an exclusion note instead.
pub(crate) fn binary_payload(fd: &FileDescriptor, policy: BinaryPolicy) -> Option<String> {
    use crate::core::file::FileContent;

    match policy {
        BinaryPolicy::Placeholder => Some(format!("[binary file: {} bytes]", fd.size)),
        BinaryPolicy::Base64 => {
            let bytes: &[u8] = match &fd.content {
                Some(FileContent::Binary(b)) => b,
                Some(FileContent::Text(s)) => s.as_bytes(),
                None => &[],
            };
            Some(BASE64.encode(bytes))
        }
        BinaryPolicy::ExcludeComment => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_accepts_aliases_and_rejects_unknowns() {
        assert_eq!("XML".parse::<OutputFormat>().unwrap(), OutputFormat::Xml);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!(
            "jsonl".parse::<OutputFormat>().unwrap(),
            OutputFormat::Ndjson
        );

        let err = "yaml".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(err, SnapError::UnknownFormat(v) if v == "yaml"));
    }

    #[test]
    fn streaming_refused_for_buffer_only_formats() {
        let meta = RenderMeta {
            base: ".".into(),
            generated_at: Utc::now(),
            instructions: None,
            vcs: None,
            file_count: 0,
            total_size: 0,
        };
        let err = render_stream(
            OutputFormat::Tree,
            std::iter::empty(),
            &meta,
            &RenderOptions::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SnapError::InvalidArgument(_)));
    }
}
