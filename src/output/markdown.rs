//! Markdown serializer.
//!
//! A YAML front-matter header, the file bodies fenced with machine-readable
//! begin/end comment markers, and a directory-structure section at the end
//! (built as files pass through, so the streaming variant stays single-pass).
//! The fence is always longer than the longest backtick run in the content,
//! so content can never terminate its own block early.

use crate::core::file::FileDescriptor;
use crate::output::xml::escape_attr;
use crate::output::{BinaryPolicy, RenderMeta, RenderOptions, binary_payload, tree};

/// Fence of at least three backticks, strictly longer than any run inside.
pub(crate) fn fence_for(content: &str) -> String {
    let mut longest = 0_usize;
    let mut current = 0_usize;
    for c in content.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

/// Fenced-block language tag from a file extension.
fn language_for(fd: &FileDescriptor) -> &'static str {
    match fd.extension().as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "md" => "markdown",
        "toml" => "toml",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "sh" | "bash" => "bash",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" => "cpp",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "html" => "html",
        "css" => "css",
        "xml" => "xml",
        "sql" => "sql",
        _ => "text",
    }
}

enum State {
    Header,
    Files,
    Footer,
    Done,
}

pub struct MarkdownStream<I> {
    files: I,
    meta: RenderMeta,
    options: RenderOptions,
    state: State,
    seen: Vec<(String, u64)>,
}

pub fn stream<I>(files: I, meta: &RenderMeta, options: &RenderOptions) -> MarkdownStream<I>
where
    I: Iterator<Item = FileDescriptor>,
{
    MarkdownStream {
        files,
        meta: meta.clone(),
        options: options.clone(),
        state: State::Header,
        seen: Vec::new(),
    }
}

impl<I: Iterator<Item = FileDescriptor>> MarkdownStream<I> {
    fn header(&self) -> String {
        let mut out = String::from("---\n");
        out.push_str(&format!("base: {}\n", serde_json::json!(self.meta.base)));
        out.push_str(&format!("generated_at: {}\n", self.meta.timestamp()));
        out.push_str(&format!("file_count: {}\n", self.meta.file_count));
        out.push_str(&format!("total_size: {}\n", self.meta.total_size));
        if let Some(vcs) = &self.meta.vcs {
            out.push_str(&format!("branch: {}\n", serde_json::json!(vcs.branch)));
            out.push_str(&format!("commit: {}\n", serde_json::json!(vcs.last_commit)));
            out.push_str(&format!("dirty: {}\n", vcs.has_uncommitted_changes));
        }
        out.push_str("---\n");

        if let Some(instructions) = &self.meta.instructions {
            out.push_str("\n<!-- instructions:begin -->\n");
            out.push_str(instructions);
            if !instructions.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("<!-- instructions:end -->\n");
        }
        out
    }

    fn file_chunk(&self, fd: &FileDescriptor) -> String {
        // Escaped like XML attributes: a path carrying `"` or `-->` must not
        // be able to terminate the comment marker.
        let path = escape_attr(fd.rel_path.as_str());
        let mut marker = format!("<!-- file:begin path=\"{path}\" size=\"{}\"", fd.size);
        if let Some(hash) = content_hash(fd) {
            marker.push_str(&format!(" hash=\"{hash}\""));
        }
        if let Some(status) = &fd.vcs_status {
            marker.push_str(&format!(" status=\"{}\"", escape_attr(status)));
        }
        marker.push_str(&format!(
            " binary=\"{}\" truncated=\"{}\" -->",
            fd.binary, fd.truncated
        ));

        let body = self.body_for(fd);
        format!("\n{marker}\n{body}<!-- file:end path=\"{path}\" -->\n")
    }

    fn body_for(&self, fd: &FileDescriptor) -> String {
        if fd.binary {
            return match binary_payload(fd, self.options.binary) {
                Some(payload) => {
                    let tag = if matches!(self.options.binary, BinaryPolicy::Base64) {
                        "base64"
                    } else {
                        "text"
                    };
                    let fence = fence_for(&payload);
                    format!("{fence}{tag}\n{payload}\n{fence}\n")
                }
                None => format!(
                    "<!-- binary content excluded: {} -->\n",
                    escape_attr(fd.rel_path.as_str())
                ),
            };
        }

        match fd.text() {
            Some(text) => {
                let rendered = if self.options.line_numbers {
                    number_lines(text)
                } else {
                    text.to_string()
                };
                let fence = fence_for(&rendered);
                let newline = if rendered.ends_with('\n') || rendered.is_empty() {
                    ""
                } else {
                    "\n"
                };
                format!(
                    "{fence}{}\n{rendered}{newline}{fence}\n",
                    language_for(fd)
                )
            }
            None => "<!-- content not loaded -->\n".to_string(),
        }
    }

    fn footer(&self) -> String {
        let structure = tree::render_entries(&self.seen, self.options.show_sizes);
        format!("\n## Directory structure\n\n```text\n{structure}```\n")
    }
}

fn content_hash(fd: &FileDescriptor) -> Option<String> {
    use crate::core::file::FileContent;
    let bytes: &[u8] = match fd.content.as_ref()? {
        FileContent::Text(s) => s.as_bytes(),
        FileContent::Binary(b) => b,
    };
    Some(blake3::hash(bytes).to_hex().to_string())
}

fn number_lines(text: &str) -> String {
    let trailing_newline = text.ends_with('\n');
    let body = if trailing_newline {
        &text[..text.len() - 1]
    } else {
        text
    };
    let mut out = body
        .split('\n')
        .enumerate()
        .map(|(index, line)| format!("{:>5} | {line}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    if trailing_newline {
        out.push('\n');
    }
    out
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for MarkdownStream<I> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.state {
                State::Header => {
                    self.state = State::Files;
                    return Some(self.header());
                }
                State::Files => match self.files.next() {
                    Some(fd) => {
                        self.seen.push((fd.rel_path.to_string(), fd.size));
                        return Some(self.file_chunk(&fd));
                    }
                    None => self.state = State::Footer,
                },
                State::Footer => {
                    self.state = State::Done;
                    return Some(self.footer());
                }
                State::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use camino::Utf8PathBuf;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::core::file::FileContent;

    fn meta() -> RenderMeta {
        RenderMeta {
            base: "/p".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            instructions: None,
            vcs: None,
            file_count: 1,
            total_size: 9,
        }
    }

    fn text_fd(rel: &str, text: &str) -> FileDescriptor {
        let mut fd =
            FileDescriptor::new(Utf8PathBuf::from(rel), PathBuf::from(rel), text.len() as u64);
        fd.content = Some(FileContent::Text(text.to_string()));
        fd
    }

    #[test]
    fn fence_outgrows_embedded_backtick_runs() {
        assert_eq!(fence_for("plain"), "```");
        assert_eq!(fence_for("a ``` b"), "````");
        assert_eq!(fence_for("a ````` b"), "``````");
    }

    #[test]
    fn document_carries_front_matter_markers_and_structure() {
        let files = vec![text_fd("src/a.rs", "fn a() {}\n")];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();

        assert!(doc.starts_with("---\nbase: \"/p\"\n"));
        assert!(doc.contains("<!-- file:begin path=\"src/a.rs\" size=\"10\""));
        assert!(doc.contains("hash=\""));
        assert!(doc.contains("```rust\nfn a() {}\n```"));
        assert!(doc.contains("<!-- file:end path=\"src/a.rs\" -->"));
        assert!(doc.contains("## Directory structure"));
        assert!(doc.contains("└── a.rs"));
    }

    #[test]
    fn content_with_fences_stays_inside_its_block() {
        let hostile = "```rust\nfn x() {}\n```\n";
        let files = vec![text_fd("README.md", hostile)];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();
        // The outer fence must be four backticks.
        assert!(doc.contains("````markdown\n```rust"));
        assert!(doc.contains("```\n````\n"));
    }

    #[test]
    fn hostile_paths_cannot_terminate_marker_comments() {
        let files = vec![text_fd("evil\"name-->x.txt", "ok\n")];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();

        assert!(doc.contains("path=\"evil&quot;name--&gt;x.txt\""));
        for line in doc.lines().filter(|l| l.starts_with("<!-- file:")) {
            assert_eq!(line.matches("-->").count(), 1, "marker broken: {line}");
            assert!(line.ends_with("-->"));
        }
    }

    #[test]
    fn line_numbers_are_prefixed_when_enabled() {
        let files = vec![text_fd("a.txt", "one\ntwo\n")];
        let options = RenderOptions {
            line_numbers: true,
            ..Default::default()
        };
        let doc: String = stream(files.into_iter(), &meta(), &options).collect();
        assert!(doc.contains("    1 | one\n    2 | two"));
    }
}
