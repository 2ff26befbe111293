//! XML serializer.
//!
//! Content travels inside CDATA. Two hostile inputs are handled up front:
//! a literal `]]>` in the content (split across two CDATA sections) and
//! control characters, which XML 1.0 cannot carry at all outside tab,
//! newline, and carriage return (stripped). Attribute values are escaped.

use crate::core::file::FileDescriptor;
use crate::output::{BinaryPolicy, RenderMeta, RenderOptions, binary_payload, tree};

/// Escape a string for use inside a double-quoted attribute.
pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

/// Wrap text in CDATA, splitting any embedded `]]>` terminator and dropping
/// the control characters XML cannot represent.
pub(crate) fn cdata(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| !c.is_control() || c == '\t' || c == '\n' || c == '\r')
        .collect();
    format!("<![CDATA[{}]]>", cleaned.replace("]]>", "]]]]><![CDATA[>"))
}

enum State {
    Header,
    Files,
    Footer,
    Done,
}

pub struct XmlStream<I> {
    files: I,
    meta: RenderMeta,
    options: RenderOptions,
    state: State,
    seen: Vec<(String, u64)>,
}

pub fn stream<I>(files: I, meta: &RenderMeta, options: &RenderOptions) -> XmlStream<I>
where
    I: Iterator<Item = FileDescriptor>,
{
    XmlStream {
        files,
        meta: meta.clone(),
        options: options.clone(),
        state: State::Header,
        seen: Vec::new(),
    }
}

impl<I: Iterator<Item = FileDescriptor>> XmlStream<I> {
    fn indent(&self, level: usize) -> String {
        if self.options.pretty {
            "  ".repeat(level)
        } else {
            String::new()
        }
    }

    fn header(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(&format!(
            "<snapshot base=\"{}\" generated-at=\"{}\" file-count=\"{}\" total-size=\"{}\">\n",
            escape_attr(&self.meta.base),
            self.meta.timestamp(),
            self.meta.file_count,
            self.meta.total_size,
        ));

        let i1 = self.indent(1);
        let i2 = self.indent(2);
        if self.meta.vcs.is_none() && self.meta.instructions.is_none() {
            out.push_str(&format!("{i1}<metadata/>\n"));
        } else {
            out.push_str(&format!("{i1}<metadata>\n"));
            if let Some(vcs) = &self.meta.vcs {
                out.push_str(&format!(
                    "{i2}<vcs branch=\"{}\" commit=\"{}\" dirty=\"{}\"/>\n",
                    escape_attr(&vcs.branch),
                    escape_attr(&vcs.last_commit),
                    vcs.has_uncommitted_changes,
                ));
            }
            if let Some(instructions) = &self.meta.instructions {
                out.push_str(&format!(
                    "{i2}<instructions>{}</instructions>\n",
                    cdata(instructions)
                ));
            }
            out.push_str(&format!("{i1}</metadata>\n"));
        }
        out.push_str(&format!("{i1}<files>\n"));
        out
    }

    fn file_chunk(&self, fd: &FileDescriptor) -> String {
        let i2 = self.indent(2);
        let i3 = self.indent(3);

        let mut attrs = format!(
            "path=\"{}\" size=\"{}\" encoding=\"{}\"",
            escape_attr(fd.rel_path.as_str()),
            fd.size,
            fd.encoding.as_str(),
        );
        if fd.binary {
            attrs.push_str(" binary=\"true\"");
        }
        if fd.truncated {
            attrs.push_str(" truncated=\"true\"");
            if let Some(original) = fd.original_length {
                attrs.push_str(&format!(" original-length=\"{original}\""));
            }
        }
        if let Some(status) = &fd.vcs_status {
            attrs.push_str(&format!(" vcs-status=\"{}\"", escape_attr(status)));
        }
        if let Some(id) = &fd.transformed_by {
            attrs.push_str(&format!(" transformed-by=\"{}\"", escape_attr(id)));
        }
        if fd.secrets_redacted {
            attrs.push_str(" redacted=\"true\"");
        }

        let body = if fd.binary {
            match binary_payload(fd, self.options.binary) {
                Some(payload) => {
                    let encoded = matches!(self.options.binary, BinaryPolicy::Base64);
                    let attr = if encoded { " encoding=\"base64\"" } else { "" };
                    format!("{i3}<content{attr}>{}</content>\n", cdata(&payload))
                }
                None => format!("{i3}<content omitted=\"true\"/>\n"),
            }
        } else {
            match fd.text() {
                Some(text) => format!("{i3}<content>{}</content>\n", cdata(text)),
                None => format!("{i3}<content omitted=\"true\"/>\n"),
            }
        };

        format!("{i2}<file {attrs}>\n{body}{i2}</file>\n")
    }

    fn footer(&self) -> String {
        let i1 = self.indent(1);
        let structure = tree::render_entries(&self.seen, self.options.show_sizes);
        format!(
            "{i1}</files>\n{i1}<structure>{}</structure>\n</snapshot>\n",
            cdata(&format!("\n{structure}"))
        )
    }
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for XmlStream<I> {
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
            base: "/work/project".into(),
            generated_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            instructions: None,
            vcs: None,
            file_count: 1,
            total_size: 10,
        }
    }

    fn text_fd(rel: &str, text: &str) -> FileDescriptor {
        let mut fd =
            FileDescriptor::new(Utf8PathBuf::from(rel), PathBuf::from(rel), text.len() as u64);
        fd.content = Some(FileContent::Text(text.to_string()));
        fd
    }

    #[test]
    fn cdata_terminator_is_split() {
        assert_eq!(
            cdata("x]]>y"),
            "<![CDATA[x]]]]><![CDATA[>y]]>"
        );
    }

    #[test]
    fn control_characters_are_stripped_except_whitespace() {
        let hostile: String = (0x00..0x20_u8)
            .map(char::from)
            .chain("ok".chars())
            .collect();
        let wrapped = cdata(&hostile);
        assert_eq!(wrapped, "<![CDATA[\t\n\rok]]>");
    }

    #[test]
    fn attributes_are_escaped() {
        assert_eq!(
            escape_attr(r#"a<b>&"c'"#),
            "a&lt;b&gt;&amp;&quot;c&apos;"
        );
    }

    #[test]
    fn stream_concatenation_is_a_complete_document() {
        let files = vec![text_fd("src/a.rs", "fn a() {}")];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();

        assert!(doc.starts_with("<?xml version=\"1.0\""));
        assert!(doc.contains("<file path=\"src/a.rs\""));
        assert!(doc.contains("<![CDATA[fn a() {}]]>"));
        assert!(doc.trim_end().ends_with("</snapshot>"));
        assert!(doc.contains("generated-at=\"2026-01-02T03:04:05Z\""));
    }

    #[test]
    fn binary_exclusion_policy_keeps_the_entry() {
        let mut fd = text_fd("logo.png", "");
        fd.binary = true;
        let options = RenderOptions {
            binary: BinaryPolicy::ExcludeComment,
            ..Default::default()
        };
        let doc: String = stream(vec![fd].into_iter(), &meta(), &options).collect();
        assert!(doc.contains("<file path=\"logo.png\""));
        assert!(doc.contains("<content omitted=\"true\"/>"));
    }
}
