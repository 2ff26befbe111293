//! JSON serializer: one object with a metadata header and a `files` array.
//!
//! Pretty printing (the default) indents with two spaces; compact mode
//! emits the same object with no insignificant whitespace.

use serde_json::{Map, Value, json};

use crate::core::file::FileDescriptor;
use crate::infra::detect;
use crate::output::{BinaryPolicy, RenderMeta, RenderOptions, binary_payload};

enum State {
    Header,
    Files { first: bool },
    Footer,
    Done,
}

pub struct JsonStream<I> {
    files: I,
    meta: RenderMeta,
    options: RenderOptions,
    state: State,
}

pub fn stream<I>(files: I, meta: &RenderMeta, options: &RenderOptions) -> JsonStream<I>
where
    I: Iterator<Item = FileDescriptor>,
{
    JsonStream {
        files,
        meta: meta.clone(),
        options: options.clone(),
        state: State::Header,
    }
}

/// Serialize one descriptor to its record object.
pub(crate) fn file_record(fd: &FileDescriptor, options: &RenderOptions) -> Value {
    let mut record = Map::new();
    record.insert("path".into(), json!(fd.rel_path.as_str()));
    record.insert("size".into(), json!(fd.size));
    record.insert("encoding".into(), json!(fd.encoding.as_str()));
    record.insert("binary".into(), json!(fd.binary));

    if let Some(modified) = fd.modified {
        record.insert("modified".into(), json!(modified.to_rfc3339()));
    }
    if fd.truncated {
        record.insert("truncated".into(), json!(true));
        if let Some(original) = fd.original_length {
            record.insert("original_length".into(), json!(original));
        }
    }
    if let Some(status) = &fd.vcs_status {
        record.insert("vcs_status".into(), json!(status));
    }
    if let Some(id) = &fd.transformed_by {
        record.insert("transformed_by".into(), json!(id));
    }
    if fd.secrets_redacted {
        record.insert("redacted".into(), json!(true));
    }

    if fd.binary {
        match binary_payload(fd, options.binary) {
            Some(payload) => {
                record.insert("content".into(), json!(payload));
                if matches!(options.binary, BinaryPolicy::Base64) {
                    record.insert("content_encoding".into(), json!("base64"));
                }
            }
            None => {
                record.insert("content".into(), Value::Null);
                record.insert("content_omitted".into(), json!(true));
            }
        }
    } else {
        match fd.text() {
            Some(text) => {
                record.insert("lines".into(), json!(detect::count_lines(text)));
                record.insert("content".into(), json!(text));
            }
            None => {
                record.insert("content".into(), Value::Null);
            }
        }
    }
    Value::Object(record)
}

fn indent_block(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl<I: Iterator<Item = FileDescriptor>> JsonStream<I> {
    fn header(&self) -> String {
        let vcs = match &self.meta.vcs {
            Some(vcs) => json!({
                "branch": vcs.branch,
                "commit": vcs.last_commit,
                "dirty": vcs.has_uncommitted_changes,
            }),
            None => Value::Null,
        };
        let instructions = match &self.meta.instructions {
            Some(text) => json!(text),
            None => Value::Null,
        };

        if self.options.pretty {
            format!(
                "{{\n  \"base\": {},\n  \"generated_at\": {},\n  \"file_count\": {},\n  \
                 \"total_size\": {},\n  \"vcs\": {},\n  \"instructions\": {},\n  \"files\": [",
                json!(self.meta.base),
                json!(self.meta.timestamp()),
                self.meta.file_count,
                self.meta.total_size,
                vcs,
                instructions,
            )
        } else {
            format!(
                "{{\"base\":{},\"generated_at\":{},\"file_count\":{},\"total_size\":{},\
                 \"vcs\":{},\"instructions\":{},\"files\":[",
                json!(self.meta.base),
                json!(self.meta.timestamp()),
                self.meta.file_count,
                self.meta.total_size,
                vcs,
                instructions,
            )
        }
    }

    fn file_chunk(&self, fd: &FileDescriptor, first: bool) -> String {
        let record = file_record(fd, &self.options);
        if self.options.pretty {
            let pretty = serde_json::to_string_pretty(&record)
                .unwrap_or_else(|_| record.to_string());
            let comma = if first { "" } else { "," };
            format!("{comma}\n{}", indent_block(&pretty, "    "))
        } else {
            let comma = if first { "" } else { "," };
            format!("{comma}{record}")
        }
    }

    fn footer(&self, any_files: bool) -> String {
        if self.options.pretty {
            if any_files {
                "\n  ]\n}\n".to_string()
            } else {
                "]\n}\n".to_string()
            }
        } else {
            "]}\n".to_string()
        }
    }
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for JsonStream<I> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match &mut self.state {
                State::Header => {
                    self.state = State::Files { first: true };
                    return Some(self.header());
                }
                State::Files { first } => {
                    let was_first = *first;
                    match self.files.next() {
                        Some(fd) => {
                            *first = false;
                            return Some(self.file_chunk(&fd, was_first));
                        }
                        None => {
                            self.state = State::Footer;
                            return Some(self.footer(!was_first));
                        }
                    }
                }
                State::Footer | State::Done => {
                    self.state = State::Done;
                    return None;
                }
            }
        }
    }
}
