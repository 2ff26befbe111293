//! NDJSON serializer: one compact JSON record per line.
//!
//! Record order is fixed: a `meta` record, one `file` record per descriptor,
//! and a closing `summary` record with counts accumulated along the way.

use serde_json::{Value, json};

use crate::core::file::FileDescriptor;
use crate::output::{RenderMeta, RenderOptions, json as json_format};

enum State {
    Meta,
    Files,
    Summary,
    Done,
}

pub struct NdjsonStream<I> {
    files: I,
    meta: RenderMeta,
    options: RenderOptions,
    state: State,
    emitted: usize,
    emitted_bytes: u64,
}

pub fn stream<I>(files: I, meta: &RenderMeta, options: &RenderOptions) -> NdjsonStream<I>
where
    I: Iterator<Item = FileDescriptor>,
{
    NdjsonStream {
        files,
        meta: meta.clone(),
        options: options.clone(),
        state: State::Meta,
        emitted: 0,
        emitted_bytes: 0,
    }
}

impl<I: Iterator<Item = FileDescriptor>> Iterator for NdjsonStream<I> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            match self.state {
                State::Meta => {
                    self.state = State::Files;
                    let vcs = match &self.meta.vcs {
                        Some(vcs) => json!({
                            "branch": vcs.branch,
                            "commit": vcs.last_commit,
                            "dirty": vcs.has_uncommitted_changes,
                        }),
                        None => Value::Null,
                    };
                    let record = json!({
                        "type": "meta",
                        "base": self.meta.base,
                        "generated_at": self.meta.timestamp(),
                        "file_count": self.meta.file_count,
                        "total_size": self.meta.total_size,
                        "vcs": vcs,
                        "instructions": self.meta.instructions,
                    });
                    return Some(format!("{record}\n"));
                }
                State::Files => match self.files.next() {
                    Some(fd) => {
                        self.emitted += 1;
                        self.emitted_bytes += fd.size;
                        let mut record = json_format::file_record(&fd, &self.options);
                        if let Value::Object(map) = &mut record {
                            map.insert("type".into(), json!("file"));
                        }
                        return Some(format!("{record}\n"));
                    }
                    None => self.state = State::Summary,
                },
                State::Summary => {
                    self.state = State::Done;
                    let record = json!({
                        "type": "summary",
                        "files": self.emitted,
                        "bytes": self.emitted_bytes,
                    });
                    return Some(format!("{record}\n"));
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
            file_count: 2,
            total_size: 7,
        }
    }

    fn text_fd(rel: &str, text: &str) -> FileDescriptor {
        let mut fd =
            FileDescriptor::new(Utf8PathBuf::from(rel), PathBuf::from(rel), text.len() as u64);
        fd.content = Some(FileContent::Text(text.to_string()));
        fd
    }

    #[test]
    fn records_are_meta_then_files_then_summary() {
        let files = vec![text_fd("a.rs", "abc"), text_fd("b.rs", "wxyz")];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();

        let lines: Vec<Value> = doc
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["type"], "meta");
        assert_eq!(lines[1]["type"], "file");
        assert_eq!(lines[1]["path"], "a.rs");
        assert_eq!(lines[3]["type"], "summary");
        assert_eq!(lines[3]["files"], 2);
        assert_eq!(lines[3]["bytes"], 7);
    }

    #[test]
    fn every_line_is_standalone_json() {
        let files = vec![text_fd("odd \"name\".txt", "line1\nline2")];
        let doc: String = stream(files.into_iter(), &meta(), &RenderOptions::default()).collect();
        for line in doc.lines() {
            serde_json::from_str::<Value>(line).unwrap();
        }
    }
}
