//! SARIF 2.1.0 serializer: one run, one `file-included` result per file.
//!
//! Buffered only; the document's `results` array is a single JSON value and
//! gains nothing from chunking.

use serde_json::json;

use crate::core::file::FileDescriptor;
use crate::error::Result;
use crate::output::{RenderMeta, RenderOptions};

const SARIF_VERSION: &str = "2.1.0";
const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";

pub fn render(
    files: &[FileDescriptor],
    meta: &RenderMeta,
    options: &RenderOptions,
) -> Result<String> {
    let results: Vec<_> = files
        .iter()
        .map(|fd| {
            let mut properties = json!({
                "size": fd.size,
                "binary": fd.binary,
                "truncated": fd.truncated,
            });
            if let Some(status) = &fd.vcs_status {
                properties["vcsStatus"] = json!(status);
            }
            json!({
                "ruleId": "file-included",
                "level": "note",
                "message": {
                    "text": format!("{} ({} bytes)", fd.rel_path, fd.size),
                },
                "locations": [{
                    "physicalLocation": {
                        "artifactLocation": { "uri": fd.rel_path.as_str() },
                    },
                }],
                "properties": properties,
            })
        })
        .collect();

    let document = json!({
        "$schema": SARIF_SCHEMA,
        "version": SARIF_VERSION,
        "runs": [{
            "tool": {
                "driver": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                    "informationUri": env!("CARGO_PKG_REPOSITORY"),
                },
            },
            "properties": {
                "base": meta.base,
                "generatedAt": meta.timestamp(),
                "fileCount": meta.file_count,
                "totalSize": meta.total_size,
            },
            "results": results,
        }],
    });

    let rendered = if options.pretty {
        serde_json::to_string_pretty(&document)
    } else {
        serde_json::to_string(&document)
    }
    .map_err(|err| crate::error::SnapError::InvalidArgument(err.to_string()))?;
    Ok(rendered + "\n")
}
