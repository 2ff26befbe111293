//! Transform stage: apply external content transformers per file.
//!
//! Transformers are opaque collaborators with the contract
//! `content -> content` (possibly failing). On failure the original
//! descriptor is kept untouched and a warning is recorded.

use tracing::warn;

use crate::core::context::PipelineContext;
use crate::core::file::{FileContent, FileDescriptor};
use crate::core::pipeline::Stage;
use crate::error::Result;

/// External content transformer, e.g. image-to-description or oversized-text
/// summarization. Internals are out of this crate's hands.
pub trait Transformer: Send + Sync {
    /// Stable identifier recorded on descriptors this transformer rewrote.
    fn id(&self) -> &str;

    /// Whether this transformer wants the file at all.
    fn applies_to(&self, fd: &FileDescriptor) -> bool;

    /// Produce replacement content for the file.
    fn transform(&self, fd: &FileDescriptor) -> anyhow::Result<FileContent>;
}

/// Runs each registered transformer over each file, first match wins.
pub struct TransformStage {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformStage {
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Self { transformers }
    }
}

impl Stage for TransformStage {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        if self.transformers.is_empty() {
            return Ok(ctx);
        }

        for fd in &mut ctx.files {
            ctx.cancel.check()?;
            for transformer in &self.transformers {
                if !transformer.applies_to(fd) {
                    continue;
                }
                match transformer.transform(fd) {
                    Ok(content) => {
                        fd.content = Some(content);
                        fd.transformed_by = Some(transformer.id().to_string());
                    }
                    Err(err) => {
                        // Keep the original descriptor; note the failure.
                        warn!(path = %fd.rel_path, transformer = transformer.id(), %err,
                            "transformer failed, keeping original content");
                        ctx.stats.warn(format!(
                            "transformer {} failed on {}: {err}",
                            transformer.id(),
                            fd.rel_path
                        ));
                    }
                }
                break;
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::core::profile::Profile;
    use crate::infra::config::Settings;

    struct Upper;

    impl Transformer for Upper {
        fn id(&self) -> &str {
            "uppercase"
        }
        fn applies_to(&self, fd: &FileDescriptor) -> bool {
            fd.extension() == "md"
        }
        fn transform(&self, fd: &FileDescriptor) -> anyhow::Result<FileContent> {
            let text = fd.text().ok_or_else(|| anyhow::anyhow!("no text"))?;
            Ok(FileContent::Text(text.to_uppercase()))
        }
    }

    struct Broken;

    impl Transformer for Broken {
        fn id(&self) -> &str {
            "broken"
        }
        fn applies_to(&self, _fd: &FileDescriptor) -> bool {
            true
        }
        fn transform(&self, _fd: &FileDescriptor) -> anyhow::Result<FileContent> {
            anyhow::bail!("engine offline")
        }
    }

    fn ctx_with(files: Vec<FileDescriptor>) -> PipelineContext {
        let mut ctx =
            PipelineContext::new(PathBuf::from("."), Profile::default(), Settings::new());
        ctx.files = files;
        ctx
    }

    fn text_fd(rel: &str, text: &str) -> FileDescriptor {
        let mut fd = FileDescriptor::new(Utf8PathBuf::from(rel), PathBuf::from(rel), 0);
        fd.content = Some(FileContent::Text(text.to_string()));
        fd
    }

    #[test]
    fn matching_files_are_rewritten_and_tagged() {
        let mut stage = TransformStage::new(vec![Box::new(Upper)]);
        let ctx = stage
            .process(ctx_with(vec![
                text_fd("README.md", "hello"),
                text_fd("main.rs", "fn main() {}"),
            ]))
            .unwrap();

        assert_eq!(ctx.files[0].text(), Some("HELLO"));
        assert_eq!(ctx.files[0].transformed_by.as_deref(), Some("uppercase"));
        assert_eq!(ctx.files[1].text(), Some("fn main() {}"));
        assert!(ctx.files[1].transformed_by.is_none());
    }

    #[test]
    fn failures_keep_the_original_and_record_a_warning() {
        let mut stage = TransformStage::new(vec![Box::new(Broken)]);
        let ctx = stage
            .process(ctx_with(vec![text_fd("a.txt", "unchanged")]))
            .unwrap();

        assert_eq!(ctx.files[0].text(), Some("unchanged"));
        assert!(ctx.files[0].transformed_by.is_none());
        assert_eq!(ctx.stats.warnings.len(), 1);
        assert!(ctx.stats.warnings[0].contains("broken"));
    }
}
