//! Discovery stage: turn the base path and profile into descriptors.

use tracing::info;

use crate::core::context::PipelineContext;
use crate::core::pipeline::Stage;
use crate::error::Result;
use crate::infra::walk::{WalkStrategy, Walker};

/// Walks the filesystem and seeds the context's file list (no content).
pub struct DiscoveryStage {
    strategy: WalkStrategy,
}

impl DiscoveryStage {
    pub fn new(strategy: WalkStrategy) -> Self {
        Self { strategy }
    }
}

impl Default for DiscoveryStage {
    fn default() -> Self {
        Self::new(WalkStrategy::Sequential)
    }
}

impl Stage for DiscoveryStage {
    fn name(&self) -> &'static str {
        "discovery"
    }

    fn validate(&self, ctx: &PipelineContext) -> anyhow::Result<()> {
        if !ctx.base.is_dir() {
            anyhow::bail!("base path is not a directory: {}", ctx.base.display());
        }
        Ok(())
    }

    fn process(&mut self, mut ctx: PipelineContext) -> Result<PipelineContext> {
        let walker = Walker::new(&ctx.base, &ctx.profile)?;
        let files = walker.walk(self.strategy, &ctx.cancel)?;

        ctx.stats.discovered = files.len();
        ctx.stats.total_bytes = files.iter().map(|f| f.size).sum();
        info!(
            files = files.len(),
            bytes = ctx.stats.total_bytes,
            "discovery complete"
        );
        ctx.files = files;
        Ok(ctx)
    }
}
