//! The other half of a sequence node: the `Executable` contract (spec.md
//! §4.1). Plain executables do their work and fall through by driving
//! `next` themselves when they want downstream nodes to still run;
//! recursive ("wrapping") executables — the cache and rate-limiter
//! plugins — call `next.run(ctx)` at a point of their choosing so they
//! can act both before and after the rest of the pipeline.

use super::Chain;
use crate::context::QueryContext;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Executable: Send + Sync {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()>;
}
