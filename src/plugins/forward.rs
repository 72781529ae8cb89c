//! Single-upstream forwarder (spec.md §4.3's `Upstream::exchange`
//! wrapped as a sequence executable): sends `ctx.query` to one upstream
//! and sets the response, rewriting the wire id back to the query's.
//! Errors (dial/timeout/non-success from an untrusted upstream) bubble
//! up unmodified per spec.md §7.

use crate::context::QueryContext;
use crate::error::{CoreError, Result};
use crate::sequence::{Chain, Executable};
use crate::upstream::Upstream;
use async_trait::async_trait;
use std::sync::Arc;

pub struct Forward {
    upstream: Arc<dyn Upstream>,
}

impl Forward {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl Executable for Forward {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
        let mut resp = self.upstream.exchange(&ctx.query).await?;
        resp.header.id = ctx.query.header.id;

        if !self.upstream.trusted() && resp.header.rcode() != crate::dns::Rcode::NOERROR {
            return Err(CoreError::Upstream(format!(
                "{}: untrusted upstream returned {:?}",
                self.upstream.name(),
                resp.header.rcode()
            )));
        }

        ctx.upstream_opt = resp.opt();
        ctx.set_response(resp);
        next.run(ctx).await
    }
}
