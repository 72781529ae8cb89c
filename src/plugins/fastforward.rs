//! Concurrent fan-out executable (spec.md §4.3 "Concurrent fan-out" /
//! "fast forward"): races up to `concurrency` upstreams with independent
//! copies of the query, each under its own bounded per-call timeout; the
//! first success wins and the rest are dropped (not explicitly
//! cancelled — `tokio::select!` simply stops polling the losing
//! futures, matching spec.md §9 "losers exit by falling through after
//! the winner is selected"). If every upstream fails, returns
//! `CoreError::AllUpstreamsFailed`.

use crate::context::QueryContext;
use crate::dns::Message;
use crate::error::{CoreError, Result};
use crate::sequence::{Chain, Executable};
use crate::upstream::Upstream;
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

pub struct FastForward {
    upstreams: Vec<Arc<dyn Upstream>>,
    concurrency: usize,
    per_call_timeout: Duration,
}

impl FastForward {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>, concurrency: usize, per_call_timeout: Duration) -> Self {
        Self { upstreams, concurrency: concurrency.max(1), per_call_timeout }
    }
}

#[async_trait]
impl Executable for FastForward {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
        let racers: Vec<_> = self.upstreams.iter().take(self.concurrency).cloned().collect();
        if racers.is_empty() {
            return Err(CoreError::Internal("fast forward configured with no upstreams".into()));
        }

        let query = ctx.query.clone();
        let mut futs: FuturesUnordered<_> = racers
            .into_iter()
            .map(|up| {
                let query = query.clone();
                let timeout = self.per_call_timeout;
                async move {
                    match tokio::time::timeout(timeout, up.exchange(&query)).await {
                        Ok(Ok(resp)) => Ok(resp),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(CoreError::Timeout),
                    }
                }
            })
            .collect();

        let mut last_err = None;
        while let Some(result) = futs.next().await {
            match result {
                Ok(mut resp) => {
                    resp.header.id = ctx.query.header.id;
                    ctx.upstream_opt = resp.opt();
                    ctx.set_response(resp);
                    return next.run(ctx).await;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let _ = last_err;
        Err(CoreError::AllUpstreamsFailed)
    }
}
