//! Rate-limit executable (spec.md §4.5): consumes one token for the
//! client's masked prefix; on refusal builds a REFUSED response and
//! short-circuits instead of calling downstream.

use crate::context::QueryContext;
use crate::dns::Message;
use crate::error::Result;
use crate::rate_limiter::RateLimiter;
use crate::sequence::{Chain, Executable};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RateLimitPlugin {
    limiter: Arc<RateLimiter>,
}

impl RateLimitPlugin {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Executable for RateLimitPlugin {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
        if self.limiter.allow(ctx.server_meta.client_addr.ip()) {
            return next.run(ctx).await;
        }
        ctx.set_response(Message::refused(&ctx.query));
        ctx.short_circuit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ServerMeta, Transport};
    use crate::dns::{Name, QClass, QType, Question, Rcode};
    use crate::rate_limiter::RateLimiterConfig;
    use crate::sequence::{Registry, Sequence};

    struct Noop;

    #[async_trait]
    impl Executable for Noop {
        async fn execute(&self, ctx: &mut QueryContext, _next: Chain) -> Result<()> {
            ctx.set_response(Message::new_response_shell(&ctx.query));
            Ok(())
        }
    }

    fn chain() -> Chain {
        let seq = Sequence::builder().exec(Arc::new(Noop)).build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let registry = Arc::new(registry);
        let entry = registry.get("entry").unwrap();
        Chain::with_entry(registry, entry)
    }

    fn ctx(ip: &str) -> QueryContext {
        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        QueryContext::new(
            Message::new_query(1, q),
            ServerMeta { client_addr: format!("{ip}:5353").parse().unwrap(), transport: Transport::Udp },
        )
    }

    #[tokio::test]
    async fn refuses_once_burst_exhausted() {
        let limiter = RateLimiter::new(RateLimiterConfig { qps: 1, burst: 1, mask4: 32, mask6: 48 });
        let plugin = RateLimitPlugin::new(limiter);

        let mut c = ctx("10.0.0.7");
        plugin.execute(&mut c, chain()).await.unwrap();
        assert_eq!(c.response.unwrap().header.rcode(), Rcode::NOERROR);

        let mut c2 = ctx("10.0.0.7");
        plugin.execute(&mut c2, chain()).await.unwrap();
        assert_eq!(c2.response.unwrap().header.rcode(), Rcode::REFUSED);
    }
}
