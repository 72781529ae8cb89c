//! The cache executable (spec.md §4.4 "Cache executable"): wraps
//! downstream execution with the hit / hit-but-expired-lazy / miss
//! decision tree. Grounded on the teacher's `cache/mod.rs` DashMap
//! sharding idiom, generalized here to drive `crate::cache::ShardedCache`
//! from the sequence-engine side rather than being baked into one fixed
//! resolver path.

use crate::cache::single_flight::SingleFlight;
use crate::cache::{NEGATIVE_DEFAULT_TTL, ShardedCache, cache_key, now_unix};
use crate::context::QueryContext;
use crate::dns::{Message, Rcode};
use crate::error::{CoreError, Result};
use crate::sequence::{Chain, Executable};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Bound on a detached background refresh (spec.md §5 "cache lazy
/// refresh uses a detached background context bounded by a fallback 5s
/// timeout").
const LAZY_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct CachePlugin {
    cache: Arc<ShardedCache<Message>>,
    single_flight: Arc<SingleFlight<Message>>,
    /// `Some(ttl)` puts the cache in lazy mode: stored entries use this
    /// TTL regardless of answer TTLs, and an expired hit is served stale
    /// (with `lazy_reply_ttl`) while a refresh runs in the background.
    lazy_ttl: Option<u32>,
    lazy_reply_ttl: u32,
}

impl CachePlugin {
    pub fn new(cache: Arc<ShardedCache<Message>>, lazy_ttl: Option<u32>, lazy_reply_ttl: u32) -> Self {
        Self { cache, single_flight: Arc::new(SingleFlight::new()), lazy_ttl, lazy_reply_ttl }
    }

    fn store_expiration(&self, resp: &Message) -> u64 {
        let ttl = match self.lazy_ttl {
            Some(lazy) => lazy,
            None => {
                let ttl = resp.min_answer_ttl().unwrap_or(NEGATIVE_DEFAULT_TTL);
                if resp.answers.is_empty() { NEGATIVE_DEFAULT_TTL.max(ttl) } else { ttl }
            }
        };
        now_unix() + ttl as u64
    }

    fn maybe_store(&self, key: &[u8], resp: &Message) {
        if resp.header.rcode() != Rcode::NOERROR || resp.header.tc {
            return;
        }
        self.cache.store(key.to_vec(), resp.clone(), self.store_expiration(resp));
    }

    fn spawn_refresh(&self, key: Vec<u8>, ctx: &QueryContext, next: Chain) {
        let cache = Arc::clone(&self.cache);
        let single_flight = Arc::clone(&self.single_flight);
        let lazy_ttl = self.lazy_ttl;
        let mut bg_ctx = ctx.fork();

        tokio::spawn(async move {
            let store_key = key.clone();
            let _: Result<Message> = single_flight
                .run(key, async move {
                    let outcome = tokio::time::timeout(LAZY_REFRESH_TIMEOUT, next.run(&mut bg_ctx)).await;
                    match outcome {
                        Ok(Ok(())) => match bg_ctx.response.take() {
                            Some(resp) if resp.header.rcode() == Rcode::NOERROR && !resp.header.tc => {
                                let ttl = lazy_ttl
                                    .unwrap_or_else(|| resp.min_answer_ttl().unwrap_or(NEGATIVE_DEFAULT_TTL));
                                cache.store(store_key, resp.clone(), now_unix() + ttl as u64);
                                Ok(resp)
                            }
                            Some(resp) => Ok(resp),
                            None => Err(CoreError::Internal("lazy refresh produced no response".into())),
                        },
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(CoreError::Timeout),
                    }
                })
                .await;
        });
    }
}

#[async_trait]
impl Executable for CachePlugin {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
        let key = cache_key(&ctx.query, &ctx.cache_salt)?;
        let now = now_unix();

        if let Some(entry) = self.cache.get_stale(&key) {
            if entry.expiration_unix > now {
                let mut resp = entry.value.clone();
                resp.header.id = ctx.query.header.id;
                let elapsed = (now.saturating_sub(entry.stored_unix)) as u32;
                resp.decrement_ttls(elapsed);
                ctx.set_response(resp);
                ctx.short_circuit();
                return Ok(());
            }

            if self.lazy_ttl.is_some() {
                let mut resp = entry.value.clone();
                resp.header.id = ctx.query.header.id;
                resp.set_all_ttls(self.lazy_reply_ttl);
                ctx.set_response(resp);
                ctx.short_circuit();
                self.spawn_refresh(key, ctx, next);
                return Ok(());
            }
        }

        next.run(ctx).await?;
        if let Some(resp) = ctx.response.as_ref() {
            self.maybe_store(&key, resp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ServerMeta, Transport};
    use crate::dns::{Name, QClass, QType, Question, ResourceRecord};
    use crate::sequence::{Registry, Sequence};
    use std::net::Ipv4Addr;
    use std::time::Duration as StdDuration;

    struct Answer(Ipv4Addr, u32);

    #[async_trait]
    impl Executable for Answer {
        async fn execute(&self, ctx: &mut QueryContext, _next: Chain) -> Result<()> {
            let mut resp = Message::new_response_shell(&ctx.query);
            resp.answers.push(ResourceRecord::new_a(Name::parse("example.com"), self.1, self.0));
            ctx.set_response(resp);
            Ok(())
        }
    }

    fn ctx() -> QueryContext {
        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        QueryContext::new(
            Message::new_query(1, q),
            ServerMeta { client_addr: "127.0.0.1:5353".parse().unwrap(), transport: Transport::Udp },
        )
    }

    fn chain_of(exec: Arc<dyn Executable>) -> Chain {
        let seq = Sequence::builder().exec(exec).build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let registry = Arc::new(registry);
        let entry = registry.get("entry").unwrap();
        Chain::with_entry(registry, entry)
    }

    #[tokio::test]
    async fn miss_then_hit_decrements_ttl() {
        let cache = ShardedCache::new(None, StdDuration::from_secs(3600));
        let plugin = CachePlugin::new(cache, None, 5);

        let chain = chain_of(Arc::new(Answer(Ipv4Addr::new(192, 0, 2, 1), 60)));
        let mut c = ctx();
        plugin.execute(&mut c, chain).await.unwrap();
        assert_eq!(c.response.unwrap().answers[0].ttl, 60);

        tokio::time::sleep(StdDuration::from_secs(1)).await;
        let chain2 = chain_of(Arc::new(Answer(Ipv4Addr::new(192, 0, 2, 9), 60)));
        let mut c2 = ctx();
        plugin.execute(&mut c2, chain2).await.unwrap();
        let resp = c2.response.unwrap();
        assert_eq!(resp.answers[0].ttl, 59);
        match resp.answers[0].rdata {
            crate::dns::RData::A(addr) => assert_eq!(addr, Ipv4Addr::new(192, 0, 2, 1)),
            _ => panic!("expected cached A record, not a fresh downstream run"),
        }
    }
}
