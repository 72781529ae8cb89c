//! End-to-end pipeline tests driving `Handler` directly, with fake
//! `Upstream` implementations standing in for real network calls.
//! Grounded on the teacher's `tests/integration_test.rs` naming and
//! `#[tokio::test]` idiom, adapted from "bind a live server and send a
//! raw UDP socket at it" to in-process wiring so no real sockets are
//! opened.

use async_trait::async_trait;
use flowdns::cache::ShardedCache;
use flowdns::context::{ServerMeta, Transport};
use flowdns::dns::edns::encode_client_subnet;
use flowdns::dns::{Message, Name, OptCode, Opt, QClass, QType, Question, RData, Rcode, ResourceRecord};
use flowdns::error::{CoreError, Result};
use flowdns::handler::Handler;
use flowdns::metrics::Metrics;
use flowdns::plugins::cache_plugin::CachePlugin;
use flowdns::plugins::fastforward::FastForward;
use flowdns::plugins::forward::Forward;
use flowdns::plugins::ratelimit::RateLimitPlugin;
use flowdns::rate_limiter::{RateLimiter, RateLimiterConfig};
use flowdns::sequence::{Engine, Executable, Registry, Sequence};
use flowdns::upstream::Upstream;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn meta(client: &str) -> ServerMeta {
    ServerMeta { client_addr: client.parse().unwrap(), transport: Transport::Udp }
}

fn a_query_wire(id: u16, with_opt: bool, do_bit: bool, client_subnet: Option<(Ipv4Addr, u8)>) -> Vec<u8> {
    let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
    let mut msg = Message::new_query(id, q);
    if with_opt {
        let mut opt = Opt::new(4096);
        opt.set_do_flag(do_bit);
        if let Some((addr, prefix)) = client_subnet {
            opt.set(encode_client_subnet(std::net::IpAddr::V4(addr), prefix));
        }
        msg.set_opt(opt);
    }
    msg.to_wire().unwrap()
}

/// An upstream that always answers with a single A record at a fixed
/// TTL, after an optional artificial delay, or fails if `fail` is set.
struct FakeUpstream {
    name: &'static str,
    addr: Ipv4Addr,
    ttl: u32,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeUpstream {
    fn new(name: &'static str, addr: Ipv4Addr, ttl: u32) -> Arc<Self> {
        Arc::new(Self { name, addr, ttl, delay: Duration::ZERO, fail: false, calls: AtomicUsize::new(0) })
    }

    fn delayed(name: &'static str, addr: Ipv4Addr, ttl: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self { name, addr, ttl, delay, fail: false, calls: AtomicUsize::new(0) })
    }

    fn failing(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self { name, addr: Ipv4Addr::UNSPECIFIED, ttl: 0, delay, fail: true, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CoreError::Upstream(format!("{}: simulated failure", self.name)));
        }
        let mut resp = Message::new_response_shell(query);
        resp.answers.push(ResourceRecord::new_a(Name::parse("example.com"), self.ttl, self.addr));
        Ok(resp)
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Verifies the client's OPT (and, if present, its Client Subnet option)
/// made it through to the upstream query unmodified.
struct AssertingUpstream {
    inner: Arc<FakeUpstream>,
}

#[async_trait]
impl Upstream for AssertingUpstream {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let opt = query.opt();
        assert!(opt.is_some(), "forwarder must always attach an OPT to the upstream query");
        assert!(opt.unwrap().get(OptCode::ClientSubnet).is_some(), "client subnet must be forwarded upstream");
        self.inner.exchange(query).await
    }

    fn name(&self) -> &str {
        "asserting"
    }
}

fn handler_for(seq: Sequence) -> Handler {
    let mut registry = Registry::new();
    registry.register("entry", seq);
    let engine = Engine::new(registry, "entry");
    Handler::new(engine, Duration::from_secs(5), Arc::new(Metrics::new().unwrap()))
}

/// Scenario 1: basic A lookup, cache miss, forward to a single upstream
/// returning 192.0.2.1/TTL=60 -- NOERROR, RA=1, OPT UDP size 1220, and
/// the answer lands in cache.
#[tokio::test]
async fn scenario_basic_a_lookup_populates_cache() {
    let cache = ShardedCache::new(None, Duration::from_secs(3600));
    let upstream: Arc<dyn Upstream> = FakeUpstream::new("up1", Ipv4Addr::new(192, 0, 2, 1), 60);
    let seq = Sequence::builder()
        .exec(Arc::new(CachePlugin::new(Arc::clone(&cache), None, 5)))
        .exec(Arc::new(Forward::new(upstream)))
        .build();
    let handler = handler_for(seq);

    let wire = a_query_wire(1, true, false, None);
    let out = handler.handle_query(&wire, meta("198.51.100.1:53")).await.unwrap();

    let resp = Message::parse(&out).unwrap();
    assert_eq!(resp.header.rcode(), Rcode::NOERROR);
    assert!(resp.header.ra);
    assert_eq!(resp.answers.len(), 1);
    let opt = resp.opt().unwrap();
    assert_eq!(opt.udp_payload_size, 1220);

    assert_eq!(cache.len(), 1);
}

/// Scenario 2: cache hit with TTL decrement -- the same query repeated
/// after waiting, with no further upstream traffic, comes back with a
/// lower TTL than the original answer.
#[tokio::test]
async fn scenario_cache_hit_decrements_ttl_without_upstream_traffic() {
    let cache = ShardedCache::new(None, Duration::from_secs(3600));
    let upstream = FakeUpstream::new("up1", Ipv4Addr::new(192, 0, 2, 1), 60);
    let seq = Sequence::builder()
        .exec(Arc::new(CachePlugin::new(Arc::clone(&cache), None, 5)))
        .exec(Arc::new(Forward::new(Arc::clone(&upstream) as Arc<dyn Upstream>)))
        .build();
    let handler = handler_for(seq);

    let wire1 = a_query_wire(1, false, false, None);
    let out1 = handler.handle_query(&wire1, meta("198.51.100.1:53")).await.unwrap();
    let resp1 = Message::parse(&out1).unwrap();
    assert_eq!(resp1.answers[0].ttl, 60);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let wire2 = a_query_wire(2, false, false, None);
    let out2 = handler.handle_query(&wire2, meta("198.51.100.1:53")).await.unwrap();
    let resp2 = Message::parse(&out2).unwrap();
    assert!(resp2.answers[0].ttl < 60);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1, "second query must be served from cache");
}

/// Scenario 3: lazy refresh -- an already-expired lazy-mode cache entry
/// is served immediately at `lazy_reply_ttl`, and a background refresh
/// updates the cache without the caller waiting on it.
#[tokio::test]
async fn scenario_lazy_refresh_serves_stale_then_refreshes_in_background() {
    let cache = ShardedCache::new(None, Duration::from_secs(3600));
    let seed_query = Message::new_query(1, Question::new(Name::parse("example.com"), QType::A, QClass::IN));
    let key = flowdns::cache::cache_key(&seed_query, &[]).unwrap();

    let mut stale = Message::new_response_shell(&seed_query);
    stale.answers.push(ResourceRecord::new_a(Name::parse("example.com"), 3600, Ipv4Addr::new(192, 0, 2, 9)));
    let expired_at = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        .saturating_sub(1);
    cache.store(key, stale, expired_at);

    let fresh_upstream: Arc<dyn Upstream> = FakeUpstream::new("fresh", Ipv4Addr::new(192, 0, 2, 1), 3600);
    let seq = Sequence::builder()
        .exec(Arc::new(CachePlugin::new(Arc::clone(&cache), Some(3600), 5)))
        .exec(Arc::new(Forward::new(fresh_upstream)))
        .build();
    let handler = handler_for(seq);

    let wire = a_query_wire(7, false, false, None);
    let out = handler.handle_query(&wire, meta("198.51.100.1:53")).await.unwrap();
    let resp = Message::parse(&out).unwrap();
    assert_eq!(resp.answers[0].ttl, 5, "stale hit must reply immediately at lazy_reply_ttl");
    match resp.answers[0].rdata {
        RData::A(addr) => assert_eq!(addr, Ipv4Addr::new(192, 0, 2, 9), "stale value served, not the refreshed one"),
        _ => panic!("expected A record"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.len(), 1, "background refresh must have completed and re-stored the key");
}

/// Scenario 4: rate limiting -- qps=5/burst=5/mask4=24, ten queries from
/// the same /24 in a tight burst get five NOERROR answers and five
/// REFUSED.
#[tokio::test]
async fn scenario_rate_limit_refuses_past_burst() {
    let limiter = RateLimiter::new(RateLimiterConfig { qps: 5, burst: 5, mask4: 24, mask6: 48 });
    let upstream: Arc<dyn Upstream> = FakeUpstream::new("up1", Ipv4Addr::new(192, 0, 2, 1), 60);
    let seq = Sequence::builder()
        .exec(Arc::new(RateLimitPlugin::new(limiter)))
        .exec(Arc::new(Forward::new(upstream)))
        .build();
    let handler = handler_for(seq);

    let mut noerror = 0;
    let mut refused = 0;
    for i in 0..10u16 {
        let wire = a_query_wire(i, false, false, None);
        let out = handler.handle_query(&wire, meta("10.0.0.7:5353")).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        match resp.header.rcode() {
            Rcode::NOERROR => noerror += 1,
            Rcode::REFUSED => refused += 1,
            other => panic!("unexpected rcode {other:?}"),
        }
    }
    assert_eq!(noerror, 5);
    assert_eq!(refused, 5);
}

/// Scenario 5: concurrent fan-out with one bad upstream -- a failing
/// upstream must not delay or corrupt the good upstream's answer.
#[tokio::test]
async fn scenario_fan_out_returns_good_upstream_answer() {
    let bad: Arc<dyn Upstream> = FakeUpstream::failing("bad", Duration::from_millis(50));
    let good: Arc<dyn Upstream> = FakeUpstream::delayed("good", Ipv4Addr::new(192, 0, 2, 42), 30, Duration::from_millis(20));
    let seq = Sequence::builder().exec(Arc::new(FastForward::new(vec![bad, good], 2, Duration::from_secs(1)))).build();
    let handler = handler_for(seq);

    let wire = a_query_wire(9, false, false, None);
    let out = handler.handle_query(&wire, meta("198.51.100.1:53")).await.unwrap();
    let resp = Message::parse(&out).unwrap();
    assert_eq!(resp.header.rcode(), Rcode::NOERROR);
    match resp.answers[0].rdata {
        RData::A(addr) => assert_eq!(addr, Ipv4Addr::new(192, 0, 2, 42)),
        _ => panic!("expected A record from the fast upstream"),
    }
}

/// Scenario 6: EDNS0 pass-through -- a client OPT carrying DO=1 and a
/// Client Subnet option results in a response OPT with DO=1 set and a
/// forwarder-controlled UDP payload size; Client Subnet is forwarded to
/// the upstream query, and any padding is stripped from the response.
#[tokio::test]
async fn scenario_edns0_do_bit_and_client_subnet_pass_through() {
    let inner = FakeUpstream::new("up1", Ipv4Addr::new(192, 0, 2, 1), 60);
    let upstream: Arc<dyn Upstream> = Arc::new(AssertingUpstream { inner });
    let seq = Sequence::builder().exec(Arc::new(Forward::new(upstream))).build();
    let handler = handler_for(seq);

    let wire = a_query_wire(3, true, true, Some((Ipv4Addr::new(198, 51, 100, 0), 24)));
    let out = handler.handle_query(&wire, meta("198.51.100.1:53")).await.unwrap();
    let resp = Message::parse(&out).unwrap();
    let opt = resp.opt().unwrap();
    assert!(opt.do_flag(), "DO bit must be preserved in the response");
    assert_eq!(opt.udp_payload_size, 1220);
    assert!(opt.get(OptCode::Padding).is_none(), "padding must be stripped from the response");
}
