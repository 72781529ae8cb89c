//! Config-build-time tag→constructor registry (spec.md §9 "Dynamic
//! dispatch replaces reflection... Configurations map a string tag → a
//! constructor; unknown tags are rejected at startup").
//!
//! Distinct from `sequence::Registry`, which resolves `goto`/`jump` tags
//! to `Sequence`s at *walk* time; this one resolves upstream/matcher/
//! executable tags to constructed values at *config-build* time, wiring
//! a `Config` into the runtime types the handler and listeners need.
//! Grounded on the teacher's `config.rs` building a `DnsResolver` from
//! `DnsConfig` in one pass, generalized here into named-lookup tables so
//! a sequence built from declarative config can reference an upstream by
//! name instead of the wiring code holding every `Arc` by hand.

use crate::cache::ShardedCache;
use crate::config::Config;
use crate::dns::Message;
use crate::error::{CoreError, Result};
use crate::plugins::{CachePlugin, FastForward, RateLimitPlugin};
use crate::rate_limiter::RateLimiter;
use crate::sequence::{Engine, Executable, Registry as SequenceRegistry, Sequence};
use crate::upstream::bootstrap::BootstrapResolver;
use crate::upstream::udp::{UdpOneShot, UdpPipelined};
use crate::upstream::tcp::{TcpPerQuery, TcpPipelined};
use crate::upstream::doh::DohClient;
use crate::upstream::doq::DoqClient;
use crate::upstream::{Scheme, Upstream, UpstreamConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Well-known root/public resolvers used to turn an upstream's hostname
/// into a dial-able address when no literal `bootstrap_ip` is given.
const DEFAULT_BOOTSTRAP_SERVERS: &[&str] = &["1.1.1.1:53", "9.9.9.9:53"];

/// Resolves every configured upstream into a live client, then assembles
/// the single default entry sequence (rate limit → cache → fan-out)
/// spec.md §8's scenarios exercise. Operators wanting a richer pipeline
/// (per-domain routing, blackholes, marks) construct their own
/// `sequence::Registry` directly from the `sequence`/`matchers`/
/// `plugins` building blocks this module re-exports the constructors
/// for; this builder exists to make the common case (one pipeline, N
/// upstreams) config-driven without hand-wiring `Arc`s in `main.rs`.
pub struct PluginRegistry {
    upstreams: HashMap<String, Arc<dyn Upstream>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { upstreams: HashMap::new() }
    }

    pub fn upstream(&self, name: &str) -> Result<Arc<dyn Upstream>> {
        self.upstreams.get(name).cloned().ok_or_else(|| CoreError::UnknownTag(name.to_string()))
    }

    pub fn upstream_names(&self) -> impl Iterator<Item = &str> {
        self.upstreams.keys().map(String::as_str)
    }

    /// Builds one upstream client from its config entry, dialing through
    /// the bootstrap resolver when `address` is a hostname rather than a
    /// literal IP.
    pub async fn register_upstream(&mut self, entry: &crate::config::UpstreamEntry, bootstrap: &Arc<BootstrapResolver>) -> Result<()> {
        let uc = entry.to_upstream_config()?;
        let addr = resolve_dial_addr(&uc, bootstrap).await?;
        let upstream: Arc<dyn Upstream> = build_upstream(&uc, addr).await?;
        self.upstreams.insert(entry.name.clone(), upstream);
        Ok(())
    }

    pub async fn load_from_config(config: &Config) -> Result<Self> {
        let bootstrap_servers: Vec<SocketAddr> =
            DEFAULT_BOOTSTRAP_SERVERS.iter().filter_map(|s| s.parse().ok()).collect();
        let bootstrap = Arc::new(BootstrapResolver::new(bootstrap_servers, Duration::from_secs(2)));

        let mut registry = Self::new();
        for entry in &config.upstreams {
            registry.register_upstream(entry, &bootstrap).await?;
        }
        Ok(registry)
    }

    /// Wires the default entry sequence: rate limit (if `qps`/`burst`
    /// configured) → cache (§4.4's hit/expired-lazy/miss tree) → fan-out
    /// across every registered upstream, concurrency capped at the
    /// upstream count. Registered under `config.entry_tag`.
    pub fn build_default_engine(&self, config: &Config) -> Result<Engine> {
        if self.upstreams.is_empty() {
            return Err(CoreError::Config("no upstreams configured".into()));
        }

        let cache: Arc<ShardedCache<Message>> = ShardedCache::new(
            config.cache.capacity,
            Duration::from_millis(config.cache.sweep_interval_ms),
        );
        let cache_exec: Arc<dyn Executable> =
            Arc::new(CachePlugin::new(cache, config.cache.lazy_ttl, config.cache.lazy_reply_ttl));

        let all_upstreams: Vec<Arc<dyn Upstream>> = self.upstreams.values().cloned().collect();
        let fan_out: Arc<dyn Executable> =
            Arc::new(FastForward::new(all_upstreams.clone(), all_upstreams.len(), Duration::from_secs(2)));

        let limiter = RateLimiter::new((&config.rate_limiter).into());
        let rate_limit_exec: Arc<dyn Executable> = Arc::new(RateLimitPlugin::new(limiter));

        let entry = Sequence::builder().exec(rate_limit_exec).exec(cache_exec).exec(fan_out).build();

        let mut seq_registry = SequenceRegistry::new();
        seq_registry.register(config.entry_tag.clone(), entry);
        Ok(Engine::new(seq_registry, config.entry_tag.clone()))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn resolve_dial_addr(uc: &UpstreamConfig, bootstrap: &Arc<BootstrapResolver>) -> Result<SocketAddr> {
    if let Some(ip) = uc.bootstrap_ip {
        return Ok(SocketAddr::new(ip, uc.port));
    }
    let ip = bootstrap.resolve(&uc.address).await?;
    Ok(SocketAddr::new(ip, uc.port))
}

async fn build_upstream(uc: &UpstreamConfig, addr: SocketAddr) -> Result<Arc<dyn Upstream>> {
    let tls_name = uc.tls_server_name.clone().unwrap_or_else(|| uc.address.clone());
    match uc.scheme {
        Scheme::Udp if uc.pipelining => Ok(Arc::new(
            UdpPipelined::connect(uc.name.clone(), addr, uc.per_call_timeout, uc.trusted).await?,
        )),
        Scheme::Udp => Ok(Arc::new(UdpOneShot::new(uc.name.clone(), addr, uc.per_call_timeout, uc.trusted))),
        Scheme::Tcp if uc.pipelining => Ok(Arc::new(TcpPipelined::new(
            uc.name.clone(),
            addr,
            None,
            uc.per_call_timeout,
            uc.trusted,
        ))),
        Scheme::Tcp => Ok(Arc::new(TcpPerQuery::new(uc.name.clone(), addr, None, uc.per_call_timeout, uc.trusted))),
        Scheme::Tls if uc.pipelining => Ok(Arc::new(TcpPipelined::new(
            uc.name.clone(),
            addr,
            Some((tls_name, uc.skip_tls_verify)),
            uc.per_call_timeout,
            uc.trusted,
        ))),
        Scheme::Tls => Ok(Arc::new(TcpPerQuery::new(
            uc.name.clone(),
            addr,
            Some((tls_name, uc.skip_tls_verify)),
            uc.per_call_timeout,
            uc.trusted,
        ))),
        Scheme::Https => {
            let url = format!("https://{}:{}/dns-query", uc.address, uc.port);
            Ok(Arc::new(DohClient::new(uc.name.clone(), url, uc.per_call_timeout, uc.skip_tls_verify, uc.trusted)?))
        }
        Scheme::Quic => Ok(Arc::new(DoqClient::new(
            uc.name.clone(),
            addr,
            tls_name,
            uc.per_call_timeout,
            uc.skip_tls_verify,
            uc.trusted,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamEntry;

    fn entry(name: &str, address: &str) -> UpstreamEntry {
        UpstreamEntry {
            name: name.into(),
            scheme: "udp".into(),
            address: address.into(),
            port: 53,
            bootstrap_ip: None,
            tls_server_name: None,
            skip_tls_verify: false,
            pipelining: false,
            idle_timeout_ms: 30_000,
            max_conns: 4,
            trusted: true,
            per_call_timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn registers_literal_ip_upstream_without_network() {
        let bootstrap = Arc::new(BootstrapResolver::new(vec![], Duration::from_secs(1)));
        let mut registry = PluginRegistry::new();
        registry.register_upstream(&entry("cloudflare", "1.1.1.1"), &bootstrap).await.unwrap();
        assert!(registry.upstream("cloudflare").is_ok());
        assert!(registry.upstream("missing").is_err());
    }

    #[tokio::test]
    async fn build_default_engine_requires_at_least_one_upstream() {
        let registry = PluginRegistry::new();
        let config = Config::default();
        assert!(registry.build_default_engine(&config).is_err());
    }

    #[tokio::test]
    async fn build_default_engine_wires_configured_entry_tag() {
        let bootstrap = Arc::new(BootstrapResolver::new(vec![], Duration::from_secs(1)));
        let mut registry = PluginRegistry::new();
        registry.register_upstream(&entry("cloudflare", "1.1.1.1"), &bootstrap).await.unwrap();
        let mut config = Config::default();
        config.entry_tag = "main".into();
        let engine = registry.build_default_engine(&config).unwrap();
        drop(engine);
    }
}
