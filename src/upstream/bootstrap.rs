//! Bootstrap resolver (spec.md §4.3 "Bootstrap"): resolves an upstream's
//! hostname (for DoH/DoQ/DoT upstreams configured by name rather than
//! literal IP) by querying a small fixed set of literal-IP bootstrap
//! servers over plain UDP — never recursing through the plugin pipeline
//! itself, to avoid a dependency cycle between "resolve the resolver"
//! and "resolve with the resolver". Holds an in-process positive cache
//! so steady-state lookups don't round-trip to the bootstrap server at
//! all, and refreshes in the background on TTL expiry without blocking
//! a caller that already has a usable (if stale) answer.

use super::udp::UdpOneShot;
use super::Upstream;
use crate::dns::enums::{QClass, QType};
use crate::dns::message::Message;
use crate::dns::question::Question;
use crate::error::{CoreError, Result};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CachedAddr {
    addr: IpAddr,
    expires_at: Instant,
}

/// Resolves hostnames to `IpAddr`s against a fixed list of literal-IP
/// bootstrap servers, with a positive-only in-process cache.
pub struct BootstrapResolver {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    cache: DashMap<String, CachedAddr>,
    refreshing: DashMap<String, ()>,
}

impl BootstrapResolver {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { servers, timeout, cache: DashMap::new(), refreshing: DashMap::new() }
    }

    pub async fn resolve(self: &Arc<Self>, host: &str) -> Result<IpAddr> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(addr);
        }

        if let Some(cached) = self.cache.get(host) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.addr);
            }
            let stale = cached.addr;
            drop(cached);
            self.spawn_refresh(host.to_string());
            return Ok(stale);
        }

        self.resolve_uncached(host).await
    }

    fn spawn_refresh(self: &Arc<Self>, host: String) {
        if self.refreshing.insert(host.clone(), ()).is_some() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.resolve_uncached(&host).await;
            this.refreshing.remove(&host);
        });
    }

    async fn resolve_uncached(&self, host: &str) -> Result<IpAddr> {
        let question = Question::new(crate::dns::name::Name::parse(host), QType::A, QClass::IN);
        let query = Message::new_query(super::next_query_id(), question);

        let mut last_err = None;
        for server in &self.servers {
            let client = UdpOneShot::new("bootstrap", *server, self.timeout, true);
            match client.exchange(&query).await {
                Ok(resp) => {
                    if let Some(addr) = first_a_record(&resp) {
                        let ttl = resp.min_answer_ttl().unwrap_or(60).max(1);
                        self.cache.insert(
                            host.to_string(),
                            CachedAddr { addr, expires_at: Instant::now() + Duration::from_secs(ttl as u64) },
                        );
                        return Ok(addr);
                    }
                    last_err = Some(CoreError::Bootstrap(format!("no A record for {host}")));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| CoreError::Bootstrap(format!("no bootstrap servers configured for {host}"))))
    }
}

fn first_a_record(msg: &Message) -> Option<IpAddr> {
    msg.answers.iter().find_map(|rr| match rr.rdata {
        crate::dns::RData::A(addr) => Some(IpAddr::V4(addr)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_ip_short_circuits_without_network() {
        let resolver = Arc::new(BootstrapResolver::new(vec![], Duration::from_secs(1)));
        let addr = resolver.resolve("1.1.1.1").await.unwrap();
        assert_eq!(addr, "1.1.1.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn missing_bootstrap_servers_is_an_error() {
        let resolver = Arc::new(BootstrapResolver::new(vec![], Duration::from_secs(1)));
        let err = resolver.resolve("example.com").await.unwrap_err();
        assert!(matches!(err, CoreError::Bootstrap(_)));
    }
}
