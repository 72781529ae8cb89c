//! Upstream transport layer (spec.md §4.3): connection-reusing clients
//! for UDP, TCP/TLS, DoH, and DoQ, each exposing one `Exchange` contract.
//! Grounded on the teacher's `resolver.rs` socket-management idiom
//! (`UdpSocket`/`TcpStream` pooling, `AtomicU16` query id counter,
//! `tokio::time::timeout` wrapping every exchange) generalized from one
//! monolithic resolver into per-transport client types plus a shared
//! `Upstream` trait so the fan-out executable can treat them uniformly.

pub mod bootstrap;
pub mod doh;
pub mod doq;
pub mod pool;
pub mod tcp;
pub mod udp;

use crate::dns::Message;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

static QUERY_ID_COUNTER: AtomicU16 = AtomicU16::new(1);

/// A process-unique-enough DNS wire id for a new outbound query. Not
/// required to be globally unique (the id space is 16 bits and shared
/// across all upstreams) only unique among a single upstream's
/// concurrently outstanding queries, which pipelined clients enforce
/// themselves; this counter just avoids the obvious `id=1` collision
/// storm under load.
pub fn next_query_id() -> u16 {
    QUERY_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
}

/// Static configuration for one upstream (spec.md §3 "Upstream").
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    pub scheme: Scheme,
    pub address: String,
    pub port: u16,
    /// Set when `address` is a hostname rather than a literal IP; the
    /// bootstrap resolver turns it into a dial-able `SocketAddr`.
    pub bootstrap_ip: Option<std::net::IpAddr>,
    pub tls_server_name: Option<String>,
    pub skip_tls_verify: bool,
    pub pipelining: bool,
    pub idle_timeout: Duration,
    pub max_conns: usize,
    /// Non-success rcodes from this upstream are accepted as final
    /// rather than treated as a failure to race against siblings
    /// (GLOSSARY "Trusted upstream").
    pub trusted: bool,
    pub per_call_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            scheme: Scheme::Udp,
            address: String::new(),
            port: 53,
            bootstrap_ip: None,
            tls_server_name: None,
            skip_tls_verify: false,
            pipelining: false,
            idle_timeout: Duration::from_secs(30),
            max_conns: 4,
            trusted: true,
            per_call_timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message>;

    fn name(&self) -> &str;

    /// Whether a non-NOERROR/NXDOMAIN rcode from this upstream should be
    /// treated as the final answer (vs. a failure for fan-out purposes).
    fn trusted(&self) -> bool {
        true
    }
}
