//! Typed configuration surface (spec.md §6 "Configuration surface").
//!
//! Parsing the surrounding file (YAML/TOML/JSON/env) and watching it for
//! changes is out of scope — these structs are what an external loader
//! populates. Modeled on the teacher's `config.rs`/`config/cache_config.rs`
//! plain-struct-with-defaults shape, but `serde::Deserialize`-derived so a
//! boundary loader can build one from any format, per SPEC_FULL.md §3.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_entry_tag() -> String {
    "entry".into()
}

fn default_udp_bind() -> String {
    "0.0.0.0:53".into()
}

fn default_tcp_bind() -> String {
    "0.0.0.0:53".into()
}

fn default_admin_bind() -> String {
    "127.0.0.1:9053".into()
}

fn default_query_deadline_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tag of the sequence the handler runs for every inbound query.
    #[serde(default = "default_entry_tag")]
    pub entry_tag: String,
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,
    #[serde(default = "default_tcp_bind")]
    pub tcp_bind: String,
    pub tls: Option<TlsListenerConfig>,
    pub doh: Option<DohListenerConfig>,
    pub doq: Option<DoqListenerConfig>,
    #[serde(default = "default_admin_bind")]
    pub admin_bind: String,
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,
    #[serde(default)]
    pub upstreams: Vec<UpstreamEntry>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterSurface,
}

impl Config {
    pub fn query_deadline(&self) -> Duration {
        Duration::from_millis(self.query_deadline_ms)
    }

    /// Convenience used by tests and the example binary (SPEC_FULL.md §3);
    /// the core never watches the filesystem on its own.
    pub fn from_toml_str(s: &str) -> crate::error::Result<Self> {
        toml::from_str(s).map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry_tag: default_entry_tag(),
            udp_bind: default_udp_bind(),
            tcp_bind: default_tcp_bind(),
            tls: None,
            doh: None,
            doq: None,
            admin_bind: default_admin_bind(),
            query_deadline_ms: default_query_deadline_ms(),
            upstreams: Vec::new(),
            cache: CacheConfig::default(),
            rate_limiter: RateLimiterSurface::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsListenerConfig {
    pub bind: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DohListenerConfig {
    pub bind: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoqListenerConfig {
    pub bind: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

fn default_scheme() -> String {
    "udp".into()
}

fn default_port() -> u16 {
    53
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_max_conns() -> usize {
    4
}

fn default_per_call_timeout_ms() -> u64 {
    2_000
}

fn default_trusted() -> bool {
    true
}

/// One upstream (spec.md §6 "per-upstream": address URL, optional
/// bootstrap ip, TLS cert/key and skip-verify, idle timeout, max conns,
/// pipelining flag, HTTP/3 enable). Dial bindings (SO_MARK, interface,
/// SOCKS5) are named in spec.md but have no bearing on the wire protocol
/// this core implements against `tokio`'s portable socket API; they are
/// left to the boundary's dialer, same as file-watching config loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamEntry {
    pub name: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub bootstrap_ip: Option<std::net::IpAddr>,
    pub tls_server_name: Option<String>,
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub pipelining: bool,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    #[serde(default = "default_trusted")]
    pub trusted: bool,
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
}

impl UpstreamEntry {
    pub fn to_upstream_config(&self) -> crate::error::Result<crate::upstream::UpstreamConfig> {
        let scheme = match self.scheme.as_str() {
            "udp" => crate::upstream::Scheme::Udp,
            "tcp" => crate::upstream::Scheme::Tcp,
            "tls" => crate::upstream::Scheme::Tls,
            "https" | "doh" => crate::upstream::Scheme::Https,
            "quic" | "doq" => crate::upstream::Scheme::Quic,
            other => return Err(crate::error::CoreError::Config(format!("unknown upstream scheme: {other}"))),
        };
        Ok(crate::upstream::UpstreamConfig {
            name: self.name.clone(),
            scheme,
            address: self.address.clone(),
            port: self.port,
            bootstrap_ip: self.bootstrap_ip,
            tls_server_name: self.tls_server_name.clone(),
            skip_tls_verify: self.skip_tls_verify,
            pipelining: self.pipelining,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            max_conns: self.max_conns,
            trusted: self.trusted,
            per_call_timeout: Duration::from_millis(self.per_call_timeout_ms),
        })
    }
}

fn default_cache_sweep_ms() -> u64 {
    10_000
}

fn default_lazy_reply_ttl() -> u32 {
    5
}

/// spec.md §6 "per-cache": size, lazy-ttl, lazy-reply-ttl, optional redis
/// URL. The redis URL is accepted here for surface completeness (the
/// teacher's `cache/redis_backend.rs` persists there) but this crate's
/// cache executable only wires the in-process `ShardedCache`; a redis-
/// backed `ShardedCache` equivalent is future work, not implemented here
/// (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: Option<usize>,
    pub lazy_ttl: Option<u32>,
    #[serde(default = "default_lazy_reply_ttl")]
    pub lazy_reply_ttl: u32,
    #[serde(default = "default_cache_sweep_ms")]
    pub sweep_interval_ms: u64,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            lazy_ttl: None,
            lazy_reply_ttl: default_lazy_reply_ttl(),
            sweep_interval_ms: default_cache_sweep_ms(),
            redis_url: None,
        }
    }
}

fn default_qps() -> u32 {
    50
}

fn default_burst() -> u32 {
    50
}

fn default_mask4() -> u8 {
    32
}

fn default_mask6() -> u8 {
    48
}

/// spec.md §6 "per-rate-limiter": qps, burst, mask4, mask6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSurface {
    #[serde(default = "default_qps")]
    pub qps: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_mask4")]
    pub mask4: u8,
    #[serde(default = "default_mask6")]
    pub mask6: u8,
}

impl Default for RateLimiterSurface {
    fn default() -> Self {
        Self { qps: default_qps(), burst: default_burst(), mask4: default_mask4(), mask6: default_mask6() }
    }
}

impl From<&RateLimiterSurface> for crate::rate_limiter::RateLimiterConfig {
    fn from(s: &RateLimiterSurface) -> Self {
        Self { qps: s.qps, burst: s.burst, mask4: s.mask4, mask6: s.mask6 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.entry_tag, "entry");
        assert_eq!(cfg.rate_limiter.qps, 50);
    }

    #[test]
    fn upstream_entry_round_trips_into_upstream_config() {
        let entry = UpstreamEntry {
            name: "cloudflare".into(),
            scheme: "udp".into(),
            address: "1.1.1.1".into(),
            port: 53,
            bootstrap_ip: None,
            tls_server_name: None,
            skip_tls_verify: false,
            pipelining: false,
            idle_timeout_ms: 30_000,
            max_conns: 4,
            trusted: true,
            per_call_timeout_ms: 2_000,
        };
        let uc = entry.to_upstream_config().unwrap();
        assert_eq!(uc.scheme, crate::upstream::Scheme::Udp);
        assert_eq!(uc.port, 53);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let entry = UpstreamEntry {
            name: "x".into(),
            scheme: "carrier-pigeon".into(),
            address: "0.0.0.0".into(),
            port: 53,
            bootstrap_ip: None,
            tls_server_name: None,
            skip_tls_verify: false,
            pipelining: false,
            idle_timeout_ms: 30_000,
            max_conns: 4,
            trusted: true,
            per_call_timeout_ms: 2_000,
        };
        assert!(entry.to_upstream_config().is_err());
    }

    #[test]
    fn full_toml_document_parses() {
        let toml = r#"
            entry_tag = "main"
            udp_bind = "0.0.0.0:5300"

            [[upstreams]]
            name = "cloudflare"
            address = "1.1.1.1"

            [cache]
            capacity = 100000
            lazy_ttl = 3600
            lazy_reply_ttl = 5

            [rate_limiter]
            qps = 5
            burst = 5
            mask4 = 24
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.entry_tag, "main");
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.cache.lazy_ttl, Some(3600));
        assert_eq!(cfg.rate_limiter.mask4, 24);
    }
}
