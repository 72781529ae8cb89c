//! Unified error type for the resolver core.
//!
//! Mirrors the shape the rest of the pipeline expects: cloneable so the same
//! error can be logged, turned into telemetry, and converted into a DNS
//! response without fighting ownership.

use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // IO
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    // Wire parsing
    #[error("invalid dns header")]
    InvalidHeader,
    #[error("invalid label")]
    InvalidLabel,
    #[error("invalid question section")]
    InvalidQuestion,
    #[error("invalid record section")]
    InvalidRecord,
    #[error("message truncated mid-parse")]
    UnexpectedEof,
    #[error("compression pointer loop or out-of-range jump")]
    CompressionLoop,
    #[error("parse error: {0}")]
    Parse(String),

    // Sequence engine
    #[error("unknown plugin tag: {0}")]
    UnknownTag(String),
    #[error("matcher error: {0}")]
    Matcher(String),
    #[error("executable error: {0}")]
    Executable(String),

    // Upstream
    #[error("upstream dial/io failure: {0}")]
    Upstream(String),
    #[error("all upstreams failed")]
    AllUpstreamsFailed,
    #[error("operation timed out")]
    Timeout,
    #[error("bootstrap resolution failed: {0}")]
    Bootstrap(String),

    // Cache
    #[error("cache error: {0}")]
    Cache(String),
    #[error("redis error: {0}")]
    Redis(String),

    // Rate limiting
    #[error("rate limited")]
    RateLimited,

    // Config
    #[error("invalid config: {0}")]
    Config(String),

    // Internal invariant
    #[error("internal invariant breach: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
