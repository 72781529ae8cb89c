//! Executable implementations that sit at sequence `exec` nodes (spec.md
//! §4.1/§4.4/§4.5): cache, rate limiting, forwarding, fan-out, and a
//! couple of small utility executables. Each type here implements
//! `crate::sequence::Executable`; wiring string tags to constructors is
//! `crate::registry`'s job, not this module's.

pub mod blackhole;
pub mod cache_plugin;
pub mod fastforward;
pub mod forward;
pub mod mark;
pub mod ratelimit;

pub use blackhole::Blackhole;
pub use cache_plugin::CachePlugin;
pub use fastforward::FastForward;
pub use forward::Forward;
pub use mark::SetMark;
pub use ratelimit::RateLimitPlugin;
