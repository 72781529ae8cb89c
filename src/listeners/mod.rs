//! Thin transport front ends (spec.md §1, SPEC_FULL.md §6 "[MODULE]
//! listeners"): each accepts connections/datagrams, frames the wire
//! bytes, and calls `Handler::handle_query`. All business logic lives in
//! the handler; these modules only know their transport's framing.
//!
//! Grounded on the teacher's `server.rs::run_udp_server`/`run_tcp_server`
//! (shutdown-aware accept loop via `tokio::select!` against a broadcast
//! receiver, buffer pool per connection class) and `transport/tls.rs`
//! (certificate loading / self-signed fallback); the DoQ accept loop is
//! enriched from the pack's AtlasDNS `doq.rs` server-side shape, reusing
//! the same `quinn` dependency pulled in for the upstream DoQ client.

pub mod doh;
pub mod doq;
pub mod tcp;
pub mod tls;
pub mod udp;
