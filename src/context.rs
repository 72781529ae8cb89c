//! The per-query state carried through the sequence engine (spec.md §3).

use crate::dns::{Message, Opt};
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
}

impl Transport {
    pub fn is_stream(self) -> bool {
        !matches!(self, Transport::Udp)
    }
}

/// Read-only metadata about the inbound connection, set once by the
/// listener/handler and never mutated by plugins.
#[derive(Clone, Debug)]
pub struct ServerMeta {
    pub client_addr: SocketAddr,
    pub transport: Transport,
}

/// Per-query plugin-to-plugin handoff storage. Keys are `u32` so
/// unrelated plugins can reserve their own numeric namespace without a
/// shared registry of string keys; values are boxed `Any` and downcast
/// by the consumer.
#[derive(Default)]
pub struct Kv {
    map: Option<HashMap<u32, Box<dyn Any + Send + Sync>>>,
}

impl Kv {
    pub fn insert<T: Any + Send + Sync>(&mut self, key: u32, value: T) {
        self.map.get_or_insert_with(HashMap::new).insert(key, Box::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, key: u32) -> Option<&T> {
        self.map.as_ref()?.get(&key)?.downcast_ref::<T>()
    }

    pub fn remove<T: Any + Send + Sync>(&mut self, key: u32) -> Option<T> {
        let boxed = self.map.as_mut()?.remove(&key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }
}

/// Boolean tags one plugin sets for a later plugin in the same sequence
/// to observe (spec.md GLOSSARY "Mark").
#[derive(Default, Clone)]
pub struct Marks {
    set: Option<rustc_hash::FxHashSet<u32>>,
}

impl Marks {
    pub fn set(&mut self, mark: u32) {
        self.set.get_or_insert_with(Default::default).insert(mark);
    }

    pub fn has(&self, mark: u32) -> bool {
        self.set.as_ref().is_some_and(|s| s.contains(&mark))
    }

    pub fn clear(&mut self, mark: u32) {
        if let Some(s) = self.set.as_mut() {
            s.remove(&mark);
        }
    }
}

pub struct QueryContext {
    pub id: u32,
    pub start_time: Instant,
    pub server_meta: ServerMeta,
    pub query: Message,
    pub client_opt: Option<Opt>,
    pub response: Option<Message>,
    pub resp_opt: Option<Opt>,
    pub upstream_opt: Option<Opt>,
    pub kv: Kv,
    pub marks: Marks,
    /// Set by an executable to stop the enclosing sequence from walking
    /// forward (spec.md §4.1 "early termination").
    pub short_circuit: bool,
    /// Namespacing salt appended to the cache key so distinct pipeline
    /// branches don't collide (spec.md §3 "cache key").
    pub cache_salt: Vec<u8>,
}

impl QueryContext {
    pub fn new(query: Message, server_meta: ServerMeta) -> Self {
        let client_opt = query.opt();
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            start_time: Instant::now(),
            server_meta,
            query,
            client_opt,
            response: None,
            resp_opt: None,
            upstream_opt: None,
            kv: Kv::default(),
            marks: Marks::default(),
            short_circuit: false,
            cache_salt: Vec::new(),
        }
    }

    /// A deep copy suitable for concurrent fan-out (spec.md §3 invariant
    /// iv, §5 ordering guarantees): independent `query`/response state,
    /// independent kv/marks so the branches cannot observe each other.
    pub fn fork(&self) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            start_time: self.start_time,
            server_meta: self.server_meta.clone(),
            query: self.query.clone(),
            client_opt: self.client_opt.clone(),
            response: self.response.clone(),
            resp_opt: self.resp_opt.clone(),
            upstream_opt: self.upstream_opt.clone(),
            kv: Kv::default(),
            marks: self.marks.clone(),
            short_circuit: false,
            cache_salt: self.cache_salt.clone(),
        }
    }

    pub fn set_response(&mut self, response: Message) {
        self.response = Some(response);
    }

    pub fn short_circuit(&mut self) {
        self.short_circuit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Name, QClass, QType, Question};
    use std::net::{IpAddr, Ipv4Addr};

    fn meta() -> ServerMeta {
        ServerMeta {
            client_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5353),
            transport: Transport::Udp,
        }
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let q1 = Message::new_query(1, Question::new(Name::parse("a."), QType::A, QClass::IN));
        let q2 = Message::new_query(1, Question::new(Name::parse("b."), QType::A, QClass::IN));
        let c1 = QueryContext::new(q1, meta());
        let c2 = QueryContext::new(q2, meta());
        assert_ne!(c1.id, c2.id);
    }

    #[test]
    fn fork_does_not_share_kv_or_marks_mutation() {
        let q = Message::new_query(1, Question::new(Name::parse("a."), QType::A, QClass::IN));
        let mut ctx = QueryContext::new(q, meta());
        ctx.marks.set(7);
        let mut forked = ctx.fork();
        assert!(forked.marks.has(7));
        forked.marks.set(9);
        assert!(!ctx.marks.has(9));
    }
}
