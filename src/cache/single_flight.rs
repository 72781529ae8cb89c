//! Single-flight: at most one builder in flight per key; concurrent
//! callers for the same key share the result (spec.md §4.4, §5 "Single-
//! flight guarantees at-most-one builder per key at a time").

use crate::error::Result;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

pub struct SingleFlight<V: Clone + Send + Sync + 'static> {
    inflight: DashMap<Vec<u8>, SharedResult<V>>,
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    /// Runs `build` for `key` unless another caller's build for the same
    /// key is already in flight, in which case this call joins it. The
    /// returned value is `Clone`d out of the shared future so later
    /// mutation (id rewrite, TTL decrement) by one caller never affects
    /// another.
    pub async fn run<F>(&self, key: Vec<u8>, build: F) -> Result<V>
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let (shared, is_builder) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(o) => (o.get().clone(), false),
            Entry::Vacant(v) => {
                let shared: SharedResult<V> = build.boxed().shared();
                v.insert(shared.clone());
                (shared, true)
            }
        };
        let result = shared.await;
        if is_builder {
            self.inflight.remove(&key);
        }
        result
    }
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}
