//! Lightweight round-robin pool of pre-built `Upstream` clients sharing
//! one logical destination (spec.md §4.3 "connection pooling"): several
//! `TcpPipelined`/`UdpPipelined` connections dialed up front so one slow
//! or dead connection doesn't serialize every query behind it.

use super::Upstream;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct UpstreamPool {
    name: String,
    members: Vec<Arc<dyn Upstream>>,
    next: AtomicUsize,
}

impl UpstreamPool {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Upstream>>) -> Self {
        Self { name: name.into(), members, next: AtomicUsize::new(0) }
    }

    fn pick(&self) -> Arc<dyn Upstream> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.members.len();
        Arc::clone(&self.members[idx])
    }
}

#[async_trait]
impl Upstream for UpstreamPool {
    async fn exchange(&self, query: &crate::dns::Message) -> Result<crate::dns::Message> {
        self.pick().exchange(query).await
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn trusted(&self) -> bool {
        self.members.first().map(|m| m.trusted()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::Message;
    use std::sync::atomic::{AtomicUsize as TestCounter, Ordering as TestOrdering};

    struct Counting {
        hits: Arc<TestCounter>,
    }

    #[async_trait]
    impl Upstream for Counting {
        async fn exchange(&self, query: &Message) -> Result<Message> {
            self.hits.fetch_add(1, TestOrdering::SeqCst);
            Ok(query.clone())
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn round_robins_across_members() {
        let hits_a = Arc::new(TestCounter::new(0));
        let hits_b = Arc::new(TestCounter::new(0));
        let pool = UpstreamPool::new(
            "pool",
            vec![
                Arc::new(Counting { hits: Arc::clone(&hits_a) }),
                Arc::new(Counting { hits: Arc::clone(&hits_b) }),
            ],
        );
        let query = Message::default();
        for _ in 0..4 {
            pool.exchange(&query).await.unwrap();
        }
        assert_eq!(hits_a.load(TestOrdering::SeqCst), 2);
        assert_eq!(hits_b.load(TestOrdering::SeqCst), 2);
    }
}
