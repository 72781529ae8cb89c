//! Sets or clears a mark on the query context (spec.md GLOSSARY "Mark":
//! a boolean tag one plugin sets for a later plugin, read back by
//! `crate::matchers::mark::MarkMatcher`), then continues the chain.

use crate::context::QueryContext;
use crate::error::Result;
use crate::sequence::{Chain, Executable};
use async_trait::async_trait;

pub struct SetMark {
    mark: u32,
    clear: bool,
}

impl SetMark {
    pub fn set(mark: u32) -> Self {
        Self { mark, clear: false }
    }

    pub fn clear(mark: u32) -> Self {
        Self { mark, clear: true }
    }
}

#[async_trait]
impl Executable for SetMark {
    async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
        if self.clear {
            ctx.marks.clear(self.mark);
        } else {
            ctx.marks.set(self.mark);
        }
        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ServerMeta, Transport};
    use crate::dns::{Message, Name, QClass, QType, Question};
    use crate::sequence::{Registry, Sequence};
    use std::sync::Arc;

    #[tokio::test]
    async fn mark_is_visible_downstream() {
        struct CheckMark;
        #[async_trait]
        impl Executable for CheckMark {
            async fn execute(&self, ctx: &mut QueryContext, _next: Chain) -> Result<()> {
                assert!(ctx.marks.has(42));
                Ok(())
            }
        }

        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        let mut ctx = QueryContext::new(
            Message::new_query(1, q),
            ServerMeta { client_addr: "127.0.0.1:5353".parse().unwrap(), transport: Transport::Udp },
        );
        let seq = Sequence::builder().exec(Arc::new(SetMark::set(42))).exec(Arc::new(CheckMark)).build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let registry = Arc::new(registry);
        let entry = registry.get("entry").unwrap();
        Chain::with_entry(registry, entry).run(&mut ctx).await.unwrap();
    }
}
