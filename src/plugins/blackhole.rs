//! Drops a query with a synthesized response and stops the sequence
//! (e.g. for a blocklist rule's `then` branch): an unconditional
//! short-circuit executable, configurable by rcode.

use crate::context::QueryContext;
use crate::dns::{Message, Rcode};
use crate::error::Result;
use crate::sequence::{Chain, Executable};
use async_trait::async_trait;

pub struct Blackhole {
    rcode: Rcode,
}

impl Blackhole {
    pub fn new(rcode: Rcode) -> Self {
        Self { rcode }
    }

    pub fn refused() -> Self {
        Self::new(Rcode::REFUSED)
    }

    pub fn nxdomain() -> Self {
        Self::new(Rcode::NXDOMAIN)
    }
}

#[async_trait]
impl Executable for Blackhole {
    async fn execute(&self, ctx: &mut QueryContext, _next: Chain) -> Result<()> {
        let mut resp = Message::new_response_shell(&ctx.query);
        resp.header.set_rcode(self.rcode);
        ctx.set_response(resp);
        ctx.short_circuit();
        Ok(())
    }
}
