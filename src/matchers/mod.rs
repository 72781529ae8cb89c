//! Matchers: pure, side-effect-free (aside from documented marks)
//! predicates over a `QueryContext` (spec.md §4.2).

pub mod domain;
pub mod int;
pub mod ip;
pub mod mark;

use crate::context::QueryContext;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Matcher: Send + Sync {
    async fn matches(&self, ctx: &QueryContext) -> Result<bool>;
}

/// AND-chains a list of matchers, short-circuiting on the first `false`
/// or error, matching spec.md §4.1's `if` node semantics.
pub struct All(pub Vec<Box<dyn Matcher>>);

#[async_trait]
impl Matcher for All {
    async fn matches(&self, ctx: &QueryContext) -> Result<bool> {
        for m in &self.0 {
            if !m.matches(ctx).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub use domain::DomainMatcher;
pub use int::IntMatcher;
pub use ip::IpMatcher;
pub use mark::MarkMatcher;
