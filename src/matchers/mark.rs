//! Inspects a mark a previous executable in the same sequence set
//! (spec.md GLOSSARY "Mark", §4.2 "mark matcher").

use super::Matcher;
use crate::context::QueryContext;
use crate::error::Result;
use async_trait::async_trait;

pub struct MarkMatcher {
    mark: u32,
    /// When `false`, matches queries *without* the mark — lets a single
    /// rule express "only if not already handled" without a separate
    /// negation combinator.
    negate: bool,
}

impl MarkMatcher {
    pub fn has(mark: u32) -> Self {
        Self { mark, negate: false }
    }

    pub fn lacks(mark: u32) -> Self {
        Self { mark, negate: true }
    }
}

#[async_trait]
impl Matcher for MarkMatcher {
    async fn matches(&self, ctx: &QueryContext) -> Result<bool> {
        let present = ctx.marks.has(self.mark);
        Ok(present != self.negate)
    }
}
