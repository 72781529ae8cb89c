//! Small-set matcher over qtype/qclass/rcode integers (spec.md §4.2).

use super::Matcher;
use crate::context::QueryContext;
use crate::dns::{QClass, QType, Rcode};
use crate::error::Result;
use async_trait::async_trait;
use rustc_hash::FxHashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntField {
    QType,
    QClass,
    Rcode,
}

pub struct IntMatcher {
    field: IntField,
    values: FxHashSet<u16>,
}

impl IntMatcher {
    pub fn qtype(values: impl IntoIterator<Item = QType>) -> Self {
        Self { field: IntField::QType, values: values.into_iter().map(|v| v.0).collect() }
    }

    pub fn qclass(values: impl IntoIterator<Item = QClass>) -> Self {
        Self { field: IntField::QClass, values: values.into_iter().map(|v| v.0).collect() }
    }

    pub fn rcode(values: impl IntoIterator<Item = Rcode>) -> Self {
        Self {
            field: IntField::Rcode,
            values: values.into_iter().map(|v| v.0 as u16).collect(),
        }
    }
}

#[async_trait]
impl Matcher for IntMatcher {
    async fn matches(&self, ctx: &QueryContext) -> Result<bool> {
        let value = match self.field {
            IntField::QType => ctx.query.question().map(|q| q.qtype.0),
            IntField::QClass => ctx.query.question().map(|q| q.qclass.0),
            IntField::Rcode => Some(ctx.query.header.rcode().0 as u16),
        };
        Ok(value.is_some_and(|v| self.values.contains(&v)))
    }
}
