//! The sequence engine: a DAG of matcher/executable nodes with control
//! flow (spec.md §4.1). A `Sequence` is an ordered list of `Node`s; an
//! `Engine` ties a named entry sequence to a `Registry` of goto/jump
//! targets and drives the walk.
//!
//! Generalizes the teacher's flat per-request dispatch (`resolver.rs`'s
//! straight-line recursive/iterative branch) into an operator-composable
//! graph, in the spirit of the pack's dcompass `Router`/tag-dispatch
//! idiom (`other_examples/.../dcompass-src-filter.rs.rs`), but with
//! explicit goto (tail-call, stack-clearing) vs jump (call, returning)
//! semantics spec.md requires.
//!
//! Frames hold `Arc<Sequence>` rather than borrowed references: a
//! `Chain` often outlives the stack frame that first built it (an
//! executable may stash it across an `.await` point or a spawned task),
//! so sharing ownership is simpler to reason about than threading a
//! registry lifetime through every plugin.

pub mod executable;

pub use executable::Executable;

use crate::context::QueryContext;
use crate::error::{CoreError, Result};
use crate::matchers::Matcher;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;

pub enum Node {
    Exec(Arc<dyn Executable>),
    If {
        matchers: Vec<Arc<dyn Matcher>>,
        then: Arc<Sequence>,
        or_else: Option<Arc<Sequence>>,
    },
    Goto(String),
    Jump(String),
}

#[derive(Default)]
pub struct Sequence {
    nodes: Vec<Node>,
}

impl Sequence {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn builder() -> SequenceBuilder {
        SequenceBuilder::default()
    }
}

#[derive(Default)]
pub struct SequenceBuilder {
    nodes: Vec<Node>,
}

impl SequenceBuilder {
    pub fn exec(mut self, e: Arc<dyn Executable>) -> Self {
        self.nodes.push(Node::Exec(e));
        self
    }

    pub fn if_then(mut self, matchers: Vec<Arc<dyn Matcher>>, then: Sequence) -> Self {
        self.nodes.push(Node::If { matchers, then: Arc::new(then), or_else: None });
        self
    }

    pub fn if_then_else(mut self, matchers: Vec<Arc<dyn Matcher>>, then: Sequence, or_else: Sequence) -> Self {
        self.nodes.push(Node::If {
            matchers,
            then: Arc::new(then),
            or_else: Some(Arc::new(or_else)),
        });
        self
    }

    pub fn goto(mut self, tag: impl Into<String>) -> Self {
        self.nodes.push(Node::Goto(tag.into()));
        self
    }

    pub fn jump(mut self, tag: impl Into<String>) -> Self {
        self.nodes.push(Node::Jump(tag.into()));
        self
    }

    pub fn build(self) -> Sequence {
        Sequence { nodes: self.nodes }
    }
}

/// Named sequences reachable by `goto`/`jump`. Separate from the
/// matcher/executable tag→constructor registry (config-build time
/// concern, see `crate::registry`); this one is consulted at walk time.
#[derive(Default)]
pub struct Registry {
    sequences: HashMap<String, Arc<Sequence>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, seq: Sequence) {
        self.sequences.insert(tag.into(), Arc::new(seq));
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Sequence>> {
        self.sequences.get(tag).cloned()
    }
}

struct Frame {
    seq: Arc<Sequence>,
    idx: usize,
}

/// The reified remainder of a sequence, handed to a recursive executable
/// so it can run "the rest of the pipeline" from wherever it chooses.
pub struct Chain {
    registry: Arc<Registry>,
    frames: Vec<Frame>,
}

impl Chain {
    /// Builds a chain starting at `entry`. `pub(crate)` rather than
    /// private: the handler wires a fresh `Chain` per inbound query
    /// (mirrored by `Engine::run`), and plugin unit tests build small
    /// ad-hoc chains the same way without needing a full `Engine`.
    pub(crate) fn with_entry(registry: Arc<Registry>, entry: Arc<Sequence>) -> Self {
        Self { registry, frames: vec![Frame { seq: entry, idx: 0 }] }
    }

    /// Drives the walk to completion: either an executable is reached
    /// (which takes over — it may or may not call `next.run` again), the
    /// frame stack empties (sequence end, no response: the handler
    /// synthesizes REFUSED), or a matcher/goto/jump error aborts with
    /// `Err`.
    pub fn run(mut self, ctx: &mut QueryContext) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            loop {
                if ctx.short_circuit {
                    return Ok(());
                }
                let Some(frame) = self.frames.last_mut() else {
                    return Ok(());
                };
                if frame.idx >= frame.seq.nodes.len() {
                    self.frames.pop();
                    continue;
                }
                let node_idx = frame.idx;
                frame.idx += 1;
                let seq = Arc::clone(&frame.seq);
                let node = &seq.nodes[node_idx];

                match node {
                    Node::Exec(exec) => {
                        let exec = Arc::clone(exec);
                        return exec.execute(ctx, self).await;
                    }
                    Node::If { matchers, then, or_else } => {
                        let mut all_true = true;
                        for m in matchers {
                            if !m.matches(ctx).await? {
                                all_true = false;
                                break;
                            }
                        }
                        if all_true {
                            self.frames.push(Frame { seq: Arc::clone(then), idx: 0 });
                        } else if let Some(else_seq) = or_else {
                            self.frames.push(Frame { seq: Arc::clone(else_seq), idx: 0 });
                        }
                    }
                    Node::Goto(tag) => {
                        let target = self
                            .registry
                            .get(tag)
                            .ok_or_else(|| CoreError::UnknownTag(tag.clone()))?;
                        self.frames.clear();
                        self.frames.push(Frame { seq: target, idx: 0 });
                    }
                    Node::Jump(tag) => {
                        let target = self
                            .registry
                            .get(tag)
                            .ok_or_else(|| CoreError::UnknownTag(tag.clone()))?;
                        self.frames.push(Frame { seq: target, idx: 0 });
                    }
                }
            }
        })
    }
}

/// Binds a named entry sequence to a registry and drives one query
/// through it (spec.md §4.6 step 5).
pub struct Engine {
    registry: Arc<Registry>,
    entry_tag: String,
}

impl Engine {
    pub fn new(registry: Registry, entry_tag: impl Into<String>) -> Self {
        Self { registry: Arc::new(registry), entry_tag: entry_tag.into() }
    }

    pub async fn run(&self, ctx: &mut QueryContext) -> Result<()> {
        let entry = self
            .registry
            .get(&self.entry_tag)
            .ok_or_else(|| CoreError::UnknownTag(self.entry_tag.clone()))?;
        Chain::with_entry(Arc::clone(&self.registry), entry).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ServerMeta, Transport};
    use crate::dns::{Message, Name, QClass, QType, Question};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingExec(Arc<AtomicUsize>, usize);

    #[async_trait::async_trait]
    impl Executable for RecordingExec {
        async fn execute(&self, ctx: &mut QueryContext, next: Chain) -> Result<()> {
            self.0.fetch_add(self.1, Ordering::SeqCst);
            next.run(ctx).await
        }
    }

    struct ShortCircuitExec;

    #[async_trait::async_trait]
    impl Executable for ShortCircuitExec {
        async fn execute(&self, ctx: &mut QueryContext, _next: Chain) -> Result<()> {
            ctx.set_response(Message::new_query(1, Question::new(Name::root(), QType::A, QClass::IN)));
            ctx.short_circuit();
            Ok(())
        }
    }

    struct ErrExec;

    #[async_trait::async_trait]
    impl Executable for ErrExec {
        async fn execute(&self, _ctx: &mut QueryContext, _next: Chain) -> Result<()> {
            Err(CoreError::Internal("boom".into()))
        }
    }

    fn ctx() -> QueryContext {
        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        QueryContext::new(
            Message::new_query(1, q),
            ServerMeta { client_addr: "127.0.0.1:5353".parse().unwrap(), transport: Transport::Udp },
        )
    }

    #[tokio::test]
    async fn short_circuit_stops_remaining_execs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seq = Sequence::builder()
            .exec(Arc::new(RecordingExec(counter.clone(), 1)))
            .exec(Arc::new(ShortCircuitExec))
            .exec(Arc::new(RecordingExec(counter.clone(), 100)))
            .build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let engine = Engine::new(registry, "entry");
        let mut c = ctx();
        engine.run(&mut c).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(c.response.is_some());
    }

    #[tokio::test]
    async fn exec_skip_then_err_short_circuits_before_error() {
        // Mirrors spec.md §8's `[exec_ok, exec_skip, exec_err]` invariant:
        // the short-circuiting middle node means the error node never runs.
        let seq = Sequence::builder()
            .exec(Arc::new(ShortCircuitExec))
            .exec(Arc::new(ErrExec))
            .build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let engine = Engine::new(registry, "entry");
        let mut c = ctx();
        assert!(engine.run(&mut c).await.is_ok());
    }

    #[tokio::test]
    async fn jump_returns_to_outer_sequence() {
        let counter = Arc::new(AtomicUsize::new(0));
        let callee = Sequence::builder()
            .exec(Arc::new(RecordingExec(counter.clone(), 10)))
            .build();
        let caller = Sequence::builder()
            .jump("callee")
            .exec(Arc::new(RecordingExec(counter.clone(), 1)))
            .build();
        let mut registry = Registry::new();
        registry.register("callee", callee);
        registry.register("entry", caller);
        let engine = Engine::new(registry, "entry");
        let mut c = ctx();
        engine.run(&mut c).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn goto_clears_stack_no_return() {
        let counter = Arc::new(AtomicUsize::new(0));
        let target = Sequence::builder()
            .exec(Arc::new(RecordingExec(counter.clone(), 5)))
            .build();
        let caller = Sequence::builder()
            .goto("target")
            .exec(Arc::new(RecordingExec(counter.clone(), 1000)))
            .build();
        let mut registry = Registry::new();
        registry.register("target", target);
        registry.register("entry", caller);
        let engine = Engine::new(registry, "entry");
        let mut c = ctx();
        engine.run(&mut c).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn unhandled_error_propagates_to_caller() {
        let seq = Sequence::builder().exec(Arc::new(ErrExec)).build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let engine = Engine::new(registry, "entry");
        let mut c = ctx();
        assert!(engine.run(&mut c).await.is_err());
    }
}
