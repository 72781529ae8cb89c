//! The query handler (spec.md §4.6): the boundary between a listener's
//! wire bytes and the sequence engine. Parses, validates, ingests EDNS0,
//! runs the configured entry sequence, shapes the response, and
//! (for UDP) truncates to the client's advertised buffer.
//!
//! Grounded on the teacher's `protocol/handler.rs` `ProtocolHandler`
//! trait shape (one `handle` entry point wrapping a resolver call) and
//! `protocol/udp.rs`/`protocol/tcp.rs`'s truncation logic, generalized
//! from "call the one resolver" into "drive the configured sequence
//! engine".

use crate::context::{QueryContext, ServerMeta, Transport};
use crate::dns::edns::{encode_ede, DO_BIT};
use crate::dns::{Message, Opt, OptCode, Rcode};
use crate::error::{CoreError, Result};
use crate::metrics::Metrics;
use crate::sequence::Engine;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// EDNS0 UDP payload size the forwarder advertises upstream and, absent
/// a client-specific reason to do otherwise, to the client too (spec.md
/// §4.6 step 3).
const FORWARDER_UDP_SIZE: u16 = 1220;
/// RFC 1035 §2.3.4: the floor when a client speaks no EDNS0 at all.
const NO_EDNS0_UDP_SIZE: usize = 512;

/// EDNS0 options the handler copies from the client's OPT into the
/// forwarder's outbound OPT (spec.md §4.6 step 3 "whitelist of
/// forwardable options"). Cookie is deliberately excluded: it is
/// session-scoped to the client/server pair that minted it and has no
/// meaning forwarded to a different upstream.
const FORWARDABLE_OPTIONS: &[OptCode] = &[OptCode::ClientSubnet];

pub struct Handler {
    engine: Engine,
    default_deadline: Duration,
    metrics: Arc<Metrics>,
}

impl Handler {
    pub fn new(engine: Engine, default_deadline: Duration, metrics: Arc<Metrics>) -> Self {
        Self { engine, default_deadline, metrics }
    }

    /// Parses and handles one inbound query. `Err` is reserved for
    /// protocol errors the caller should react to at the framing level
    /// (close the connection / drop the datagram, spec.md §7); every
    /// other failure is already folded into a SERVFAIL response inside
    /// `Ok`.
    #[instrument(skip_all, fields(transport = ?server_meta.transport, client = %server_meta.client_addr))]
    pub async fn handle_query(&self, wire: &[u8], server_meta: ServerMeta) -> Result<Vec<u8>> {
        let transport_label = transport_label(server_meta.transport);
        self.metrics.queries_total.with_label_values(&[transport_label]).inc();
        let timer = self.metrics.query_duration.with_label_values(&[transport_label]).start_timer();

        let result = self.handle_query_inner(wire, server_meta).await;
        timer.observe_duration();

        if let Ok(ref out) = result {
            if let Ok(resp) = Message::parse(out) {
                let rcode = resp.header.rcode();
                if rcode != Rcode::NOERROR {
                    self.metrics
                        .error_responses
                        .with_label_values(&[&rcode.0.to_string()])
                        .inc();
                }
            }
        }
        result
    }

    async fn handle_query_inner(&self, wire: &[u8], server_meta: ServerMeta) -> Result<Vec<u8>> {
        if wire.is_empty() {
            return Err(CoreError::UnexpectedEof);
        }
        let query = Message::parse(wire)?;

        if !query.question_count_ok() {
            warn!(qdcount = query.header.qdcount, "rejecting query with != 1 question");
            let resp = Message::formerr(&query);
            return self.finish(resp, None, server_meta.transport, None);
        }

        let (ctx_query, client_opt) = ingest_edns0(query.clone());
        let mut ctx = QueryContext::new(ctx_query, server_meta.clone());
        ctx.client_opt = client_opt.clone();

        debug!(query_id = ctx.id, name = %query.question().map(|q| q.name.to_string()).unwrap_or_default(), "handling query");

        let run = tokio::time::timeout(self.default_deadline, self.engine.run(&mut ctx)).await;
        let (mut response, ede) = match run {
            Ok(Ok(())) => match ctx.response.take() {
                Some(resp) => (resp, None),
                None => (Message::refused(&query), None),
            },
            Ok(Err(e)) => {
                error!(error = %e, "sequence engine error, responding SERVFAIL");
                (Message::servfail(&query), error_ede(&e))
            }
            Err(_) => {
                error!("query deadline exceeded, responding SERVFAIL");
                (Message::servfail(&query), Some(encode_ede(23, "timeout")))
            }
        };
        response.header.ra = true;

        self.finish(response, client_opt, server_meta.transport, ede)
    }

    /// Response shaping (spec.md §4.6 step 6) plus UDP truncation (step
    /// 7): merges or strips the response OPT, then serializes — and if
    /// the query arrived over UDP, truncates to fit the client's
    /// advertised buffer (or 512 if the client sent no OPT at all).
    fn finish(
        &self,
        mut response: Message,
        client_opt: Option<Opt>,
        transport: Transport,
        ede: Option<crate::dns::EdnsOption>,
    ) -> Result<Vec<u8>> {
        let max_udp_len = client_opt
            .as_ref()
            .map(|o| o.udp_payload_size.max(NO_EDNS0_UDP_SIZE as u16) as usize)
            .unwrap_or(NO_EDNS0_UDP_SIZE);

        match client_opt {
            None => {
                response.take_opt();
            }
            Some(client_opt) => {
                let mut resp_opt = response.take_opt().unwrap_or_else(|| Opt::new(FORWARDER_UDP_SIZE));
                resp_opt.udp_payload_size = FORWARDER_UDP_SIZE;
                resp_opt.set_do_flag(client_opt.flags & DO_BIT != 0);
                resp_opt.remove(OptCode::Padding);
                if let Some(ede) = ede {
                    resp_opt.set(ede);
                }
                response.set_opt(resp_opt);
            }
        }

        if transport == Transport::Udp {
            let wire = response.truncate_to(max_udp_len)?;
            if response.header.tc {
                self.metrics.truncated_responses.inc();
            }
            Ok(wire)
        } else {
            response.to_wire()
        }
    }
}

fn transport_label(transport: Transport) -> &'static str {
    match transport {
        Transport::Udp => "udp",
        Transport::Tcp => "tcp",
        Transport::Tls => "tls",
        Transport::Https => "https",
        Transport::Quic => "quic",
    }
}

/// EDNS0 ingest (spec.md §4.6 step 3): splits the client's OPT (if any)
/// out of the query, and returns a query carrying a freshly built
/// forwarder OPT in its place — the handler's invariant that `query`
/// always has exactly one OPT (spec.md §3 invariant ii) holds whether or
/// not the client sent one.
fn ingest_edns0(mut query: Message) -> (Message, Option<Opt>) {
    let client_opt = query.take_opt();

    let mut fwd_opt = Opt::new(FORWARDER_UDP_SIZE);
    if let Some(ref co) = client_opt {
        fwd_opt.set_do_flag(co.do_flag());
        for code in FORWARDABLE_OPTIONS {
            if let Some(opt) = co.get(*code) {
                fwd_opt.set(opt.clone());
            }
        }
    }
    query.set_opt(fwd_opt);
    (query, client_opt)
}

/// Maps a handler-visible error to an Extended DNS Error option (RFC
/// 8914) when one usefully describes the failure, per spec.md §4.6 step
/// 6 "append EDEs if the error carried them".
fn error_ede(err: &CoreError) -> Option<crate::dns::EdnsOption> {
    match err {
        CoreError::AllUpstreamsFailed => Some(encode_ede(22, "all upstreams failed")),
        CoreError::Upstream(msg) => Some(encode_ede(23, msg)),
        CoreError::Timeout => Some(encode_ede(23, "timeout")),
        CoreError::UnknownTag(tag) => Some(encode_ede(0, &format!("unknown sequence tag: {tag}"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ServerMeta, Transport};
    use crate::dns::{Name, QClass, QType, Question, Rcode, ResourceRecord};
    use crate::sequence::{Executable, Registry, Sequence};
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn meta() -> ServerMeta {
        ServerMeta { client_addr: "203.0.113.5:5353".parse().unwrap(), transport: Transport::Udp }
    }

    fn query_wire(with_opt: bool, do_bit: bool) -> Vec<u8> {
        let q = Question::new(Name::parse("example.com"), QType::A, QClass::IN);
        let mut msg = Message::new_query(0xABCD, q);
        if with_opt {
            let mut opt = Opt::new(4096);
            opt.set_do_flag(do_bit);
            msg.set_opt(opt);
        }
        msg.to_wire().unwrap()
    }

    struct Answer;
    #[async_trait]
    impl Executable for Answer {
        async fn execute(
            &self,
            ctx: &mut QueryContext,
            _next: crate::sequence::Chain,
        ) -> Result<()> {
            let mut resp = Message::new_response_shell(&ctx.query);
            resp.answers.push(ResourceRecord::new_a(
                Name::parse("example.com"),
                60,
                Ipv4Addr::new(192, 0, 2, 1),
            ));
            ctx.set_response(resp);
            Ok(())
        }
    }

    fn handler_with(exec: Arc<dyn Executable>) -> Handler {
        let seq = Sequence::builder().exec(exec).build();
        let mut registry = Registry::new();
        registry.register("entry", seq);
        let engine = Engine::new(registry, "entry");
        Handler::new(engine, Duration::from_secs(5), Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn basic_a_lookup_sets_ra_and_opt() {
        let handler = handler_with(Arc::new(Answer));
        let wire = query_wire(true, true);
        let out = handler.handle_query(&wire, meta()).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        assert!(resp.header.ra);
        assert_eq!(resp.header.id, 0xABCD);
        assert_eq!(resp.answers.len(), 1);
        let opt = resp.opt().unwrap();
        assert!(opt.do_flag());
        assert_eq!(opt.udp_payload_size, FORWARDER_UDP_SIZE);
    }

    #[tokio::test]
    async fn no_client_opt_means_no_response_opt() {
        let handler = handler_with(Arc::new(Answer));
        let wire = query_wire(false, false);
        let out = handler.handle_query(&wire, meta()).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        assert!(resp.opt().is_none());
    }

    #[tokio::test]
    async fn empty_sequence_synthesizes_refused() {
        struct NoOp;
        #[async_trait]
        impl Executable for NoOp {
            async fn execute(&self, _ctx: &mut QueryContext, _next: crate::sequence::Chain) -> Result<()> {
                Ok(())
            }
        }
        let handler = handler_with(Arc::new(NoOp));
        let wire = query_wire(false, false);
        let out = handler.handle_query(&wire, meta()).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        assert_eq!(resp.header.rcode(), Rcode::REFUSED);
    }

    #[tokio::test]
    async fn sequence_error_synthesizes_servfail() {
        struct Boom;
        #[async_trait]
        impl Executable for Boom {
            async fn execute(&self, _ctx: &mut QueryContext, _next: crate::sequence::Chain) -> Result<()> {
                Err(CoreError::Internal("boom".into()))
            }
        }
        let handler = handler_with(Arc::new(Boom));
        let wire = query_wire(false, false);
        let out = handler.handle_query(&wire, meta()).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        assert_eq!(resp.header.rcode(), Rcode::SERVFAIL);
    }

    #[tokio::test]
    async fn malformed_wire_is_a_protocol_error() {
        let handler = handler_with(Arc::new(Answer));
        let err = handler.handle_query(&[0u8; 3], meta()).await.unwrap_err();
        assert!(matches!(err, CoreError::UnexpectedEof | CoreError::InvalidHeader));
    }

    #[tokio::test]
    async fn multi_question_query_gets_formerr() {
        let handler = handler_with(Arc::new(Answer));
        let q1 = Question::new(Name::parse("a.test"), QType::A, QClass::IN);
        let mut msg = Message::new_query(1, q1);
        msg.questions.push(Question::new(Name::parse("b.test"), QType::A, QClass::IN));
        msg.header.qdcount = 2;
        let wire = msg.to_wire().unwrap();
        let out = handler.handle_query(&wire, meta()).await.unwrap();
        let resp = Message::parse(&out).unwrap();
        assert_eq!(resp.header.rcode(), Rcode::FORMERR);
    }
}
