//! DNS-over-QUIC upstream client (RFC 9250, spec.md §4.3 "DoQ"). Each
//! query opens a bidirectional QUIC stream on a shared connection, as
//! RFC 9250 §4.2 mandates: the DNS message id MUST be `0` on the wire
//! (the stream itself disambiguates concurrent queries), framed with a
//! 2-byte length prefix exactly like DNS-over-TCP, and the client half
//! of the stream is closed (`finish()`) immediately after the query is
//! written so the server can recognize end-of-message without waiting
//! for a length it already has.

use super::Upstream;
use crate::error::{CoreError, Result};
use crate::dns::Message;
use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const MAX_RESPONSE_SIZE: usize = 65535;
/// RFC 9250 §5.2.2: a connection with no activity for this long may be
/// considered dead; we treat it as a cue to redial lazily on next use
/// rather than keeping a liveness timer running in the background.
const LIVENESS_WINDOW: Duration = Duration::from_secs(5);

fn insecure_client_config() -> Result<ClientConfig> {
    let crypto = tokio_rustls::rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(super::tcp::NoVerify))
        .with_no_client_auth();
    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| CoreError::Upstream(format!("quic tls config: {e}")))?;
    Ok(ClientConfig::new(Arc::new(quic_crypto)))
}

fn verified_client_config() -> Result<ClientConfig> {
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let crypto = tokio_rustls::rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| CoreError::Upstream(format!("quic tls config: {e}")))?;
    Ok(ClientConfig::new(Arc::new(quic_crypto)))
}

struct ConnState {
    connection: quinn::Connection,
    last_used: std::time::Instant,
}

/// A DoQ client holding a lazily-(re)established QUIC connection.
/// Reconnects transparently if the prior connection closed or has gone
/// quiet past `LIVENESS_WINDOW`.
pub struct DoqClient {
    name: String,
    endpoint: Endpoint,
    addr: SocketAddr,
    server_name: String,
    timeout: Duration,
    trusted: bool,
    conn: RwLock<Option<ConnState>>,
}

impl DoqClient {
    pub fn new(
        name: impl Into<String>,
        addr: SocketAddr,
        server_name: impl Into<String>,
        timeout: Duration,
        skip_tls_verify: bool,
        trusted: bool,
    ) -> Result<Self> {
        let bind_addr: SocketAddr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" }
            .parse()
            .expect("static bind addr parses");
        let mut endpoint = Endpoint::client(bind_addr)
            .map_err(|e| CoreError::Upstream(format!("quic endpoint bind failed: {e}")))?;
        let client_config =
            if skip_tls_verify { insecure_client_config()? } else { verified_client_config()? };
        endpoint.set_default_client_config(client_config);

        Ok(Self {
            name: name.into(),
            endpoint,
            addr,
            server_name: server_name.into(),
            timeout,
            trusted,
            conn: RwLock::new(None),
        })
    }

    async fn ensure_connection(&self) -> Result<quinn::Connection> {
        {
            let guard = self.conn.read().await;
            if let Some(state) = guard.as_ref() {
                if state.connection.close_reason().is_none()
                    && state.last_used.elapsed() < LIVENESS_WINDOW * 6
                {
                    return Ok(state.connection.clone());
                }
            }
        }

        let mut guard = self.conn.write().await;
        if let Some(state) = guard.as_ref() {
            if state.connection.close_reason().is_none() {
                return Ok(state.connection.clone());
            }
        }

        let connecting = self
            .endpoint
            .connect(self.addr, &self.server_name)
            .map_err(|e| CoreError::Upstream(format!("{}: connect setup failed: {e}", self.name)))?;
        let connection = connecting
            .await
            .map_err(|e| CoreError::Upstream(format!("{}: QUIC handshake failed: {e}", self.name)))?;
        *guard = Some(ConnState { connection: connection.clone(), last_used: std::time::Instant::now() });
        Ok(connection)
    }
}

#[async_trait]
impl Upstream for DoqClient {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        tokio::time::timeout(self.timeout, async {
            let connection = self.ensure_connection().await?;

            let mut wire_query = query.clone();
            wire_query.header.id = 0;
            let wire = wire_query.to_wire()?;
            let len = u16::try_from(wire.len())
                .map_err(|_| CoreError::Upstream("query too large for DoQ framing".into()))?;

            let (mut send, mut recv) = connection
                .open_bi()
                .await
                .map_err(|e| CoreError::Upstream(format!("{}: open_bi failed: {e}", self.name)))?;

            send.write_all(&len.to_be_bytes())
                .await
                .map_err(|e| CoreError::Upstream(format!("{}: write failed: {e}", self.name)))?;
            send.write_all(&wire)
                .await
                .map_err(|e| CoreError::Upstream(format!("{}: write failed: {e}", self.name)))?;
            send.finish()
                .map_err(|e| CoreError::Upstream(format!("{}: stream finish failed: {e}", self.name)))?;

            let resp = recv
                .read_to_end(MAX_RESPONSE_SIZE)
                .await
                .map_err(|e| CoreError::Upstream(format!("{}: read failed: {e}", self.name)))?;
            if resp.len() < 2 {
                return Err(CoreError::Upstream(format!("{}: response too short", self.name)));
            }
            let resp_len = u16::from_be_bytes([resp[0], resp[1]]) as usize;
            if resp.len() < 2 + resp_len {
                return Err(CoreError::Upstream(format!("{}: truncated response frame", self.name)));
            }
            Message::parse(&resp[2..2 + resp_len])
        })
        .await
        .map_err(|_| CoreError::Timeout)?
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}
