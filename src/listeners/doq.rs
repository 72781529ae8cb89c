//! DNS-over-QUIC listener front end (RFC 9250). Accepts QUIC connections
//! and, on each bidirectional stream a client opens, reads one 2-byte
//! length-prefixed DNS message, answers with the same framing, and
//! closes the send half — mirroring the client-side framing in
//! `upstream::doq::DoqClient::exchange`. Enriched from the pack's
//! AtlasDNS `doq.rs` server accept-loop shape, reusing the `quinn`
//! dependency already pulled in for the upstream DoQ client and the
//! same cert-loading helpers as `listeners::tls`.

use crate::context::{ServerMeta, Transport};
use crate::error::{CoreError, Result};
use crate::handler::Handler;
use quinn::{Endpoint, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info, warn};

const MAX_MESSAGE_SIZE: usize = 65535;

fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig> {
    let mut crypto = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CoreError::Config(format!("quic tls server config: {e}")))?;
    crypto.alpn_protocols = vec![b"doq".to_vec()];
    let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
        .map_err(|e| CoreError::Config(format!("quic crypto config: {e}")))?;
    Ok(ServerConfig::with_crypto(Arc::new(quic_crypto)))
}

pub async fn run(
    bind_addr: SocketAddr,
    cert_path: Option<&str>,
    key_path: Option<&str>,
    server_name: &str,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let (certs, key) = match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            super::tls::load_certs_and_key(cert_path, key_path)?
        }
        _ => super::tls::generate_self_signed(server_name)?,
    };
    let server_config = build_server_config(certs, key)?;
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    info!(%bind_addr, "doq listener bound");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("doq listener shutting down");
                endpoint.close(0u32.into(), b"shutdown");
                return Ok(());
            }
            incoming = endpoint.accept() => {
                let Some(incoming) = incoming else {
                    info!("doq endpoint closed");
                    return Ok(());
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    match incoming.await {
                        Ok(connection) => serve_connection(connection, handler).await,
                        Err(e) => warn!(error = %e, "doq handshake failed"),
                    }
                });
            }
        }
    }
}

async fn serve_connection(connection: quinn::Connection, handler: Arc<Handler>) {
    let src = connection.remote_address();
    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_stream(send, recv, src, handler).await {
                        debug!(client = %src, error = %e, "doq stream ended");
                    }
                });
            }
            Err(e) => {
                debug!(client = %src, error = %e, "doq connection closed");
                return;
            }
        }
    }
}

async fn serve_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    src: SocketAddr,
    handler: Arc<Handler>,
) -> Result<()> {
    let raw = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(|e| CoreError::Upstream(format!("doq stream read failed: {e}")))?;
    if raw.len() < 2 {
        return Err(CoreError::UnexpectedEof);
    }
    let len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    if raw.len() < 2 + len {
        return Err(CoreError::UnexpectedEof);
    }
    let wire = &raw[2..2 + len];

    let meta = ServerMeta { client_addr: src, transport: Transport::Quic };
    match handler.handle_query(wire, meta).await {
        Ok(response) => {
            let resp_len = (response.len() as u16).to_be_bytes();
            send.write_all(&resp_len).await.map_err(|e| CoreError::Upstream(e.to_string()))?;
            send.write_all(&response).await.map_err(|e| CoreError::Upstream(e.to_string()))?;
            send.finish().map_err(|e| CoreError::Upstream(e.to_string()))?;
        }
        Err(e) => {
            warn!(client = %src, error = %e, "protocol error on doq stream");
        }
    }
    Ok(())
}
