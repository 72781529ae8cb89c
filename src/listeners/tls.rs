//! DNS-over-TLS listener front end (RFC 7858). Same 2-byte length-prefix
//! framing as plain TCP, accepted over a `rustls` `TlsAcceptor`.
//! Grounded on the teacher's `transport/tls.rs` (`TlsConfig::
//! create_acceptor`, self-signed fallback via `rcgen`) generalized from
//! client-cert-aware mutual TLS down to the server-auth-only case this
//! resolver needs.

use crate::error::{CoreError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{debug, info, warn};

use super::tcp::serve_tls_connection;
use crate::handler::Handler;

/// Loads a PEM certificate chain and private key from disk, generating
/// a self-signed pair for `server_name` if either path is absent — the
/// teacher's `load_or_generate_certificates` fallback, minus the mutual-
/// TLS client-cert path this resolver doesn't need.
pub fn build_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
    server_name: &str,
) -> Result<TlsAcceptor> {
    let (certs, key) = match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => load_certs_and_key(cert_path, key_path)?,
        _ => generate_self_signed(server_name)?,
    };

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CoreError::Config(format!("tls server config: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub(super) fn load_certs_and_key(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_data = std::fs::read(cert_path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_data.as_slice())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CoreError::Config(format!("parsing {cert_path}: {e}")))?;
    if certs.is_empty() {
        return Err(CoreError::Config(format!("no certificates found in {cert_path}")));
    }

    let key_data = std::fs::read(key_path)?;
    let mut cursor = key_data.as_slice();
    let key = rustls_pemfile::pkcs8_private_keys(&mut cursor)
        .next()
        .transpose()
        .map_err(|e| CoreError::Config(format!("parsing {key_path}: {e}")))?
        .ok_or_else(|| CoreError::Config(format!("no private key found in {key_path}")))?;

    Ok((certs, PrivateKeyDer::Pkcs8(key)))
}

pub(super) fn generate_self_signed(server_name: &str) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert =
        rcgen::generate_simple_self_signed(vec![server_name.to_string()])
            .map_err(|e| CoreError::Config(format!("self-signed cert generation failed: {e}")))?;
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.signing_key.serialize_der()));
    Ok((vec![cert_der], key_der))
}

pub async fn run(
    bind_addr: SocketAddr,
    acceptor: TlsAcceptor,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "tls listener bound");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("tls listener shutting down");
                return Ok(());
            }
            result = listener.accept() => {
                let (stream, src) = result?;
                let acceptor = acceptor.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            if let Err(e) = serve_tls_connection(tls_stream, src, handler).await {
                                debug!(client = %src, error = %e, "tls connection ended");
                            }
                        }
                        Err(e) => warn!(client = %src, error = %e, "tls handshake failed"),
                    }
                });
            }
        }
    }
}
