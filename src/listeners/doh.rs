//! DNS-over-HTTPS listener front end (RFC 8484). A thin `axum` service
//! accepting `POST /dns-query` with an `application/dns-message` body
//! (and the equivalent `GET ?dns=<base64url>` form). Each accepted
//! connection (optionally behind a `tokio_rustls` TLS handshake) gets
//! its own tiny `Router` with the peer address baked into its state,
//! served over HTTP/1.1+h2 via `hyper_util`'s auto builder. Grounded on
//! the teacher's `http_server.rs` axum `Router`/`AppState` idiom,
//! generalized from a JSON telemetry API to a binary-body DNS endpoint.

use crate::context::{ServerMeta, Transport};
use crate::error::Result;
use crate::handler::Handler;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HyperAutoBuilder;
use hyper_util::service::TowerToHyperService;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

const DNS_MESSAGE_MIME: &str = "application/dns-message";

#[derive(Clone)]
struct AppState {
    handler: Arc<Handler>,
    client_addr: SocketAddr,
}

fn router(handler: Arc<Handler>, client_addr: SocketAddr) -> Router {
    Router::new()
        .route("/dns-query", post(handle_post))
        .route("/dns-query", get(handle_get))
        .with_state(AppState { handler, client_addr })
}

pub async fn run(
    bind_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, tls = acceptor.is_some(), "doh listener bound");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("doh listener shutting down");
                return Ok(());
            }
            result = listener.accept() => {
                let (stream, src) = result?;
                let handler = Arc::clone(&handler);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let app = router(handler, src);
                    let service = TowerToHyperService::new(app);
                    let outcome = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                HyperAutoBuilder::new(TokioExecutor::new())
                                    .serve_connection(TokioIo::new(tls_stream), service)
                                    .await
                            }
                            Err(e) => {
                                warn!(client = %src, error = %e, "doh tls handshake failed");
                                return;
                            }
                        },
                        None => {
                            HyperAutoBuilder::new(TokioExecutor::new())
                                .serve_connection(TokioIo::new(stream), service)
                                .await
                        }
                    };
                    if let Err(e) = outcome {
                        debug!(client = %src, error = %e, "doh connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_post(State(state): State<AppState>, body: Bytes) -> Response {
    respond(&state, &body).await
}

async fn handle_get(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> Response {
    let Some(encoded) = params.get("dns") else {
        return (StatusCode::BAD_REQUEST, "missing dns query parameter").into_response();
    };
    let Ok(wire) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(encoded) else {
        return (StatusCode::BAD_REQUEST, "invalid base64url dns parameter").into_response();
    };
    respond(&state, &wire).await
}

async fn respond(state: &AppState, wire: &[u8]) -> Response {
    let meta = ServerMeta { client_addr: state.client_addr, transport: Transport::Https };
    match state.handler.handle_query(wire, meta).await {
        Ok(response_wire) => {
            let mut resp = Response::new(axum::body::Body::from(response_wire));
            resp.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static(DNS_MESSAGE_MIME),
            );
            resp
        }
        Err(e) => {
            warn!(client = %state.client_addr, error = %e, "protocol error on doh request");
            (StatusCode::BAD_REQUEST, "malformed dns message").into_response()
        }
    }
}
