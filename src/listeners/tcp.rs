//! TCP listener front end (RFC 1035 §4.2.2: 2-byte length prefix). One
//! task per connection, pipelining many queries per RFC 7766, grounded
//! on the teacher's `server.rs::run_tcp_server`/`handle_tcp_connection`.

use crate::buffer::BufferPool;
use crate::context::{ServerMeta, Transport};
use crate::error::Result;
use crate::handler::Handler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

const TCP_BUFFER_SIZE: usize = 65535;

pub async fn run(
    bind_addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "tcp listener bound");
    let buffer_pool = Arc::new(BufferPool::new(&[TCP_BUFFER_SIZE], 32));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("tcp listener shutting down");
                return Ok(());
            }
            result = listener.accept() => {
                let (stream, src) = result?;
                let handler = Arc::clone(&handler);
                let buffer_pool = Arc::clone(&buffer_pool);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, src, handler, buffer_pool).await {
                        debug!(client = %src, error = %e, "tcp connection ended");
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    src: SocketAddr,
    handler: Arc<Handler>,
    buffer_pool: Arc<BufferPool>,
) -> Result<()> {
    serve_framed(stream, src, Transport::Tcp, handler, buffer_pool).await
}

/// Serves one DNS-over-TLS connection, framed the same way as plain TCP.
/// Public so `listeners::tls`'s accept loop can hand off an established
/// `TlsStream` without this module depending on how it was accepted.
pub async fn serve_tls_connection(
    stream: TlsStream<TcpStream>,
    src: SocketAddr,
    handler: Arc<Handler>,
) -> Result<()> {
    let buffer_pool = Arc::new(BufferPool::new(&[TCP_BUFFER_SIZE], 8));
    serve_framed(stream, src, Transport::Tls, handler, buffer_pool).await
}

async fn serve_framed<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    src: SocketAddr,
    transport: Transport,
    handler: Arc<Handler>,
    buffer_pool: Arc<BufferPool>,
) -> Result<()> {
    let meta = ServerMeta { client_addr: src, transport };
    loop {
        let mut length_buf = [0u8; 2];
        match stream.read_exact(&mut length_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let message_len = u16::from_be_bytes(length_buf) as usize;

        let mut message_buf = buffer_pool.get(message_len.max(1));
        message_buf.resize(message_len, 0);
        stream.read_exact(&mut message_buf).await?;

        match handler.handle_query(&message_buf, meta.clone()).await {
            Ok(response) => {
                let len = (response.len() as u16).to_be_bytes();
                stream.write_all(&len).await?;
                stream.write_all(&response).await?;
            }
            Err(e) => {
                warn!(client = %src, error = %e, "protocol error on tcp stream, closing connection");
                return Ok(());
            }
        }
    }
}
