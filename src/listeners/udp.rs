//! UDP listener front end. Grounded on the teacher's
//! `server.rs::run_udp_server`: a buffer-pooled `recv_from` loop raced
//! against a shutdown broadcast, one task per datagram.

use crate::buffer::BufferPool;
use crate::context::{ServerMeta, Transport};
use crate::error::Result;
use crate::handler::Handler;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const UDP_BUFFER_SIZE: usize = 4096;

pub async fn run(
    bind_addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let sock = Arc::new(UdpSocket::bind(bind_addr).await?);
    info!(%bind_addr, "udp listener bound");
    let buffer_pool = Arc::new(BufferPool::new(&[UDP_BUFFER_SIZE], 128));

    loop {
        let mut buf = buffer_pool.get(UDP_BUFFER_SIZE);
        buf.resize(UDP_BUFFER_SIZE, 0);

        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("udp listener shutting down");
                return Ok(());
            }
            result = sock.recv_from(&mut buf) => {
                let (n, src) = result?;
                let wire = buf[..n].to_vec();
                let handler = Arc::clone(&handler);
                let sock = Arc::clone(&sock);
                tokio::spawn(async move {
                    serve_one(&handler, &sock, &wire, src).await;
                });
            }
        }
    }
}

async fn serve_one(handler: &Handler, sock: &UdpSocket, wire: &[u8], src: SocketAddr) {
    let meta = ServerMeta { client_addr: src, transport: Transport::Udp };
    match handler.handle_query(wire, meta).await {
        Ok(response) => {
            if let Err(e) = sock.send_to(&response, src).await {
                error!(client = %src, error = %e, "failed to send udp response");
            }
        }
        Err(e) => {
            warn!(client = %src, error = %e, "protocol error on udp datagram, no reply sent");
        }
    }
}
