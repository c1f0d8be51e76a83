use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::codec::{MsgBuffer, MsgEnvelope, MAX_MSG_SIZE};
use crate::directory::types::NetworkAddress;
use crate::protocol::{build_msg_received, MsgStatus};

use super::pool::CommandPool;

/// Role-specific message dispatch.
///
/// The transport parses the envelope and hands over the buffer with the read
/// cursor sitting at the first payload element. Whatever the handler returns
/// is sent back to the sender named in the envelope.
#[async_trait]
pub trait MsgHandler: Send + Sync + 'static {
    async fn handle_msg(
        &self,
        env: MsgEnvelope,
        data: MsgBuffer,
        src: SocketAddr,
    ) -> Option<MsgBuffer>;
}

/// The single UDP socket of a process and its receive loop.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    local_addr: NetworkAddress,
    err_count: AtomicU64,
}

impl UdpServer {
    /// Binds the process socket. Failure here is fatal for the process.
    pub async fn bind(host: &str, port: u16) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind((host, port))
            .await
            .with_context(|| format!("failed to bind UDP socket {host}:{port}"))?;
        let actual_port = socket.local_addr()?.port();

        tracing::info!("UDP socket bound on {}:{}", host, actual_port);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local_addr: NetworkAddress::new(host, actual_port),
            err_count: AtomicU64::new(0),
        }))
    }

    /// The address this process puts in its envelopes. With an ephemeral
    /// bind, carries the port the OS actually picked.
    pub fn local_addr(&self) -> &NetworkAddress {
        &self.local_addr
    }

    /// Process-wide count of malformed or unexpected messages.
    pub fn err_count(&self) -> u64 {
        self.err_count.load(Ordering::Relaxed)
    }

    pub fn bump_err_count(&self) -> u64 {
        self.err_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn send_buffer_to(&self, addr: &NetworkAddress, buf: &MsgBuffer) -> Result<()> {
        self.socket
            .send_to(buf.as_slice(), (addr.host.as_str(), addr.port))
            .await
            .with_context(|| format!("failed to send {} bytes to {}", buf.written(), addr))?;
        Ok(())
    }

    /// The receive loop. Each datagram gets a fresh buffer; envelope parse
    /// failures are answered from here, everything else is dispatched to
    /// `handler` on the pool.
    pub async fn run(
        self: Arc<Self>,
        handler: Arc<dyn MsgHandler>,
        pool: Arc<CommandPool>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let mut raw = vec![0u8; MAX_MSG_SIZE];

            let (len, src) = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::debug!("Receive loop on {} stopping", self.local_addr);
                        return;
                    }
                    continue;
                }
                res = self.socket.recv_from(&mut raw) => match res {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!("Failed to receive UDP packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            raw.truncate(len);
            let mut data = MsgBuffer::from_datagram(raw);

            let env = match MsgEnvelope::parse_from(&mut data) {
                Ok(env) => env,
                Err(e) => {
                    let count = self.bump_err_count();
                    tracing::warn!(
                        "Garbled envelope from {} ({} bytes, errCount={}): {}",
                        src,
                        len,
                        count,
                        e
                    );
                    self.reply_parse_err_to_source(src, &e.to_string()).await;
                    continue;
                }
            };

            tracing::debug!(
                "Received kind={} id={} from {} ({} bytes)",
                env.kind,
                env.id,
                src,
                len
            );

            let server = self.clone();
            let handler = handler.clone();
            pool.enqueue(Box::pin(async move {
                let reply_to = NetworkAddress::new(env.sender_host.clone(), env.sender_port);
                if let Some(reply) = handler.handle_msg(env, data, src).await {
                    if let Err(e) = server.send_buffer_to(&reply_to, &reply).await {
                        tracing::warn!("Failed to reply to {}: {}", reply_to, e);
                    }
                }
            }))
            .await;
        }
    }

    /// Error reply for a datagram whose envelope never parsed: the only
    /// address we have for the sender is the UDP source itself.
    async fn reply_parse_err_to_source(&self, src: SocketAddr, err_msg: &str) {
        let in_env = MsgEnvelope::new(0, 0, src.ip().to_string(), src.port());
        match build_msg_received(&self.local_addr, &in_env, MsgStatus::ParseErr, err_msg) {
            Ok(reply) => {
                if let Err(e) = self.socket.send_to(reply.as_slice(), src).await {
                    tracing::warn!("Failed to send parse-error reply to {}: {}", src, e);
                }
            }
            Err(e) => tracing::error!("Failed to build parse-error reply: {}", e),
        }
    }
}
