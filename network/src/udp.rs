//! JSON-datagram transport over UDP.
//!
//! Frames are single JSON objects, one per datagram. The handshake is a
//! `hello` / `hello_ack` exchange: the connecting side announces its link id
//! and role, and the connection only counts as established once the ack
//! arrives, which is what gates the backoff reset upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use stage_core::{Error, LinkId};
use tokio::net::UdpSocket;

use crate::link::{SessionPair, SessionRx, SessionTx, Transport};
use crate::protocol::{self, WireMessage, MAX_UDP_PAYLOAD_SIZE};

/// How long to wait for a `hello_ack` before the attempt counts as failed.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connects to one remote endpoint over UDP.
pub struct UdpTransport {
    remote: SocketAddr,
    bind: SocketAddr,
    role: String,
}

impl UdpTransport {
    pub fn new(remote: SocketAddr, role: impl Into<String>) -> Self {
        Self {
            remote,
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            role: role.into(),
        }
    }

    /// Bind to a specific local address instead of an ephemeral port.
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&self, link: LinkId) -> Result<SessionPair, Error> {
        let socket = UdpSocket::bind(self.bind)
            .await
            .map_err(|e| Error::Link(format!("failed to bind UDP socket: {}", e)))?;
        socket
            .connect(self.remote)
            .await
            .map_err(|e| Error::Link(format!("failed to connect to {}: {}", self.remote, e)))?;
        let socket = Arc::new(socket);

        // Announce ourselves and wait for the acknowledgment. The socket
        // being open means nothing until the remote answers.
        let hello = protocol::encode(&WireMessage::Hello {
            link,
            role: self.role.clone(),
        })?;
        socket
            .send(&hello)
            .await
            .map_err(|e| Error::Link(format!("failed to send hello: {}", e)))?;

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD_SIZE];
        let ack = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                let len = socket
                    .recv(&mut buf)
                    .await
                    .map_err(|e| Error::Link(format!("handshake receive failed: {}", e)))?;
                match protocol::decode(&buf[..len]) {
                    Ok(WireMessage::HelloAck { .. }) => return Ok(()),
                    Ok(other) => {
                        debug!("ignoring pre-handshake message: {:?}", other);
                    }
                    Err(e) => {
                        debug!("ignoring undecodable pre-handshake frame: {}", e);
                    }
                }
            }
        })
        .await;

        match ack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::Link(format!(
                    "handshake with {} timed out",
                    self.remote
                )))
            }
        }

        Ok(SessionPair {
            tx: Box::new(UdpTx {
                socket: socket.clone(),
            }),
            rx: Box::new(UdpRx {
                socket,
                buf: vec![0u8; MAX_UDP_PAYLOAD_SIZE],
            }),
        })
    }
}

struct UdpTx {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl SessionTx for UdpTx {
    async fn send(&mut self, message: &WireMessage) -> Result<(), Error> {
        let bytes = protocol::encode(message)?;
        if bytes.len() > MAX_UDP_PAYLOAD_SIZE {
            // Oversize frames are a producer bug, not a link failure; drop
            // the frame and keep the link alive.
            warn!(
                "dropping oversize frame ({} bytes > {})",
                bytes.len(),
                MAX_UDP_PAYLOAD_SIZE
            );
            return Ok(());
        }
        self.socket
            .send(&bytes)
            .await
            .map_err(|e| Error::Link(format!("send failed: {}", e)))?;
        Ok(())
    }
}

struct UdpRx {
    socket: Arc<UdpSocket>,
    buf: Vec<u8>,
}

#[async_trait]
impl SessionRx for UdpRx {
    async fn recv(&mut self) -> Result<Vec<u8>, Error> {
        let len = self
            .socket
            .recv(&mut self.buf)
            .await
            .map_err(|e| Error::Link(format!("receive failed: {}", e)))?;
        Ok(self.buf[..len].to_vec())
    }
}
