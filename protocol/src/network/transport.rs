//! Packet transports.
//!
//! The engine only needs "send these bytes to that neighbor". [`UdpTransport`]
//! is the one shipped implementation: a single tokio socket used both to
//! send to datagram neighbors and to receive from anyone.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::TRANSACTION_PACKET_SIZE;
use crate::network::gossip::{GossipEngine, GossipError, GossipResult};
use crate::network::neighbor::{Neighbor, TransportKind};

/// Delivers one wire packet to one neighbor.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, neighbor: &Neighbor, packet: &[u8]) -> GossipResult<()>;
}

/// UDP transport. Stream neighbors are rejected with
/// [`GossipError::UnsupportedTransport`].
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(address: SocketAddr) -> GossipResult<Self> {
        let socket = UdpSocket::bind(address).await?;
        info!(address = %socket.local_addr()?, "udp gossip socket bound");
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> GossipResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Feeds every datagram to `engine` until the engine shuts down.
    pub async fn run_receiver(&self, engine: Arc<GossipEngine>) {
        let mut shutdown = engine.shutdown_signal();
        // One spare byte so oversized datagrams are caught as wrong-sized.
        let mut buf = vec![0u8; TRANSACTION_PACKET_SIZE + 1];
        info!("udp receiver started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, sender)) => {
                        let outcome = engine.process_received_data(&buf[..len], sender, TransportKind::Datagram);
                        debug!(%sender, len, ?outcome, "datagram processed");
                    }
                    Err(e) => warn!(error = %e, "udp receive failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("udp receiver stopped");
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, neighbor: &Neighbor, packet: &[u8]) -> GossipResult<()> {
        match neighbor.kind() {
            TransportKind::Datagram => {
                self.socket.send_to(packet, neighbor.address()).await?;
                Ok(())
            }
            kind => Err(GossipError::UnsupportedTransport(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn sends_datagrams_to_udp_neighbors() {
        let transport = UdpTransport::bind(loopback()).await.unwrap();
        let peer = UdpSocket::bind(loopback()).await.unwrap();
        let neighbor = Neighbor::discovered(TransportKind::Datagram, peer.local_addr().unwrap());

        transport.send(&neighbor, b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, transport.local_addr().unwrap());
    }

    #[tokio::test]
    async fn rejects_stream_neighbors() {
        let transport = UdpTransport::bind(loopback()).await.unwrap();
        let neighbor = Neighbor::discovered(TransportKind::Stream, "127.0.0.1:15600".parse().unwrap());
        assert!(matches!(
            transport.send(&neighbor, b"x").await,
            Err(GossipError::UnsupportedTransport(TransportKind::Stream))
        ));
    }
}
