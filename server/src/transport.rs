//! The boundary between the dispatcher and whatever moves datagrams.
//!
//! The dispatcher only ever sees [`TransportEvent`]s and calls the
//! [`Transport`] methods; reliability, sequencing and connection handshakes
//! are the transport's business. [`MemoryTransport`] is an in-process
//! implementation that records everything sent through it.

use crate::error::TransportError;
use crate::session::ConnectionStatus;
use shared::DeliveryMethod;
use std::collections::VecDeque;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StatusChanged {
        peer: SocketAddr,
        status: ConnectionStatus,
    },
    /// A peer wants in; `ticket` is its raw auth ticket.
    ConnectionRequest {
        peer: SocketAddr,
        ticket: Vec<u8>,
    },
    Data {
        peer: SocketAddr,
        channel: u8,
        bytes: Vec<u8>,
    },
    DiscoveryRequest {
        peer: SocketAddr,
    },
    /// Transport-level warnings and debug output.
    Diagnostic(String),
}

pub trait Transport {
    /// Next pending event, if any. Never blocks.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    fn send(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), TransportError>;

    /// Completes a pending connection request.
    fn approve(&mut self, peer: SocketAddr) -> Result<(), TransportError>;

    /// Refuses a pending connection request with a human-readable reason.
    fn deny(&mut self, peer: SocketAddr, reason: &str) -> Result<(), TransportError>;

    fn send_discovery_response(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
    ) -> Result<(), TransportError>;

    fn connected_peers(&self) -> Vec<SocketAddr>;

    fn shutdown(&mut self);
}

/// One message handed to [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub peer: SocketAddr,
    pub bytes: Vec<u8>,
    pub method: DeliveryMethod,
    pub channel: u8,
}

/// Queue-backed transport for tests and embedding.
///
/// Events are injected with the `deliver_*` helpers and come back out of
/// [`Transport::poll_event`] in order. Approving a peer marks it connected
/// and queues the matching status change, as a real transport would.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<TransportEvent>,
    connected: Vec<SocketAddr>,
    pub sent: Vec<SentMessage>,
    pub approved: Vec<SocketAddr>,
    pub denied: Vec<(SocketAddr, String)>,
    pub discovery_replies: Vec<(SocketAddr, Vec<u8>)>,
    pub shut_down: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_event(&mut self, event: TransportEvent) {
        self.inbound.push_back(event);
    }

    pub fn deliver_connection_request(&mut self, peer: SocketAddr, ticket: &[u8]) {
        self.push_event(TransportEvent::ConnectionRequest {
            peer,
            ticket: ticket.to_vec(),
        });
    }

    pub fn deliver_data(&mut self, peer: SocketAddr, channel: u8, bytes: Vec<u8>) {
        self.push_event(TransportEvent::Data {
            peer,
            channel,
            bytes,
        });
    }

    /// Drops the peer and queues its disconnect.
    pub fn deliver_disconnect(&mut self, peer: SocketAddr) {
        self.connected.retain(|p| *p != peer);
        self.push_event(TransportEvent::StatusChanged {
            peer,
            status: ConnectionStatus::Disconnected,
        });
    }

    pub fn pending_events(&self) -> usize {
        self.inbound.len()
    }

    pub fn sent_to(&self, peer: SocketAddr) -> impl Iterator<Item = &SentMessage> {
        self.sent.iter().filter(move |m| m.peer == peer)
    }

    /// Empties and returns the outbound log.
    pub fn take_sent(&mut self) -> Vec<SentMessage> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.inbound.pop_front()
    }

    fn send(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), TransportError> {
        if !self.connected.contains(&peer) {
            return Err(TransportError::UnknownPeer(peer));
        }
        self.sent.push(SentMessage {
            peer,
            bytes: bytes.to_vec(),
            method,
            channel,
        });
        Ok(())
    }

    fn approve(&mut self, peer: SocketAddr) -> Result<(), TransportError> {
        if !self.connected.contains(&peer) {
            self.connected.push(peer);
        }
        self.approved.push(peer);
        self.push_event(TransportEvent::StatusChanged {
            peer,
            status: ConnectionStatus::Connected,
        });
        Ok(())
    }

    fn deny(&mut self, peer: SocketAddr, reason: &str) -> Result<(), TransportError> {
        self.denied.push((peer, reason.to_string()));
        Ok(())
    }

    fn send_discovery_response(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.discovery_replies.push((peer, bytes.to_vec()));
        Ok(())
    }

    fn connected_peers(&self) -> Vec<SocketAddr> {
        self.connected.clone()
    }

    fn shutdown(&mut self) {
        self.connected.clear();
        self.inbound.clear();
        self.shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_events_come_out_in_order() {
        let mut transport = MemoryTransport::new();
        transport.deliver_connection_request(peer(1), &[9]);
        transport.deliver_data(peer(1), 3, vec![1, 2]);

        assert!(matches!(
            transport.poll_event(),
            Some(TransportEvent::ConnectionRequest { .. })
        ));
        assert!(matches!(
            transport.poll_event(),
            Some(TransportEvent::Data { channel: 3, .. })
        ));
        assert!(transport.poll_event().is_none());
    }

    #[test]
    fn test_approve_connects_peer() {
        let mut transport = MemoryTransport::new();
        transport.approve(peer(1)).unwrap();
        assert_eq!(transport.connected_peers(), vec![peer(1)]);
        assert_eq!(
            transport.poll_event(),
            Some(TransportEvent::StatusChanged {
                peer: peer(1),
                status: ConnectionStatus::Connected
            })
        );
    }

    #[test]
    fn test_send_requires_connection() {
        let mut transport = MemoryTransport::new();
        assert_err!(transport.send(peer(1), &[0], DeliveryMethod::ReliableOrdered, 0));

        assert_ok!(transport.approve(peer(1)));
        assert_ok!(transport.send(peer(1), &[0], DeliveryMethod::ReliableOrdered, 0));
        assert_eq!(transport.sent_to(peer(1)).count(), 1);

        transport.deliver_disconnect(peer(1));
        assert!(transport.connected_peers().is_empty());
    }

    #[test]
    fn test_shutdown_clears_state() {
        let mut transport = MemoryTransport::new();
        transport.approve(peer(1)).unwrap();
        transport.shutdown();
        assert!(transport.shut_down);
        assert!(transport.connected_peers().is_empty());
        assert_eq!(transport.pending_events(), 0);
    }
}
