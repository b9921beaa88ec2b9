//! Datagram transport over a tokio UDP socket
//!
//! Every datagram is one bincode-encoded [`Frame`]. A spawned receiver task
//! reads the socket and forwards decoded frames over an unbounded channel;
//! [`UdpTransport::poll_event`] drains that channel without blocking and
//! turns frames into [`TransportEvent`]s using the connection set it owns.
//!
//! Delivery is best effort. The delivery method and channel are carried in
//! the frame so a client can apply its own sequencing, but nothing is
//! retransmitted.

use crate::error::TransportError;
use crate::session::ConnectionStatus;
use crate::transport::{Transport, TransportEvent};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use shared::DeliveryMethod;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receive buffer size; anything larger is truncated by the OS and fails to decode.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Connected peers silent for this long are dropped.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything that travels over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Connect {
        ticket: Vec<u8>,
    },
    Approved,
    Denied {
        reason: String,
    },
    Data {
        method: DeliveryMethod,
        channel: u8,
        payload: Vec<u8>,
    },
    Disconnect,
    DiscoveryRequest,
    DiscoveryResponse {
        payload: Vec<u8>,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(deserialize(bytes)?)
    }
}

/// Messages from the receiver task to the transport
#[derive(Debug)]
enum SocketMessage {
    Frame { peer: SocketAddr, frame: Frame },
    Undecodable { peer: SocketAddr, len: usize },
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    socket_rx: mpsc::UnboundedReceiver<SocketMessage>,
    receiver: JoinHandle<()>,
    /// Events raised locally, such as the status change after an approval.
    local: VecDeque<TransportEvent>,
    /// Connected peers and when each was last heard from.
    connected: HashMap<SocketAddr, Instant>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Listening on {}", socket.local_addr()?);

        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let receiver = Self::spawn_receiver(Arc::clone(&socket), socket_tx);

        Ok(Self {
            socket,
            socket_rx,
            receiver,
            local: VecDeque::new(),
            connected: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Spawns the task that reads datagrams until the channel closes.
    fn spawn_receiver(
        socket: Arc<UdpSocket>,
        socket_tx: mpsc::UnboundedSender<SocketMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, peer)) => {
                        let message = match deserialize::<Frame>(&buffer[..len]) {
                            Ok(frame) => SocketMessage::Frame { peer, frame },
                            Err(_) => SocketMessage::Undecodable { peer, len },
                        };
                        if socket_tx.send(message).is_err() {
                            debug!("Transport dropped, receiver exiting");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    fn send_frame(&self, peer: SocketAddr, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame.encode()?;
        self.socket.try_send_to(&bytes, peer)?;
        Ok(())
    }

    fn translate(&mut self, peer: SocketAddr, frame: Frame) -> TransportEvent {
        if let Some(last_heard) = self.connected.get_mut(&peer) {
            *last_heard = Instant::now();
        }

        match frame {
            Frame::Connect { ticket } => TransportEvent::ConnectionRequest { peer, ticket },
            Frame::Data {
                channel, payload, ..
            } => {
                if self.connected.contains_key(&peer) {
                    TransportEvent::Data {
                        peer,
                        channel,
                        bytes: payload,
                    }
                } else {
                    TransportEvent::Diagnostic(format!("data from unconnected peer {}", peer))
                }
            }
            Frame::Disconnect => {
                self.connected.remove(&peer);
                TransportEvent::StatusChanged {
                    peer,
                    status: ConnectionStatus::Disconnected,
                }
            }
            Frame::DiscoveryRequest => TransportEvent::DiscoveryRequest { peer },
            other => TransportEvent::Diagnostic(format!(
                "unexpected {:?} frame from {}",
                other, peer
            )),
        }
    }

    /// Drops connected peers that have gone quiet and reports them.
    fn expire_idle_peers(&mut self, now: Instant) {
        let expired: Vec<SocketAddr> = self
            .connected
            .iter()
            .filter(|(_, last)| now.saturating_duration_since(**last) > PEER_TIMEOUT)
            .map(|(peer, _)| *peer)
            .collect();

        for peer in expired {
            warn!("Peer {} timed out", peer);
            self.connected.remove(&peer);
            self.local.push_back(TransportEvent::StatusChanged {
                peer,
                status: ConnectionStatus::Disconnected,
            });
        }
    }
}

impl Transport for UdpTransport {
    fn poll_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.local.pop_front() {
            return Some(event);
        }

        match self.socket_rx.try_recv() {
            Ok(SocketMessage::Frame { peer, frame }) => Some(self.translate(peer, frame)),
            Ok(SocketMessage::Undecodable { peer, len }) => Some(TransportEvent::Diagnostic(
                format!("undecodable {} byte datagram from {}", len, peer),
            )),
            Err(_) => {
                self.expire_idle_peers(Instant::now());
                self.local.pop_front()
            }
        }
    }

    fn send(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
        method: DeliveryMethod,
        channel: u8,
    ) -> Result<(), TransportError> {
        if !self.connected.contains_key(&peer) {
            return Err(TransportError::UnknownPeer(peer));
        }
        self.send_frame(
            peer,
            &Frame::Data {
                method,
                channel,
                payload: bytes.to_vec(),
            },
        )
    }

    fn approve(&mut self, peer: SocketAddr) -> Result<(), TransportError> {
        self.connected.insert(peer, Instant::now());
        self.local.push_back(TransportEvent::StatusChanged {
            peer,
            status: ConnectionStatus::Connected,
        });
        self.send_frame(peer, &Frame::Approved)
    }

    fn deny(&mut self, peer: SocketAddr, reason: &str) -> Result<(), TransportError> {
        self.send_frame(
            peer,
            &Frame::Denied {
                reason: reason.to_string(),
            },
        )
    }

    fn send_discovery_response(
        &mut self,
        peer: SocketAddr,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.send_frame(
            peer,
            &Frame::DiscoveryResponse {
                payload: bytes.to_vec(),
            },
        )
    }

    fn connected_peers(&self) -> Vec<SocketAddr> {
        self.connected.keys().copied().collect()
    }

    fn shutdown(&mut self) {
        for peer in self.connected_peers() {
            if let Err(e) = self.send_frame(peer, &Frame::Disconnect) {
                debug!("Failed to notify {} of shutdown: {}", peer, e);
            }
        }
        self.connected.clear();
        self.receiver.abort();
        info!("Transport shut down");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_event(transport: &mut UdpTransport) -> TransportEvent {
        for _ in 0..200 {
            if let Some(event) = transport.poll_event() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no event arrived");
    }

    async fn recv_frame(socket: &UdpSocket) -> Frame {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        Frame::decode(&buffer[..len]).unwrap()
    }

    async fn setup() -> (UdpTransport, UdpSocket, SocketAddr) {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let server_addr = transport.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (transport, client, server_addr)
    }

    #[tokio::test]
    async fn test_connect_approve_and_exchange_data() {
        let (mut transport, client, server_addr) = setup().await;
        let client_addr = client.local_addr().unwrap();

        let connect = Frame::Connect { ticket: vec![1, 2] }.encode().unwrap();
        client.send_to(&connect, server_addr).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::ConnectionRequest {
                peer: client_addr,
                ticket: vec![1, 2]
            }
        );

        transport.approve(client_addr).unwrap();
        assert_eq!(recv_frame(&client).await, Frame::Approved);
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::StatusChanged {
                status: ConnectionStatus::Connected,
                ..
            }
        ));

        let data = Frame::Data {
            method: DeliveryMethod::ReliableOrdered,
            channel: 3,
            payload: vec![7, 7],
        };
        client.send_to(&data.encode().unwrap(), server_addr).await.unwrap();
        assert_eq!(
            next_event(&mut transport).await,
            TransportEvent::Data {
                peer: client_addr,
                channel: 3,
                bytes: vec![7, 7]
            }
        );

        transport
            .send(client_addr, &[4, 2], DeliveryMethod::Unreliable, 0)
            .unwrap();
        assert_eq!(
            recv_frame(&client).await,
            Frame::Data {
                method: DeliveryMethod::Unreliable,
                channel: 0,
                payload: vec![4, 2]
            }
        );
    }

    #[tokio::test]
    async fn test_data_from_stranger_is_diagnostic() {
        let (mut transport, client, server_addr) = setup().await;
        let data = Frame::Data {
            method: DeliveryMethod::Unreliable,
            channel: 0,
            payload: vec![1],
        };
        client.send_to(&data.encode().unwrap(), server_addr).await.unwrap();
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::Diagnostic(_)
        ));
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_diagnostic() {
        let (mut transport, client, server_addr) = setup().await;
        client.send_to(&[0xFF; 3], server_addr).await.unwrap();
        assert!(matches!(
            next_event(&mut transport).await,
            TransportEvent::Diagnostic(_)
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let (mut transport, client, _) = setup().await;
        let result = transport.send(
            client.local_addr().unwrap(),
            &[1],
            DeliveryMethod::Unreliable,
            0,
        );
        assert!(matches!(result, Err(TransportError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn test_idle_peer_expires() {
        let (mut transport, client, _) = setup().await;
        let peer = client.local_addr().unwrap();
        transport.approve(peer).unwrap();
        assert!(transport.poll_event().is_some());

        transport.expire_idle_peers(Instant::now() + PEER_TIMEOUT + Duration::from_secs(1));
        assert_eq!(
            transport.poll_event(),
            Some(TransportEvent::StatusChanged {
                peer,
                status: ConnectionStatus::Disconnected
            })
        );
        assert!(transport.connected_peers().is_empty());
    }
}
