//! The server pump: transport events in, session updates and relays out
//!
//! [`Server::pump`] is the single place where server state changes. Each call
//! drains finished admissions, sends pings when they are due and then handles
//! at most one transport event. Data events are size-checked, decoded,
//! passed through the sender's timestamp gate and routed through a handler
//! table keyed by [`PacketType`].
//!
//! Handler failures never take the server down: protocol errors are logged
//! at debug level, security events at warn under the `security` target, and
//! the pump carries on.

use crate::admission::{AdmissionQueue, AdmissionResult, AuthOutcome, DENY_FULL, DENY_UNAUTHORIZED};
use crate::auth::IdentityVerifier;
use crate::config::ServerConfig;
use crate::error::PacketError;
use crate::handlers::handler_table;
use crate::round::{AutoStartPolicy, RoundController};
use crate::security::{SecurityEvent, SecurityEventKind};
use crate::session::ConnectionStatus;
use crate::session_table::{AdmitOutcome, SessionTable};
use crate::transport::{MemoryTransport, Transport, TransportEvent};
use crate::utils::now_millis;
use crate::validation::{validate_packet_size, ValidationConfig};
use log::{debug, error, info, trace, warn};
use shared::{encode_envelope, DeliveryMethod, Envelope, MapChange, NetworkOptions, PacketType};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reply to LAN discovery probes.
pub const DISCOVERY_GREETING: &str = "Brawl server here, come on in!";

/// Channel used for control traffic that is not tied to a player.
pub const CONTROL_CHANNEL: u8 = 0;

/// Message types too frequent for per-packet debug logging.
const QUIET_TYPES: [PacketType; 1] = [PacketType::PlayerUpdate];

pub type Handler<T> = fn(&mut Server<T>, &Inbound) -> Result<(), PacketError>;

/// A data packet from a seated player, after decoding and gating.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub peer: SocketAddr,
    pub slot: u8,
    pub envelope: Envelope,
}

pub struct Server<T: Transport> {
    pub(crate) transport: T,
    pub(crate) sessions: SessionTable,
    pub(crate) round: RoundController,
    pub(crate) validation: ValidationConfig,
    pub(crate) game_options: NetworkOptions,
    admission: AdmissionQueue,
    handlers: HashMap<PacketType, Handler<T>>,
    debug_packets: bool,
    ping_interval: Duration,
    last_ping: Instant,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, verifier: Arc<dyn IdentityVerifier>, config: &ServerConfig) -> Self {
        let auto_start = AutoStartPolicy {
            single_player: config.auto_start_single_player,
            multiplayer: config.auto_start_multiplayer,
            min_players: config.min_players_for_auto_start,
        };

        Self {
            transport,
            sessions: SessionTable::new(config.max_players),
            round: RoundController::new(auto_start),
            validation: config.validation.clone(),
            game_options: config.game_options,
            admission: AdmissionQueue::new(verifier),
            handlers: handler_table(),
            debug_packets: config.enable_debug_packet_logging,
            ping_interval: config.ping_interval(),
            last_ping: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn round(&self) -> &RoundController {
        &self.round
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn pending_admissions(&self) -> usize {
        self.admission.pending_count()
    }

    /// Runs one step of the server. Returns true if a transport event was handled.
    ///
    /// Must be called from within a tokio runtime, since admissions spawn
    /// their verification tasks.
    pub fn pump(&mut self) -> bool {
        for result in self.admission.drain() {
            self.complete_admission(result);
        }

        let now = Instant::now();
        if now.saturating_duration_since(self.last_ping) >= self.ping_interval {
            self.last_ping = now;
            self.ping_connected();
        }

        match self.transport.poll_event() {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down with {} players seated", self.sessions.occupied_count());
        self.transport.shutdown();
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StatusChanged { peer, status } => self.on_status_changed(peer, status),
            TransportEvent::ConnectionRequest { peer, ticket } => {
                self.on_connection_request(peer, &ticket)
            }
            TransportEvent::Data {
                peer,
                channel,
                bytes,
            } => match self.on_data(peer, channel, &bytes) {
                Ok(()) => {}
                Err(PacketError::Protocol(reason)) => {
                    debug!("Dropped packet from {}: {}", peer, reason)
                }
                Err(PacketError::Security(mut event)) => {
                    if event.session.is_none() {
                        event.session = self.sessions.by_addr(peer).map(|s| s.slot);
                    }
                    event.emit();
                }
            },
            TransportEvent::DiscoveryRequest { peer } => self.on_discovery(peer),
            TransportEvent::Diagnostic(message) => debug!("Transport: {}", message),
        }
    }

    fn on_status_changed(&mut self, peer: SocketAddr, status: ConnectionStatus) {
        debug!("{} is now {:?}", peer, status);
        match status {
            ConnectionStatus::Connected => {
                let seated = self.sessions.occupied_count();
                if let Some(session) = self.sessions.by_addr_mut(peer) {
                    session.status = ConnectionStatus::Connected;
                    info!("{} connected, {} players seated", session.name, seated);
                }
            }
            ConnectionStatus::Disconnected => {
                if self.admission.cancel(peer) {
                    info!("Cancelled pending admission for {}", peer);
                }
                if let Some(session) = self.sessions.by_addr_mut(peer) {
                    info!("{} is leaving", session.name);
                    session.status = ConnectionStatus::Disconnected;
                }
                self.sessions.purge_disconnected();
            }
            _ => {}
        }
    }

    fn on_connection_request(&mut self, peer: SocketAddr, ticket: &[u8]) {
        info!("Connection request from {}", peer);
        if let Err(reason) = self.admission.request(peer, ticket, self.sessions.is_full()) {
            self.deny(peer, reason);
        }
    }

    fn complete_admission(&mut self, result: AdmissionResult) {
        let AdmissionResult {
            peer,
            ticket,
            outcome,
        } = result;

        let identity = match outcome {
            AuthOutcome::Approved(identity) => identity,
            AuthOutcome::Denied(e) => {
                info!("Denying {}: {}", peer, e);
                self.deny(peer, DENY_UNAUTHORIZED);
                return;
            }
        };

        match self
            .sessions
            .admit(identity.identity, identity.name, ticket, peer)
        {
            AdmitOutcome::Added(slot) | AdmitOutcome::Updated(slot) => {
                info!("Approving {} into slot {}", peer, slot);
                if let Err(e) = self.transport.approve(peer) {
                    error!("Failed to approve {}: {}", peer, e);
                }
            }
            AdmitOutcome::Rejected => self.deny(peer, DENY_FULL),
        }
    }

    fn deny(&mut self, peer: SocketAddr, reason: &str) {
        if let Err(e) = self.transport.deny(peer, reason) {
            error!("Failed to deny {}: {}", peer, e);
        }
    }

    fn on_discovery(&mut self, peer: SocketAddr) {
        info!("Discovered by {}", peer);
        if let Err(e) = self
            .transport
            .send_discovery_response(peer, DISCOVERY_GREETING.as_bytes())
        {
            warn!("Failed to answer discovery from {}: {}", peer, e);
        }
    }

    fn on_data(&mut self, peer: SocketAddr, channel: u8, bytes: &[u8]) -> Result<(), PacketError> {
        validate_packet_size(bytes.len())?;

        let slot = self.sessions.by_addr(peer).map(|s| s.slot).ok_or_else(|| {
            SecurityEvent::new(
                SecurityEventKind::UnknownClient,
                format!("data from unseated peer {}", peer),
            )
        })?;

        let envelope = Envelope::decode(bytes, channel)?;
        if envelope.kind.is_reserved() {
            debug!("Ignoring reserved {:?} from slot {}", envelope.kind, slot);
            return Ok(());
        }

        if self.debug_packets && !QUIET_TYPES.contains(&envelope.kind) {
            debug!(
                target: "packets",
                "{:?} from slot {}: {} bytes, sent at {}, channel {}",
                envelope.kind,
                slot,
                bytes.len(),
                envelope.timestamp,
                channel
            );
        }

        if let Some(session) = self.sessions.by_slot_mut(slot) {
            if !session.gate.admit(envelope.timestamp) {
                debug!("Discarding obsolete {:?} from slot {}", envelope.kind, slot);
                return Ok(());
            }
        }

        let Some(handler) = self.handlers.get(&envelope.kind).copied() else {
            trace!("No handler for {:?}", envelope.kind);
            return Ok(());
        };
        handler(
            self,
            &Inbound {
                peer,
                slot,
                envelope,
            },
        )
    }

    fn ping_connected(&mut self) {
        let peers: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|s| s.is_connected())
            .map(|s| s.addr)
            .collect();
        let stamp = now_millis().to_le_bytes();
        for peer in peers {
            self.send_to(
                peer,
                PacketType::Ping,
                &stamp,
                DeliveryMethod::ReliableOrdered,
                CONTROL_CHANNEL,
            );
        }
    }

    /// Sends one message, stamped with the current clock.
    pub(crate) fn send_to(
        &mut self,
        peer: SocketAddr,
        kind: PacketType,
        payload: &[u8],
        method: DeliveryMethod,
        channel: u8,
    ) {
        let bytes = encode_envelope(now_millis(), kind, payload);
        if let Err(e) = self.transport.send(peer, &bytes, method, channel) {
            warn!("Failed to send {:?} to {}: {}", kind, peer, e);
        }
    }

    /// Sends one message to every connected peer except `exclude`.
    pub(crate) fn broadcast(
        &mut self,
        kind: PacketType,
        payload: &[u8],
        exclude: Option<SocketAddr>,
        method: DeliveryMethod,
        channel: u8,
    ) {
        let bytes = encode_envelope(now_millis(), kind, payload);
        let mut sent = 0;
        for peer in self.transport.connected_peers() {
            if Some(peer) == exclude {
                continue;
            }
            match self.transport.send(peer, &bytes, method, channel) {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to send {:?} to {}: {}", kind, peer, e),
            }
        }
        trace!("Broadcast {:?} to {} peers", kind, sent);
    }

    pub(crate) fn broadcast_map_change(&mut self, change: MapChange, channel: u8) {
        match change.encode() {
            Ok(payload) => self.broadcast(
                PacketType::MapChange,
                &payload,
                None,
                DeliveryMethod::ReliableOrdered,
                channel,
            ),
            Err(e) => error!("Failed to encode map change: {}", e),
        }
    }
}

impl Server<MemoryTransport> {
    /// Event injection for an in-process server. Delivered data still goes
    /// through admission and validation like anything off the wire.
    pub fn transport_mut(&mut self) -> &mut MemoryTransport {
        &mut self.transport
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::VerifiedIdentity;
    use crate::error::AuthError;
    use crate::session::{AuthTicket, SteamId};
    use async_trait::async_trait;

    struct Deny;

    #[async_trait]
    impl IdentityVerifier for Deny {
        async fn verify(&self, _ticket: &AuthTicket) -> Result<VerifiedIdentity, AuthError> {
            Err(AuthError::Rejected("no".to_string()))
        }
    }

    pub(crate) fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// A server whose verifier turns everyone away.
    pub(crate) fn server() -> Server<MemoryTransport> {
        Server::new(MemoryTransport::new(), Arc::new(Deny), &ServerConfig::default())
    }

    /// Seats a player directly, bypassing authentication.
    pub(crate) fn seat(server: &mut Server<MemoryTransport>, port: u16) -> u8 {
        let addr = test_addr(port);
        let slot = server
            .sessions
            .admit(
                SteamId(76561198000000000 + port as u64),
                format!("p{}", port),
                AuthTicket::from_bytes(&[port as u8]),
                addr,
            )
            .slot()
            .unwrap();
        server.transport.approve(addr).unwrap();
        while server.pump() {}
        slot
    }

    #[tokio::test]
    async fn test_discovery_reply() {
        let mut server = server();
        server
            .transport
            .push_event(TransportEvent::DiscoveryRequest { peer: test_addr(1) });
        assert!(server.pump());
        assert_eq!(
            server.transport.discovery_replies,
            vec![(test_addr(1), DISCOVERY_GREETING.as_bytes().to_vec())]
        );
    }

    #[tokio::test]
    async fn test_approval_marks_connected() {
        let mut server = server();
        let slot = seat(&mut server, 9001);
        assert!(server.sessions.by_slot(slot).unwrap().is_connected());
    }

    #[tokio::test]
    async fn test_oversized_and_garbage_data_dropped() {
        let mut server = server();
        seat(&mut server, 9001);
        server.transport.take_sent();

        server.transport.deliver_data(test_addr(9001), 0, vec![0; 2000]);
        server.transport.deliver_data(test_addr(9001), 0, vec![1, 2]);
        server
            .transport
            .deliver_data(test_addr(9001), 0, encode_envelope(1, PacketType::Ping, &[]));
        while server.pump() {}
        assert!(server.transport.sent.is_empty());
        assert_eq!(server.sessions.occupied_count(), 1);
    }

    #[tokio::test]
    async fn test_obsolete_packet_dropped() {
        let mut server = server();
        seat(&mut server, 9001);
        server.transport.take_sent();

        let ping = |ts: u32| encode_envelope(ts, PacketType::Ping, &ts.to_le_bytes());
        server.transport.deliver_data(test_addr(9001), 0, ping(10_000));
        server.transport.deliver_data(test_addr(9001), 0, ping(9_000));
        server.transport.deliver_data(test_addr(9001), 0, ping(9_800));
        while server.pump() {}

        let replies: Vec<_> = server.transport.sent_to(test_addr(9001)).collect();
        assert_eq!(replies.len(), 2);
    }

    #[tokio::test]
    async fn test_unseated_peer_data_ignored() {
        let mut server = server();
        server.transport.approve(test_addr(5)).unwrap();
        server
            .transport
            .deliver_data(test_addr(5), 0, encode_envelope(1, PacketType::Ping, &[0; 4]));
        while server.pump() {}
        assert!(server.transport.sent.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_purges_session() {
        let mut server = server();
        seat(&mut server, 9001);
        server.transport.deliver_disconnect(test_addr(9001));
        while server.pump() {}
        assert_eq!(server.sessions.occupied_count(), 0);
    }
}
