//! Per-player session state
//!
//! A [`ClientSession`] is created when a connection is admitted and carries
//! everything the server knows about that player: who they are, where they
//! connect from, which slot they occupy, and their authoritative live state
//! (health, last accepted position, held weapon).

use crate::ordering::TimestampGate;
use shared::{PlayerStats, PositionPackage, WeaponPackage};
use std::fmt;
use std::net::SocketAddr;

/// Hit points every player starts a round with.
pub const FULL_HP: f32 = 100.0;

/// Latency values above this are clamped.
pub const MAX_PING_MS: u32 = 9999;

/// A 64-bit Steam account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SteamId(pub u64);

impl SteamId {
    /// Checks the id is an individual account in the public universe.
    ///
    /// Bits 56..64 hold the universe, 52..56 the account type and the low
    /// 32 bits the account number, which must be non-zero.
    pub fn is_plausible(self) -> bool {
        self.0 >> 52 == 0x011 && self.0 & 0xFFFF_FFFF != 0
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An auth ticket, kept only as its lowercase hex form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthTicket(String);

impl AuthTicket {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.0.chars().take(10).collect();
        write!(f, "{}...", shown)
    }
}

/// Connection lifecycle as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    None,
    Connecting,
    AwaitingApproval,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Everything tracked for one seated player.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub identity: SteamId,
    pub name: String,
    pub ticket: AuthTicket,
    pub addr: SocketAddr,
    pub status: ConnectionStatus,
    /// Position in the session table, also the player's wire index.
    pub slot: u8,
    pub ping_ms: u32,
    pub hp: f32,
    pub alive: bool,
    /// Last position that passed validation; `None` until the first update after spawning.
    pub position: Option<PositionPackage>,
    pub weapon: WeaponPackage,
    pub ready: bool,
    pub stats: PlayerStats,
    pub gate: TimestampGate,
}

impl ClientSession {
    pub fn new(
        identity: SteamId,
        name: String,
        ticket: AuthTicket,
        addr: SocketAddr,
        slot: u8,
    ) -> Self {
        Self {
            identity,
            name,
            ticket,
            addr,
            status: ConnectionStatus::AwaitingApproval,
            slot,
            ping_ms: 0,
            hp: FULL_HP,
            alive: true,
            position: None,
            weapon: WeaponPackage::default(),
            ready: false,
            stats: PlayerStats::default(),
            gate: TimestampGate::new(),
        }
    }

    /// Removes `amount` hit points; the player dies at zero and stays dead until revived.
    pub fn deduct_hp(&mut self, amount: f32) {
        self.hp = (self.hp - amount).max(0.0);
        if self.hp <= 0.0 {
            self.alive = false;
        }
    }

    /// Restores full health for a new round or respawn.
    pub fn revive(&mut self) {
        self.hp = FULL_HP;
        self.alive = true;
        self.position = None;
    }

    pub fn set_ping(&mut self, rtt_ms: u32) {
        self.ping_ms = rtt_ms.min(MAX_PING_MS);
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Last known position, or the origin before the first accepted update.
    pub fn position_or_origin(&self) -> PositionPackage {
        self.position.unwrap_or_default()
    }
}

impl fmt::Display for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) slot {} at {}",
            self.name, self.identity, self.slot, self.addr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> ClientSession {
        ClientSession::new(
            SteamId(76561198000000001),
            "Tester".to_string(),
            AuthTicket::from_bytes(&[0xAB, 0x01]),
            "127.0.0.1:8080".parse().unwrap(),
            0,
        )
    }

    #[test]
    fn test_session_creation() {
        let session = test_session();
        assert_eq!(session.hp, FULL_HP);
        assert!(session.alive);
        assert!(session.position.is_none());
        assert_eq!(session.status, ConnectionStatus::AwaitingApproval);
        assert_eq!(session.ticket.as_hex(), "ab01");
    }

    #[test]
    fn test_deduct_hp_clamps_and_kills() {
        let mut session = test_session();
        session.deduct_hp(60.0);
        assert_eq!(session.hp, 40.0);
        assert!(session.alive);

        session.deduct_hp(75.0);
        assert_eq!(session.hp, 0.0);
        assert!(!session.alive);
    }

    #[test]
    fn test_dead_player_stays_dead() {
        let mut session = test_session();
        session.deduct_hp(100.0);
        session.deduct_hp(-50.0);
        assert!(!session.alive);
    }

    #[test]
    fn test_revive() {
        let mut session = test_session();
        session.position = Some(PositionPackage::default());
        session.deduct_hp(150.0);
        session.revive();
        assert_eq!(session.hp, FULL_HP);
        assert!(session.alive);
        assert!(session.position.is_none());
    }

    #[test]
    fn test_ping_is_capped() {
        let mut session = test_session();
        session.set_ping(120);
        assert_eq!(session.ping_ms, 120);
        session.set_ping(50_000);
        assert_eq!(session.ping_ms, MAX_PING_MS);
    }

    #[test]
    fn test_steam_id_plausibility() {
        assert!(SteamId(76561198000000001).is_plausible());
        assert!(!SteamId(0).is_plausible());
        assert!(!SteamId(76561197960265728).is_plausible());
        assert!(!SteamId(12345).is_plausible());
    }
}
