//! Message-type enumeration, delivery classes and the datagram envelope.
//!
//! Every application datagram is laid out as
//! `[timestamp: u32][message type: u8][payload]`, little-endian. The numeric
//! message codes are shared with the game client and never change.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};

/// Application message types, in wire order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    Ping = 0,
    PingResponse = 1,
    ClientJoined = 2,
    ClientRequestingAccepting = 3,
    ClientAccepted = 4,
    ClientInit = 5,
    ClientRequestingIndex = 6,
    ClientRequestingToSpawn = 7,
    ClientSpawned = 8,
    ClientReadyUp = 9,
    PlayerUpdate = 10,
    PlayerTookDamage = 11,
    PlayerTalked = 12,
    PlayerForceAdded = 13,
    PlayerForceAddedAndBlock = 14,
    PlayerLavaForceAdded = 15,
    PlayerFallOut = 16,
    PlayerWonWithRicochet = 17,
    MapChange = 18,
    WeaponSpawned = 19,
    WeaponThrown = 20,
    RequestingWeaponThrow = 21,
    ClientRequestWeaponDrop = 22,
    WeaponDropped = 23,
    WeaponWasPickedUp = 24,
    ClientRequestingWeaponPickUp = 25,
    ObjectUpdate = 26,
    ObjectSpawned = 27,
    ObjectSimpleDestruction = 28,
    ObjectInvokeDestructionEvent = 29,
    ObjectDestructionCollision = 30,
    GroundWeaponsInit = 31,
    MapInfo = 32,
    MapInfoSync = 33,
    WorkshopMapsLoaded = 34,
    StartMatch = 35,
    ObjectHello = 36,
    OptionsChanged = 37,
    KickPlayer = 38,
}

impl PacketType {
    /// All message types indexed by their wire code.
    pub const ALL: [PacketType; 39] = [
        PacketType::Ping,
        PacketType::PingResponse,
        PacketType::ClientJoined,
        PacketType::ClientRequestingAccepting,
        PacketType::ClientAccepted,
        PacketType::ClientInit,
        PacketType::ClientRequestingIndex,
        PacketType::ClientRequestingToSpawn,
        PacketType::ClientSpawned,
        PacketType::ClientReadyUp,
        PacketType::PlayerUpdate,
        PacketType::PlayerTookDamage,
        PacketType::PlayerTalked,
        PacketType::PlayerForceAdded,
        PacketType::PlayerForceAddedAndBlock,
        PacketType::PlayerLavaForceAdded,
        PacketType::PlayerFallOut,
        PacketType::PlayerWonWithRicochet,
        PacketType::MapChange,
        PacketType::WeaponSpawned,
        PacketType::WeaponThrown,
        PacketType::RequestingWeaponThrow,
        PacketType::ClientRequestWeaponDrop,
        PacketType::WeaponDropped,
        PacketType::WeaponWasPickedUp,
        PacketType::ClientRequestingWeaponPickUp,
        PacketType::ObjectUpdate,
        PacketType::ObjectSpawned,
        PacketType::ObjectSimpleDestruction,
        PacketType::ObjectInvokeDestructionEvent,
        PacketType::ObjectDestructionCollision,
        PacketType::GroundWeaponsInit,
        PacketType::MapInfo,
        PacketType::MapInfoSync,
        PacketType::WorkshopMapsLoaded,
        PacketType::StartMatch,
        PacketType::ObjectHello,
        PacketType::OptionsChanged,
        PacketType::KickPlayer,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Types the client defines but the server does not act on yet.
    pub fn is_reserved(self) -> bool {
        let code = self.code();
        (14..=38).contains(&code) && self != PacketType::MapChange
    }
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PacketType::ALL
            .get(value as usize)
            .copied()
            .ok_or(CodecError::UnknownType(value))
    }
}

/// Reliability classes offered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMethod {
    Unreliable,
    UnreliableSequenced,
    ReliableUnordered,
    ReliableOrdered,
}

/// Sequence channel carrying a player's movement updates.
pub fn update_channel(slot: u8) -> u8 {
    2 + 2 * slot
}

/// Sequence channel carrying a player's combat events.
pub fn event_channel(slot: u8) -> u8 {
    3 + 2 * slot
}

/// Recovers the target slot from the event channel a damage report arrived on.
pub fn slot_for_event_channel(channel: u8) -> Option<u8> {
    channel.checked_sub(3).map(|c| c / 2)
}

#[derive(Serialize, Deserialize)]
struct Header {
    timestamp: u32,
    kind: u8,
}

/// Size of the `[timestamp][type]` prefix.
pub const HEADER_LEN: usize = 5;

/// A decoded application datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender clock in milliseconds, wrapping at 2^32.
    pub timestamp: u32,
    pub kind: PacketType,
    pub payload: Vec<u8>,
    /// Sequence channel the transport delivered this on.
    pub channel: u8,
}

impl Envelope {
    /// Parses raw datagram bytes received on `channel`.
    pub fn decode(bytes: &[u8], channel: u8) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated("envelope header"));
        }
        let header: Header = bincode::deserialize(&bytes[..HEADER_LEN])
            .map_err(|e| CodecError::from_bincode("envelope header", e))?;
        let kind = PacketType::try_from(header.kind)?;
        Ok(Envelope {
            timestamp: header.timestamp,
            kind,
            payload: bytes[HEADER_LEN..].to_vec(),
            channel,
        })
    }
}

/// Frames `payload` behind a header stamped with `timestamp`.
pub fn encode_envelope(timestamp: u32, kind: PacketType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.push(kind.code());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_codes() {
        assert_eq!(PacketType::ClientJoined.code(), 2);
        assert_eq!(PacketType::ClientSpawned.code(), 8);
        assert_eq!(PacketType::ClientReadyUp.code(), 9);
        assert_eq!(PacketType::MapChange.code(), 18);
    }

    #[test]
    fn test_table_matches_discriminants() {
        for (code, kind) in PacketType::ALL.iter().enumerate() {
            assert_eq!(kind.code() as usize, code);
            assert_eq!(PacketType::try_from(code as u8), Ok(*kind));
        }
        assert_eq!(PacketType::try_from(39), Err(CodecError::UnknownType(39)));
        assert_eq!(PacketType::try_from(255), Err(CodecError::UnknownType(255)));
    }

    #[test]
    fn test_reserved_types() {
        assert!(!PacketType::PlayerForceAdded.is_reserved());
        assert!(!PacketType::MapChange.is_reserved());
        assert!(PacketType::WeaponSpawned.is_reserved());
        assert!(PacketType::KickPlayer.is_reserved());
    }

    #[test]
    fn test_envelope_layout() {
        let bytes = encode_envelope(0x0403_0201, PacketType::MapChange, &[9, 8]);
        assert_eq!(bytes, vec![1, 2, 3, 4, 18, 9, 8]);

        let envelope = Envelope::decode(&bytes, 7).unwrap();
        assert_eq!(envelope.timestamp, 0x0403_0201);
        assert_eq!(envelope.kind, PacketType::MapChange);
        assert_eq!(envelope.payload, vec![9, 8]);
        assert_eq!(envelope.channel, 7);
    }

    #[test]
    fn test_envelope_rejects_short_header() {
        assert_eq!(
            Envelope::decode(&[1, 2, 3], 0),
            Err(CodecError::Truncated("envelope header"))
        );
    }

    #[test]
    fn test_envelope_rejects_unknown_type() {
        let bytes = [0, 0, 0, 0, 200];
        assert_eq!(Envelope::decode(&bytes, 0), Err(CodecError::UnknownType(200)));
    }

    #[test]
    fn test_channels() {
        assert_eq!(update_channel(0), 2);
        assert_eq!(event_channel(0), 3);
        assert_eq!(event_channel(3), 9);
        assert_eq!(slot_for_event_channel(9), Some(3));
        assert_eq!(slot_for_event_channel(3), Some(0));
        assert_eq!(slot_for_event_channel(1), None);
    }
}
