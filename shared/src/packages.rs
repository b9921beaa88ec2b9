//! Fixed-layout payload types carried inside the envelope.
//!
//! Fixed parts are read and written with bincode's default (fixed-width,
//! little-endian) layout, which matches the client byte for byte. Counted
//! arrays use a `u16` prefix and are framed by hand.

use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Cursor over an incoming payload.
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Reads a mandatory field; running out of bytes is an error.
    pub fn read<T: DeserializeOwned>(&mut self, what: &'static str) -> Result<T, CodecError> {
        bincode::deserialize_from(&mut self.buf).map_err(|e| CodecError::from_bincode(what, e))
    }

    /// Reads an optional trailing field, defaulting when the payload has ended.
    pub fn read_or_default<T>(&mut self, what: &'static str) -> Result<T, CodecError>
    where
        T: DeserializeOwned + Default,
    {
        if self.buf.is_empty() {
            Ok(T::default())
        } else {
            self.read(what)
        }
    }

    pub fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < len {
            return Err(CodecError::Truncated(what));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

/// Builder for an outgoing payload.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize>(&mut self, value: &T) -> Result<&mut Self, CodecError> {
        bincode::serialize_into(&mut self.buf, value)
            .map_err(|_| CodecError::Malformed("outgoing payload"))?;
        Ok(self)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Movement flag bits carried in [`PositionPackage::movement`].
pub mod movement {
    pub const LEFT: u8 = 1;
    pub const RIGHT: u8 = 2;
    pub const WALL_JUMP: u8 = 4;
    pub const GROUND_JUMP: u8 = 8;
}

#[derive(Serialize, Deserialize)]
struct PositionWire {
    y: i16,
    z: i16,
    rot_x: i8,
    rot_y: i8,
    y_value: i8,
    movement: u8,
}

/// A player's position, aim and movement flags.
///
/// Only the Y and Z axes travel on the wire, packed as centi-units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionPackage {
    pub y: f32,
    pub z: f32,
    pub rot_x: f32,
    pub rot_y: f32,
    pub y_value: i8,
    pub movement: u8,
}

impl PositionPackage {
    pub const WIRE_LEN: usize = 8;

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let wire: PositionWire = reader.read("position")?;
        Ok(Self {
            y: wire.y as f32 / 100.0,
            z: wire.z as f32 / 100.0,
            rot_x: wire.rot_x as f32 / 100.0,
            rot_y: wire.rot_y as f32 / 100.0,
            y_value: wire.y_value,
            movement: wire.movement,
        })
    }

    pub fn write(&self, writer: &mut WireWriter) -> Result<(), CodecError> {
        writer.put(&PositionWire {
            y: (self.y * 100.0).round() as i16,
            z: (self.z * 100.0).round() as i16,
            rot_x: (self.rot_x * 100.0).round() as i8,
            rot_y: (self.rot_y * 100.0).round() as i8,
            y_value: self.y_value,
            movement: self.movement,
        })?;
        Ok(())
    }

    /// Distance to `other` over the transmitted (Y, Z) plane.
    pub fn planar_distance(&self, other: &PositionPackage) -> f32 {
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dy * dy + dz * dz).sqrt()
    }
}

/// A projectile fired during one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectilePackage {
    pub x: i16,
    pub y: i16,
    pub vx: i8,
    pub vy: i8,
    pub sync_index: u16,
}

impl ProjectilePackage {
    pub const WIRE_LEN: usize = 8;

    pub fn speed(&self) -> f32 {
        let vx = self.vx as f32;
        let vy = self.vy as f32;
        (vx * vx + vy * vy).sqrt()
    }
}

fn read_projectiles(reader: &mut WireReader<'_>) -> Result<Vec<ProjectilePackage>, CodecError> {
    let count: u16 = reader.read_or_default("projectile count")?;
    let mut projectiles = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        projectiles.push(reader.read("projectile")?);
    }
    Ok(projectiles)
}

fn write_projectiles(
    writer: &mut WireWriter,
    projectiles: &[ProjectilePackage],
) -> Result<(), CodecError> {
    let count = u16::try_from(projectiles.len())
        .map_err(|_| CodecError::Malformed("projectile count"))?;
    writer.put(&count)?;
    for projectile in projectiles {
        writer.put(projectile)?;
    }
    Ok(())
}

/// Held weapon, fight state and the projectiles fired with it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeaponPackage {
    pub weapon_type: u8,
    pub fight_state: u8,
    pub projectiles: Vec<ProjectilePackage>,
}

impl WeaponPackage {
    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, CodecError> {
        let weapon_type = reader.read("weapon type")?;
        let fight_state = reader.read_or_default("fight state")?;
        let projectiles = read_projectiles(reader)?;
        Ok(Self {
            weapon_type,
            fight_state,
            projectiles,
        })
    }

    pub fn write(&self, writer: &mut WireWriter) -> Result<(), CodecError> {
        writer.put(&self.weapon_type)?.put(&self.fight_state)?;
        write_projectiles(writer, &self.projectiles)
    }
}

/// One movement/combat update as sent by a client and relayed by the server.
///
/// Layout: position block, fight state, `u16` projectile count, projectiles,
/// weapon type. Everything after the position block may be absent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerUpdate {
    pub position: PositionPackage,
    pub fight_state: u8,
    pub projectiles: Vec<ProjectilePackage>,
    pub weapon_type: u8,
}

impl PlayerUpdate {
    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = WireReader::new(payload);
        let position = PositionPackage::read(&mut reader)?;
        let fight_state = reader.read_or_default("fight state")?;
        let projectiles = read_projectiles(&mut reader)?;
        let weapon_type = reader.read_or_default("weapon type")?;
        Ok(Self {
            position,
            fight_state,
            projectiles,
            weapon_type,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = WireWriter::new();
        self.position.write(&mut writer)?;
        writer.put(&self.fight_state)?;
        write_projectiles(&mut writer, &self.projectiles)?;
        writer.put(&self.weapon_type)?;
        Ok(writer.into_bytes())
    }

    pub fn weapon(&self) -> WeaponPackage {
        WeaponPackage {
            weapon_type: self.weapon_type,
            fight_state: self.fight_state,
            projectiles: self.projectiles.clone(),
        }
    }
}

/// Per-player match statistics sent in the admission packet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerStats {
    pub kills: i32,
    pub deaths: i32,
    pub wins: i32,
    pub games_played: i32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub weapons_picked_up: i32,
    pub projectiles_fired: i32,
    pub projectiles_hit: i32,
    pub survival_time: f32,
    pub fall_outs: i32,
    pub suicides: i32,
    pub disconnects: i32,
}

impl PlayerStats {
    pub const WIRE_LEN: usize = 52;
}

/// Lobby options pushed to joining clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    pub map_option: u8,
    pub hp_option: u8,
    pub regen_option: u8,
    pub weapons_spawn_option: u8,
}

impl NetworkOptions {
    pub const WIRE_LEN: usize = 4;
}

/// Kind of map currently loaded.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapCategory {
    #[default]
    Lobby = 0,
    Standard = 1,
    Workshop = 2,
    Custom = 3,
}

impl TryFrom<u8> for MapCategory {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MapCategory::Lobby),
            1 => Ok(MapCategory::Standard),
            2 => Ok(MapCategory::Workshop),
            3 => Ok(MapCategory::Custom),
            other => Err(CodecError::UnknownMapCategory(other)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MapChangeWire {
    winner: u8,
    category: u8,
    map_id: i32,
}

/// Round transition announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapChange {
    /// Slot of the round winner, or [`MapChange::NO_WINNER`].
    pub winner: u8,
    pub category: MapCategory,
    pub map_id: i32,
}

impl MapChange {
    pub const NO_WINNER: u8 = u8::MAX;
    pub const WIRE_LEN: usize = 6;

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let wire: MapChangeWire = WireReader::new(payload).read("map change")?;
        Ok(Self {
            winner: wire.winner,
            category: MapCategory::try_from(wire.category)?,
            map_id: wire.map_id,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = WireWriter::new();
        writer.put(&MapChangeWire {
            winner: self.winner,
            category: self.category as u8,
            map_id: self.map_id,
        })?;
        Ok(writer.into_bytes())
    }
}
