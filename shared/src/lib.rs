//! Wire protocol shared by the game server and its tooling.
//!
//! The codec is pure: it turns bytes into typed values and back, and holds no
//! state. Anything that judges whether a decoded value is *acceptable* lives
//! in the server's validation layer.

pub mod error;
pub mod packages;
pub mod packet;

pub use error::CodecError;
pub use packages::{
    MapCategory, MapChange, NetworkOptions, PlayerStats, PlayerUpdate, PositionPackage,
    ProjectilePackage, WeaponPackage, WireReader, WireWriter,
};
pub use packet::{
    encode_envelope, event_channel, slot_for_event_channel, update_channel, DeliveryMethod,
    Envelope, PacketType,
};
