//! Anti-cheat validation and the authoritative damage model
//!
//! These are pure functions over the session's current state and the
//! client's proposal. They never mutate a session; the caller applies the
//! result only when validation passes. Each rejection is returned as a
//! [`SecurityEvent`] for the dispatcher to log.

use crate::security::{SecurityEvent, SecurityEventKind};
use log::debug;
use serde::{Deserialize, Serialize};
use shared::{PositionPackage, ProjectilePackage, WireReader};

/// Largest datagram accepted from a client.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Longest chat message, in characters.
pub const MAX_CHAT_LENGTH: usize = 512;

/// Largest hit the server will ever apply.
pub const MAX_DAMAGE_PER_HIT: f32 = 100.0;

/// Tunable anti-cheat limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_movement_per_update: f32,
    pub coordinate_bound: f32,
    pub rotation_bound: f32,
    pub max_projectiles_per_update: usize,
    pub max_projectile_origin_distance: f32,
    pub max_projectile_speed: f32,
    pub max_force: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_movement_per_update: 5.0,
            coordinate_bound: 1000.0,
            rotation_bound: 2.0,
            max_projectiles_per_update: 50,
            max_projectile_origin_distance: 20.0,
            max_projectile_speed: 200.0,
            max_force: 1000.0,
        }
    }
}

/// Accepts or rejects a proposed position.
///
/// The first update after a spawn has nothing to compare against and is
/// always accepted.
pub fn validate_movement(
    config: &ValidationConfig,
    previous: Option<&PositionPackage>,
    proposed: &PositionPackage,
) -> Result<(), SecurityEvent> {
    let Some(previous) = previous else {
        return Ok(());
    };

    let moved = previous.planar_distance(proposed);
    if moved > config.max_movement_per_update {
        return Err(SecurityEvent::new(
            SecurityEventKind::SpeedHack,
            format!("excessive movement of {:.2} units", moved),
        ));
    }

    let bound = config.coordinate_bound;
    if !(-bound..=bound).contains(&proposed.y) || !(-bound..=bound).contains(&proposed.z) {
        return Err(SecurityEvent::new(
            SecurityEventKind::OutOfBounds,
            format!("position out of bounds: y={:.2}, z={:.2}", proposed.y, proposed.z),
        ));
    }

    if proposed.rot_x.abs() > config.rotation_bound || proposed.rot_y.abs() > config.rotation_bound
    {
        return Err(SecurityEvent::new(
            SecurityEventKind::InvalidRotation,
            format!(
                "invalid rotation: x={:.2}, y={:.2}",
                proposed.rot_x, proposed.rot_y
            ),
        ));
    }

    Ok(())
}

/// Checks one projectile against the firer's last known position.
pub fn validate_projectile(
    config: &ValidationConfig,
    firer: &PositionPackage,
    projectile: &ProjectilePackage,
) -> Result<(), SecurityEvent> {
    let origin_x = projectile.x as f32;
    let origin_y = projectile.y as f32;
    let speed = projectile.speed();

    if !origin_x.is_finite() || !origin_y.is_finite() || !speed.is_finite() {
        return Err(SecurityEvent::new(
            SecurityEventKind::InvalidProjectileValues,
            "non-finite projectile values",
        ));
    }

    let dx = origin_x - firer.y;
    let dy = origin_y - firer.z;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance > config.max_projectile_origin_distance {
        return Err(SecurityEvent::new(
            SecurityEventKind::ProjectileTooFar,
            format!("projectile origin {:.1} units from player", distance),
        ));
    }

    if speed > config.max_projectile_speed {
        return Err(SecurityEvent::new(
            SecurityEventKind::ProjectileTooFast,
            format!("projectile velocity {:.1}", speed),
        ));
    }

    Ok(())
}

/// Keeps the projectiles that pass validation.
///
/// Individual bad projectiles are dropped and reported; an update carrying
/// more than the configured count is rejected outright.
pub fn filter_projectiles(
    config: &ValidationConfig,
    firer: &PositionPackage,
    projectiles: &[ProjectilePackage],
) -> Result<(Vec<ProjectilePackage>, Vec<SecurityEvent>), SecurityEvent> {
    if projectiles.len() > config.max_projectiles_per_update {
        return Err(SecurityEvent::new(
            SecurityEventKind::ExcessiveProjectiles,
            format!("{} projectiles in one update", projectiles.len()),
        ));
    }

    let mut kept = Vec::with_capacity(projectiles.len());
    let mut rejected = Vec::new();
    for projectile in projectiles {
        match validate_projectile(config, firer, projectile) {
            Ok(()) => kept.push(*projectile),
            Err(event) => rejected.push(event),
        }
    }
    Ok((kept, rejected))
}

/// Validates the force vector at the head of a force payload.
pub fn validate_force(config: &ValidationConfig, payload: &[u8]) -> Result<(f32, f32), SecurityEvent> {
    let mut reader = WireReader::new(payload);
    let (x, y): (f32, f32) = reader.read("force vector").map_err(|_| {
        SecurityEvent::new(
            SecurityEventKind::InvalidForceValues,
            format!("force payload of {} bytes is too short", payload.len()),
        )
    })?;

    if !x.is_finite() || !y.is_finite() {
        return Err(SecurityEvent::new(
            SecurityEventKind::InvalidForceValues,
            "non-finite force values",
        ));
    }

    let magnitude = (x * x + y * y).sqrt();
    if magnitude > config.max_force {
        return Err(SecurityEvent::new(
            SecurityEventKind::ExcessiveForce,
            format!("force magnitude {:.1} exceeds limit", magnitude),
        ));
    }

    Ok((x, y))
}

/// Validates a chat payload and returns the message text.
pub fn validate_chat(payload: &[u8]) -> Result<&str, SecurityEvent> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        SecurityEvent::new(SecurityEventKind::InvalidChat, "chat is not valid UTF-8")
    })?;
    if text.is_empty() || text.chars().count() > MAX_CHAT_LENGTH || text.contains('\0') {
        return Err(SecurityEvent::new(
            SecurityEventKind::InvalidChat,
            "invalid chat message format",
        ));
    }
    Ok(text)
}

/// Rejects datagrams larger than [`MAX_PACKET_SIZE`].
pub fn validate_packet_size(len: usize) -> Result<(), SecurityEvent> {
    if len > MAX_PACKET_SIZE {
        return Err(SecurityEvent::new(
            SecurityEventKind::OversizedPacket,
            format!("{} byte packet exceeds {} byte limit", len, MAX_PACKET_SIZE),
        ));
    }
    Ok(())
}

pub fn base_damage(weapon_type: u8) -> f32 {
    match weapon_type {
        0 => 0.0,
        1 => 25.0,
        2 => 35.0,
        3 => 50.0,
        4 => 75.0,
        _ => 20.0,
    }
}

pub fn effective_range(weapon_type: u8) -> f32 {
    match weapon_type {
        0 => 2.0,
        1 => 10.0,
        2 => 15.0,
        3 => 8.0,
        4 => 20.0,
        _ => 10.0,
    }
}

/// Damage multiplier at `distance`: full inside the effective range, then
/// linear down to a quarter at twice the range, and a quarter beyond.
pub fn distance_falloff(distance: f32, weapon_type: u8) -> f32 {
    let range = effective_range(weapon_type);
    if distance <= range {
        return 1.0;
    }
    if distance >= range * 2.0 {
        return 0.25;
    }
    let ratio = (distance - range) / range;
    1.0 - ratio * 0.75
}

/// Outcome of the authoritative damage computation.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageAssessment {
    /// Damage to apply, already clamped to `[0, MAX_DAMAGE_PER_HIT]`.
    pub applied: f32,
    /// Set when the client's claim strayed too far from the server's figure.
    pub mismatch: Option<SecurityEvent>,
}

/// Computes the damage `attacker` deals to `target` with `weapon_type`.
///
/// The client's own figure only feeds the mismatch report; it never changes
/// what is applied.
pub fn compute_damage(
    weapon_type: u8,
    attacker: &PositionPackage,
    target: &PositionPackage,
    client_damage: f32,
) -> DamageAssessment {
    let base = base_damage(weapon_type);
    let distance = attacker.planar_distance(target);
    let server_damage = base * distance_falloff(distance, weapon_type);
    debug!(
        "Weapon {} at {:.2} units: server {:.1}, client {:.1}",
        weapon_type, distance, server_damage, client_damage
    );

    let mismatch = ((server_damage - client_damage).abs() > base * 0.5).then(|| {
        SecurityEvent::new(
            SecurityEventKind::DamageMismatch,
            format!(
                "large damage deviation: server={:.1}, client={:.1}",
                server_damage, client_damage
            ),
        )
    });

    DamageAssessment {
        applied: server_damage.clamp(0.0, MAX_DAMAGE_PER_HIT),
        mismatch,
    }
}
