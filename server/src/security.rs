//! Structured security events.
//!
//! Every anti-cheat rejection becomes a [`SecurityEvent`] and is written to the
//! `security` log target so operators can filter them with
//! `RUST_LOG=security=warn`.

use log::warn;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
    OversizedPacket,
    InvalidChat,
    ExcessiveProjectiles,
    SpeedHack,
    OutOfBounds,
    InvalidRotation,
    ProjectileTooFar,
    ProjectileTooFast,
    InvalidProjectileValues,
    ExcessiveForce,
    InvalidForceValues,
    InvalidDamageTarget,
    DamageMismatch,
    UnknownClient,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::OversizedPacket => "OVERSIZED_PACKET",
            SecurityEventKind::InvalidChat => "INVALID_CHAT",
            SecurityEventKind::ExcessiveProjectiles => "EXCESSIVE_PROJECTILES",
            SecurityEventKind::SpeedHack => "SPEED_HACK",
            SecurityEventKind::OutOfBounds => "OUT_OF_BOUNDS",
            SecurityEventKind::InvalidRotation => "INVALID_ROTATION",
            SecurityEventKind::ProjectileTooFar => "PROJECTILE_TOO_FAR",
            SecurityEventKind::ProjectileTooFast => "PROJECTILE_TOO_FAST",
            SecurityEventKind::InvalidProjectileValues => "INVALID_PROJECTILE_VALUES",
            SecurityEventKind::ExcessiveForce => "EXCESSIVE_FORCE",
            SecurityEventKind::InvalidForceValues => "INVALID_FORCE_VALUES",
            SecurityEventKind::InvalidDamageTarget => "INVALID_TARGET",
            SecurityEventKind::DamageMismatch => "DAMAGE_MISMATCH",
            SecurityEventKind::UnknownClient => "UNKNOWN_CLIENT",
        }
    }
}

/// One rejected or suspicious piece of client data.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub detail: String,
    /// Slot of the offending session, when it is seated.
    pub session: Option<u8>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, slot: u8) -> Self {
        self.session = Some(slot);
        self
    }

    pub fn emit(&self) {
        warn!(target: "security", "{}", self);
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.detail)?;
        if let Some(slot) = self.session {
            write!(f, " (slot {})", slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_slot() {
        let event = SecurityEvent::new(SecurityEventKind::SpeedHack, "moved 9.00 units").with_session(2);
        assert_eq!(event.to_string(), "[SPEED_HACK] moved 9.00 units (slot 2)");
    }

    #[test]
    fn test_display_without_slot() {
        let event = SecurityEvent::new(SecurityEventKind::OversizedPacket, "2000 bytes");
        assert_eq!(event.session, None);
        assert_eq!(event.to_string(), "[OVERSIZED_PACKET] 2000 bytes");
    }
}
