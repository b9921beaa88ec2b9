//! Fixed-capacity slot table of seated players
//!
//! The table owns every [`ClientSession`] and is the only place sessions are
//! created or destroyed. A session's slot is its index in the table and is
//! the stable identifier used on the wire.
//!
//! Invariants:
//! - at most one session per transport address
//! - at most one session per remote identity
//! - `slots[i].slot == i` for every occupied entry

use crate::session::{AuthTicket, ClientSession, ConnectionStatus, SteamId};
use log::info;
use std::net::SocketAddr;

/// Result of [`SessionTable::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// A new session was seated in this slot.
    Added(u8),
    /// The identity was already seated; its address and status were refreshed.
    Updated(u8),
    /// No free slot.
    Rejected,
}

impl AdmitOutcome {
    pub fn slot(self) -> Option<u8> {
        match self {
            AdmitOutcome::Added(slot) | AdmitOutcome::Updated(slot) => Some(slot),
            AdmitOutcome::Rejected => None,
        }
    }
}

pub struct SessionTable {
    slots: Vec<Option<ClientSession>>,
}

impl SessionTable {
    /// Creates an empty table with `capacity` slots.
    ///
    /// Slots are addressed by `u8`, so capacity is capped at 255.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u8::MAX as usize);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Seats a verified player.
    ///
    /// A known identity keeps its slot and just moves to the new address, so a
    /// reconnect from elsewhere is never treated as a new player; any other
    /// session still holding that address is evicted. Otherwise an
    /// existing session on the same address is evicted first, then the lowest
    /// free slot is taken.
    pub fn admit(
        &mut self,
        identity: SteamId,
        name: String,
        ticket: AuthTicket,
        addr: SocketAddr,
    ) -> AdmitOutcome {
        if let Some(mover) = self.by_identity(identity).map(|s| s.slot) {
            let squatter = self.slots.iter_mut().find(|entry| {
                entry
                    .as_ref()
                    .is_some_and(|s| s.addr == addr && s.slot != mover)
            });
            if let Some(evicted) = squatter.and_then(Option::take) {
                info!(
                    "Evicted {} from slot {} at {} to make room for {}",
                    evicted.name, evicted.slot, addr, identity
                );
            }
        }

        if let Some(existing) = self.by_identity_mut(identity) {
            info!(
                "{} already seated in slot {}, moving to {}",
                identity, existing.slot, addr
            );
            existing.addr = addr;
            existing.status = ConnectionStatus::Connected;
            return AdmitOutcome::Updated(existing.slot);
        }

        if self.remove(addr).is_some() {
            info!("Evicted previous session from {} to seat {}", addr, identity);
        }

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            info!("No free slot for {} from {}", identity, addr);
            return AdmitOutcome::Rejected;
        };

        let slot = index as u8;
        let session = ClientSession::new(identity, name, ticket, addr, slot);
        info!("Seated {}", session);
        self.slots[index] = Some(session);
        AdmitOutcome::Added(slot)
    }

    /// Frees the slot held by `addr`, returning the removed session.
    pub fn remove(&mut self, addr: SocketAddr) -> Option<ClientSession> {
        let entry = self
            .slots
            .iter_mut()
            .find(|entry| entry.as_ref().is_some_and(|s| s.addr == addr))?;
        let session = entry.take()?;
        info!("Freed slot {} held by {}", session.slot, session.name);
        Some(session)
    }

    /// Frees every slot whose session has disconnected.
    pub fn purge_disconnected(&mut self) -> usize {
        let mut purged = 0;
        for entry in self.slots.iter_mut() {
            if entry
                .as_ref()
                .is_some_and(|s| s.status == ConnectionStatus::Disconnected)
            {
                *entry = None;
                purged += 1;
            }
        }
        purged
    }

    pub fn living_count(&self) -> usize {
        self.iter().filter(|s| s.alive).count()
    }

    pub fn occupied_count(&self) -> usize {
        self.iter().count()
    }

    pub fn ready_count(&self) -> usize {
        self.iter().filter(|s| s.ready).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn by_addr(&self, addr: SocketAddr) -> Option<&ClientSession> {
        self.iter().find(|s| s.addr == addr)
    }

    pub fn by_addr_mut(&mut self, addr: SocketAddr) -> Option<&mut ClientSession> {
        self.iter_mut().find(|s| s.addr == addr)
    }

    pub fn by_slot(&self, slot: u8) -> Option<&ClientSession> {
        self.slots.get(slot as usize)?.as_ref()
    }

    pub fn by_slot_mut(&mut self, slot: u8) -> Option<&mut ClientSession> {
        self.slots.get_mut(slot as usize)?.as_mut()
    }

    pub fn by_identity(&self, identity: SteamId) -> Option<&ClientSession> {
        self.iter().find(|s| s.identity == identity)
    }

    fn by_identity_mut(&mut self, identity: SteamId) -> Option<&mut ClientSession> {
        self.iter_mut().find(|s| s.identity == identity)
    }

    /// Restores every seated player to full health.
    pub fn revive_all(&mut self) {
        for session in self.iter_mut() {
            session.revive();
            session.ready = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.slots.iter_mut().flatten()
    }

    /// Every slot in order, occupied or not.
    pub fn slots(&self) -> impl Iterator<Item = Option<&ClientSession>> {
        self.slots.iter().map(Option::as_ref)
    }
}
