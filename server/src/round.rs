//! Round and map lifecycle.

use crate::session_table::SessionTable;
use log::info;
use rand::rngs::OsRng;
use rand::Rng;
use shared::{CodecError, MapCategory, MapChange, WireReader};

/// Built-in maps are numbered `0..MAP_POOL_SIZE`.
pub const MAP_POOL_SIZE: i32 = 110;

/// When a lobby ready-up should start a round on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoStartPolicy {
    pub single_player: bool,
    pub multiplayer: bool,
    pub min_players: usize,
}

impl Default for AutoStartPolicy {
    fn default() -> Self {
        Self {
            single_player: true,
            multiplayer: true,
            min_players: 2,
        }
    }
}

/// Owns the current map and decides when rounds end or start.
#[derive(Debug)]
pub struct RoundController {
    map_id: i32,
    category: MapCategory,
    auto_start: AutoStartPolicy,
}

impl RoundController {
    pub fn new(auto_start: AutoStartPolicy) -> Self {
        Self {
            map_id: 0,
            category: MapCategory::Lobby,
            auto_start,
        }
    }

    pub fn map_id(&self) -> i32 {
        self.map_id
    }

    pub fn category(&self) -> MapCategory {
        self.category
    }

    pub fn in_lobby(&self) -> bool {
        self.category == MapCategory::Lobby
    }

    /// Map block for the admission packet; the lobby is always sent as `(Lobby, 0)`.
    pub fn client_init_map(&self) -> (MapCategory, i32) {
        if self.in_lobby() {
            (MapCategory::Lobby, 0)
        } else {
            (self.category, self.map_id)
        }
    }

    /// Spawn points are offset when several players share a real map.
    pub fn should_modify_spawn(&self, occupied: usize) -> bool {
        !self.in_lobby() && occupied > 1
    }

    /// Applies a client-requested map change.
    ///
    /// A full six-byte announcement is parsed as such. A shorter payload of at
    /// least four bytes is a bare map id, where id 0 means the lobby.
    pub fn apply_requested_change(&mut self, payload: &[u8]) -> Result<(), CodecError> {
        if payload.len() >= MapChange::WIRE_LEN {
            let change = MapChange::decode(payload)?;
            self.set_map(change.category, change.map_id);
        } else {
            let map_id: i32 = WireReader::new(payload).read("map id")?;
            let category = if map_id == 0 {
                MapCategory::Lobby
            } else {
                MapCategory::Standard
            };
            self.set_map(category, map_id);
        }
        Ok(())
    }

    /// Ends the round when at most one player is left standing.
    ///
    /// Only applies when more than one player is seated. Everyone is revived
    /// and the announcement for the next map is returned.
    pub fn check_round_end(&mut self, table: &mut SessionTable) -> Option<MapChange> {
        let living = table.living_count();
        if living > 1 || table.occupied_count() <= 1 {
            return None;
        }

        let winner = table
            .iter()
            .find(|s| s.alive)
            .map(|s| s.slot)
            .unwrap_or(MapChange::NO_WINNER);
        info!(
            "Round over with {} left standing, winner slot {}",
            living, winner
        );

        let change = self.start_round(winner);
        table.revive_all();
        Some(change)
    }

    /// Starts a round from the lobby once the ready-up conditions are met.
    pub fn check_auto_start(&mut self, table: &mut SessionTable) -> Option<MapChange> {
        if !self.in_lobby() {
            return None;
        }

        let occupied = table.occupied_count();
        let ready = table.ready_count();
        let solo = self.auto_start.single_player && occupied == 1 && ready == 1;
        let group = self.auto_start.multiplayer
            && ready >= self.auto_start.min_players
            && ready == occupied;
        if !solo && !group {
            return None;
        }

        info!("All {} players ready, starting round", ready);
        let change = self.start_round(MapChange::NO_WINNER);
        table.revive_all();
        Some(change)
    }

    /// Picks a fresh map and moves into a standard round.
    pub fn start_round(&mut self, winner: u8) -> MapChange {
        let map_id = OsRng.gen_range(0..MAP_POOL_SIZE);
        self.set_map(MapCategory::Standard, map_id);
        MapChange {
            winner,
            category: MapCategory::Standard,
            map_id,
        }
    }

    fn set_map(&mut self, category: MapCategory, map_id: i32) {
        self.category = category;
        self.map_id = map_id;
        info!("Map is now {} ({:?})", map_id, category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{AuthTicket, SteamId};
    use std::net::SocketAddr;

    fn table_with(players: u8) -> SessionTable {
        let mut table = SessionTable::new(4);
        for n in 0..players {
            let addr = SocketAddr::from(([127, 0, 0, 1], 9000 + n as u16));
            table.admit(
                SteamId(76561198000000000 + n as u64),
                format!("p{}", n),
                AuthTicket::from_bytes(&[n]),
                addr,
            );
        }
        table
    }

    #[test]
    fn test_starts_in_lobby() {
        let round = RoundController::new(AutoStartPolicy::default());
        assert!(round.in_lobby());
        assert_eq!(round.client_init_map(), (MapCategory::Lobby, 0));
        assert!(!round.should_modify_spawn(3));
    }

    #[test]
    fn test_bare_map_id_request() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        round.apply_requested_change(&17i32.to_le_bytes()).unwrap();
        assert_eq!(round.map_id(), 17);
        assert_eq!(round.category(), MapCategory::Standard);
        assert!(round.should_modify_spawn(2));
        assert!(!round.should_modify_spawn(1));

        round.apply_requested_change(&0i32.to_le_bytes()).unwrap();
        assert!(round.in_lobby());
    }

    #[test]
    fn test_full_map_change_request() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        round.apply_requested_change(&[255, 2, 5, 0, 0, 0]).unwrap();
        assert_eq!(round.category(), MapCategory::Workshop);
        assert_eq!(round.client_init_map(), (MapCategory::Workshop, 5));
    }

    #[test]
    fn test_short_map_change_rejected() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        assert!(round.apply_requested_change(&[1, 2, 3]).is_err());
        assert!(round.in_lobby());
    }

    #[test]
    fn test_no_round_end_with_single_player() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        let mut table = table_with(1);
        table.by_slot_mut(0).unwrap().deduct_hp(100.0);
        assert!(round.check_round_end(&mut table).is_none());
    }

    #[test]
    fn test_round_end_credits_survivor() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        let mut table = table_with(3);
        assert!(round.check_round_end(&mut table).is_none());

        table.by_slot_mut(0).unwrap().deduct_hp(100.0);
        table.by_slot_mut(2).unwrap().deduct_hp(100.0);
        let change = round.check_round_end(&mut table).unwrap();
        assert_eq!(change.winner, 1);
        assert_eq!(change.category, MapCategory::Standard);
        assert!((0..MAP_POOL_SIZE).contains(&change.map_id));
        assert_eq!(round.map_id(), change.map_id);
        assert_eq!(table.living_count(), 3);
    }

    #[test]
    fn test_round_end_without_survivors() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        let mut table = table_with(2);
        table.by_slot_mut(0).unwrap().deduct_hp(100.0);
        table.by_slot_mut(1).unwrap().deduct_hp(100.0);
        let change = round.check_round_end(&mut table).unwrap();
        assert_eq!(change.winner, MapChange::NO_WINNER);
        assert!(table.iter().all(|s| s.alive && s.hp == 100.0));
    }

    #[test]
    fn test_auto_start_multiplayer() {
        let mut round = RoundController::new(AutoStartPolicy::default());
        let mut table = table_with(2);
        table.by_slot_mut(0).unwrap().ready = true;
        assert!(round.check_auto_start(&mut table).is_none());

        table.by_slot_mut(1).unwrap().ready = true;
        let change = round.check_auto_start(&mut table).unwrap();
        assert_eq!(change.winner, MapChange::NO_WINNER);
        assert!(!round.in_lobby());
        assert_eq!(table.ready_count(), 0);
    }

    #[test]
    fn test_auto_start_single_player_toggle() {
        let mut table = table_with(1);
        table.by_slot_mut(0).unwrap().ready = true;

        let mut disabled = RoundController::new(AutoStartPolicy {
            single_player: false,
            ..Default::default()
        });
        assert!(disabled.check_auto_start(&mut table).is_none());

        let mut enabled = RoundController::new(AutoStartPolicy::default());
        assert!(enabled.check_auto_start(&mut table).is_some());
    }
}
