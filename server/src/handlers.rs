//! Per-message handlers
//!
//! One function per [`PacketType`] the server acts on. Handlers read and
//! update the session table, run client data through validation and decide
//! who hears about it.

use crate::dispatcher::{Handler, Inbound, Server, CONTROL_CHANNEL};
use crate::error::PacketError;
use crate::security::{SecurityEvent, SecurityEventKind};
use crate::session::ClientSession;
use crate::transport::Transport;
use crate::utils::{elapsed_millis, now_millis};
use crate::validation::{
    compute_damage, filter_projectiles, validate_chat, validate_force, validate_movement,
};
use log::{debug, info};
use shared::{
    slot_for_event_channel, DeliveryMethod, PacketType, PlayerUpdate, WeaponPackage, WireReader,
    WireWriter,
};
use std::collections::HashMap;

/// Spawn requests carry the slot, spawn position and rotation in this many bytes.
pub const SPAWN_BLOCK_LEN: usize = 25;

/// Bytes of map data announced in the admission packet.
const INIT_MAP_DATA_LEN: i32 = 4;

pub(crate) fn handler_table<T: Transport>() -> HashMap<PacketType, Handler<T>> {
    let mut table: HashMap<PacketType, Handler<T>> = HashMap::new();
    table.insert(PacketType::Ping, on_ping);
    table.insert(PacketType::PingResponse, on_ping_response);
    table.insert(PacketType::ClientJoined, on_client_joined);
    table.insert(PacketType::ClientRequestingAccepting, on_requesting_accepting);
    table.insert(PacketType::ClientAccepted, on_client_accepted);
    table.insert(PacketType::ClientInit, on_client_init);
    table.insert(PacketType::ClientRequestingIndex, on_requesting_index);
    table.insert(PacketType::ClientRequestingToSpawn, on_requesting_to_spawn);
    table.insert(PacketType::ClientSpawned, on_client_spawned);
    table.insert(PacketType::ClientReadyUp, on_ready_up);
    table.insert(PacketType::PlayerUpdate, on_player_update);
    table.insert(PacketType::PlayerTookDamage, on_player_took_damage);
    table.insert(PacketType::PlayerTalked, on_player_talked);
    table.insert(PacketType::PlayerForceAdded, on_player_force_added);
    table.insert(PacketType::MapChange, on_map_change);
    table
}

fn seated<T: Transport>(server: &Server<T>, slot: u8) -> Result<&ClientSession, PacketError> {
    server
        .sessions
        .by_slot(slot)
        .ok_or_else(|| PacketError::Protocol(format!("slot {} is empty", slot)))
}

fn on_ping<T: Transport>(server: &mut Server<T>, inbound: &Inbound) -> Result<(), PacketError> {
    let echoed: u32 = WireReader::new(&inbound.envelope.payload).read("ping timestamp")?;
    server.send_to(
        inbound.peer,
        PacketType::PingResponse,
        &echoed.to_le_bytes(),
        DeliveryMethod::ReliableOrdered,
        CONTROL_CHANNEL,
    );
    Ok(())
}

fn on_ping_response<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let echoed: u32 = WireReader::new(&inbound.envelope.payload).read("ping timestamp")?;
    let rtt = elapsed_millis(echoed, now_millis());
    if let Some(session) = server.sessions.by_slot_mut(inbound.slot) {
        session.set_ping(rtt);
        debug!("Ping for {} is {}ms", session.name, session.ping_ms);
    }
    Ok(())
}

fn on_client_joined<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    info!("{} reports it has joined", seated(server, inbound.slot)?.name);
    Ok(())
}

fn on_requesting_accepting<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    server.send_to(
        inbound.peer,
        PacketType::ClientAccepted,
        &[],
        DeliveryMethod::ReliableOrdered,
        CONTROL_CHANNEL,
    );
    Ok(())
}

fn on_client_accepted<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    info!("{} acknowledged acceptance", seated(server, inbound.slot)?.name);
    Ok(())
}

fn on_client_init<T: Transport>(
    _server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    debug!("Ignoring server-only ClientInit from slot {}", inbound.slot);
    Ok(())
}

/// Builds the admission packet for the player in `slot`.
///
/// Layout: accepted flag, slot, map category, map data length, map id; then
/// for every slot its identity (0 when empty) followed by that player's
/// stats unless it is the requester; then an empty weapon and the lobby
/// options.
pub(crate) fn build_client_init<T: Transport>(
    server: &Server<T>,
    slot: u8,
) -> Result<Vec<u8>, PacketError> {
    let (category, map_id) = server.round.client_init_map();
    let mut writer = WireWriter::new();
    writer
        .put(&1u8)?
        .put(&slot)?
        .put(&(category as u8))?
        .put(&INIT_MAP_DATA_LEN)?
        .put(&map_id)?;

    for entry in server.sessions.slots() {
        match entry {
            Some(session) => {
                writer.put(&session.identity.0)?;
                if session.slot != slot {
                    writer.put(&session.stats)?;
                }
            }
            None => {
                writer.put(&0u64)?;
            }
        }
    }

    writer.put(&0u16)?.put(&server.game_options)?;
    Ok(writer.into_bytes())
}

fn on_requesting_index<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let session = seated(server, inbound.slot)?;
    info!("{} will be slot {}", session.name, session.slot);

    let mut joined = WireWriter::new();
    joined.put(&session.slot)?.put(&session.identity.0)?;
    let joined = joined.into_bytes();
    let init = build_client_init(server, inbound.slot)?;

    server.broadcast(
        PacketType::ClientJoined,
        &joined,
        Some(inbound.peer),
        DeliveryMethod::ReliableOrdered,
        CONTROL_CHANNEL,
    );
    server.send_to(
        inbound.peer,
        PacketType::ClientInit,
        &init,
        DeliveryMethod::ReliableOrdered,
        CONTROL_CHANNEL,
    );
    Ok(())
}

fn on_requesting_to_spawn<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let block = WireReader::new(&inbound.envelope.payload).take(SPAWN_BLOCK_LEN, "spawn block")?;
    let modify = server
        .round
        .should_modify_spawn(server.sessions.occupied_count());

    let mut spawned = Vec::with_capacity(SPAWN_BLOCK_LEN + 1);
    spawned.extend_from_slice(block);
    spawned.push(modify as u8);

    server.broadcast(
        PacketType::ClientSpawned,
        &spawned,
        None,
        DeliveryMethod::ReliableOrdered,
        CONTROL_CHANNEL,
    );
    Ok(())
}

fn on_client_spawned<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    if let Some(session) = server.sessions.by_slot_mut(inbound.slot) {
        session.revive();
        info!("{} spawned", session.name);
    }
    Ok(())
}

fn on_ready_up<T: Transport>(server: &mut Server<T>, inbound: &Inbound) -> Result<(), PacketError> {
    if let Some(session) = server.sessions.by_slot_mut(inbound.slot) {
        session.ready = true;
        info!("{} ({}) is ready", session.name, session.identity);
    }
    info!(
        "{}/{} players ready",
        server.sessions.ready_count(),
        server.sessions.occupied_count()
    );

    if let Some(change) = server.round.check_auto_start(&mut server.sessions) {
        server.broadcast_map_change(change, CONTROL_CHANNEL);
    }
    Ok(())
}

fn on_player_update<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let update = PlayerUpdate::decode(&inbound.envelope.payload)?;
    let session = server
        .sessions
        .by_slot_mut(inbound.slot)
        .ok_or_else(|| PacketError::Protocol(format!("slot {} is empty", inbound.slot)))?;

    validate_movement(&server.validation, session.position.as_ref(), &update.position)
        .map_err(|e| e.with_session(inbound.slot))?;
    let (kept, rejected) =
        filter_projectiles(&server.validation, &update.position, &update.projectiles)
            .map_err(|e| e.with_session(inbound.slot))?;
    for event in rejected {
        event.with_session(inbound.slot).emit();
    }

    let relayed = PlayerUpdate {
        projectiles: kept,
        ..update
    };
    session.position = Some(relayed.position);
    session.weapon = WeaponPackage {
        weapon_type: relayed.weapon_type,
        fight_state: relayed.fight_state,
        projectiles: relayed.projectiles.clone(),
    };

    let payload = relayed.encode()?;
    server.broadcast(
        PacketType::PlayerUpdate,
        &payload,
        Some(inbound.peer),
        DeliveryMethod::UnreliableSequenced,
        inbound.envelope.channel,
    );
    Ok(())
}

fn on_player_took_damage<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let channel = inbound.envelope.channel;
    let target_slot = slot_for_event_channel(channel)
        .filter(|slot| server.sessions.by_slot(*slot).is_some())
        .ok_or_else(|| {
            SecurityEvent::new(
                SecurityEventKind::InvalidDamageTarget,
                format!("damage on channel {} names no seated player", channel),
            )
            .with_session(inbound.slot)
        })?;
    let client_damage: f32 = WireReader::new(&inbound.envelope.payload).read("damage")?;

    let attacker = seated(server, inbound.slot)?;
    let weapon_type = attacker.weapon.weapon_type;
    let attacker_pos = attacker.position_or_origin();
    let attacker_name = attacker.name.clone();

    let Some(target) = server.sessions.by_slot_mut(target_slot) else {
        return Ok(());
    };
    let assessment = compute_damage(
        weapon_type,
        &attacker_pos,
        &target.position_or_origin(),
        client_damage,
    );
    if let Some(event) = assessment.mismatch {
        event.with_session(inbound.slot).emit();
    }

    target.deduct_hp(assessment.applied);
    info!(
        "{} took {:.1} damage from {} (client claimed {:.1}), hp {:.1}",
        target.name, assessment.applied, attacker_name, client_damage, target.hp
    );
    if !target.alive {
        info!("{} was killed by {}", target.name, attacker_name);
    }

    let mut payload = WireWriter::new();
    payload.put(&assessment.applied)?;
    server.broadcast(
        PacketType::PlayerTookDamage,
        &payload.into_bytes(),
        None,
        DeliveryMethod::ReliableOrdered,
        channel,
    );

    if let Some(change) = server.round.check_round_end(&mut server.sessions) {
        server.broadcast_map_change(change, CONTROL_CHANNEL);
    }
    Ok(())
}

fn on_player_talked<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let text = validate_chat(&inbound.envelope.payload).map_err(|e| e.with_session(inbound.slot))?;
    info!("{}: {}", seated(server, inbound.slot)?.name, text);

    server.broadcast(
        PacketType::PlayerTalked,
        &inbound.envelope.payload,
        Some(inbound.peer),
        DeliveryMethod::ReliableOrdered,
        inbound.envelope.channel,
    );
    Ok(())
}

fn on_player_force_added<T: Transport>(
    server: &mut Server<T>,
    inbound: &Inbound,
) -> Result<(), PacketError> {
    let (x, y) = validate_force(&server.validation, &inbound.envelope.payload)
        .map_err(|e| e.with_session(inbound.slot))?;
    debug!("Slot {} applied force ({:.1}, {:.1})", inbound.slot, x, y);

    server.broadcast(
        PacketType::PlayerForceAdded,
        &inbound.envelope.payload,
        Some(inbound.peer),
        DeliveryMethod::ReliableOrdered,
        inbound.envelope.channel,
    );
    Ok(())
}

fn on_map_change<T: Transport>(server: &mut Server<T>, inbound: &Inbound) -> Result<(), PacketError> {
    server.round.apply_requested_change(&inbound.envelope.payload)?;
    info!(
        "Slot {} changed the map to {} ({:?})",
        inbound.slot,
        server.round.map_id(),
        server.round.category()
    );

    server.broadcast(
        PacketType::MapChange,
        &inbound.envelope.payload,
        None,
        DeliveryMethod::ReliableOrdered,
        inbound.envelope.channel,
    );
    Ok(())
}
