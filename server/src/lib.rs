//! # Brawl Server Library
//!
//! This library provides the authoritative dedicated server for the
//! physics brawler. It admits players after verifying their Steam auth
//! tickets, keeps the canonical per-player state, relays gameplay packets
//! between players and refuses client data that would let a modified client
//! cheat.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Connection requests are throttled per host, checked against the player
//! limit and verified against the Steam Web API on a background task.
//! Verification fails closed: an unreachable or confused identity service
//! means the player is turned away.
//!
//! ### Authoritative State
//! Each seated player owns a slot in the [`session_table::SessionTable`].
//! The slot is the player's wire index and selects their sequence channels.
//! Health, last accepted position and held weapon live on the session and
//! are only changed by the server.
//!
//! ### Validation
//! Movement, projectiles, physics forces and chat are checked before they
//! are relayed. Damage is computed by the server from the attacker's weapon
//! and the distance between players; the client's own figure is only used
//! to flag suspicious deviations.
//!
//! ### Round Control
//! When at most one player is left standing the round ends, a new map is
//! picked and everyone is revived. Rounds can also start on their own once
//! the lobby has readied up.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Pump
//! All state changes happen inside [`dispatcher::Server::pump`], which
//! handles one transport event per call. Only ticket verification runs
//! elsewhere, and its verdict is handed back to the pump over a channel.
//!
//! ### Transport Boundary
//! The dispatcher talks to a [`transport::Transport`]. The binary uses the
//! UDP implementation in [`udp`]; tests and embedders can use
//! [`transport::MemoryTransport`].
//!
//! ## Module Organization
//!
//! - `session`, `session_table`, `throttle`: who is connected and where
//! - `auth`, `admission`: ticket verification and seating
//! - `validation`, `security`: anti-cheat checks and their log events
//! - `round`: map and round lifecycle
//! - `dispatcher`, `handlers`, `ordering`: the pump and per-message logic
//! - `transport`, `udp`: the datagram boundary
//! - `config`, `error`, `utils`: ambient plumbing
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::auth::SteamAuthGateway;
//! use server::config::ServerConfig;
//! use server::dispatcher::Server;
//! use server::udp::UdpTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         steam_web_api_token: "KEY".to_string(),
//!         host_steam_id: 76561198000000001,
//!         ..Default::default()
//!     };
//!     config.validate()?;
//!
//!     let transport = UdpTransport::bind(([0, 0, 0, 0], config.port).into()).await?;
//!     let verifier = SteamAuthGateway::new(
//!         config.steam_web_api_token.clone(),
//!         config.host_steam_id,
//!         config.auth_delay(),
//!     )?;
//!     let mut server = Server::new(transport, Arc::new(verifier), &config);
//!
//!     loop {
//!         // Handle everything that is waiting, then give the runtime a turn.
//!         while server.pump() {}
//!         tokio::time::sleep(std::time::Duration::from_millis(1)).await;
//!     }
//! }
//! ```
//!
//! ## Security Considerations
//!
//! Every rejection is logged as a structured event under the `security`
//! log target, so `RUST_LOG=security=warn` shows nothing but suspected
//! cheating. No rejection disconnects the player; the offending packet is
//! simply dropped.

pub mod admission;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod ordering;
pub mod round;
pub mod security;
pub mod session;
pub mod session_table;
pub mod throttle;
pub mod transport;
pub mod udp;
pub mod utils;
pub mod validation;
