use clap::{CommandFactory, Parser};
use log::{error, info};
use server::auth::SteamAuthGateway;
use server::config::{Cli, ServerConfig};
use server::dispatcher::Server;
use server::udp::UdpTransport;
use server::utils::redact;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Transport events handled per tick before yielding back to the runtime.
const EVENTS_PER_TICK: usize = 256;

/// Main-method of the application.
/// Loads the configuration, binds the socket and pumps the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match ServerConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}\n", e);
            eprintln!("{}", Cli::command().render_usage());
            std::process::exit(1);
        }
    };

    info!(
        "Starting on port {} with {} slots, API token {}, host {}",
        config.port,
        config.max_players,
        redact(&config.steam_web_api_token, 4),
        config.host_steam_id
    );

    let verifier = SteamAuthGateway::new(
        config.steam_web_api_token.clone(),
        config.host_steam_id,
        config.auth_delay(),
    )?;
    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let transport = match UdpTransport::bind(address).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to bind {}: {}", address, e);
            return Err(e.into());
        }
    };
    let mut server = Server::new(transport, Arc::new(verifier), &config);

    let mut ticker = interval(Duration::from_millis(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for _ in 0..EVENTS_PER_TICK {
                    if !server.pump() {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    server.shutdown();
    Ok(())
}
