use clap::Parser;
use server::udp::{Frame, RECV_BUFFER_SIZE};
use server::utils::now_millis;
use shared::{
    encode_envelope, update_channel, DeliveryMethod, Envelope, PacketType, PlayerUpdate,
    PositionPackage, WireReader,
};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Duration};

/// Walks through discovery, admission and a few updates against a running server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:1337")]
    server: SocketAddr,

    /// Auth ticket as hex
    #[arg(short, long, default_value = "deadbeef")]
    ticket: String,

    /// Number of position updates to send once seated
    #[arg(short, long, default_value = "10")]
    updates: u32,
}

async fn recv_frame(socket: &UdpSocket, wait: Duration) -> Option<Frame> {
    let mut buf = [0u8; RECV_BUFFER_SIZE];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => match Frame::decode(&buf[..len]) {
            Ok(frame) => Some(frame),
            Err(e) => {
                println!("Undecodable frame: {}", e);
                None
            }
        },
        Ok(Err(e)) => {
            println!("Receive error: {}", e);
            None
        }
        Err(_) => None,
    }
}

async fn send_frame(socket: &UdpSocket, server: SocketAddr, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&frame.encode()?, server).await?;
    Ok(())
}

async fn send_packet(
    socket: &UdpSocket,
    server: SocketAddr,
    kind: PacketType,
    payload: &[u8],
    method: DeliveryMethod,
    channel: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let frame = Frame::Data {
        method,
        channel,
        payload: encode_envelope(now_millis(), kind, payload),
    };
    send_frame(socket, server, &frame).await
}

/// Prints a server packet and answers pings.
async fn handle_data(
    socket: &UdpSocket,
    server: SocketAddr,
    channel: u8,
    payload: &[u8],
) -> Result<Option<Envelope>, Box<dyn std::error::Error>> {
    let envelope = match Envelope::decode(payload, channel) {
        Ok(envelope) => envelope,
        Err(e) => {
            println!("Bad envelope: {}", e);
            return Ok(None);
        }
    };
    println!(
        "<- {:?} ({} bytes, channel {})",
        envelope.kind,
        envelope.payload.len(),
        channel
    );
    if envelope.kind == PacketType::Ping {
        send_packet(
            socket,
            server,
            PacketType::PingResponse,
            &envelope.payload,
            DeliveryMethod::ReliableOrdered,
            0,
        )
        .await?;
    }
    Ok(Some(envelope))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let ticket = hex::decode(&args.ticket)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    send_frame(&socket, args.server, &Frame::DiscoveryRequest).await?;
    match recv_frame(&socket, Duration::from_secs(2)).await {
        Some(Frame::DiscoveryResponse { payload }) => {
            println!("Discovered: {}", String::from_utf8_lossy(&payload))
        }
        other => println!("No discovery response ({:?})", other),
    }

    println!("Requesting connection to {}", args.server);
    send_frame(&socket, args.server, &Frame::Connect { ticket }).await?;
    match recv_frame(&socket, Duration::from_secs(35)).await {
        Some(Frame::Approved) => println!("Connection approved"),
        Some(Frame::Denied { reason }) => {
            println!("Connection denied: {}", reason);
            return Ok(());
        }
        other => {
            println!("No verdict from server ({:?})", other);
            return Ok(());
        }
    }

    send_packet(
        &socket,
        args.server,
        PacketType::ClientRequestingIndex,
        &[],
        DeliveryMethod::ReliableOrdered,
        0,
    )
    .await?;

    let mut slot = None;
    while slot.is_none() {
        match recv_frame(&socket, Duration::from_secs(5)).await {
            Some(Frame::Data {
                channel, payload, ..
            }) => {
                if let Some(envelope) = handle_data(&socket, args.server, channel, &payload).await? {
                    if envelope.kind == PacketType::ClientInit {
                        let mut reader = WireReader::new(&envelope.payload);
                        let (_accepted, index): (u8, u8) = reader.read("init header")?;
                        println!("Seated in slot {}", index);
                        slot = Some(index);
                    }
                }
            }
            Some(other) => println!("<- {:?}", other),
            None => {
                println!("Timed out waiting for ClientInit");
                return Ok(());
            }
        }
    }
    let slot = slot.unwrap_or_default();

    for i in 0..args.updates {
        let update = PlayerUpdate {
            position: PositionPackage {
                y: i as f32 * 0.5,
                z: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        println!("-> PlayerUpdate {}", i);
        send_packet(
            &socket,
            args.server,
            PacketType::PlayerUpdate,
            &update.encode()?,
            DeliveryMethod::UnreliableSequenced,
            update_channel(slot),
        )
        .await?;

        if let Some(Frame::Data {
            channel, payload, ..
        }) = recv_frame(&socket, Duration::from_millis(100)).await
        {
            handle_data(&socket, args.server, channel, &payload).await?;
        }
        sleep(Duration::from_millis(100)).await;
    }

    send_frame(&socket, args.server, &Frame::Disconnect).await?;
    println!("Disconnected");
    Ok(())
}
