use clap::Parser;
use log::{info, warn};
use shared::{decode_packet, encode_packet, BossBarTracker, Packet, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about = "Connects to the server and prints what it receives")]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name to join with
    #[arg(short = 'n', long, default_value = "tester")]
    name: String,
}

async fn send(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&encode_packet(packet)?, addr).await?;
    Ok(())
}

fn describe(packet: &Packet, bars: &mut BossBarTracker) {
    match packet {
        Packet::BossBar { id, action } => {
            if let Err(e) = bars.apply(*id, action) {
                warn!("Boss bar packet rejected: {}", e);
                return;
            }
            match bars.get(*id) {
                Some(bar) => info!(
                    "Bar {}: {:?} {:.0}% {:?}/{:?}",
                    id,
                    bar.title.plain_text(),
                    bar.progress * 100.0,
                    bar.color,
                    bar.overlay
                ),
                None => info!("Bar {} removed", id),
            }
        }
        Packet::ChatMessage {
            position, message, ..
        } => info!("[{:?}] {}", position, message.plain_text()),
        Packet::ActionBar { text } => info!("Action bar: {}", text.plain_text()),
        Packet::SetTitleText { text } => info!("Title: {}", text.plain_text()),
        Packet::SetSubtitleText { text } => info!("Subtitle: {}", text.plain_text()),
        other => info!("Received packet: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let server_addr = args.server.parse::<SocketAddr>()?;
    let connect = Packet::Connect {
        client_version: PROTOCOL_VERSION,
        name: args.name.clone(),
    };
    info!("Sending connection request to {}", server_addr);
    send(&socket, &connect, server_addr).await?;

    let mut buf = [0u8; 2048];
    let mut bars = BossBarTracker::new();
    let mut heartbeat = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, _) = received?;
                match decode_packet(&buf[..len]) {
                    Ok(Packet::Connected { client_id, entity_id }) => {
                        info!("Connected as client {} (entity {})", client_id, entity_id);
                    }
                    Ok(Packet::Disconnected { reason }) => {
                        info!("Disconnected by server: {}", reason);
                        break;
                    }
                    Ok(packet) => describe(&packet, &mut bars),
                    Err(e) => warn!("Failed to decode packet: {}", e),
                }
            }
            _ = heartbeat.tick() => {
                send(&socket, &Packet::Heartbeat, server_addr).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Sending disconnect request");
                send(&socket, &Packet::Disconnect, server_addr).await?;
                break;
            }
        }
    }

    info!("Test client finished with {} bars on screen", bars.len());
    Ok(())
}
