use clap::Parser;
use log::info;
use server::grouping::BroadcastSettings;
use server::network::{Server, ServerOptions};
use shared::TICKS_PER_SECOND;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = TICKS_PER_SECOND)]
    tick_rate: u32,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "32")]
    max_players: usize,

    /// Seconds of silence before a client is disconnected
    #[arg(long, default_value = "5")]
    client_timeout: u64,

    /// Length of the lobby countdown in seconds
    #[arg(short, long, default_value = "10")]
    countdown: u32,

    /// Encode every packet separately for each recipient
    #[arg(long)]
    no_grouped_packets: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let tick_rate = args.tick_rate.max(1);

    let options = ServerOptions {
        tick_duration: Duration::from_secs_f64(1.0 / tick_rate as f64),
        max_players: args.max_players,
        client_timeout: Duration::from_secs(args.client_timeout),
        countdown_seconds: args.countdown,
        settings: BroadcastSettings {
            grouped_packets: !args.no_grouped_packets,
        },
    };

    info!(
        "Starting server: {} Hz, {} max players, {}s countdown",
        tick_rate, options.max_players, options.countdown_seconds
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, options).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
