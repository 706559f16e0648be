//! Connect to an overlay server, log in and print session and player events.
//!
//! Run with: cargo run --bin overlay-probe -- --server 127.0.0.1:4201 --account-id 1 --name probe --token ...

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use overlay_sync::client::{ClientBuilder, ClientConfig, GameEvent};
use overlay_sync::protocol::{ConnectionState, DisconnectReason};
use overlay_sync::util::unix_timestamp;

#[derive(Parser)]
#[command(name = "overlay-probe")]
#[command(about = "Connect to an overlay sync server and watch remote players")]
struct Args {
    /// Config file (defaults to the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server address, overrides the config file
    #[arg(long)]
    server: Option<SocketAddr>,

    #[arg(long)]
    account_id: Option<i32>,

    #[arg(long, default_value = "probe")]
    name: String,

    #[arg(long)]
    token: Option<String>,

    /// Apply samples without smoothing
    #[arg(long)]
    realtime: bool,

    /// Seconds to stay connected
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Update rate of the local loop
    #[arg(long, default_value_t = 60)]
    fps: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ClientConfig::from_json_file(path)?,
        None => ClientConfig::load_default()?,
    };
    if let Some(server) = args.server {
        config.server_addr = server;
    }

    let mut builder = ClientBuilder::new(config).realtime(args.realtime);
    if let (Some(account_id), Some(token)) = (args.account_id, args.token.as_deref()) {
        builder = builder.credentials(account_id, args.name.as_str(), token);
    }

    let mut client = builder.connect().await?;
    info!(addr = ?client.network().map(|n| n.remote_addr()), "connecting");

    let fps = args.fps.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut last = Instant::now();

    while Instant::now() < deadline {
        ticker.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        client.update(dt);

        for event in client.drain_events() {
            match event {
                GameEvent::Disconnected { reason } => {
                    match &reason {
                        DisconnectReason::Banned { timestamp, .. } | DisconnectReason::Muted { timestamp, .. } => {
                            info!(%reason, remaining_secs = timestamp - unix_timestamp(), "disconnected");
                        }
                        _ => info!(%reason, "disconnected"),
                    }
                }
                GameEvent::PlayerJoined { player_id } => info!(player_id, "player joined"),
                GameEvent::PlayerLeft { player_id } => info!(player_id, "player left"),
                GameEvent::PlayerDied { player_id } => info!(player_id, "player died"),
                other => info!(event = ?other, "event"),
            }
        }

        if client.state() == ConnectionState::Disconnected {
            break;
        }
    }

    if client.state().is_connecting() {
        warn!(state = %client.state(), "gave up before login completed");
    }
    if client.state() != ConnectionState::Disconnected {
        client.disconnect();
        client.update(0.0);
        // let the transport flush the disconnect packet
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let summary = client.packet_summary();
    info!(
        total = summary.total,
        sent = summary.total_out,
        received = summary.total_in,
        bytes = summary.total_bytes,
        "traffic"
    );
    summary.log();

    Ok(())
}
