use clap::Parser;
use log::info;
use server::network::Server;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "server")]
#[command(about = "Relay hub for pickup duel sessions")]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Main loop rate (ticks per second)
    #[arg(short, long, default_value = "20", value_parser = clap::value_parser!(u32).range(1..))]
    tick_rate: u32,

    /// Maximum number of connected participants
    #[arg(short, long, default_value = "2")]
    max_clients: usize,

    /// Seconds without a heartbeat before a participant is dropped
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info to see connection logs");
    }

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate as f64);

    info!(
        "Starting hub on {} ({} Hz, max {} participants)",
        address, args.tick_rate, args.max_clients
    );

    let mut server = Server::new(
        &address,
        tick_duration,
        args.max_clients,
        Duration::from_secs(args.timeout_secs),
    )
    .await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
