use clap::Parser;
use client::input::PickupBot;
use client::network::Client;
use log::info;
use session::SessionConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Display name shown to the other participant
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Items in the arena; must match the other participant
    #[arg(short = 'i', long, default_value_t = shared::TOTAL_ITEMS)]
    items: usize,

    /// Network tick in milliseconds
    #[arg(short = 't', long, default_value = "50", value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// Let a bot pick up items at random while the round is running
    #[arg(short = 'b', long)]
    bot: bool,

    /// Seed for the bot, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client '{}'...", args.name);
    info!("Connecting to: {}", args.server);
    info!("Commands: p <item> [value] pick up, e end round, r restart, s status, q quit");

    let config = SessionConfig::default()
        .with_total_items(args.items)
        .with_network_tick(Duration::from_millis(args.tick_ms));
    let bot = args.bot.then(|| PickupBot::new(args.seed));
    if bot.is_some() {
        info!("Pickup bot enabled");
    }

    let mut client = Client::new(&args.server, &args.name, config, bot).await?;

    client.run().await?;

    Ok(())
}
