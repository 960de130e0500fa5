use clap::Parser;
use log::info;
use std::error::Error;
use std::sync::Arc;
use teloxide::Bot;

use movie_index_bot::broadcast::{format_summary, record_broadcast, validate_message, BroadcastEngine, TelegramTransport};
use movie_index_bot::config::{self, parse_id_list, BotConfig};
use movie_index_bot::user_manager::UserManager;

#[derive(Parser)]
#[command(name = "bulk_messenger")]
#[command(about = "Broadcast a message to every eligible bot user")]
struct Cli {
    /// Message to send (HTML)
    #[arg(short, long)]
    message: String,

    /// Comma separated user ids; defaults to all non-banned users who accepted the terms
    #[arg(short, long)]
    users: Option<String>,

    /// Admin id stored in the broadcast audit record
    #[arg(long, default_value_t = 0)]
    admin_id: i64,

    /// Only print the recipient count
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    config::load_dotenv();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    validate_message(&cli.message)?;

    let config = BotConfig::from_env()?;
    let pool = config::create_pool(&config.database_url)?;

    let recipients = match &cli.users {
        Some(raw) => parse_id_list(raw)?,
        None => {
            UserManager::new(pool.clone(), config.admins.clone())
                .eligible_recipients()
                .await?
        }
    };
    info!("Broadcasting to {} users", recipients.len());

    if cli.dry_run {
        println!("Would send to {} users", recipients.len());
        return Ok(());
    }

    let transport = TelegramTransport::new(Arc::new(Bot::new(&config.bot_token)), None);
    let engine = BroadcastEngine::new(config.broadcast_rate_limit, config.broadcast_progress_interval);
    let summary = engine.run(&transport, &recipients, &cli.message).await;

    let broadcast_id = record_broadcast(&pool, cli.admin_id, None, &cli.message, &summary).await?;
    println!("{}", format_summary(&summary, None).replace("<b>", "").replace("</b>", ""));
    println!("Broadcast id: {}", broadcast_id);
    Ok(())
}
