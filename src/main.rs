use clap::Parser;
use log::{error, info};

use movie_index_bot::bot::MovieIndexBot;
use movie_index_bot::config::{self, BotConfig};
use movie_index_bot::migrations::MigrationManager;
use movie_index_bot::premium::PremiumManager;

#[derive(Parser)]
#[command(name = "movie-index-bot")]
#[command(about = "A Telegram bot that indexes movie channels and serves files on request")]
struct Args {
    /// apply database migrations and exit
    #[arg(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // initialize rustls crypto provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    config::load_dotenv();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let config = BotConfig::from_env()?;
    let pool = config::create_pool(&config.database_url)?;
    MigrationManager::run_migrations(&pool).await?;

    if args.migrate_only {
        info!("Migrations applied, exiting");
        return Ok(());
    }

    let premium = PremiumManager::new(pool.clone());
    premium.seed_default_features().await?;
    match premium.cleanup_expired().await {
        Ok(removed) => info!("Removed {} expired premium users", removed),
        Err(e) => error!("Failed to clean up expired premium users: {}", e),
    }

    info!("Starting bot...");

    let bot = MovieIndexBot::new(config, pool);
    bot.run().await;

    Ok(())
}
