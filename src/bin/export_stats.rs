use clap::{Parser, ValueEnum};
use std::error::Error;

use movie_index_bot::config::{self, BotConfig};
use movie_index_bot::statistics::{export_csv, export_json, StatisticsCollector};

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "export_stats")]
#[command(about = "Export bot statistics as JSON or CSV")]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: Format,

    /// Output file; prints to stdout when omitted
    #[arg(short, long)]
    output: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    config::load_dotenv();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let config = BotConfig::from_env()?;
    let pool = config::create_pool(&config.database_url)?;

    let stats = StatisticsCollector::new(pool).collect().await?;
    let body = match cli.format {
        Format::Json => export_json(&stats)?,
        Format::Csv => export_csv(&stats),
    };

    match cli.output {
        Some(path) => {
            std::fs::write(&path, body)?;
            eprintln!("Statistics written to {}", path);
        }
        None => println!("{}", body),
    }
    Ok(())
}
