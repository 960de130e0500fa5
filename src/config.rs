use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use log::warn;
use std::env;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres_rustls::MakeRustlsConnect;

pub const DEFAULT_FUZZY_THRESHOLD: u8 = 68;
pub const DEFAULT_BROADCAST_RATE_LIMIT: f64 = 20.0;
pub const DEFAULT_BROADCAST_PROGRESS_INTERVAL: usize = 25;

/// file extensions treated as indexable video even when the mime type is missing
pub const INDEX_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".3gp", ".ts", ".m2ts",
];

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub database_url: String,
    pub admins: Vec<i64>,
    pub log_channel: Option<i64>,
    pub fuzzy_threshold: u8,
    pub auto_indexing_default: bool,
    pub tmdb_api_key: Option<String>,
    pub broadcast_rate_limit: f64,
    pub broadcast_progress_interval: usize,
    pub broadcast_test_mode: bool,
    pub broadcast_test_users: Vec<i64>,
    pub terms_file: String,
}

impl BotConfig {
    /// reads configuration from the process environment (call dotenvy first)
    pub fn from_env() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let bot_token =
            env::var("BOT_TOKEN").map_err(|_| "BOT_TOKEN environment variable is required")?;
        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL environment variable not set")?;

        let admins = parse_id_list(&env::var("ADMINS").unwrap_or_default())
            .map_err(|e| format!("invalid ADMINS value: {}", e))?;
        let broadcast_test_users =
            parse_id_list(&env::var("BROADCAST_TEST_USERS").unwrap_or_default())
                .map_err(|e| format!("invalid BROADCAST_TEST_USERS value: {}", e))?;

        let log_channel = match env::var("LOG_CHANNEL") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| format!("invalid LOG_CHANNEL value: {}", e))?,
            ),
            _ => None,
        };

        let tmdb_api_key = env::var("TMDB_API")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != "your_api_key_here");

        let broadcast_rate_limit: f64 =
            env_or("BROADCAST_RATE_LIMIT", DEFAULT_BROADCAST_RATE_LIMIT)?;
        if broadcast_rate_limit <= 0.0 {
            return Err("BROADCAST_RATE_LIMIT must be positive".into());
        }

        Ok(Self {
            bot_token,
            database_url,
            admins,
            log_channel,
            fuzzy_threshold: env_or("FUZZY_THRESHOLD", DEFAULT_FUZZY_THRESHOLD)?,
            auto_indexing_default: env_flag("AUTO_INDEXING", true),
            tmdb_api_key,
            broadcast_rate_limit,
            broadcast_progress_interval: env_or::<usize>(
                "BROADCAST_PROGRESS_INTERVAL",
                DEFAULT_BROADCAST_PROGRESS_INTERVAL,
            )?
            .max(1),
            broadcast_test_mode: env_flag("BROADCAST_TEST_MODE", false),
            broadcast_test_users,
            terms_file: env::var("TERMS_FILE")
                .unwrap_or_else(|_| "TERMS_AND_PRIVACY.md".to_string()),
        })
    }

    pub fn is_env_admin(&self, telegram_user_id: i64) -> bool {
        self.admins.contains(&telegram_user_id)
    }
}

/// loads `.env` if present, warning only when the file exists but is broken
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        match e {
            dotenvy::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            _ => warn!("failed to load .env file: {}", e),
        }
    }
}

/// creates a postgres pool over rustls with the webpki root store
pub fn create_pool(database_url: &str) -> Result<Pool, Box<dyn Error + Send + Sync>> {
    let mut config = Config::new();
    config.url = Some(database_url.to_string());
    config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = MakeRustlsConnect::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );

    let pool = config.create_pool(Some(Runtime::Tokio1), tls)?;
    Ok(pool)
}

pub fn parse_id_list(raw: &str) -> Result<Vec<i64>, std::num::ParseIntError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<i64>)
        .collect()
}

fn env_or<T>(name: &str, default: T) -> Result<T, Box<dyn Error + Send + Sync>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            value.trim().parse::<T>().map_err(|e| {
                let message = format!("invalid {} value '{}': {}", name, value, e);
                Box::<dyn Error + Send + Sync>::from(message)
            })
        }
        _ => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => parse_flag(&value).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// formats a duration as "Ns", "Mm Ss" or "Hh Mm"
pub fn get_readable_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        assert_eq!(parse_id_list("").unwrap(), Vec::<i64>::new());
        assert_eq!(parse_id_list("1, 2,3 ,").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_id_list("-1001234").unwrap(), vec![-1001234]);
        assert!(parse_id_list("1,abc").is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("True"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_readable_time() {
        assert_eq!(get_readable_time(0.0), "0s");
        assert_eq!(get_readable_time(59.9), "59s");
        assert_eq!(get_readable_time(61.0), "1m 1s");
        assert_eq!(get_readable_time(3600.0), "1h 0m");
        assert_eq!(get_readable_time(7384.0), "2h 3m");
        assert_eq!(get_readable_time(-5.0), "0s");
    }
}
