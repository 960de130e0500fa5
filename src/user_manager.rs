use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

pub const SEARCH_HISTORY_LIMIT: i64 = 20;

#[derive(Debug)]
pub enum UserManagerError {
    UserNotFound(i64), // telegram_user_id
    InvalidPreference(String),
    DatabaseError(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for UserManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserManagerError::UserNotFound(user_id) => {
                write!(f, "User {} not found", user_id)
            }
            UserManagerError::InvalidPreference(key) => {
                write!(f, "Invalid preference key '{}'", key)
            }
            UserManagerError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl Error for UserManagerError {}

impl From<tokio_postgres::Error> for UserManagerError {
    fn from(err: tokio_postgres::Error) -> Self {
        UserManagerError::DatabaseError(Box::new(err))
    }
}

impl From<deadpool_postgres::PoolError> for UserManagerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        UserManagerError::DatabaseError(Box::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Admin,
    Banned,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::Banned => "banned",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            "banned" => Role::Banned,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i32,
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Role,
    pub terms_accepted: bool,
    pub download_count: i32,
    pub inline_search_count: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    fn from_row(row: &tokio_postgres::Row) -> Self {
        Self {
            id: row.get("id"),
            telegram_user_id: row.get("telegram_user_id"),
            username: row.get("username"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            role: Role::parse(row.get::<_, &str>("role")),
            terms_accepted: row.get("terms_accepted"),
            download_count: row.get("download_count"),
            inline_search_count: row.get("inline_search_count"),
            created_at: row.get("created_at"),
            last_seen: row.get("last_seen"),
        }
    }

    /// "@username" when known, otherwise the first name, otherwise the id
    pub fn display_name(&self) -> String {
        match (&self.username, &self.first_name) {
            (Some(username), _) => format!("@{}", username),
            (None, Some(first_name)) => first_name.clone(),
            (None, None) => self.telegram_user_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: i32,
    pub query: String,
    pub searched_at: DateTime<Utc>,
}

/// preference keys a user may set with /my_prefs
pub const PREFERENCE_KEYS: &[&str] = &["quality", "language", "content_type", "results_per_page"];

const USER_COLUMNS: &str = "id, telegram_user_id, username, first_name, last_name, role, terms_accepted, \
     download_count, inline_search_count, created_at, last_seen";

pub struct UserManager {
    pool: Pool,
    env_admins: Vec<i64>,
}

impl UserManager {
    pub fn new(pool: Pool, env_admins: Vec<i64>) -> Self {
        Self { pool, env_admins }
    }

    /// upserts the user, refreshing names and last_seen
    pub async fn get_or_create_user(
        &self,
        telegram_user_id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User, UserManagerError> {
        let client = self.pool.get().await?;

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO users (telegram_user_id, username, first_name, last_name, last_seen)
                     VALUES ($1, $2, $3, $4, NOW())
                     ON CONFLICT (telegram_user_id) DO UPDATE SET
                        username = EXCLUDED.username,
                        first_name = EXCLUDED.first_name,
                        last_name = EXCLUDED.last_name,
                        last_seen = NOW(),
                        updated_at = NOW()
                     RETURNING {}, (xmax = 0) AS inserted",
                    USER_COLUMNS
                ),
                &[&telegram_user_id, &username, &first_name, &last_name],
            )
            .await?;

        let user = User::from_row(&row);
        if row.get::<_, bool>("inserted") {
            info!("Created new user: {}", telegram_user_id);
        }
        Ok(user)
    }

    pub async fn get_user(&self, telegram_user_id: i64) -> Result<Option<User>, UserManagerError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM users WHERE telegram_user_id = $1", USER_COLUMNS),
                &[&telegram_user_id],
            )
            .await?;
        Ok(row.as_ref().map(User::from_row))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserManagerError> {
        let client = self.pool.get().await?;
        let username = username.trim_start_matches('@');
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM users WHERE LOWER(username) = LOWER($1)",
                    USER_COLUMNS
                ),
                &[&username],
            )
            .await?;
        Ok(row.as_ref().map(User::from_row))
    }

    /// env admins always count, otherwise the stored role decides
    pub async fn is_admin(&self, telegram_user_id: i64) -> Result<bool, UserManagerError> {
        if self.env_admins.contains(&telegram_user_id) {
            return Ok(true);
        }
        Ok(self.role(telegram_user_id).await? == Some(Role::Admin))
    }

    pub async fn is_banned(&self, telegram_user_id: i64) -> Result<bool, UserManagerError> {
        Ok(self.role(telegram_user_id).await? == Some(Role::Banned))
    }

    async fn role(&self, telegram_user_id: i64) -> Result<Option<Role>, UserManagerError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT role FROM users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        Ok(row.map(|r| Role::parse(r.get::<_, &str>(0))))
    }

    pub async fn has_accepted_terms(&self, telegram_user_id: i64) -> Result<bool, UserManagerError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT terms_accepted FROM users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    pub async fn accept_terms(&self, telegram_user_id: i64) -> Result<(), UserManagerError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE users SET terms_accepted = TRUE, terms_accepted_at = NOW(), updated_at = NOW()
                 WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;

        if updated == 0 {
            return Err(UserManagerError::UserNotFound(telegram_user_id));
        }
        info!("User {} accepted the terms", telegram_user_id);
        Ok(())
    }

    /// sets the role, creating a bare user row when the id is unknown
    pub async fn set_role(&self, telegram_user_id: i64, role: Role) -> Result<(), UserManagerError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO users (telegram_user_id, role) VALUES ($1, $2)
                 ON CONFLICT (telegram_user_id) DO UPDATE SET role = EXCLUDED.role, updated_at = NOW()",
                &[&telegram_user_id, &role.as_str()],
            )
            .await?;
        info!("User {} role set to {}", telegram_user_id, role.as_str());
        Ok(())
    }

    pub async fn list_by_role(&self, role: Role) -> Result<Vec<User>, UserManagerError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM users WHERE role = $1 ORDER BY telegram_user_id",
                    USER_COLUMNS
                ),
                &[&role.as_str()],
            )
            .await?;
        Ok(rows.iter().map(User::from_row).collect())
    }

    /// users who accepted the terms and are not banned
    pub async fn eligible_recipients(&self) -> Result<Vec<i64>, UserManagerError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT telegram_user_id FROM users
                 WHERE terms_accepted = TRUE AND role <> 'banned'
                 ORDER BY telegram_user_id",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    pub async fn record_search(&self, telegram_user_id: i64, query: &str) -> Result<(), UserManagerError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO search_history (telegram_user_id, query) VALUES ($1, $2)",
                &[&telegram_user_id, &query],
            )
            .await?;
        Ok(())
    }

    /// most recent searches first
    pub async fn search_history(
        &self,
        telegram_user_id: i64,
        limit: i64,
    ) -> Result<Vec<SearchHistoryEntry>, UserManagerError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, query, searched_at FROM search_history
                 WHERE telegram_user_id = $1
                 ORDER BY searched_at DESC, id DESC
                 LIMIT $2",
                &[&telegram_user_id, &limit],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| SearchHistoryEntry {
                id: r.get(0),
                query: r.get(1),
                searched_at: r.get(2),
            })
            .collect())
    }

    /// query of one history row, only when it belongs to the user
    pub async fn history_query(
        &self,
        telegram_user_id: i64,
        history_id: i32,
    ) -> Result<Option<String>, UserManagerError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT query FROM search_history WHERE id = $1 AND telegram_user_id = $2",
                &[&history_id, &telegram_user_id],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    pub async fn record_download(
        &self,
        telegram_user_id: i64,
        channel_id: i64,
        message_id: i32,
    ) -> Result<(), UserManagerError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        transaction
            .execute(
                "INSERT INTO download_history (telegram_user_id, channel_id, message_id) VALUES ($1, $2, $3)",
                &[&telegram_user_id, &channel_id, &message_id],
            )
            .await?;
        transaction
            .execute(
                "UPDATE users SET download_count = download_count + 1 WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    pub async fn record_bulk_download(
        &self,
        telegram_user_id: i64,
        file_count: i32,
    ) -> Result<(), UserManagerError> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        transaction
            .execute(
                "INSERT INTO download_history (telegram_user_id, bulk, file_count) VALUES ($1, TRUE, $2)",
                &[&telegram_user_id, &file_count],
            )
            .await?;
        transaction
            .execute(
                "UPDATE users SET download_count = download_count + $2 WHERE telegram_user_id = $1",
                &[&telegram_user_id, &file_count],
            )
            .await?;
        transaction.commit().await?;
        Ok(())
    }

    pub async fn increment_inline_searches(&self, telegram_user_id: i64) -> Result<(), UserManagerError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE users SET inline_search_count = inline_search_count + 1, last_seen = NOW()
                 WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        Ok(())
    }

    pub async fn preferences(
        &self,
        telegram_user_id: i64,
    ) -> Result<serde_json::Map<String, serde_json::Value>, UserManagerError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT preferences FROM users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?
            .ok_or(UserManagerError::UserNotFound(telegram_user_id))?;

        match row.get::<_, serde_json::Value>(0) {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }

    pub async fn set_preference(
        &self,
        telegram_user_id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), UserManagerError> {
        if !PREFERENCE_KEYS.contains(&key) {
            return Err(UserManagerError::InvalidPreference(key.to_string()));
        }

        let client = self.pool.get().await?;
        let patch = serde_json::json!({ key: value });
        let updated = client
            .execute(
                "UPDATE users SET preferences = preferences || $2, updated_at = NOW()
                 WHERE telegram_user_id = $1",
                &[&telegram_user_id, &patch],
            )
            .await?;

        if updated == 0 {
            return Err(UserManagerError::UserNotFound(telegram_user_id));
        }
        Ok(())
    }

    /// writes an audit entry; failures are logged and swallowed
    pub async fn log_action(
        &self,
        action: &str,
        by_user: Option<i64>,
        target: Option<i64>,
        extra: Option<serde_json::Value>,
    ) {
        let result = async {
            let client = self.pool.get().await?;
            client
                .execute(
                    "INSERT INTO action_logs (action, by_user, target, extra) VALUES ($1, $2, $3, $4)",
                    &[&action, &by_user, &target, &extra],
                )
                .await?;
            Ok::<(), UserManagerError>(())
        }
        .await;

        if let Err(e) = result {
            error!("Failed to log action '{}': {}", action, e);
        }
    }
}
