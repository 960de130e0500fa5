use chrono::{DateTime, TimeDelta, Utc};
use deadpool_postgres::Pool;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio_postgres::error::SqlState;

/// features seeded at startup: (name, description)
pub const DEFAULT_FEATURES: &[(&str, &str)] = &[
    ("recent", "/recent command"),
    ("request", "/request command"),
    ("get_all", "Get All button in search results"),
];

/// upper bound for a single grant or edit, in days
pub const MAX_PREMIUM_DAYS: i64 = 36_500;

#[derive(Debug)]
pub enum PremiumError {
    NotPremium(i64),
    InvalidDays(i64),
    ZeroDelta,
    ExpiryOutOfRange,
    FeatureExists(String),
    FeatureNotFound(String),
    DatabaseError(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for PremiumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PremiumError::NotPremium(user_id) => write!(f, "User {} is not a premium user", user_id),
            PremiumError::InvalidDays(days) => write!(
                f,
                "Days must be between 1 and {} (got {})",
                MAX_PREMIUM_DAYS, days
            ),
            PremiumError::ZeroDelta => write!(f, "Days delta cannot be zero"),
            PremiumError::ExpiryOutOfRange => write!(f, "Resulting expiry date is out of range"),
            PremiumError::FeatureExists(name) => write!(f, "Feature '{}' already exists", name),
            PremiumError::FeatureNotFound(name) => write!(f, "Feature '{}' not found", name),
            PremiumError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl Error for PremiumError {}

impl From<tokio_postgres::Error> for PremiumError {
    fn from(err: tokio_postgres::Error) -> Self {
        PremiumError::DatabaseError(Box::new(err))
    }
}

impl From<deadpool_postgres::PoolError> for PremiumError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        PremiumError::DatabaseError(Box::new(err))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumUser {
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub granted_by: Option<i64>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PremiumUser {
    fn from_row(row: &tokio_postgres::Row) -> Self {
        Self {
            telegram_user_id: row.get("telegram_user_id"),
            username: row.get("username"),
            granted_by: row.get("granted_by"),
            granted_at: row.get("granted_at"),
            expires_at: row.get("expires_at"),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PremiumFeature {
    pub feature_name: String,
    pub description: String,
    pub premium_only: bool,
}

/// adds to a still-running subscription, otherwise starts from now; None on overflow
pub fn extended_expiry(
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    days: i64,
) -> Option<DateTime<Utc>> {
    let start = match current {
        Some(expiry) if expiry > now => expiry,
        _ => now,
    };
    start.checked_add_signed(TimeDelta::try_days(days)?)
}

/// shifts the expiry by `delta` days, never into the past; None on overflow
pub fn edited_expiry(current: DateTime<Utc>, now: DateTime<Utc>, delta: i64) -> Option<DateTime<Utc>> {
    current
        .checked_add_signed(TimeDelta::try_days(delta)?)
        .map(|expiry| expiry.max(now))
}

/// whole days left, zero once expired
pub fn whole_days_remaining(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_days().max(0)
}

const PREMIUM_COLUMNS: &str = "telegram_user_id, username, granted_by, granted_at, expires_at";

pub struct PremiumManager {
    pool: Pool,
}

impl PremiumManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// inserts the default features that are missing
    pub async fn seed_default_features(&self) -> Result<(), PremiumError> {
        let client = self.pool.get().await?;
        for (name, description) in DEFAULT_FEATURES {
            client
                .execute(
                    "INSERT INTO premium_features (feature_name, description, premium_only, created_by)
                     VALUES ($1, $2, FALSE, 0)
                     ON CONFLICT (feature_name) DO NOTHING",
                    &[name, description],
                )
                .await?;
        }
        Ok(())
    }

    pub async fn get_premium(&self, telegram_user_id: i64) -> Result<Option<PremiumUser>, PremiumError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM premium_users WHERE telegram_user_id = $1",
                    PREMIUM_COLUMNS
                ),
                &[&telegram_user_id],
            )
            .await?;
        Ok(row.as_ref().map(PremiumUser::from_row))
    }

    pub async fn is_premium(&self, telegram_user_id: i64) -> Result<bool, PremiumError> {
        Ok(self
            .get_premium(telegram_user_id)
            .await?
            .is_some_and(|p| p.is_active(Utc::now())))
    }

    /// grants or extends premium by `days`; returns the new expiry
    pub async fn add_premium(
        &self,
        telegram_user_id: i64,
        days: i64,
        granted_by: i64,
        username: Option<&str>,
    ) -> Result<DateTime<Utc>, PremiumError> {
        if !(1..=MAX_PREMIUM_DAYS).contains(&days) {
            return Err(PremiumError::InvalidDays(days));
        }

        let now = Utc::now();
        let current = self.get_premium(telegram_user_id).await?.map(|p| p.expires_at);
        let new_expiry =
            extended_expiry(current, now, days).ok_or(PremiumError::ExpiryOutOfRange)?;

        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO premium_users (telegram_user_id, username, granted_by, expires_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (telegram_user_id) DO UPDATE SET
                    expires_at = EXCLUDED.expires_at,
                    username = COALESCE(EXCLUDED.username, premium_users.username),
                    updated_at = NOW()",
                &[&telegram_user_id, &username, &granted_by, &new_expiry],
            )
            .await?;

        info!(
            "Premium for {} set to expire {} (+{} days by {})",
            telegram_user_id, new_expiry, days, granted_by
        );
        Ok(new_expiry)
    }

    /// moves an existing expiry by `delta` days (may be negative)
    pub async fn edit_premium(
        &self,
        telegram_user_id: i64,
        delta: i64,
        edited_by: i64,
    ) -> Result<DateTime<Utc>, PremiumError> {
        if delta == 0 {
            return Err(PremiumError::ZeroDelta);
        }
        if !(-MAX_PREMIUM_DAYS..=MAX_PREMIUM_DAYS).contains(&delta) {
            return Err(PremiumError::InvalidDays(delta));
        }
        let current = self
            .get_premium(telegram_user_id)
            .await?
            .ok_or(PremiumError::NotPremium(telegram_user_id))?;

        let new_expiry = edited_expiry(current.expires_at, Utc::now(), delta)
            .ok_or(PremiumError::ExpiryOutOfRange)?;
        let client = self.pool.get().await?;
        client
            .execute(
                "UPDATE premium_users SET expires_at = $2, updated_at = NOW() WHERE telegram_user_id = $1",
                &[&telegram_user_id, &new_expiry],
            )
            .await?;

        info!(
            "Premium for {} edited by {} ({:+} days), expires {}",
            telegram_user_id, edited_by, delta, new_expiry
        );
        Ok(new_expiry)
    }

    pub async fn remove_premium(&self, telegram_user_id: i64) -> Result<(), PremiumError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                "DELETE FROM premium_users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        if deleted == 0 {
            return Err(PremiumError::NotPremium(telegram_user_id));
        }
        info!("Premium removed for {}", telegram_user_id);
        Ok(())
    }

    /// None when the user has no premium record
    pub async fn days_remaining(&self, telegram_user_id: i64) -> Result<Option<i64>, PremiumError> {
        Ok(self
            .get_premium(telegram_user_id)
            .await?
            .map(|p| whole_days_remaining(p.expires_at, Utc::now())))
    }

    /// soonest expiry first
    pub async fn list_premium(&self) -> Result<Vec<PremiumUser>, PremiumError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {} FROM premium_users ORDER BY expires_at", PREMIUM_COLUMNS),
                &[],
            )
            .await?;
        Ok(rows.iter().map(PremiumUser::from_row).collect())
    }

    /// deletes expired records and returns how many went
    pub async fn cleanup_expired(&self) -> Result<u64, PremiumError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM premium_users WHERE expires_at < NOW()", &[])
            .await?;
        if deleted > 0 {
            info!("Cleaned up {} expired premium users", deleted);
        }
        Ok(deleted)
    }

    /// unknown features are open to everyone
    pub async fn is_feature_premium_only(&self, feature_name: &str) -> Result<bool, PremiumError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT premium_only FROM premium_features WHERE feature_name = $1",
                &[&feature_name],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
    }

    /// open features, admins and active premium users get access
    pub async fn can_use_feature(
        &self,
        telegram_user_id: i64,
        feature_name: &str,
        is_admin: bool,
    ) -> Result<bool, PremiumError> {
        if is_admin || !self.is_feature_premium_only(feature_name).await? {
            return Ok(true);
        }
        self.is_premium(telegram_user_id).await
    }

    /// flips the premium-only flag and returns the new value
    pub async fn toggle_feature(&self, feature_name: &str) -> Result<bool, PremiumError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE premium_features SET premium_only = NOT premium_only, updated_at = NOW()
                 WHERE feature_name = $1 RETURNING premium_only",
                &[&feature_name],
            )
            .await?
            .ok_or_else(|| PremiumError::FeatureNotFound(feature_name.to_string()))?;
        let premium_only: bool = row.get(0);
        info!("Feature '{}' premium-only: {}", feature_name, premium_only);
        Ok(premium_only)
    }

    /// new features start premium-only
    pub async fn add_feature(
        &self,
        feature_name: &str,
        description: &str,
        created_by: i64,
    ) -> Result<(), PremiumError> {
        let client = self.pool.get().await?;
        let result = client
            .execute(
                "INSERT INTO premium_features (feature_name, description, premium_only, created_by)
                 VALUES ($1, $2, TRUE, $3)",
                &[&feature_name, &description, &created_by],
            )
            .await;

        match result {
            Ok(_) => {
                info!("Feature '{}' added by {}", feature_name, created_by);
                Ok(())
            }
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                Err(PremiumError::FeatureExists(feature_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_features(&self) -> Result<Vec<PremiumFeature>, PremiumError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT feature_name, description, premium_only FROM premium_features ORDER BY id",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| PremiumFeature {
                feature_name: r.get(0),
                description: r.get(1),
                premium_only: r.get(2),
            })
            .collect())
    }
}
