use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use deadpool_postgres::Pool;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::LazyLock;

use crate::fuzzy::ratio;
use crate::utils::message_formatter::MessageFormatter;

pub const MAX_PENDING_REQUESTS_PER_USER: i64 = 3;
pub const MAX_GLOBAL_REQUESTS_PER_DAY: i64 = 20;
pub const DUPLICATE_SIMILARITY: u8 = 85;
pub const REQUESTS_PER_PAGE: usize = 5;

static IMDB_LINK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^https?://(www\.)?imdb\.com/title/tt\d+/?",
        r"(?i)^https?://(m\.)?imdb\.com/title/tt\d+/?",
        r"(?i)^imdb\.com/title/tt\d+/?",
        r"(?i)^tt\d+$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("invalid built-in regex"))
    .collect()
});

#[derive(Debug)]
pub enum RequestError {
    PendingLimit(i64),
    /// holds the earliest time the next request is accepted
    DailyLimit(DateTime<Utc>),
    GlobalLimit,
    Duplicate(RequestRecord),
    InvalidImdbLink,
    NotFound(i32),
    DatabaseError(Box<dyn Error + Send + Sync>),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::PendingLimit(count) => write!(
                f,
                "You have {} pending requests (maximum: {}). Please wait for them to be fulfilled.",
                count, MAX_PENDING_REQUESTS_PER_USER
            ),
            RequestError::DailyLimit(next) => write!(
                f,
                "You can only submit 1 request per day. Next request after: {}",
                next.format("%Y-%m-%d %H:%M UTC")
            ),
            RequestError::GlobalLimit => write!(
                f,
                "The bot has reached its maximum of {} requests per day. Please try again tomorrow.",
                MAX_GLOBAL_REQUESTS_PER_DAY
            ),
            RequestError::Duplicate(existing) => write!(
                f,
                "A similar request is already pending: {}",
                existing.display_title()
            ),
            RequestError::InvalidImdbLink => write!(f, "Invalid IMDB link"),
            RequestError::NotFound(id) => write!(f, "Request {} not found", id),
            RequestError::DatabaseError(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl Error for RequestError {}

impl From<tokio_postgres::Error> for RequestError {
    fn from(err: tokio_postgres::Error) -> Self {
        RequestError::DatabaseError(Box::new(err))
    }
}

impl From<deadpool_postgres::PoolError> for RequestError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        RequestError::DatabaseError(Box::new(err))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRecord {
    pub id: i32,
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    pub imdb_link: Option<String>,
    pub status: String,
    pub request_date: DateTime<Utc>,
}

impl RequestRecord {
    fn from_row(row: &tokio_postgres::Row) -> Self {
        Self {
            id: row.get("id"),
            telegram_user_id: row.get("telegram_user_id"),
            username: row.get("username"),
            title: row.get("title"),
            year: row.get("year"),
            imdb_link: row.get("imdb_link"),
            status: row.get("status"),
            request_date: row.get("request_date"),
        }
    }

    pub fn display_title(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

const REQUEST_COLUMNS: &str =
    "id, telegram_user_id, username, title, year, imdb_link, status, request_date";

/// empty links are allowed; otherwise one of the accepted imdb forms
pub fn validate_imdb_link(link: &str) -> bool {
    let link = link.trim();
    link.is_empty() || IMDB_LINK_PATTERNS.iter().any(|re| re.is_match(link))
}

/// same year and a title ratio of at least 85
pub fn is_duplicate(title: &str, year: Option<i32>, existing: &RequestRecord) -> bool {
    existing.year == year
        && ratio(&title.to_lowercase(), &existing.title.to_lowercase()) >= DUPLICATE_SIMILARITY
}

pub fn utc_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

/// Some(next allowed time) when the last request falls on the current UTC day
pub fn daily_limit_until(last_request: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    last_request
        .filter(|last| *last >= utc_day_start(now))
        .map(|last| last + Duration::days(1))
}

pub fn total_pages(count: usize) -> usize {
    count.div_ceil(REQUESTS_PER_PAGE).max(1)
}

/// html page of the admin request list; `page` is 1-based and clamped
pub fn format_request_page(requests: &[RequestRecord], page: usize) -> String {
    let pages = total_pages(requests.len());
    let page = page.clamp(1, pages);
    let start = (page - 1) * REQUESTS_PER_PAGE;

    let mut text = format!(
        "📋 <b>Pending Requests</b> ({})\nPage {}/{}\n\n",
        requests.len(),
        page,
        pages
    );
    if requests.is_empty() {
        text.push_str("No pending requests.");
        return text;
    }

    for (offset, request) in requests.iter().skip(start).take(REQUESTS_PER_PAGE).enumerate() {
        let who = match &request.username {
            Some(username) => format!("@{}", MessageFormatter::escape_html(username)),
            None => request.telegram_user_id.to_string(),
        };
        text.push_str(&format!(
            "{}. <b>{}</b>\n   👤 {} | 📅 {}\n",
            start + offset + 1,
            MessageFormatter::escape_html(&request.display_title()),
            who,
            request.request_date.format("%Y-%m-%d %H:%M")
        ));
        if let Some(link) = &request.imdb_link {
            text.push_str(&format!("   🔗 {}\n", MessageFormatter::escape_html(link)));
        }
    }
    text.trim_end().to_string()
}

pub struct RequestManager {
    pool: Pool,
}

impl RequestManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// pending cap, then one per UTC day, then the global daily cap
    pub async fn check_limits(&self, telegram_user_id: i64) -> Result<(), RequestError> {
        let client = self.pool.get().await?;

        let pending: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM requests WHERE telegram_user_id = $1 AND status = 'pending'",
                &[&telegram_user_id],
            )
            .await?
            .get(0);
        if pending >= MAX_PENDING_REQUESTS_PER_USER {
            return Err(RequestError::PendingLimit(pending));
        }

        let now = Utc::now();
        let last_request: Option<DateTime<Utc>> = client
            .query_opt(
                "SELECT last_request_date FROM user_request_limits WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?
            .map(|row| row.get(0));
        if let Some(next) = daily_limit_until(last_request, now) {
            return Err(RequestError::DailyLimit(next));
        }

        let today_start = utc_day_start(now);
        let global_today: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM requests WHERE request_date >= $1",
                &[&today_start],
            )
            .await?
            .get(0);
        if global_today >= MAX_GLOBAL_REQUESTS_PER_DAY {
            return Err(RequestError::GlobalLimit);
        }

        Ok(())
    }

    pub async fn find_duplicate(
        &self,
        title: &str,
        year: Option<i32>,
    ) -> Result<Option<RequestRecord>, RequestError> {
        Ok(self
            .list_pending()
            .await?
            .into_iter()
            .find(|existing| is_duplicate(title, year, existing)))
    }

    /// validates and stores a request; returns it with its queue position
    pub async fn submit(
        &self,
        telegram_user_id: i64,
        username: Option<&str>,
        title: &str,
        year: Option<i32>,
        imdb_link: Option<&str>,
    ) -> Result<(RequestRecord, i64), RequestError> {
        let imdb_link = imdb_link.map(str::trim).filter(|link| !link.is_empty());
        if let Some(link) = imdb_link {
            if !validate_imdb_link(link) {
                return Err(RequestError::InvalidImdbLink);
            }
        }

        self.check_limits(telegram_user_id).await?;
        if let Some(existing) = self.find_duplicate(title, year).await? {
            return Err(RequestError::Duplicate(existing));
        }

        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        let row = transaction
            .query_one(
                &format!(
                    "INSERT INTO requests (telegram_user_id, username, title, year, imdb_link)
                     VALUES ($1, $2, $3, $4, $5) RETURNING {}",
                    REQUEST_COLUMNS
                ),
                &[&telegram_user_id, &username, &title.trim(), &year, &imdb_link],
            )
            .await?;
        transaction
            .execute(
                "INSERT INTO user_request_limits (telegram_user_id, last_request_date) VALUES ($1, NOW())
                 ON CONFLICT (telegram_user_id) DO UPDATE SET last_request_date = EXCLUDED.last_request_date",
                &[&telegram_user_id],
            )
            .await?;
        transaction.commit().await?;

        let record = RequestRecord::from_row(&row);
        let position = self.queue_position(telegram_user_id).await?.unwrap_or(1);
        info!(
            "User {} requested '{}' (queue position {})",
            telegram_user_id,
            record.display_title(),
            position
        );
        Ok((record, position))
    }

    /// pending requests older than the user's latest pending one, plus one
    pub async fn queue_position(&self, telegram_user_id: i64) -> Result<Option<i64>, RequestError> {
        let client = self.pool.get().await?;
        let latest: Option<DateTime<Utc>> = client
            .query_opt(
                "SELECT request_date FROM requests
                 WHERE telegram_user_id = $1 AND status = 'pending'
                 ORDER BY request_date DESC LIMIT 1",
                &[&telegram_user_id],
            )
            .await?
            .map(|row| row.get(0));

        let Some(latest) = latest else {
            return Ok(None);
        };
        let ahead: i64 = client
            .query_one(
                "SELECT COUNT(*) FROM requests WHERE status = 'pending' AND request_date < $1",
                &[&latest],
            )
            .await?
            .get(0);
        Ok(Some(ahead + 1))
    }

    /// oldest first
    pub async fn list_pending(&self) -> Result<Vec<RequestRecord>, RequestError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM requests WHERE status = 'pending' ORDER BY request_date, id",
                    REQUEST_COLUMNS
                ),
                &[],
            )
            .await?;
        Ok(rows.iter().map(RequestRecord::from_row).collect())
    }

    pub async fn complete(&self, request_id: i32, completed_by: i64) -> Result<RequestRecord, RequestError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE requests SET status = 'completed', completed_at = NOW(), completed_by = $2
                     WHERE id = $1 AND status = 'pending' RETURNING {}",
                    REQUEST_COLUMNS
                ),
                &[&request_id, &completed_by],
            )
            .await?
            .ok_or(RequestError::NotFound(request_id))?;
        info!("Request {} completed by {}", request_id, completed_by);
        Ok(RequestRecord::from_row(&row))
    }

    /// completes every pending request and returns them for notification
    pub async fn complete_all(&self, completed_by: i64) -> Result<Vec<RequestRecord>, RequestError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "UPDATE requests SET status = 'completed', completed_at = NOW(), completed_by = $1
                     WHERE status = 'pending' RETURNING {}",
                    REQUEST_COLUMNS
                ),
                &[&completed_by],
            )
            .await?;
        info!("{} requests completed by {}", rows.len(), completed_by);
        Ok(rows.iter().map(RequestRecord::from_row).collect())
    }

    pub async fn user_request_count(&self, telegram_user_id: i64) -> Result<i64, RequestError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM requests WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, year: Option<i32>) -> RequestRecord {
        RequestRecord {
            id: 1,
            telegram_user_id: 10,
            username: None,
            title: title.to_string(),
            year,
            imdb_link: None,
            status: "pending".to_string(),
            request_date: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_validate_imdb_link() {
        assert!(validate_imdb_link(""));
        assert!(validate_imdb_link("   "));
        assert!(validate_imdb_link("https://www.imdb.com/title/tt1375666/"));
        assert!(validate_imdb_link("http://imdb.com/title/tt1375666"));
        assert!(validate_imdb_link("https://m.imdb.com/title/tt1375666/"));
        assert!(validate_imdb_link("IMDB.com/title/tt1375666"));
        assert!(validate_imdb_link("tt1375666"));
        assert!(!validate_imdb_link("https://example.com/title/tt1375666"));
        assert!(!validate_imdb_link("tt1375666x"));
        assert!(!validate_imdb_link("inception"));
    }

    #[test]
    fn test_duplicate_needs_year_and_similar_title() {
        let existing = record("The Dark Knight", Some(2008));
        assert!(is_duplicate("the dark knight", Some(2008), &existing));
        assert!(is_duplicate("The Dark Knigt", Some(2008), &existing));
        assert!(!is_duplicate("The Dark Knight", Some(2012), &existing));
        assert!(!is_duplicate("The Dark Knight Rises", Some(2008), &existing));
    }

    #[test]
    fn test_daily_limit() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        let earlier_today = Utc.with_ymd_and_hms(2024, 5, 2, 0, 30, 0).unwrap();
        let yesterday = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();

        assert_eq!(
            daily_limit_until(Some(earlier_today), now),
            Some(Utc.with_ymd_and_hms(2024, 5, 3, 0, 30, 0).unwrap())
        );
        assert_eq!(daily_limit_until(Some(yesterday), now), None);
        assert_eq!(daily_limit_until(None, now), None);
    }

    #[test]
    fn test_format_request_page() {
        let requests: Vec<RequestRecord> = (0..7)
            .map(|i| record(&format!("Film <{}>", i), Some(2000 + i)))
            .collect();
        let page = format_request_page(&requests, 2);
        assert!(page.contains("Pending Requests</b> (7)"));
        assert!(page.contains("Page 2/2"));
        assert!(page.contains("6. <b>Film &lt;5&gt; (2005)</b>"));
        assert!(!page.contains("5. <b>"));

        assert!(format_request_page(&[], 1).contains("No pending requests."));
    }
}
