use chrono::{DateTime, Datelike, Utc};
use deadpool_postgres::Pool;
use log::error;
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;

use crate::channel_monitor::IndexingStats;
use crate::user_manager::Role;
use crate::utils::message_formatter::MessageFormatter;

type StatsResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const TOP_N: usize = 10;
const DASHBOARD_TOP_N: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Distribution {
    pub label: String,
    pub count: i64,
}

impl Distribution {
    fn new(label: impl Into<String>, count: i64) -> Self {
        Self {
            label: label.into(),
            count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PremiumBreakdown {
    pub total: i64,
    pub within_30_days: i64,
    pub over_30_days: i64,
    pub expiring_7_days: i64,
    pub expiring_30_days: i64,
    pub avg_days_left: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotStatistics {
    pub total_users: i64,
    pub active_users_7d: i64,
    pub banned_users: i64,
    pub admin_users: i64,
    pub premium_users: i64,
    pub total_content: i64,
    pub total_movies: i64,
    pub total_series: i64,
    pub total_channels: i64,
    pub enabled_channels: i64,
    pub pending_requests: i64,
    pub completed_requests: i64,
    pub total_logs: i64,
    pub quality_distribution: Vec<Distribution>,
    pub year_distribution: Vec<Distribution>,
    pub channel_distribution: Vec<Distribution>,
    pub top_searches: Vec<Distribution>,
    pub total_searches: i64,
    pub avg_searches_per_day: f64,
    pub premium: PremiumBreakdown,
    pub indexing: IndexingStats,
    pub db_estimated_size: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickStats {
    pub total_users: i64,
    pub active_users_7d: i64,
    pub premium_users: i64,
    pub total_content: i64,
    pub total_channels: i64,
    pub pending_requests: i64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStatistics {
    pub telegram_user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub role: Role,
    pub joined_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub premium_expires: Option<DateTime<Utc>>,
    pub total_searches: i64,
    pub unique_searches: i64,
    pub recent_searches: Vec<String>,
    pub total_downloads: i64,
    pub inline_searches: i64,
    pub total_requests: i64,
    pub pending_requests: i64,
    pub completed_requests: i64,
    pub activity_score: u8,
}

/// uppercases labels, folds 2160P into 4K, moves Unknown to the end, keeps the top ten
pub fn normalize_qualities(raw: Vec<(Option<String>, i64)>) -> Vec<Distribution> {
    let mut merged: HashMap<String, i64> = HashMap::new();
    let mut unknown = 0;

    for (quality, count) in raw {
        match quality.map(|q| q.trim().to_uppercase()) {
            Some(q) if !q.is_empty() && q != "UNKNOWN" => {
                let label = if q == "2160P" { "4K".to_string() } else { q };
                *merged.entry(label).or_insert(0) += count;
            }
            _ => unknown += count,
        }
    }

    let mut distribution: Vec<Distribution> = merged
        .into_iter()
        .map(|(label, count)| Distribution::new(label, count))
        .collect();
    distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    if unknown > 0 {
        distribution.push(Distribution::new("Unknown", unknown));
    }
    distribution.truncate(TOP_N);
    distribution
}

pub fn estimated_db_size(content: i64, users: i64, logs: i64) -> i64 {
    content * 1024 + users * 512 + logs * 256
}

/// searches per day over the span between the first and last search, at least one day
pub fn average_per_day(total: i64, earliest: Option<DateTime<Utc>>, latest: Option<DateTime<Utc>>) -> f64 {
    match (earliest, latest) {
        (Some(first), Some(last)) if total > 0 => {
            let days = ((last - first).num_seconds() as f64 / 86_400.0).max(1.0);
            total as f64 / days
        }
        _ => 0.0,
    }
}

/// buckets whole days left per premium user
pub fn premium_breakdown(days_left: &[i64]) -> PremiumBreakdown {
    let total = days_left.len() as i64;
    let count = |pred: &dyn Fn(i64) -> bool| days_left.iter().filter(|d| pred(**d)).count() as i64;
    PremiumBreakdown {
        total,
        within_30_days: count(&|d| d <= 30),
        over_30_days: count(&|d| d > 30),
        expiring_7_days: count(&|d| d <= 7),
        expiring_30_days: count(&|d| d <= 30),
        avg_days_left: (total > 0).then(|| days_left.iter().sum::<i64>() as f64 / total as f64),
    }
}

/// 0-100 mix of searches, downloads, requests and recency
pub fn activity_score(
    searches: i64,
    downloads: i64,
    requests: i64,
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> u8 {
    let mut score = (searches * 2).clamp(0, 30) + (downloads * 3).clamp(0, 30) + (requests * 5).clamp(0, 20);
    if let Some(seen) = last_seen {
        score += match (now - seen).num_days() {
            d if d <= 0 => 20,
            d if d <= 7 => 15,
            d if d <= 30 => 10,
            d if d <= 90 => 5,
            _ => 0,
        };
    }
    score.min(100) as u8
}

pub struct StatisticsCollector {
    pool: Pool,
}

impl StatisticsCollector {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn count(&self, sql: &str) -> StatsResult<i64> {
        let client = self.pool.get().await?;
        let row = client.query_one(sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn distribution(&self, sql: &str) -> StatsResult<Vec<(Option<String>, i64)>> {
        let client = self.pool.get().await?;
        let rows = client.query(sql, &[]).await?;
        Ok(rows.iter().map(|r| (r.get(0), r.get(1))).collect())
    }

    pub async fn collect(&self) -> StatsResult<BotStatistics> {
        let (
            total_users,
            active_users_7d,
            banned_users,
            admin_users,
            premium_users,
            total_content,
            total_movies,
            total_series,
            total_channels,
            enabled_channels,
            pending_requests,
            completed_requests,
            total_logs,
        ) = tokio::try_join!(
            self.count("SELECT COUNT(*) FROM users"),
            self.count("SELECT COUNT(*) FROM users WHERE last_seen >= NOW() - INTERVAL '7 days'"),
            self.count("SELECT COUNT(*) FROM users WHERE role = 'banned'"),
            self.count("SELECT COUNT(*) FROM users WHERE role = 'admin'"),
            self.count("SELECT COUNT(*) FROM premium_users WHERE expires_at > NOW()"),
            self.count("SELECT COUNT(*) FROM movies"),
            self.count("SELECT COUNT(*) FROM movies WHERE content_type = 'Movie'"),
            self.count("SELECT COUNT(*) FROM movies WHERE content_type = 'Series'"),
            self.count("SELECT COUNT(*) FROM channels"),
            self.count("SELECT COUNT(*) FROM channels WHERE enabled"),
            self.count("SELECT COUNT(*) FROM requests WHERE status = 'pending'"),
            self.count("SELECT COUNT(*) FROM requests WHERE status = 'completed'"),
            self.count("SELECT COUNT(*) FROM action_logs"),
        )?;

        let current_year = Utc::now().year();
        let top_searches_sql = format!(
            "SELECT LOWER(query), COUNT(*) AS c FROM search_history
             GROUP BY LOWER(query) ORDER BY c DESC LIMIT {}",
            TOP_N
        );
        let (qualities, years, channels, top_searches, search_span, premium_days, indexing) = tokio::try_join!(
            self.distribution("SELECT quality, COUNT(*) FROM movies GROUP BY quality"),
            self.year_distribution(current_year),
            self.channel_distribution(),
            self.distribution(&top_searches_sql),
            self.search_span(),
            self.premium_days_left(),
            self.indexing_stats(),
        )?;

        let (total_searches, earliest, latest) = search_span;
        Ok(BotStatistics {
            total_users,
            active_users_7d,
            banned_users,
            admin_users,
            premium_users,
            total_content,
            total_movies,
            total_series,
            total_channels,
            enabled_channels,
            pending_requests,
            completed_requests,
            total_logs,
            quality_distribution: normalize_qualities(qualities),
            year_distribution: years,
            channel_distribution: channels,
            top_searches: top_searches
                .into_iter()
                .map(|(q, c)| Distribution::new(q.unwrap_or_default(), c))
                .collect(),
            total_searches,
            avg_searches_per_day: average_per_day(total_searches, earliest, latest),
            premium: premium_breakdown(&premium_days),
            indexing,
            db_estimated_size: estimated_db_size(total_content, total_users, total_logs),
            generated_at: Utc::now(),
        })
    }

    pub async fn collect_quick(&self) -> StatsResult<QuickStats> {
        let (total_users, active_users_7d, premium_users, total_content, total_channels, pending_requests) = tokio::try_join!(
            self.count("SELECT COUNT(*) FROM users"),
            self.count("SELECT COUNT(*) FROM users WHERE last_seen >= NOW() - INTERVAL '7 days'"),
            self.count("SELECT COUNT(*) FROM premium_users WHERE expires_at > NOW()"),
            self.count("SELECT COUNT(*) FROM movies"),
            self.count("SELECT COUNT(*) FROM channels"),
            self.count("SELECT COUNT(*) FROM requests WHERE status = 'pending'"),
        )?;
        Ok(QuickStats {
            total_users,
            active_users_7d,
            premium_users,
            total_content,
            total_channels,
            pending_requests,
            generated_at: Utc::now(),
        })
    }

    async fn year_distribution(&self, current_year: i32) -> StatsResult<Vec<Distribution>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT year, COUNT(*) FROM movies
                 WHERE year IS NOT NULL AND year > 0 AND year <= $1
                 GROUP BY year ORDER BY COUNT(*) DESC, year DESC LIMIT 10",
                &[&current_year],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| Distribution::new(r.get::<_, i32>(0).to_string(), r.get(1)))
            .collect())
    }

    async fn channel_distribution(&self) -> StatsResult<Vec<Distribution>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT m.channel_id, c.channel_title, COUNT(*) AS files
                 FROM movies m LEFT JOIN channels c ON c.channel_id = m.channel_id
                 GROUP BY m.channel_id, c.channel_title
                 ORDER BY files DESC LIMIT 10",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let channel_id: i64 = r.get(0);
                let title: Option<String> = r.get(1);
                Distribution::new(title.unwrap_or_else(|| format!("ID:{}", channel_id)), r.get(2))
            })
            .collect())
    }

    async fn search_span(&self) -> StatsResult<(i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*), MIN(searched_at), MAX(searched_at) FROM search_history",
                &[],
            )
            .await?;
        Ok((row.get(0), row.get(1), row.get(2)))
    }

    async fn premium_days_left(&self) -> StatsResult<Vec<i64>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT expires_at FROM premium_users WHERE expires_at > NOW()",
                &[],
            )
            .await?;
        let now = Utc::now();
        Ok(rows
            .iter()
            .map(|r| crate::premium::whole_days_remaining(r.get(0), now))
            .collect())
    }

    async fn indexing_stats(&self) -> StatsResult<IndexingStats> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT total_attempts, successful_inserts, duplicate_errors, other_errors, last_reset
                 FROM indexing_stats WHERE id = 1",
                &[],
            )
            .await?;
        Ok(IndexingStats {
            total_attempts: row.get(0),
            successful_inserts: row.get(1),
            duplicate_errors: row.get(2),
            other_errors: row.get(3),
            last_reset: row.get(4),
        })
    }

    /// None when the user has never talked to the bot
    pub async fn collect_user(&self, telegram_user_id: i64) -> StatsResult<Option<UserStatistics>> {
        let client = self.pool.get().await?;
        let Some(user) = client
            .query_opt(
                "SELECT username, first_name, role, COALESCE(terms_accepted_at, created_at), last_seen,
                        download_count, inline_search_count
                 FROM users WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?
        else {
            return Ok(None);
        };

        let searches = client
            .query_one(
                "SELECT COUNT(*), COUNT(DISTINCT LOWER(query)) FROM search_history WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        let recent = client
            .query(
                "SELECT query FROM search_history WHERE telegram_user_id = $1
                 ORDER BY searched_at DESC LIMIT 5",
                &[&telegram_user_id],
            )
            .await?;
        let requests = client
            .query_one(
                "SELECT COUNT(*),
                        COUNT(*) FILTER (WHERE status = 'pending'),
                        COUNT(*) FILTER (WHERE status = 'completed')
                 FROM requests WHERE telegram_user_id = $1",
                &[&telegram_user_id],
            )
            .await?;
        let premium_expires: Option<DateTime<Utc>> = client
            .query_opt(
                "SELECT expires_at FROM premium_users WHERE telegram_user_id = $1 AND expires_at > NOW()",
                &[&telegram_user_id],
            )
            .await?
            .map(|r| r.get(0));

        let last_seen: Option<DateTime<Utc>> = user.get(4);
        let total_searches: i64 = searches.get(0);
        let total_downloads = user.get::<_, i32>(5) as i64;
        let total_requests: i64 = requests.get(0);

        Ok(Some(UserStatistics {
            telegram_user_id,
            username: user.get(0),
            first_name: user.get(1),
            role: Role::parse(user.get::<_, &str>(2)),
            joined_at: user.get(3),
            last_seen,
            premium_expires,
            total_searches,
            unique_searches: searches.get(1),
            recent_searches: recent.iter().map(|r| r.get(0)).collect(),
            total_downloads,
            inline_searches: user.get::<_, i32>(6) as i64,
            total_requests,
            pending_requests: requests.get(1),
            completed_requests: requests.get(2),
            activity_score: activity_score(total_searches, total_downloads, total_requests, last_seen, Utc::now()),
        }))
    }
}

fn bar_with_percent(percent: f64) -> String {
    format!("{} {:.1}%", MessageFormatter::progress_bar(percent), percent)
}

fn pct_label(part: i64, total: i64) -> String {
    format!("{:.1}%", MessageFormatter::percentage(part, total))
}

/// box-drawn block: first line ┎, middle ┠, last ┖
fn push_block(output: &mut Vec<String>, lines: Vec<String>) {
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.into_iter().enumerate() {
        let prefix = if i == 0 && last > 0 {
            "┎"
        } else if i == last {
            "┖"
        } else {
            "┠"
        };
        output.push(format!("{} {}", prefix, line));
    }
    output.push(String::new());
}

fn ranked_lines(items: &[Distribution], total: i64, with_bar: bool) -> Vec<String> {
    items
        .iter()
        .take(DASHBOARD_TOP_N)
        .enumerate()
        .map(|(i, d)| {
            let label = MessageFormatter::escape_html(&MessageFormatter::truncate(&d.label, 25));
            if with_bar {
                format!(
                    " {}. <b>{}</b> - <code>{}</code>",
                    i + 1,
                    label,
                    bar_with_percent(MessageFormatter::percentage(d.count, total))
                )
            } else {
                format!(" {}. <b>{}</b>: {}", i + 1, label, MessageFormatter::format_number(d.count))
            }
        })
        .collect()
}

/// html /stats dashboard
pub fn format_dashboard(stats: &BotStatistics) -> String {
    let n = MessageFormatter::format_number;
    let mut output = vec!["<b>BOT STATISTICS DASHBOARD</b>".to_string(), String::new()];

    output.push("<b>USER STATISTICS</b>".to_string());
    let mut users = vec![
        format!("<b>Total Users:</b> {}", n(stats.total_users)),
        format!(
            "<b>Active (7d):</b> {} <i>({})</i>",
            n(stats.active_users_7d),
            pct_label(stats.active_users_7d, stats.total_users)
        ),
        format!(
            "<b>Premium Users:</b> {} <i>({})</i>",
            n(stats.premium_users),
            pct_label(stats.premium_users, stats.total_users)
        ),
        format!("<b>Admin Users:</b> {}", n(stats.admin_users)),
        format!("<b>Banned Users:</b> {}", n(stats.banned_users)),
    ];
    if stats.total_users > 0 {
        users.push(format!(
            "<b>Activity:</b> <code>{}</code>",
            bar_with_percent(MessageFormatter::percentage(stats.active_users_7d, stats.total_users))
        ));
    }
    push_block(&mut output, users);

    output.push("<b>CONTENT STATISTICS</b>".to_string());
    let mut content = vec![
        format!("<b>Total Files:</b> {}", n(stats.total_content)),
        format!(
            "<b>Movies:</b> {} <i>({})</i>",
            n(stats.total_movies),
            pct_label(stats.total_movies, stats.total_content)
        ),
        format!(
            "<b>Series/TV:</b> {} <i>({})</i>",
            n(stats.total_series),
            pct_label(stats.total_series, stats.total_content)
        ),
    ];
    if !stats.quality_distribution.is_empty() {
        content.push("<b>Top Qualities:</b>".to_string());
        content.extend(ranked_lines(&stats.quality_distribution, stats.total_content, true));
    }
    if !stats.year_distribution.is_empty() {
        content.push("<b>Top Years:</b>".to_string());
        content.extend(ranked_lines(&stats.year_distribution, stats.total_content, true));
    }
    push_block(&mut output, content);

    output.push("<b>CHANNEL STATISTICS</b>".to_string());
    let mut channels = vec![
        format!("<b>Total Channels:</b> {}", n(stats.total_channels)),
        format!("<b>Enabled:</b> {}", n(stats.enabled_channels)),
        format!("<b>Disabled:</b> {}", n(stats.total_channels - stats.enabled_channels)),
    ];
    if !stats.channel_distribution.is_empty() {
        channels.push("<b>Top Channels (by files):</b>".to_string());
        channels.extend(ranked_lines(&stats.channel_distribution, stats.total_content, false));
    }
    push_block(&mut output, channels);

    output.push("<b>SYSTEM STATISTICS</b>".to_string());
    push_block(
        &mut output,
        vec![
            format!(
                "<b>DB Est. Size:</b> {}",
                MessageFormatter::format_file_size(Some(stats.db_estimated_size))
            ),
            format!("<b>Total Logs:</b> {}", n(stats.total_logs)),
            "<b>Indexing Performance:</b>".to_string(),
            format!(" • Total Attempts: {}", n(stats.indexing.total_attempts)),
            format!(" • Successful: {}", n(stats.indexing.successful_inserts)),
            format!(" • Duplicates: {}", n(stats.indexing.duplicate_errors)),
            format!(" • Errors: {}", n(stats.indexing.other_errors)),
        ],
    );

    output.push("<b>SEARCH &amp; REQUESTS</b>".to_string());
    let mut activity = vec![
        format!("<b>Total Searches:</b> {}", n(stats.total_searches)),
        format!("<b>Avg Searches/Day:</b> {:.1}", stats.avg_searches_per_day),
        format!("<b>Pending Requests:</b> {}", n(stats.pending_requests)),
        format!("<b>Completed Requests:</b> {}", n(stats.completed_requests)),
    ];
    if !stats.top_searches.is_empty() {
        activity.push("<b>Top Searches:</b>".to_string());
        activity.extend(stats.top_searches.iter().take(DASHBOARD_TOP_N).enumerate().map(|(i, s)| {
            format!(
                " {}. <code>{}</code>: {}x",
                i + 1,
                MessageFormatter::escape_html(&MessageFormatter::truncate(&s.label, 30)),
                s.count
            )
        }));
    }
    push_block(&mut output, activity);

    output.push("<b>PREMIUM STATISTICS</b>".to_string());
    let mut premium = vec![
        format!("<b>Total Premium:</b> {}", n(stats.premium.total)),
        format!("<b>≤ 30 Days:</b> {}", n(stats.premium.within_30_days)),
        format!("<b>&gt; 30 Days:</b> {}", n(stats.premium.over_30_days)),
    ];
    if let Some(avg) = stats.premium.avg_days_left {
        premium.push(format!("<b>Avg Days Left:</b> {:.1} days", avg));
        premium.push(format!("<b>Expiring (7d):</b> {}", n(stats.premium.expiring_7_days)));
        premium.push(format!("<b>Expiring (30d):</b> {}", n(stats.premium.expiring_30_days)));
    }
    push_block(&mut output, premium);

    output.push("─".repeat(30));
    output.push(format!(
        "<i>Generated: {}</i>",
        stats.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.join("\n")
}

/// html /quickstat summary
pub fn format_quick_stats(stats: &QuickStats) -> String {
    let n = MessageFormatter::format_number;
    format!(
        "<pre>QUICK STATS SUMMARY\n\n\
         Users:        {}\n\
         Active (7d):  {}\n\
         Premium:      {}\n\
         Content:      {}\n\
         Channels:     {}\n\
         Requests:     {}\n\n\
         Generated: {}</pre>",
        n(stats.total_users),
        n(stats.active_users_7d),
        n(stats.premium_users),
        n(stats.total_content),
        n(stats.total_channels),
        n(stats.pending_requests),
        stats.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub fn export_json(stats: &BotStatistics) -> serde_json::Result<String> {
    serde_json::to_string_pretty(stats)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Category,Metric,Value rows
pub fn export_csv(stats: &BotStatistics) -> String {
    let mut rows: Vec<(&str, String, String)> = vec![
        ("Users", "Total Users".into(), stats.total_users.to_string()),
        ("Users", "Active Users (7d)".into(), stats.active_users_7d.to_string()),
        ("Users", "Premium Users".into(), stats.premium_users.to_string()),
        ("Users", "Admin Users".into(), stats.admin_users.to_string()),
        ("Users", "Banned Users".into(), stats.banned_users.to_string()),
        ("Content", "Total Files".into(), stats.total_content.to_string()),
        ("Content", "Movies".into(), stats.total_movies.to_string()),
        ("Content", "Series".into(), stats.total_series.to_string()),
        ("Channels", "Total Channels".into(), stats.total_channels.to_string()),
        ("Channels", "Enabled Channels".into(), stats.enabled_channels.to_string()),
        ("Requests", "Pending".into(), stats.pending_requests.to_string()),
        ("Requests", "Completed".into(), stats.completed_requests.to_string()),
        ("Searches", "Total Searches".into(), stats.total_searches.to_string()),
        ("Searches", "Avg Per Day".into(), format!("{:.2}", stats.avg_searches_per_day)),
        ("System", "DB Size (bytes)".into(), stats.db_estimated_size.to_string()),
        ("System", "Total Logs".into(), stats.total_logs.to_string()),
    ];
    for (i, search) in stats.top_searches.iter().enumerate() {
        rows.push(("Top Searches", format!("#{} {}", i + 1, search.label), search.count.to_string()));
    }
    for (i, quality) in stats.quality_distribution.iter().enumerate() {
        rows.push(("Top Qualities", format!("#{} {}", i + 1, quality.label), quality.count.to_string()));
    }

    let mut csv = String::from("Category,Metric,Value\n");
    for (category, metric, value) in rows {
        csv.push_str(&format!("{},{},{}\n", category, csv_field(&metric), csv_field(&value)));
    }
    csv
}

fn days_ago_label(when: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - when).num_days() {
        d if d <= 0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        d => format!("{}d ago", d),
    }
}

/// html /mystat card
pub fn format_user_stats(stats: &UserStatistics, now: DateTime<Utc>) -> String {
    let mut output = vec![format!(
        "<b>{}'S STATISTICS : {}</b>",
        MessageFormatter::escape_html(&stats.first_name.as_deref().unwrap_or("User").to_uppercase()),
        stats.telegram_user_id
    )];
    if let Some(username) = &stats.username {
        output.push(format!("@{}", MessageFormatter::escape_html(username)));
    }
    output.push(String::new());

    let status = match stats.role {
        Role::Admin => "Admin",
        Role::Banned => "Banned",
        Role::User => "Active",
    };
    output.push(format!("<b>Status:</b> {}", status));
    output.push(String::new());

    output.push("<b>ACCOUNT OVERVIEW</b>".to_string());
    push_block(
        &mut output,
        vec![
            match stats.joined_at {
                Some(joined) => format!(
                    "<b>Joined:</b> {} <i>({}d ago)</i>",
                    joined.format("%b %d, %Y"),
                    (now - joined).num_days().max(0)
                ),
                None => "<b>Joined:</b> Unknown".to_string(),
            },
            format!(
                "<b>Last Seen:</b> {}",
                stats
                    .last_seen
                    .map(|seen| days_ago_label(seen, now))
                    .unwrap_or_else(|| "Unknown".to_string())
            ),
        ],
    );

    output.push("<b>PREMIUM STATUS</b>".to_string());
    match stats.premium_expires {
        Some(expires) => push_block(
            &mut output,
            vec![
                format!("<b>Active</b> - Expires: <code>{}</code>", expires.format("%b %d, %Y")),
                format!(
                    "<b>Days Remaining:</b> {}",
                    crate::premium::whole_days_remaining(expires, now)
                ),
            ],
        ),
        None => push_block(&mut output, vec!["Free User".to_string()]),
    }

    output.push("<b>ACTIVITY LEVEL</b>".to_string());
    let filled = (stats.activity_score / 5) as usize;
    push_block(
        &mut output,
        vec![format!(
            "<code>[{}{}] {}%</code>",
            "█".repeat(filled),
            "░".repeat(20 - filled),
            stats.activity_score
        )],
    );

    output.push("<b>USAGE STATISTICS</b>".to_string());
    push_block(
        &mut output,
        vec![
            format!(
                "<b>Searches:</b> {} <i>({} unique)</i>",
                stats.total_searches, stats.unique_searches
            ),
            format!("<b>Downloads:</b> {}", stats.total_downloads),
            format!("<b>Inline Searches:</b> {}", stats.inline_searches),
            format!("<b>Requests:</b> {} total", stats.total_requests),
            format!(" • Completed: {}", stats.completed_requests),
            format!(" • Pending: {}", stats.pending_requests),
        ],
    );

    if !stats.recent_searches.is_empty() {
        output.push("<b>RECENT SEARCHES</b>".to_string());
        push_block(
            &mut output,
            stats
                .recent_searches
                .iter()
                .enumerate()
                .map(|(i, q)| {
                    format!(
                        "{}. <code>{}</code>",
                        i + 1,
                        MessageFormatter::escape_html(&MessageFormatter::truncate(q, 40))
                    )
                })
                .collect(),
        );
    }

    output.push("─".repeat(30));
    output.push("<i>Keep using the bot to boost your activity!</i>".to_string());
    output.join("\n")
}

/// logs and hides collection failures behind a short reply
pub fn collection_failed(e: &(dyn Error + Send + Sync)) -> String {
    error!("Failed to collect statistics: {}", e);
    "Failed to collect statistics. Please try again later.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample_stats() -> BotStatistics {
        BotStatistics {
            total_users: 200,
            active_users_7d: 50,
            banned_users: 2,
            admin_users: 1,
            premium_users: 10,
            total_content: 1000,
            total_movies: 800,
            total_series: 200,
            total_channels: 3,
            enabled_channels: 2,
            pending_requests: 4,
            completed_requests: 9,
            total_logs: 120,
            quality_distribution: vec![Distribution::new("1080P", 600), Distribution::new("Unknown", 10)],
            year_distribution: vec![Distribution::new("2021", 100)],
            channel_distribution: vec![Distribution::new("Movies HQ", 700)],
            top_searches: vec![Distribution::new("dune, part two", 12)],
            total_searches: 300,
            avg_searches_per_day: 12.5,
            premium: premium_breakdown(&[3, 40]),
            indexing: IndexingStats::default(),
            db_estimated_size: estimated_db_size(1000, 200, 120),
            generated_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_normalize_qualities() {
        let raw = vec![
            (Some("1080p".to_string()), 5),
            (Some("1080P".to_string()), 3),
            (Some("2160p".to_string()), 2),
            (Some("4k".to_string()), 1),
            (None, 4),
            (Some("unknown".to_string()), 1),
            (Some("720p".to_string()), 9),
        ];
        let dist = normalize_qualities(raw);
        assert_eq!(
            dist,
            vec![
                Distribution::new("720P", 9),
                Distribution::new("1080P", 8),
                Distribution::new("4K", 3),
                Distribution::new("Unknown", 5),
            ]
        );
    }

    #[test]
    fn test_estimated_db_size() {
        assert_eq!(estimated_db_size(2, 2, 4), 2048 + 1024 + 1024);
    }

    #[test]
    fn test_average_per_day() {
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(average_per_day(40, Some(first), Some(first + Duration::days(4))), 10.0);
        // a span under a day counts as one day
        assert_eq!(average_per_day(7, Some(first), Some(first + Duration::hours(2))), 7.0);
        assert_eq!(average_per_day(0, None, None), 0.0);
    }

    #[test]
    fn test_premium_breakdown() {
        let breakdown = premium_breakdown(&[2, 10, 30, 45]);
        assert_eq!(breakdown.total, 4);
        assert_eq!(breakdown.within_30_days, 3);
        assert_eq!(breakdown.over_30_days, 1);
        assert_eq!(breakdown.expiring_7_days, 1);
        assert_eq!(breakdown.expiring_30_days, 3);
        assert_eq!(breakdown.avg_days_left, Some(21.75));
        assert_eq!(premium_breakdown(&[]).avg_days_left, None);
    }

    #[test]
    fn test_activity_score() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(activity_score(0, 0, 0, None, now), 0);
        assert_eq!(activity_score(5, 2, 1, Some(now), now), 10 + 6 + 5 + 20);
        assert_eq!(activity_score(100, 100, 100, Some(now - Duration::days(3)), now), 95);
        assert_eq!(activity_score(100, 100, 100, Some(now), now), 100);
        assert_eq!(activity_score(0, 0, 0, Some(now - Duration::days(60)), now), 5);
        assert_eq!(activity_score(0, 0, 0, Some(now - Duration::days(200)), now), 0);
    }

    #[test]
    fn test_dashboard_layout() {
        let text = format_dashboard(&sample_stats());
        assert!(text.contains("┎ <b>Total Users:</b> 200"));
        assert!(text.contains("┠ <b>Active (7d):</b> 50 <i>(25.0%)</i>"));
        assert!(text.contains("┖ <b>Activity:</b> <code>███░░░░░░░ 25.0%</code>"));
        assert!(text.contains("<b>1080P</b> - <code>██████░░░░ 60.0%</code>"));
        assert!(text.contains("┖  1. <b>Movies HQ</b>: 700"));
        assert!(text.contains("<i>Generated: 2024-05-01 08:00:00 UTC</i>"));
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let csv = export_csv(&sample_stats());
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Category,Metric,Value"));
        assert!(csv.contains("Users,Total Users,200\n"));
        assert!(csv.contains("Top Searches,\"#1 dune, part two\",12\n"));
        assert!(csv.contains("Top Qualities,#2 Unknown,10\n"));
    }

    #[test]
    fn test_json_export() {
        let json = export_json(&sample_stats()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_users"], 200);
        assert_eq!(value["quality_distribution"][0]["label"], "1080P");
        assert_eq!(value["premium"]["over_30_days"], 1);
    }

    #[test]
    fn test_user_stats_card() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let stats = UserStatistics {
            telegram_user_id: 42,
            username: Some("neo".to_string()),
            first_name: Some("Thomas".to_string()),
            role: Role::User,
            joined_at: Some(now - Duration::days(10)),
            last_seen: Some(now - Duration::days(1)),
            premium_expires: None,
            total_searches: 3,
            unique_searches: 2,
            recent_searches: vec!["matrix".to_string()],
            total_downloads: 1,
            inline_searches: 0,
            total_requests: 0,
            pending_requests: 0,
            completed_requests: 0,
            activity_score: 24,
        };
        let text = format_user_stats(&stats, now);
        assert!(text.starts_with("<b>THOMAS'S STATISTICS : 42</b>\n@neo"));
        assert!(text.contains("<b>Last Seen:</b> Yesterday"));
        assert!(text.contains("┖ Free User"));
        assert!(text.contains("[████░░░░░░░░░░░░░░░░] 24%"));
        assert!(text.contains("┖ 1. <code>matrix</code>"));
    }
}
