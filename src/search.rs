use deadpool_postgres::Pool;
use log::info;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup};

use crate::channel_monitor::{MovieEntry, MOVIE_COLUMNS};
use crate::fuzzy::partial_ratio;
use crate::metadata_parser::ContentType;
use crate::utils::message_formatter::MessageFormatter;

pub const RESULTS_PER_PAGE: usize = 9;
/// fuzzy matching only runs when substring search found fewer hits than this
pub const FUZZY_FALLBACK_BELOW: usize = 50;
pub const FUZZY_CANDIDATE_LIMIT: i64 = 500;
pub const GET_ALL_LIMIT: usize = 10;
pub const INLINE_RESULT_LIMIT: i64 = 10;
pub const INLINE_FUZZY_LIMIT: usize = 5;
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: MovieEntry,
    /// set for rows that only matched through fuzzy scoring
    pub fuzzy_score: Option<u8>,
}

impl SearchHit {
    fn exact(entry: MovieEntry) -> Self {
        Self {
            entry,
            fuzzy_score: None,
        }
    }
}

pub struct SearchEngine {
    pool: Pool,
    fuzzy_threshold: u8,
}

impl SearchEngine {
    pub fn new(pool: Pool, fuzzy_threshold: u8) -> Self {
        Self {
            pool,
            fuzzy_threshold,
        }
    }

    /// exact mode matches the whole title, otherwise substring hits come
    /// first followed by fuzzy matches sorted by score
    pub async fn perform_search(
        &self,
        query: &str,
        exact: bool,
    ) -> Result<Vec<SearchHit>, Box<dyn Error + Send + Sync>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.pool.get().await?;

        if exact {
            let rows = client
                .query(
                    &format!(
                        "SELECT {} FROM movies WHERE LOWER(title) = LOWER($1) ORDER BY indexed_at DESC",
                        MOVIE_COLUMNS
                    ),
                    &[&query],
                )
                .await?;
            return Ok(rows
                .iter()
                .map(|r| SearchHit::exact(MovieEntry::from_row(r)))
                .collect());
        }

        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM movies WHERE POSITION(LOWER($1) IN LOWER(title)) > 0 ORDER BY indexed_at DESC",
                    MOVIE_COLUMNS
                ),
                &[&query],
            )
            .await?;
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|r| SearchHit::exact(MovieEntry::from_row(r)))
            .collect();

        if hits.len() < FUZZY_FALLBACK_BELOW {
            let candidates = client
                .query(
                    &format!(
                        "SELECT {} FROM movies WHERE POSITION(LOWER($1) IN LOWER(title)) = 0
                         ORDER BY indexed_at DESC LIMIT $2",
                        MOVIE_COLUMNS
                    ),
                    &[&query, &FUZZY_CANDIDATE_LIMIT],
                )
                .await?;
            let candidates: Vec<MovieEntry> = candidates.iter().map(MovieEntry::from_row).collect();
            hits.extend(rank_fuzzy(query, candidates, self.fuzzy_threshold));
        }

        info!("Search '{}' (exact: {}) returned {} results", query, exact, hits.len());
        Ok(hits)
    }

    /// substring hits, topped up with fuzzy ones when there are only a few
    pub async fn inline_search(&self, query: &str) -> Result<Vec<SearchHit>, Box<dyn Error + Send + Sync>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM movies WHERE POSITION(LOWER($1) IN LOWER(title)) > 0
                     ORDER BY indexed_at DESC LIMIT $2",
                    MOVIE_COLUMNS
                ),
                &[&query, &INLINE_RESULT_LIMIT],
            )
            .await?;
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|r| SearchHit::exact(MovieEntry::from_row(r)))
            .collect();

        if hits.len() < INLINE_FUZZY_LIMIT {
            let candidates = client
                .query(
                    &format!(
                        "SELECT {} FROM movies WHERE POSITION(LOWER($1) IN LOWER(title)) = 0
                         ORDER BY indexed_at DESC LIMIT $2",
                        MOVIE_COLUMNS
                    ),
                    &[&query, &FUZZY_CANDIDATE_LIMIT],
                )
                .await?;
            let candidates: Vec<MovieEntry> = candidates.iter().map(MovieEntry::from_row).collect();
            hits.extend(
                rank_fuzzy(query, candidates, self.fuzzy_threshold)
                    .into_iter()
                    .take(INLINE_FUZZY_LIMIT),
            );
        }

        Ok(hits)
    }

    pub async fn best_match(&self, query: &str) -> Result<Option<MovieEntry>, Box<dyn Error + Send + Sync>> {
        Ok(self
            .perform_search(query, false)
            .await?
            .into_iter()
            .next()
            .map(|hit| hit.entry))
    }

    /// latest indexed rows, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<MovieEntry>, Box<dyn Error + Send + Sync>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM movies ORDER BY indexed_at DESC, id DESC LIMIT $1",
                    MOVIE_COLUMNS
                ),
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(MovieEntry::from_row).collect())
    }
}

/// scores candidates by partial ratio, keeps those at or above the threshold
pub fn rank_fuzzy(query: &str, candidates: Vec<MovieEntry>, threshold: u8) -> Vec<SearchHit> {
    let query = query.to_lowercase();
    let mut scored: Vec<SearchHit> = candidates
        .into_iter()
        .filter_map(|entry| {
            let score = partial_ratio(&query, &entry.title.to_lowercase());
            (score >= threshold).then_some(SearchHit {
                entry,
                fuzzy_score: Some(score),
            })
        })
        .collect();
    scored.sort_by(|a, b| b.fuzzy_score.cmp(&a.fuzzy_score));
    scored
}

pub fn total_pages(total_results: usize) -> usize {
    total_results.div_ceil(RESULTS_PER_PAGE).max(1)
}

pub fn clamp_page(page: usize, total_results: usize) -> usize {
    page.clamp(1, total_pages(total_results))
}

/// Blu, Web or HD; anything else is dropped from result lines
pub fn short_rip(rip: &str) -> Option<&'static str> {
    let lower = rip.to_lowercase();
    if matches!(lower.as_str(), "bluray" | "blu-ray" | "bdrip" | "bd") {
        Some("Blu")
    } else if lower.contains("web") {
        Some("Web")
    } else if lower.contains("hd") {
        Some("HD")
    } else {
        None
    }
}

pub fn episode_tag(entry: &MovieEntry) -> Option<String> {
    if entry.metadata.content_type != ContentType::Series {
        return None;
    }
    match (entry.metadata.season, entry.metadata.episode) {
        (Some(season), Some(episode)) => Some(format!("S{:02}E{:02}", season, episode)),
        (Some(season), None) => Some(format!("S{:02}", season)),
        (None, Some(episode)) => Some(format!("E{:02}", episode)),
        (None, None) => None,
    }
}

/// "size.quality.SxxEyy.year.rip" with missing parts skipped
pub fn result_tags(entry: &MovieEntry) -> String {
    let mut parts = Vec::new();
    let size = MessageFormatter::format_file_size(entry.file_size);
    if size != "N/A" {
        parts.push(size);
    }
    if let Some(quality) = &entry.metadata.quality {
        parts.push(quality.clone());
    }
    if let Some(tag) = episode_tag(entry) {
        parts.push(tag);
    }
    if let Some(year) = entry.metadata.year {
        parts.push(year.to_string());
    }
    if let Some(rip) = entry.metadata.rip.as_deref().and_then(short_rip) {
        parts.push(rip.to_string());
    }

    if parts.is_empty() {
        "N/A".to_string()
    } else {
        parts.join(".")
    }
}

/// html text of one result page, `page` is 1-based and clamped
pub fn format_results_page(query: &str, hits: &[SearchHit], page: usize) -> String {
    let page = clamp_page(page, hits.len());
    let start = (page - 1) * RESULTS_PER_PAGE;

    let mut text = String::from("<pre>");
    text.push_str(&format!("Search: \"{}\"\n", MessageFormatter::escape_html(query)));
    text.push_str(&format!(
        "Total Results: {} | Page {}/{}\n\n",
        hits.len(),
        page,
        total_pages(hits.len())
    ));

    for (offset, hit) in hits.iter().skip(start).take(RESULTS_PER_PAGE).enumerate() {
        text.push_str(&format!(
            "{}. {} [{}]\n",
            start + offset + 1,
            MessageFormatter::escape_html(&hit.entry.title),
            MessageFormatter::escape_html(&result_tags(&hit.entry))
        ));
    }
    text.push_str("</pre>");
    text
}

/// per-file buttons three to a row, then the navigation row
pub fn results_keyboard(
    session_id: &str,
    hits: &[SearchHit],
    page: usize,
    bulk_id: Option<&str>,
) -> InlineKeyboardMarkup {
    let page = clamp_page(page, hits.len());
    let start = (page - 1) * RESULTS_PER_PAGE;
    let pages = total_pages(hits.len());

    let buttons: Vec<InlineKeyboardButton> = hits
        .iter()
        .enumerate()
        .skip(start)
        .take(RESULTS_PER_PAGE)
        .map(|(i, hit)| {
            InlineKeyboardButton::callback(
                format!("Get [{}]", i + 1),
                format!("get_file:{}:{}", hit.entry.channel_id, hit.entry.message_id),
            )
        })
        .collect();

    let mut rows: Vec<Vec<InlineKeyboardButton>> =
        buttons.chunks(3).map(|row| row.to_vec()).collect();

    let mut nav_row = Vec::new();
    if page > 1 {
        nav_row.push(InlineKeyboardButton::callback(
            "← Prev",
            format!("page:{}:{}", session_id, page - 1),
        ));
    }
    if let Some(bulk_id) = bulk_id {
        if hits.len() > 1 {
            nav_row.push(InlineKeyboardButton::callback(
                format!("Get All ({})", hits.len()),
                format!("bulk:{}", bulk_id),
            ));
        }
    }
    if page < pages {
        nav_row.push(InlineKeyboardButton::callback(
            "Next →",
            format!("page:{}:{}", session_id, page + 1),
        ));
    }
    if !nav_row.is_empty() {
        rows.push(nav_row);
    }

    InlineKeyboardMarkup::new(rows)
}

/// the same keyboard with the "Get All" button removed
pub fn without_bulk_button(keyboard: &InlineKeyboardMarkup) -> InlineKeyboardMarkup {
    let rows = keyboard
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .filter(|button| {
                    !matches!(
                        &button.kind,
                        InlineKeyboardButtonKind::CallbackData(data) if data.starts_with("bulk:")
                    )
                })
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// caption attached to a delivered file
pub fn file_caption(entry: &MovieEntry) -> String {
    let md = &entry.metadata;
    let mut caption = format!("🎬 <b>{}</b>", MessageFormatter::escape_html(&entry.title));
    if let Some(year) = md.year {
        caption.push_str(&format!(" ({})", year));
    }
    if let Some(tag) = episode_tag(entry) {
        caption.push_str(&format!(" {}", tag));
    }
    caption.push('\n');

    let details: Vec<String> = [
        md.quality.as_deref(),
        md.rip.as_deref(),
        md.video_codec.as_deref(),
        md.hdr_format.as_deref(),
        md.audio.as_deref(),
        md.audio_channels.as_deref(),
    ]
    .into_iter()
    .flatten()
    .map(MessageFormatter::escape_html)
    .collect();
    if !details.is_empty() {
        caption.push_str(&format!("📀 {}\n", details.join(" | ")));
    }

    let size = MessageFormatter::format_file_size(entry.file_size);
    if size != "N/A" {
        caption.push_str(&format!("💾 {}\n", size));
    }
    if let Some(imdb) = &md.imdb {
        caption.push_str(&format!(
            "🔗 <a href=\"https://www.imdb.com/title/{0}/\">{0}</a>\n",
            imdb
        ));
    }
    caption.trim_end().to_string()
}

/// full metadata card for /metadata
pub fn format_metadata_card(entry: &MovieEntry) -> String {
    let md = &entry.metadata;
    let field = |value: Option<&str>| {
        value
            .map(MessageFormatter::escape_html)
            .unwrap_or_else(|| "N/A".to_string())
    };
    let number = |value: Option<i32>| value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string());

    let mut card = format!(
        "🎬 <b>{}</b>\n\n\
         📅 Year: {}\n\
         🎞 Type: {}\n",
        MessageFormatter::escape_html(&entry.title),
        number(md.year),
        md.content_type
    );
    if md.content_type == ContentType::Series {
        card.push_str(&format!(
            "📺 Season: {} | Episode: {}\n",
            number(md.season),
            number(md.episode)
        ));
    }
    card.push_str(&format!(
        "\n<b>Video</b>\n\
         ├ Quality: {}\n\
         ├ Resolution: {}\n\
         ├ Codec: {}\n\
         ├ Bit depth: {}\n\
         └ HDR: {}\n\
         \n<b>Audio</b>\n\
         ├ Format: {}\n\
         └ Channels: {}\n\
         \n<b>Release</b>\n\
         ├ Rip: {}\n\
         ├ Source: {}\n\
         ├ Container: {}\n\
         └ Size: {}\n",
        field(md.quality.as_deref()),
        field(md.resolution.as_deref()),
        field(md.video_codec.as_deref()),
        field(md.bit_depth.as_deref()),
        field(md.hdr_format.as_deref()),
        field(md.audio.as_deref()),
        field(md.audio_channels.as_deref()),
        field(md.rip.as_deref()),
        field(md.source.as_deref()),
        field(md.extension.as_deref()),
        MessageFormatter::format_file_size(entry.file_size),
    ));
    if let Some(imdb) = &md.imdb {
        card.push_str(&format!("\n🔗 IMDB: https://www.imdb.com/title/{}/\n", imdb));
    }
    if let Some(channel) = &entry.channel_title {
        card.push_str(&format!("📢 Channel: {}\n", MessageFormatter::escape_html(channel)));
    }
    card.trim_end().to_string()
}

#[derive(Debug, Clone)]
pub struct SearchSession {
    pub user_id: i64,
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub bulk_id: Option<String>,
    created_at: Instant,
}

#[derive(Debug, Clone)]
pub struct BulkSession {
    pub user_id: i64,
    pub files: Vec<(i64, i32)>,
    created_at: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    NotFound,
    NotOwner,
}

/// in-memory search and bulk sessions keyed by short random ids
#[derive(Default)]
pub struct SearchSessions {
    searches: Mutex<HashMap<String, SearchSession>>,
    bulks: Mutex<HashMap<String, BulkSession>>,
}

fn new_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

impl SearchSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// stores the results; a bulk session over the first files is created when `allow_bulk`
    pub fn create(&self, user_id: i64, query: &str, hits: Vec<SearchHit>, allow_bulk: bool) -> String {
        self.prune_expired();

        let bulk_id = (allow_bulk && hits.len() > 1).then(|| {
            let files = hits
                .iter()
                .take(GET_ALL_LIMIT)
                .map(|hit| (hit.entry.channel_id, hit.entry.message_id))
                .collect();
            self.create_bulk(user_id, files)
        });

        let id = new_session_id();
        let session = SearchSession {
            user_id,
            query: query.to_string(),
            hits,
            bulk_id,
            created_at: Instant::now(),
        };
        if let Ok(mut searches) = self.searches.lock() {
            searches.insert(id.clone(), session);
        }
        id
    }

    pub fn create_bulk(&self, user_id: i64, files: Vec<(i64, i32)>) -> String {
        let id = new_session_id();
        if let Ok(mut bulks) = self.bulks.lock() {
            bulks.insert(
                id.clone(),
                BulkSession {
                    user_id,
                    files,
                    created_at: Instant::now(),
                },
            );
        }
        id
    }

    pub fn get(&self, id: &str, user_id: i64) -> Result<SearchSession, SessionError> {
        let searches = self.searches.lock().map_err(|_| SessionError::NotFound)?;
        let session = searches
            .get(id)
            .filter(|s| s.created_at.elapsed() < SESSION_TTL)
            .ok_or(SessionError::NotFound)?;
        if session.user_id != user_id {
            return Err(SessionError::NotOwner);
        }
        Ok(session.clone())
    }

    /// removes and returns the bulk session, leaving it in place for other users
    pub fn take_bulk(&self, id: &str, user_id: i64) -> Result<BulkSession, SessionError> {
        let mut bulks = self.bulks.lock().map_err(|_| SessionError::NotFound)?;
        match bulks.get(id) {
            None => Err(SessionError::NotFound),
            Some(bulk) if bulk.created_at.elapsed() >= SESSION_TTL => {
                bulks.remove(id);
                Err(SessionError::NotFound)
            }
            Some(bulk) if bulk.user_id != user_id => Err(SessionError::NotOwner),
            Some(_) => {
                let bulk = bulks.remove(id).ok_or(SessionError::NotFound)?;
                drop(bulks);
                // pages of the search stop offering the used button
                if let Ok(mut searches) = self.searches.lock() {
                    for session in searches.values_mut() {
                        if session.bulk_id.as_deref() == Some(id) {
                            session.bulk_id = None;
                        }
                    }
                }
                Ok(bulk)
            }
        }
    }

    pub fn prune_expired(&self) {
        if let Ok(mut searches) = self.searches.lock() {
            searches.retain(|_, s| s.created_at.elapsed() < SESSION_TTL);
        }
        if let Ok(mut bulks) = self.bulks.lock() {
            bulks.retain(|_, b| b.created_at.elapsed() < SESSION_TTL);
        }
    }
}
