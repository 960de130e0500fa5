use log::{error, info};
use teloxide::prelude::*;
use teloxide::types::{
    InlineQuery, InlineQueryResult, InlineQueryResultArticle, InputMessageContent,
    InputMessageContentText, ParseMode,
};

use crate::bot::BotContext;
use crate::handlers::UserInfo;
use crate::search::{file_caption, SearchHit};
use crate::user_manager::Role;
use crate::utils::MessageFormatter;

const INLINE_CACHE_SECONDS: u32 = 300;

fn html_content(text: String) -> InputMessageContent {
    let mut content = InputMessageContentText::new(text);
    content.parse_mode = Some(ParseMode::Html);
    InputMessageContent::Text(content)
}

fn hit_article(hit: &SearchHit) -> InlineQueryResult {
    let entry = &hit.entry;
    let md = &entry.metadata;

    let mut display = entry.title.clone();
    if let Some(year) = md.year {
        display.push_str(&format!(" {}", year));
    }
    if let Some(quality) = &md.quality {
        display.push_str(&format!(" ({})", quality));
    }

    let mut description = format!(
        "Quality: {} | Year: {}",
        md.quality.as_deref().unwrap_or("N/A"),
        md.year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".to_string())
    );

    let mut text = file_caption(entry);
    if let Some(channel) = &entry.channel_title {
        text.push_str(&format!("\n📺 Channel: {}", MessageFormatter::escape_html(channel)));
    }

    let (id, title) = match hit.fuzzy_score {
        Some(score) => {
            description.push_str(&format!(" | Match: {}%", score));
            text.push_str(&format!("\n🔍 Fuzzy Match: {}%", score));
            (
                format!("fuzzy_{}_{}", entry.channel_id, entry.message_id),
                format!("~{}", display),
            )
        }
        None => (
            format!("movie_{}_{}", entry.channel_id, entry.message_id),
            display,
        ),
    };

    let mut article = InlineQueryResultArticle::new(id, title, html_content(text));
    article.description = Some(description);
    InlineQueryResult::Article(article)
}

fn no_results_article(query: &str) -> InlineQueryResult {
    let text = format!(
        "🔍 <b>No Results Found</b>\n\nNo movies found matching '{}'.\n\n💡 Try:\n• Checking the spelling\n• Using fewer words\n• Searching in the bot with /search",
        MessageFormatter::escape_html(query)
    );
    let mut article = InlineQueryResultArticle::new("no_results", "No Results", html_content(text));
    article.description = Some(format!("No movies found for '{}'", query));
    InlineQueryResult::Article(article)
}

/// articles for every hit; fuzzy ones are prefixed with "~"
pub fn build_inline_results(query: &str, hits: &[SearchHit]) -> Vec<InlineQueryResult> {
    if hits.is_empty() {
        return vec![no_results_article(query)];
    }
    hits.iter().map(hit_article).collect()
}

pub struct InlineHandler;

impl InlineHandler {
    pub async fn handle_inline_query(ctx: BotContext, query: InlineQuery) -> ResponseResult<()> {
        let text = query.query.trim();
        if text.is_empty() {
            return Ok(());
        }

        let user = UserInfo::from_user(&query.from);
        match ctx
            .user_manager
            .get_or_create_user(user.telegram_user_id, user.username, user.first_name, user.last_name)
            .await
        {
            Ok(account) if account.role == Role::Banned => return Ok(()),
            Ok(_) => {
                if let Err(e) = ctx
                    .user_manager
                    .increment_inline_searches(user.telegram_user_id)
                    .await
                {
                    error!("Failed to track inline search of {}: {}", user.telegram_user_id, e);
                }
            }
            Err(e) => error!("Failed to register inline user {}: {}", user.telegram_user_id, e),
        }

        let hits = match ctx.search_engine.inline_search(text).await {
            Ok(hits) => hits,
            Err(e) => {
                error!("Inline search '{}' failed: {}", text, e);
                Vec::new()
            }
        };
        info!(
            "Inline query '{}' from {} -> {} results",
            text,
            user.telegram_user_id,
            hits.len()
        );

        ctx.bot
            .answer_inline_query(&query.id, build_inline_results(text, &hits))
            .cache_time(INLINE_CACHE_SECONDS)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_monitor::MovieEntry;
    use crate::metadata_parser::ParsedMetadata;

    fn hit(title: &str, fuzzy_score: Option<u8>) -> SearchHit {
        let metadata = ParsedMetadata {
            year: Some(2010),
            quality: Some("1080p".to_string()),
            ..Default::default()
        };
        SearchHit {
            entry: MovieEntry {
                channel_id: -100123,
                message_id: 7,
                title: title.to_string(),
                metadata,
                file_name: None,
                file_size: None,
                mime_type: None,
                channel_title: Some("Movies".to_string()),
                caption: None,
                indexed_at: None,
            },
            fuzzy_score,
        }
    }

    fn article(result: &InlineQueryResult) -> &InlineQueryResultArticle {
        match result {
            InlineQueryResult::Article(article) => article,
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_no_results_article() {
        let results = build_inline_results("zzz", &[]);
        assert_eq!(results.len(), 1);
        assert_eq!(article(&results[0]).title, "No Results");
    }

    #[test]
    fn test_fuzzy_hits_are_marked() {
        let results = build_inline_results(
            "incepton",
            &[hit("Inception", None), hit("Interception", Some(82))],
        );
        assert_eq!(results.len(), 2);

        let exact = article(&results[0]);
        assert_eq!(exact.title, "Inception 2010 (1080p)");
        assert_eq!(exact.id, "movie_-100123_7");

        let fuzzy = article(&results[1]);
        assert_eq!(fuzzy.title, "~Interception 2010 (1080p)");
        assert!(fuzzy
            .description
            .as_deref()
            .is_some_and(|d| d.ends_with("Match: 82%")));
    }
}
