use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::channel_monitor::MovieEntry;
use crate::metadata_parser::ContentType;
use crate::utils::message_formatter::MessageFormatter;

/// rows considered by /recent
pub const RECENT_LIMIT: i64 = 100;
const MORE_MARKER_AT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentGroup {
    pub title: String,
    pub details: String,
    pub count: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecentContent {
    pub movies: Vec<RecentGroup>,
    pub series: Vec<RecentGroup>,
    pub total_files: usize,
    pub total_movies: usize,
    pub total_series: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

struct GroupAccumulator {
    title: String,
    year: Option<i32>,
    qualities: BTreeSet<String>,
    episodes: Vec<(i32, i32)>,
    count: usize,
}

impl GroupAccumulator {
    fn new(entry: &MovieEntry) -> Self {
        Self {
            title: entry.title.clone(),
            year: entry.metadata.year,
            qualities: BTreeSet::new(),
            episodes: Vec::new(),
            count: 0,
        }
    }

    fn movie_details(&self) -> String {
        let mut parts = Vec::new();
        if let Some(year) = self.year {
            parts.push(year.to_string());
        }
        if !self.qualities.is_empty() {
            let joined: Vec<&str> = self.qualities.iter().map(String::as_str).collect();
            parts.push(format!("({})", joined.join(" & ")));
        }
        parts.join(" ")
    }

    fn series_details(&self) -> String {
        let mut parts = Vec::new();
        if let Some(year) = self.year {
            parts.push(year.to_string());
        }

        let mut seasons: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for (season, episode) in &self.episodes {
            seasons.entry(*season).or_default().push(*episode);
        }
        let season_parts: Vec<String> = seasons
            .into_iter()
            .map(|(season, mut episodes)| {
                episodes.sort_unstable();
                let first = episodes[0];
                let last = episodes[episodes.len() - 1];
                if episodes.len() == 1 {
                    format!("S{:02}(E{:02})", season, first)
                } else {
                    format!("S{:02}(E{:02}-{:02})", season, first, last)
                }
            })
            .collect();
        if !season_parts.is_empty() {
            parts.push(season_parts.join(", "));
        }
        parts.join(" ")
    }
}

fn upsert<'a>(groups: &'a mut Vec<GroupAccumulator>, entry: &MovieEntry) -> &'a mut GroupAccumulator {
    let position = match groups.iter().position(|g| g.title == entry.title) {
        Some(position) => position,
        None => {
            groups.push(GroupAccumulator::new(entry));
            groups.len() - 1
        }
    };
    &mut groups[position]
}

/// groups newest-first rows by title, keeping first-seen order
pub fn group_recent(entries: &[MovieEntry]) -> RecentContent {
    let mut movies: Vec<GroupAccumulator> = Vec::new();
    let mut series: Vec<GroupAccumulator> = Vec::new();
    let mut content = RecentContent {
        total_files: entries.len(),
        last_updated: entries.first().and_then(|e| e.indexed_at),
        ..Default::default()
    };

    for entry in entries {
        match entry.metadata.content_type {
            ContentType::Series => {
                content.total_series += 1;
                let group = upsert(&mut series, entry);
                if let (Some(season), Some(episode)) = (entry.metadata.season, entry.metadata.episode) {
                    group.episodes.push((season, episode));
                }
                group.count += 1;
            }
            ContentType::Movie => {
                content.total_movies += 1;
                let group = upsert(&mut movies, entry);
                if let Some(quality) = &entry.metadata.quality {
                    group.qualities.insert(quality.to_uppercase());
                }
                group.count += 1;
            }
        }
    }

    content.movies = movies
        .iter()
        .map(|g| RecentGroup {
            title: g.title.clone(),
            details: g.movie_details(),
            count: g.count,
        })
        .collect();
    content.series = series
        .iter()
        .map(|g| RecentGroup {
            title: g.title.clone(),
            details: g.series_details(),
            count: g.count,
        })
        .collect();
    content
}

fn push_section(output: &mut String, heading: &str, groups: &[RecentGroup]) {
    if groups.is_empty() {
        return;
    }
    output.push_str(&format!("<b>{}</b>\n{}\n", heading, "─".repeat(30)));
    for (i, group) in groups.iter().enumerate() {
        let title = MessageFormatter::escape_html(&group.title);
        if group.details.is_empty() {
            output.push_str(&format!("{}. <code>{}</code>\n", i + 1, title));
        } else {
            output.push_str(&format!("{}. <code>{}</code> {}\n", i + 1, title, group.details));
        }
    }
    output.push('\n');
}

/// html body of the /recent reply
pub fn format_recent(content: &RecentContent) -> String {
    let mut output = String::from("<b>LAST BATCH UPDATE</b>\n\n");
    if let Some(updated) = content.last_updated {
        output.push_str(&format!("Updated: {}\n", updated.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    output.push_str(&format!(
        "Files: {} (Movies: {} | Series: {})\n\n",
        content.total_files, content.total_movies, content.total_series
    ));

    push_section(&mut output, "MOVIES", &content.movies);
    push_section(&mut output, "SERIES", &content.series);

    if content.movies.len() + content.series.len() >= MORE_MARKER_AT {
        output.push_str("<i>..and more</i>\n");
    }
    output.push_str("\n<i>Tap any title to copy</i>");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_parser::ParsedMetadata;
    use chrono::TimeZone;

    fn movie(title: &str, year: i32, quality: &str) -> MovieEntry {
        MovieEntry {
            channel_id: -1,
            message_id: 1,
            title: title.to_string(),
            metadata: ParsedMetadata {
                year: Some(year),
                quality: Some(quality.to_string()),
                ..Default::default()
            },
            file_name: None,
            file_size: None,
            mime_type: None,
            channel_title: None,
            caption: None,
            indexed_at: None,
        }
    }

    fn episode(title: &str, season: i32, episode: i32) -> MovieEntry {
        let mut entry = movie(title, 2019, "720p");
        entry.metadata.content_type = ContentType::Series;
        entry.metadata.season = Some(season);
        entry.metadata.episode = Some(episode);
        entry
    }

    #[test]
    fn test_movie_qualities_are_merged() {
        let entries = vec![
            movie("Dune", 2021, "2160p"),
            movie("Dune", 2021, "1080p"),
            movie("Dune", 2021, "1080p"),
        ];
        let content = group_recent(&entries);
        assert_eq!(content.movies.len(), 1);
        assert_eq!(content.movies[0].details, "2021 (1080P & 2160P)");
        assert_eq!(content.movies[0].count, 3);
        assert_eq!(content.total_movies, 3);
    }

    #[test]
    fn test_series_episode_ranges() {
        let entries = vec![
            episode("The Boys", 1, 5),
            episode("The Boys", 1, 1),
            episode("The Boys", 1, 3),
            episode("The Boys", 2, 2),
        ];
        let content = group_recent(&entries);
        assert_eq!(content.series.len(), 1);
        assert_eq!(content.series[0].details, "2019 S01(E01-05), S02(E02)");
        assert_eq!(content.total_series, 4);
    }

    #[test]
    fn test_first_seen_order_is_kept() {
        let entries = vec![
            movie("Zodiac", 2007, "720p"),
            movie("Alien", 1979, "1080p"),
            movie("Zodiac", 2007, "1080p"),
        ];
        let titles: Vec<String> = group_recent(&entries).movies.into_iter().map(|g| g.title).collect();
        assert_eq!(titles, vec!["Zodiac", "Alien"]);
    }

    #[test]
    fn test_format_recent() {
        let mut first = movie("Alien & Co", 1979, "1080p");
        first.indexed_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
        let entries = vec![first, episode("Dark", 1, 1)];
        let text = format_recent(&group_recent(&entries));

        assert!(text.starts_with("<b>LAST BATCH UPDATE</b>"));
        assert!(text.contains("Updated: 2024-03-01 12:30:00 UTC"));
        assert!(text.contains("Files: 2 (Movies: 1 | Series: 1)"));
        assert!(text.contains("1. <code>Alien &amp; Co</code> 1979 (1080P)"));
        assert!(text.contains("<b>SERIES</b>"));
        assert!(text.contains("1. <code>Dark</code> 2019 S01(E01)"));
        assert!(!text.contains("..and more"));
    }
}
