use log::{error, warn};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::metadata_parser::ContentType;
use crate::utils::message_formatter::MessageFormatter;

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct TmdbResult {
    pub tmdb_id: u64,
    pub title: String,
    pub year: Option<String>,
    pub overview: String,
    pub imdb_id: Option<String>,
}

#[derive(Clone)]
pub struct TmdbClient {
    api_key: Option<String>,
    http: Client,
}

impl TmdbClient {
    /// a client without a key answers every search with an empty list
    pub fn new(api_key: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { api_key, http }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// up to five matches; errors are logged and yield no results
    pub async fn search(&self, title: &str, year: Option<i32>, kind: ContentType) -> Vec<TmdbResult> {
        let Some(api_key) = &self.api_key else {
            return Vec::new();
        };

        match self.search_inner(api_key, title, year, kind).await {
            Ok(results) => results,
            Err(e) => {
                error!("TMDB search for '{}' failed: {}", title, e);
                Vec::new()
            }
        }
    }

    async fn search_inner(
        &self,
        api_key: &str,
        title: &str,
        year: Option<i32>,
        kind: ContentType,
    ) -> reqwest::Result<Vec<TmdbResult>> {
        let endpoint = endpoint_for(kind);
        let mut params = vec![
            ("api_key", api_key.to_string()),
            ("query", title.to_string()),
            ("language", "en-US".to_string()),
            ("page", "1".to_string()),
        ];
        if let Some(year) = year {
            let key = match kind {
                ContentType::Movie => "year",
                ContentType::Series => "first_air_date_year",
            };
            params.push((key, year.to_string()));
        }

        let resp = self
            .http
            .get(format!("{}/search/{}", TMDB_BASE_URL, endpoint))
            .query(&params)
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!("TMDB search returned status {}", resp.status());
            return Ok(Vec::new());
        }

        let data: SearchResp = resp.json().await?;
        let mut results = Vec::new();
        for item in data.results.into_iter().take(MAX_RESULTS) {
            let imdb_id = self.imdb_id(api_key, item.id, endpoint).await;
            results.push(item.into_result(imdb_id));
        }
        Ok(results)
    }

    async fn imdb_id(&self, api_key: &str, tmdb_id: u64, endpoint: &str) -> Option<String> {
        let resp = self
            .http
            .get(format!("{}/{}/{}/external_ids", TMDB_BASE_URL, endpoint, tmdb_id))
            .query(&[("api_key", api_key)])
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let ids: ExternalIds = resp.json().await.ok()?;
        ids.imdb_id.filter(|id| !id.is_empty())
    }
}

fn endpoint_for(kind: ContentType) -> &'static str {
    match kind {
        ContentType::Movie => "movie",
        ContentType::Series => "tv",
    }
}

/// "1. Title (2010) - overview..." lines for the suggestion list
pub fn format_suggestions(results: &[TmdbResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} ({}) - {}",
                i + 1,
                MessageFormatter::escape_html(&r.title),
                r.year.as_deref().unwrap_or("N/A"),
                MessageFormatter::escape_html(&MessageFormatter::truncate(&r.overview, 80))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Deserialize, Debug)]
struct SearchResp {
    #[serde(default)]
    results: Vec<SearchItem>,
}

/// movies carry title/release_date, tv shows name/first_air_date
#[derive(Deserialize, Debug)]
struct SearchItem {
    id: u64,
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    #[serde(default)]
    overview: String,
}

impl SearchItem {
    fn into_result(self, imdb_id: Option<String>) -> TmdbResult {
        let year = self
            .release_date
            .as_deref()
            .or(self.first_air_date.as_deref())
            .filter(|date| date.len() >= 4)
            .map(|date| date[..4].to_string());
        let overview = if self.overview.is_empty() {
            "No overview available".to_string()
        } else {
            MessageFormatter::truncate(&self.overview, 150)
        };
        TmdbResult {
            tmdb_id: self.id,
            title: self
                .title
                .or(self.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            year,
            overview,
            imdb_id,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ExternalIds {
    imdb_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_without_key() {
        let client = TmdbClient::new(None);
        assert!(!client.is_enabled());
        assert!(client.search("Inception", Some(2010), ContentType::Movie).await.is_empty());
    }

    #[test]
    fn test_movie_and_tv_items() {
        let data: SearchResp = serde_json::from_str(
            r#"{"results": [
                {"id": 27205, "title": "Inception", "release_date": "2010-07-15", "overview": "A thief."},
                {"id": 1396, "name": "Breaking Bad", "first_air_date": "2008-01-20", "overview": ""},
                {"id": 1, "title": "Undated", "release_date": ""}
            ]}"#,
        )
        .unwrap();
        let results: Vec<TmdbResult> = data
            .results
            .into_iter()
            .map(|item| item.into_result(None))
            .collect();

        assert_eq!(results[0].title, "Inception");
        assert_eq!(results[0].year.as_deref(), Some("2010"));
        assert_eq!(results[1].title, "Breaking Bad");
        assert_eq!(results[1].year.as_deref(), Some("2008"));
        assert_eq!(results[1].overview, "No overview available");
        assert_eq!(results[2].year, None);
    }

    #[test]
    fn test_format_suggestions() {
        let results = vec![TmdbResult {
            tmdb_id: 1,
            title: "Up".to_string(),
            year: None,
            overview: "Balloons".to_string(),
            imdb_id: None,
        }];
        assert_eq!(format_suggestions(&results), "1. Up (N/A) - Balloons");
    }
}
