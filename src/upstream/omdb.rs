// src/upstream/omdb.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::http::get_json;
use super::{MediaType, MovieSearchSource, MovieSummary};
use crate::aggregate::Page;
use crate::retry::CallOutcome;
use crate::search::SearchQuery;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "Search", default)]
    search: Vec<SearchItem>,
    #[serde(rename = "totalResults")]
    total_results: Option<String>,
    #[serde(rename = "Response")]
    response: Option<String>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Year", default)]
    year: String,
    #[serde(rename = "imdbID")]
    imdb_id: String,
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "Poster")]
    poster: Option<String>,
}

impl From<SearchItem> for MovieSummary {
    fn from(it: SearchItem) -> Self {
        MovieSummary {
            title: it.title,
            year: it.year,
            imdb_id: it.imdb_id,
            media_type: it.kind.as_deref().and_then(|k| k.parse().ok()),
            poster: it.poster.filter(|p| p != "N/A"),
        }
    }
}

fn into_page(resp: SearchResponse) -> Page<MovieSummary> {
    // OMDb signals "no hits" in-band with Response=False.
    if resp.response.as_deref() == Some("False") {
        tracing::debug!(target: "omdb", error = ?resp.error, "search returned no results");
        return Page::empty();
    }
    let total = resp
        .total_results
        .as_deref()
        .and_then(|t| t.trim().parse::<u64>().ok());
    Page::new(resp.search.into_iter().map(MovieSummary::from).collect(), total)
}

/// OMDb `?s=` search client.
pub struct OmdbClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OmdbClient {
    pub fn new(http: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Reads `OMDB_API_KEY`; an empty key makes every call fail with 401 upstream.
    pub fn from_env(http: Client, base_url: impl Into<String>) -> Self {
        let key = std::env::var("OMDB_API_KEY").unwrap_or_default();
        if key.is_empty() {
            tracing::warn!("OMDB_API_KEY missing; searches will be rejected upstream");
        }
        Self::new(http, base_url, key)
    }
}

#[async_trait]
impl MovieSearchSource for OmdbClient {
    async fn search_page(&self, query: &SearchQuery, page: u32) -> CallOutcome<Page<MovieSummary>> {
        tracing::debug!(target: "omdb", text = %query.text, media_type = ?query.media_type, year = ?query.year, page, "search page");

        let mut params: Vec<(&str, String)> = vec![
            ("apikey", self.api_key.clone()),
            ("s", query.text.clone()),
            ("page", page.to_string()),
        ];
        if let Some(t) = query.media_type {
            params.push(("type", t.as_str().to_string()));
        }
        if let Some(y) = &query.year {
            params.push(("y", y.clone()));
        }

        let req = self.http.get(format!("{}/", self.base_url.trim_end_matches('/'))).query(&params);
        let resp: SearchResponse = get_json(req).await?;
        Ok(into_page(resp))
    }
}
