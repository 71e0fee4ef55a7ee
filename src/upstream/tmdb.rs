// src/upstream/tmdb.rs
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use super::http::get_json;
use super::{
    AvailabilitySource, NewRelease, RegionProviders, ReleaseSource, Review, ReviewSource,
    StreamingPlatform, WatchProviderSource, WatchProviders,
};
use crate::aggregate::Page;
use crate::retry::CallOutcome;

const DISCOVER_PATH: &str = "/3/discover/movie";

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    results: Vec<DiscoverItem>,
    total_results: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DiscoverItem {
    id: u64,
    title: String,
    release_date: Option<String>,
    overview: Option<String>,
    popularity: Option<f64>,
}

impl From<DiscoverItem> for NewRelease {
    fn from(it: DiscoverItem) -> Self {
        NewRelease {
            id: it.id,
            title: it.title,
            release_date: it
                .release_date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            overview: it.overview.filter(|o| !o.is_empty()),
            popularity: it.popularity,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WatchProvidersResponse {
    #[serde(default)]
    results: HashMap<String, WatchProviderRegion>,
}

#[derive(Debug, Deserialize)]
struct WatchProviderRegion {
    link: Option<String>,
    #[serde(default)]
    flatrate: Vec<WatchProvider>,
    #[serde(default)]
    rent: Vec<WatchProvider>,
    #[serde(default)]
    buy: Vec<WatchProvider>,
}

#[derive(Debug, Deserialize)]
struct WatchProvider {
    provider_name: String,
}

/// Flat-rate providers in `region` that map to a known platform, as tags.
fn platforms_in_region(resp: &WatchProvidersResponse, region: &str) -> BTreeSet<String> {
    resp.results
        .get(region)
        .map(|r| r.flatrate.as_slice())
        .unwrap_or_default()
        .iter()
        .filter_map(|p| StreamingPlatform::from_display_name(&p.provider_name))
        .map(|p| p.display_name().to_string())
        .collect()
}

fn provider_names(list: Vec<WatchProvider>) -> Vec<String> {
    list.into_iter().map(|p| p.provider_name).collect()
}

impl From<WatchProvidersResponse> for WatchProviders {
    fn from(resp: WatchProvidersResponse) -> Self {
        resp.results
            .into_iter()
            .map(|(region, r)| {
                let providers = RegionProviders {
                    link: r.link,
                    flatrate: provider_names(r.flatrate),
                    rent: provider_names(r.rent),
                    buy: provider_names(r.buy),
                };
                (region, providers)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ReviewsResponse {
    #[serde(default)]
    results: Vec<ReviewItem>,
    total_results: Option<u64>,
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ReviewItem {
    #[serde(default)]
    author: String,
    #[serde(default)]
    content: String,
    created_at: Option<String>,
    url: Option<String>,
}

impl From<ReviewItem> for Review {
    fn from(it: ReviewItem) -> Self {
        Review {
            author: it.author,
            content: it.content,
            created_at: it.created_at,
            url: it.url,
        }
    }
}

fn into_review_page(resp: ReviewsResponse) -> Page<Review> {
    Page::new(
        resp.results.into_iter().map(Review::from).collect(),
        resp.total_results,
    )
    .with_total_pages(resp.total_pages)
}

/// TMDB v3 client (bearer token auth).
pub struct TmdbClient {
    http: Client,
    base_url: String,
    token: String,
    region: String,
}

impl TmdbClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            region: region.into(),
        }
    }

    /// Reads `TMDB_API_TOKEN`.
    pub fn from_env(http: Client, base_url: impl Into<String>, region: impl Into<String>) -> Self {
        let token = std::env::var("TMDB_API_TOKEN").unwrap_or_default();
        if token.is_empty() {
            tracing::warn!("TMDB_API_TOKEN missing; TMDB calls will be rejected upstream");
        }
        Self::new(http, base_url, token, region)
    }

    async fn fetch_watch_providers(&self, item_id: i64) -> CallOutcome<WatchProvidersResponse> {
        let req = self
            .http
            .get(format!("{}/3/movie/{item_id}/watch/providers", self.base_url))
            .bearer_auth(&self.token);
        get_json(req).await
    }
}

#[async_trait]
impl ReleaseSource for TmdbClient {
    async fn releases_page(&self, day: NaiveDate, page: u32) -> CallOutcome<Page<NewRelease>> {
        let date = day.format("%Y-%m-%d").to_string();
        let page = page.to_string();
        let req = self
            .http
            .get(format!("{}{}", self.base_url, DISCOVER_PATH))
            .bearer_auth(&self.token)
            .query(&[
                ("primary_release_date.gte", date.as_str()),
                ("primary_release_date.lte", date.as_str()),
                ("page", page.as_str()),
            ]);
        let resp: DiscoverResponse = get_json(req).await?;
        Ok(Page::new(
            resp.results.into_iter().map(NewRelease::from).collect(),
            resp.total_results,
        ))
    }
}

#[async_trait]
impl AvailabilitySource for TmdbClient {
    async fn available_conditions(&self, item_id: i64) -> CallOutcome<BTreeSet<String>> {
        let resp = self.fetch_watch_providers(item_id).await?;
        Ok(platforms_in_region(&resp, &self.region))
    }
}

#[async_trait]
impl WatchProviderSource for TmdbClient {
    async fn watch_providers(&self, item_id: i64) -> CallOutcome<WatchProviders> {
        let resp = self.fetch_watch_providers(item_id).await?;
        Ok(WatchProviders::from(resp))
    }
}

#[async_trait]
impl ReviewSource for TmdbClient {
    async fn reviews_page(&self, item_id: i64, page: u32) -> CallOutcome<Page<Review>> {
        let page = page.to_string();
        let req = self
            .http
            .get(format!("{}/3/movie/{item_id}/reviews", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("page", page.as_str())]);
        let resp: ReviewsResponse = get_json(req).await?;
        Ok(into_review_page(resp))
    }
}
