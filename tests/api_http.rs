// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, TimeDelta, Utc};
use serde_json::Value as Json;
use tower::ServiceExt as _;

use movie_aggregator::aggregate::{Page, PaginatedAggregator};
use movie_aggregator::api::{create_router, AppState};
use movie_aggregator::cache::{MemoryStore, SingleFlightCache};
use movie_aggregator::releases::{NewReleases, NewReleasesService};
use movie_aggregator::retry::{CallOutcome, RetryExecutor, RetryPolicy, UpstreamFailure};
use movie_aggregator::reviews::{MovieReviews, ReviewsService, WatchProvidersService};
use movie_aggregator::search::{MovieSearchService, SearchQuery, SearchResults};
use movie_aggregator::subscription::{MemoryRepository, SubscriptionRepository};
use movie_aggregator::upstream::{
    MediaType, MovieSearchSource, MovieSummary, NewRelease, RegionProviders, ReleaseSource,
    Review, ReviewSource, WatchProviderSource, WatchProviders,
};

const BODY_LIMIT: usize = 1024 * 1024;

/// Twelve hits for any query, or a fixed failure status.
struct Upstream {
    fail_with: Option<u16>,
}

#[async_trait]
impl MovieSearchSource for Upstream {
    async fn search_page(&self, query: &SearchQuery, page: u32) -> CallOutcome<Page<MovieSummary>> {
        if let Some(s) = self.fail_with {
            return Err(UpstreamFailure::status(
                s,
                "https://omdb.test/?apikey=SECRETKEY123&s=matrix returned 503",
            ));
        }
        let from = (page - 1) * 10;
        let items = (from..(from + 10).min(12))
            .map(|i| MovieSummary {
                title: format!("{} {i}", query.text),
                year: "1999".into(),
                imdb_id: format!("tt{i:07}"),
                media_type: Some(MediaType::Movie),
                poster: None,
            })
            .collect();
        Ok(Page::new(items, Some(12)))
    }
}

#[async_trait]
impl ReleaseSource for Upstream {
    async fn releases_page(&self, day: NaiveDate, _page: u32) -> CallOutcome<Page<NewRelease>> {
        if let Some(s) = self.fail_with {
            return Err(UpstreamFailure::status(s, "tmdb unavailable"));
        }
        Ok(Page::new(
            vec![NewRelease {
                id: 7,
                title: "Fresh Release".into(),
                release_date: Some(day),
                overview: None,
                popularity: Some(12.5),
            }],
            Some(1),
        ))
    }
}

/// Three review pages of two reviews each, reported through `total_pages`.
#[async_trait]
impl ReviewSource for Upstream {
    async fn reviews_page(&self, item_id: i64, page: u32) -> CallOutcome<Page<Review>> {
        if let Some(s) = self.fail_with {
            return Err(UpstreamFailure::status(s, "tmdb unavailable"));
        }
        let items = (0..2)
            .map(|i| Review {
                author: format!("critic {page}.{i}"),
                content: format!("review {i} of movie {item_id} on page {page}"),
                created_at: None,
                url: None,
            })
            .collect();
        Ok(Page::new(items, Some(6)).with_total_pages(Some(3)))
    }
}

#[async_trait]
impl WatchProviderSource for Upstream {
    async fn watch_providers(&self, _item_id: i64) -> CallOutcome<WatchProviders> {
        if let Some(s) = self.fail_with {
            return Err(UpstreamFailure::status(s, "tmdb unavailable"));
        }
        Ok(WatchProviders::from([(
            "US".to_string(),
            RegionProviders {
                link: None,
                flatrate: vec!["Netflix".into()],
                rent: vec![],
                buy: vec!["Apple TV".into()],
            },
        )]))
    }
}

fn test_router(fail_with: Option<u16>) -> Router {
    test_app(fail_with).0
}

fn test_app(fail_with: Option<u16>) -> (Router, Arc<MemoryRepository>) {
    let upstream = Arc::new(Upstream { fail_with });
    let exec = RetryExecutor::new(RetryPolicy::new(1, Duration::ZERO).unwrap());
    let subscriptions = Arc::new(MemoryRepository::new());
    let state = AppState {
        search: Arc::new(MovieSearchService::new(
            upstream.clone(),
            PaginatedAggregator::new(exec.clone(), 10).unwrap(),
            SingleFlightCache::new(Arc::new(MemoryStore::<SearchResults>::new())),
            Duration::from_secs(60),
        )),
        releases: Arc::new(NewReleasesService::new(
            upstream.clone(),
            PaginatedAggregator::new(exec.clone(), 20).unwrap(),
            SingleFlightCache::new(Arc::new(MemoryStore::<NewReleases>::new())),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )),
        reviews: Arc::new(ReviewsService::new(
            upstream.clone(),
            PaginatedAggregator::new(exec.clone(), 20).unwrap(),
            SingleFlightCache::new(Arc::new(MemoryStore::<MovieReviews>::new())),
            Duration::from_secs(60),
        )),
        providers: Arc::new(WatchProvidersService::new(
            upstream,
            exec,
            SingleFlightCache::new(Arc::new(MemoryStore::<WatchProviders>::new())),
            Duration::from_secs(60),
        )),
        subscriptions: subscriptions.clone(),
    };
    (create_router(state), subscriptions)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn post_json(app: Router, uri: &str, payload: Json) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn json(bytes: &[u8]) -> Json {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, body) = get(test_router(None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "OK");
}

#[tokio::test]
async fn search_returns_merged_results() {
    let (status, body) = get(test_router(None), "/movies/search?q=matrix&type=movie").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["total_results"], 12);
    assert_eq!(v["page_count"], 2);
    assert_eq!(v["movies"].as_array().unwrap().len(), 12);
}

#[tokio::test]
async fn blank_query_is_bad_request() {
    let (status, body) = get(test_router(None), "/movies/search?q=%20%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("blank"));
}

#[tokio::test]
async fn page_zero_is_bad_request() {
    let (status, _) = get(test_router(None), "/movies/search/page?q=matrix&page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_page_lookup() {
    let (status, body) = get(test_router(None), "/movies/search/page?q=matrix&page=2").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["page_number"], 2);
    assert_eq!(v["from_cache"], false);
    assert_eq!(v["movies"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn upstream_failure_maps_to_503() {
    let (status, body) = get(test_router(Some(503)), "/movies/search?q=matrix").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let v = json(&body);
    assert_eq!(v["error"], "upstream unavailable");
    assert_eq!(v["kind"], "server_unavailable");
    assert_eq!(v["status"], 503);
    assert_eq!(v["attempts"], 1);
}

#[tokio::test]
async fn upstream_failure_body_hides_the_cause() {
    let (status, body) = get(test_router(Some(503)), "/movies/search/page?q=matrix&page=1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let text = String::from_utf8(body).unwrap();
    assert!(!text.contains("SECRETKEY123"));
    assert!(!text.contains("omdb.test"));
}

#[tokio::test]
async fn new_releases_lists_today() {
    let (status, body) = get(test_router(None), "/movies/new").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["movies"][0]["title"], "Fresh Release");
    assert_eq!(v["total_results"], 1);
}

#[tokio::test]
async fn reviews_merge_every_page_in_order() {
    let (status, body) = get(test_router(None), "/movies/550/reviews").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["movie_id"], 550);
    assert_eq!(v["page_count"], 3);
    let reviews = v["reviews"].as_array().unwrap();
    assert_eq!(reviews.len(), 6);
    assert_eq!(reviews[0]["author"], "critic 1.0");
    assert_eq!(reviews[5]["author"], "critic 3.1");
}

#[tokio::test]
async fn reviews_outage_maps_to_503() {
    let (status, _) = get(test_router(Some(503)), "/movies/550/reviews").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn non_numeric_movie_id_is_rejected() {
    let (status, _) = get(test_router(None), "/movies/abc/reviews").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn watch_providers_listed_per_region() {
    let (status, body) = get(test_router(None), "/movies/550/watch-providers").await;
    assert_eq!(status, StatusCode::OK);
    let v = json(&body);
    assert_eq!(v["US"]["flatrate"][0], "Netflix");
    assert_eq!(v["US"]["buy"][0], "Apple TV");
}

#[tokio::test]
async fn subscription_is_stored_for_the_scheduler() {
    let (app, repo) = test_app(None);
    let payload = serde_json::json!({
        "movie_id": 550,
        "movie_name": "Fight Club",
        "email": "fan@example.com",
        "platforms": ["netflix", "Amazon Prime"],
    });
    let (status, body) = post_json(app, "/movies/subscriptions", payload).await;
    assert_eq!(status, StatusCode::CREATED);
    let v = json(&body);
    assert_eq!(v["interest_id"], 1);
    assert_eq!(v["target_item_id"], 550);

    let now = Utc::now();
    let found = repo
        .find_created_between(now - TimeDelta::days(1), now + TimeDelta::days(1))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].recipient, "fan@example.com");

    let conds = repo.conditions_for(&[1]).await.unwrap();
    let tags: Vec<&str> = conds[&1].iter().map(String::as_str).collect();
    assert_eq!(tags, vec!["Amazon Prime", "Netflix"]);
}

#[tokio::test]
async fn subscription_with_unknown_platform_is_rejected() {
    let (app, repo) = test_app(None);
    let payload = serde_json::json!({
        "movie_id": 550,
        "movie_name": "Fight Club",
        "email": "fan@example.com",
        "platforms": ["Crunchyroll"],
    });
    let (status, body) = post_json(app, "/movies/subscriptions", payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("Crunchyroll"));
    assert!(repo.is_empty());
}

#[tokio::test]
async fn subscription_with_bad_email_is_rejected() {
    let payload = serde_json::json!({
        "movie_id": 550,
        "movie_name": "Fight Club",
        "email": "not-an-address",
        "platforms": ["Netflix"],
    });
    let (status, _) = post_json(test_router(None), "/movies/subscriptions", payload).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
