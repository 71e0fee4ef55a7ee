use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::releases::NewReleasesService;
use crate::retry::{FailureKind, FinalFailure};
use crate::reviews::{ReviewsService, WatchProvidersService};
use crate::search::{MovieSearchService, SearchQuery};
use crate::subscription::MemoryRepository;
use crate::upstream::{MediaType, StreamingPlatform};

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<MovieSearchService>,
    pub releases: Arc<NewReleasesService>,
    pub reviews: Arc<ReviewsService>,
    pub providers: Arc<WatchProvidersService>,
    /// Shared with the matching scheduler.
    pub subscriptions: Arc<MemoryRepository>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/movies/search", get(search_all))
        .route("/movies/search/page", get(search_page))
        .route("/movies/new", get(new_releases))
        .route("/movies/subscriptions", post(subscribe))
        .route("/movies/{id}/reviews", get(movie_reviews))
        .route("/movies/{id}/watch-providers", get(watch_providers))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default, rename = "type")]
    media_type: Option<MediaType>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    page: Option<u32>,
}

impl SearchParams {
    fn query(&self) -> Result<SearchQuery, ApiError> {
        let q = SearchQuery::parse(&self.q, self.media_type, self.year.clone());
        if q.is_blank() {
            return Err(ApiError::BadRequest("query text must not be blank".into()));
        }
        Ok(q)
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    movie_id: i64,
    movie_name: String,
    email: String,
    platforms: Vec<String>,
}

impl SubscriptionRequest {
    /// Requested platforms as condition tags.
    fn conditions(&self) -> Result<Vec<&'static str>, ApiError> {
        if self.platforms.is_empty() {
            return Err(ApiError::BadRequest("at least one platform is required".into()));
        }
        self.platforms
            .iter()
            .map(|p| {
                StreamingPlatform::from_display_name(p)
                    .map(|p| p.display_name())
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown platform '{p}'")))
            })
            .collect()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<u32>,
}

enum ApiError {
    BadRequest(String),
    Upstream(FinalFailure),
}

impl From<FinalFailure> for ApiError {
    fn from(f: FinalFailure) -> Self {
        ApiError::Upstream(f)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: msg,
                    kind: None,
                    status: None,
                    attempts: None,
                }),
            )
                .into_response(),
            ApiError::Upstream(f) => {
                tracing::warn!(target: "api", error = %f, "upstream unavailable");
                // The cause stays in the log; clients only see the verdict.
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorBody {
                        error: "upstream unavailable".into(),
                        kind: Some(f.kind),
                        status: f.status,
                        attempts: Some(f.attempts),
                    }),
                )
                    .into_response()
            }
        }
    }
}

async fn search_all(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let query = params.query()?;
    let results = state.search.search_all(&query).await?;
    Ok(Json(results).into_response())
}

async fn search_page(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let query = params.query()?;
    let page = params.page.unwrap_or(1);
    if page == 0 {
        return Err(ApiError::BadRequest("page numbers start at 1".into()));
    }
    let result = state.search.search_page(&query, page).await?;
    Ok(Json(result).into_response())
}

async fn new_releases(State(state): State<AppState>) -> Result<Response, ApiError> {
    let listing = state.releases.today().await?;
    Ok(Json(listing).into_response())
}

async fn movie_reviews(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let reviews = state.reviews.reviews(id).await?;
    Ok(Json(reviews).into_response())
}

async fn watch_providers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let providers = state.providers.providers(id).await?;
    Ok(Json(providers).into_response())
}

async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<Response, ApiError> {
    if req.movie_name.trim().is_empty() {
        return Err(ApiError::BadRequest("movie_name must not be blank".into()));
    }
    if req.email.parse::<lettre::Address>().is_err() {
        return Err(ApiError::BadRequest("email is not a valid address".into()));
    }
    let conditions = req.conditions()?;
    let record = state.subscriptions.subscribe(
        req.movie_id,
        req.movie_name.trim(),
        req.email,
        conditions,
        Utc::now(),
    );
    tracing::info!(
        target: "api",
        interest_id = record.interest_id,
        movie_id = record.target_item_id,
        "subscription recorded"
    );
    Ok((StatusCode::CREATED, Json(record)).into_response())
}
