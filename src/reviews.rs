// src/reviews.rs
//! Per-movie reviews and watch-provider listings.
//!
//! Reviews are aggregated across every upstream page and cached per movie.
//! The provider listing is a single retried call, cached on its own key so it
//! never collides with the scheduler's availability tags.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::aggregate::{Page, PageSource, PaginatedAggregator};
use crate::cache::SingleFlightCache;
use crate::retry::{CallOutcome, FinalFailure, RetryExecutor};
use crate::upstream::{Review, ReviewSource, WatchProviderSource, WatchProviders};

pub const REVIEWS_KEY_PREFIX: &str = "movieReviews:";
pub const PROVIDERS_KEY_PREFIX: &str = "watchProviderListing:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieReviews {
    pub movie_id: i64,
    pub total_results: u64,
    pub page_count: u32,
    pub reviews: Vec<Review>,
}

struct MoviePages {
    source: Arc<dyn ReviewSource>,
    movie_id: i64,
}

#[async_trait]
impl PageSource<Review> for MoviePages {
    async fn fetch_page(&self, page: u32) -> CallOutcome<Page<Review>> {
        self.source.reviews_page(self.movie_id, page).await
    }
}

pub struct ReviewsService {
    source: Arc<dyn ReviewSource>,
    aggregator: PaginatedAggregator,
    cache: SingleFlightCache<MovieReviews>,
    ttl: Duration,
}

impl ReviewsService {
    pub fn new(
        source: Arc<dyn ReviewSource>,
        aggregator: PaginatedAggregator,
        cache: SingleFlightCache<MovieReviews>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            aggregator,
            cache,
            ttl,
        }
    }

    /// Every review of `movie_id`, merged in page order.
    pub async fn reviews(&self, movie_id: i64) -> Result<MovieReviews, FinalFailure> {
        let source = Arc::clone(&self.source);
        let aggregator = self.aggregator.clone();

        self.cache
            .get_or_fill(&format!("{REVIEWS_KEY_PREFIX}{movie_id}"), self.ttl, move || async move {
                let pages = MoviePages { source, movie_id };
                let agg = aggregator.fetch_all(&pages).await?;
                tracing::debug!(
                    target: "reviews",
                    movie_id,
                    reviews = agg.items.len(),
                    "reviews aggregated"
                );
                Ok(MovieReviews {
                    movie_id,
                    total_results: agg.total_results,
                    page_count: agg.page_count,
                    reviews: agg.items,
                })
            })
            .await
    }
}

pub struct WatchProvidersService {
    source: Arc<dyn WatchProviderSource>,
    executor: RetryExecutor,
    cache: SingleFlightCache<WatchProviders>,
    ttl: Duration,
}

impl WatchProvidersService {
    pub fn new(
        source: Arc<dyn WatchProviderSource>,
        executor: RetryExecutor,
        cache: SingleFlightCache<WatchProviders>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            executor,
            cache,
            ttl,
        }
    }

    pub async fn providers(&self, movie_id: i64) -> Result<WatchProviders, FinalFailure> {
        let source = Arc::clone(&self.source);
        let executor = self.executor.clone();

        self.cache
            .get_or_fill(&format!("{PROVIDERS_KEY_PREFIX}{movie_id}"), self.ttl, move || async move {
                executor.execute(|| source.watch_providers(movie_id)).await
            })
            .await
    }
}
