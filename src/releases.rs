// src/releases.rs
//! Daily "newly released" listing, aggregated from the discovery endpoint and
//! cached per calendar day.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::aggregate::{Page, PageSource, PaginatedAggregator};
use crate::cache::SingleFlightCache;
use crate::retry::{CallOutcome, FinalFailure};
use crate::upstream::{NewRelease, ReleaseSource};

pub const CACHE_KEY_PREFIX: &str = "newlyReleasedMovies:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewReleases {
    pub date: NaiveDate,
    pub total_results: u64,
    pub movies: Vec<NewRelease>,
}

impl NewReleases {
    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }
}

pub fn cache_key(day: NaiveDate) -> String {
    format!("{CACHE_KEY_PREFIX}{}", day.format("%Y-%m-%d"))
}

struct DayPages {
    source: Arc<dyn ReleaseSource>,
    day: NaiveDate,
}

#[async_trait]
impl PageSource<NewRelease> for DayPages {
    async fn fetch_page(&self, page: u32) -> CallOutcome<Page<NewRelease>> {
        self.source.releases_page(self.day, page).await
    }
}

pub struct NewReleasesService {
    source: Arc<dyn ReleaseSource>,
    aggregator: PaginatedAggregator,
    cache: SingleFlightCache<NewReleases>,
    ttl: Duration,
    empty_ttl: Duration,
}

impl NewReleasesService {
    /// `empty_ttl` applies when a day has no releases yet, so the listing is
    /// re-checked well before the full `ttl` runs out.
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        aggregator: PaginatedAggregator,
        cache: SingleFlightCache<NewReleases>,
        ttl: Duration,
        empty_ttl: Duration,
    ) -> Self {
        Self {
            source,
            aggregator,
            cache,
            ttl,
            empty_ttl,
        }
    }

    pub async fn today(&self) -> Result<NewReleases, FinalFailure> {
        self.for_day(Utc::now().date_naive()).await
    }

    pub async fn for_day(&self, day: NaiveDate) -> Result<NewReleases, FinalFailure> {
        let source = Arc::clone(&self.source);
        let aggregator = self.aggregator.clone();
        let (ttl, empty_ttl) = (self.ttl, self.empty_ttl);

        self.cache
            .get_or_fill_with(
                &cache_key(day),
                move |r: &NewReleases| if r.is_empty() { empty_ttl } else { ttl },
                move || async move {
                    let pages = DayPages { source, day };
                    let agg = aggregator.fetch_all(&pages).await?;
                    Ok(NewReleases {
                        date: day,
                        total_results: agg.total_results,
                        movies: agg.items,
                    })
                },
            )
            .await
    }
}
