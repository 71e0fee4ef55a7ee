//! # Movie search
//! Free-text search over the upstream title index, aggregated across every
//! upstream page and cached per normalized query.
//!
//! `search_all` goes through the single-flight cache. `search_page` slices a
//! cached aggregation when one exists, otherwise it asks upstream for that one
//! page directly without populating the cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::aggregate::{page_count, Aggregated, Page, PageSource, PaginatedAggregator};
use crate::cache::SingleFlightCache;
use crate::retry::{CallOutcome, FinalFailure};
use crate::upstream::{MediaType, MovieSearchSource, MovieSummary};

pub const CACHE_KEY_PREFIX: &str = "movieapp";

static YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:19|20)\d{2}\b").unwrap_or_else(|e| panic!("year regex: {e}"))
});
static WS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").unwrap_or_else(|e| panic!("whitespace regex: {e}")));

fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").to_string()
}

/// A logical search: text plus the optional filters that change the result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub text: String,
    pub media_type: Option<MediaType>,
    pub year: Option<String>,
}

impl SearchQuery {
    pub fn new(text: &str, media_type: Option<MediaType>, year: Option<String>) -> Self {
        Self {
            text: collapse_ws(text),
            media_type,
            year: year.map(|y| y.trim().to_string()).filter(|y| !y.is_empty()),
        }
    }

    /// Parse raw user text. A 19xx/20xx year inside the text becomes the year
    /// filter unless one was given explicitly.
    pub fn parse(raw: &str, media_type: Option<MediaType>, year: Option<String>) -> Self {
        let explicit = year.filter(|y| !y.trim().is_empty());
        if explicit.is_some() {
            return Self::new(raw, media_type, explicit);
        }
        match YEAR_RE.find(raw) {
            Some(m) => {
                let found = m.as_str().to_string();
                let text = raw.replacen(&found, "", 1);
                Self::new(&text, media_type, Some(found))
            }
            None => Self::new(raw, media_type, None),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }

    /// Deterministic cache key; queries differing only in case or spacing share it.
    pub fn aggregation_key(&self) -> String {
        format!(
            "{CACHE_KEY_PREFIX}:{}:{}:{}",
            self.text.to_lowercase(),
            self.media_type.map(|t| t.as_str()).unwrap_or("-"),
            self.year.as_deref().unwrap_or("-"),
        )
    }

    fn accepts(&self, movie: &MovieSummary) -> bool {
        self.media_type.is_none() || self.media_type == movie.media_type
    }
}

/// Full, merged search result.
///
/// When the type filter drops upstream hits, `total_results` and
/// `page_count` describe the filtered `movies`, which is also what cached
/// page lookups slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub page_count: u32,
    pub total_results: u64,
    pub movies: Vec<MovieSummary>,
}

impl SearchResults {
    pub fn from_aggregated(
        agg: Aggregated<MovieSummary>,
        query: &SearchQuery,
        page_size: u32,
    ) -> Self {
        let merged = agg.items.len();
        let movies: Vec<MovieSummary> =
            agg.items.into_iter().filter(|m| query.accepts(m)).collect();
        if movies.len() == merged {
            return Self {
                page_count: agg.page_count,
                total_results: agg.total_results,
                movies,
            };
        }
        let total = movies.len() as u64;
        Self {
            page_count: page_count(total, page_size),
            total_results: total,
            movies,
        }
    }
}

/// One client-facing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultPage {
    pub page_number: u32,
    pub movies: Vec<MovieSummary>,
    pub from_cache: bool,
}

/// Binds a query to a search source so the aggregator can walk its pages.
struct QueryPages {
    source: Arc<dyn MovieSearchSource>,
    query: SearchQuery,
}

#[async_trait]
impl PageSource<MovieSummary> for QueryPages {
    async fn fetch_page(&self, page: u32) -> CallOutcome<Page<MovieSummary>> {
        self.source.search_page(&self.query, page).await
    }
}

pub struct MovieSearchService {
    source: Arc<dyn MovieSearchSource>,
    aggregator: PaginatedAggregator,
    cache: SingleFlightCache<SearchResults>,
    ttl: Duration,
}

impl MovieSearchService {
    pub fn new(
        source: Arc<dyn MovieSearchSource>,
        aggregator: PaginatedAggregator,
        cache: SingleFlightCache<SearchResults>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            aggregator,
            cache,
            ttl,
        }
    }

    /// Every result for `query`, merged in upstream page order.
    pub async fn search_all(&self, query: &SearchQuery) -> Result<SearchResults, FinalFailure> {
        let key = query.aggregation_key();
        let source = Arc::clone(&self.source);
        let aggregator = self.aggregator.clone();
        let page_size = aggregator.page_size();
        let query = query.clone();

        self.cache
            .get_or_fill(&key, self.ttl, move || async move {
                let pages = QueryPages {
                    source,
                    query: query.clone(),
                };
                let agg = aggregator.fetch_all(&pages).await?;
                Ok(SearchResults::from_aggregated(agg, &query, page_size))
            })
            .await
    }

    /// Page `page_number` (1-based) of `query`, sized like upstream pages.
    pub async fn search_page(
        &self,
        query: &SearchQuery,
        page_number: u32,
    ) -> Result<ResultPage, FinalFailure> {
        if page_number == 0 {
            return Ok(ResultPage {
                page_number,
                movies: Vec::new(),
                from_cache: false,
            });
        }

        let key = query.aggregation_key();
        if let Some(cached) = self.cache.peek(&key).await {
            tracing::debug!(target: "search", key = %key, page_number, "serving page from cached aggregation");
            return Ok(ResultPage {
                page_number,
                movies: slice_page(&cached.movies, page_number, self.aggregator.page_size()),
                from_cache: true,
            });
        }

        let page = self
            .aggregator
            .executor()
            .execute(|| self.source.search_page(query, page_number))
            .await?;
        Ok(ResultPage {
            page_number,
            movies: page.items.into_iter().filter(|m| query.accepts(m)).collect(),
            from_cache: false,
        })
    }
}

/// Items of 1-based page `page_number`; empty past the end.
pub fn slice_page<T: Clone>(items: &[T], page_number: u32, page_size: u32) -> Vec<T> {
    let size = page_size as usize;
    let from = (page_number.saturating_sub(1) as usize).saturating_mul(size);
    if from >= items.len() {
        return Vec::new();
    }
    let to = (from + size).min(items.len());
    items[from..to].to_vec()
}
