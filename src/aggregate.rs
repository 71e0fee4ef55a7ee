//! Paginated fetch-and-merge.
//!
//! Page 1 is authoritative for the total result count. Remaining pages are
//! fetched with bounded concurrency and merged in ascending page order, so the
//! output never depends on which request finished first.

use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};

use crate::config::{ConfigError, PartialFailurePolicy};
use crate::retry::{CallOutcome, FinalFailure, RetryExecutor};

pub const DEFAULT_MAX_CONCURRENT_PAGES: usize = 10;

/// One upstream page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Only page 1's value is consulted.
    pub total_results: Option<u64>,
    /// Page count reported by the provider, when it sends one. Takes
    /// precedence over the count derived from `total_results`.
    pub total_pages: Option<u32>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_results: Option<u64>) -> Self {
        Self {
            items,
            total_results,
            total_pages: None,
        }
    }

    pub fn with_total_pages(mut self, total_pages: Option<u32>) -> Self {
        self.total_pages = total_pages;
        self
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Some(0))
    }
}

/// Something that can fetch page `n` (1-based) of one fixed query.
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, page: u32) -> CallOutcome<Page<T>>;
}

/// Merged result of one aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregated<T> {
    pub items: Vec<T>,
    pub total_results: u64,
    pub page_count: u32,
    /// Pages skipped under [`PartialFailurePolicy::PartialMerge`].
    pub failed_pages: Vec<u32>,
}

impl<T> Aggregated<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_results: 0,
            page_count: 0,
            failed_pages: Vec::new(),
        }
    }
}

/// `max(1, ceil(total / page_size))`.
pub fn page_count(total_results: u64, page_size: u32) -> u32 {
    let size = u64::from(page_size.max(1));
    let pages = total_results.div_ceil(size).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone)]
pub struct PaginatedAggregator {
    executor: RetryExecutor,
    page_size: u32,
    max_concurrency: usize,
    policy: PartialFailurePolicy,
}

impl PaginatedAggregator {
    pub fn new(executor: RetryExecutor, page_size: u32) -> Result<Self, ConfigError> {
        if page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive"));
        }
        Ok(Self {
            executor,
            page_size,
            max_concurrency: DEFAULT_MAX_CONCURRENT_PAGES,
            policy: PartialFailurePolicy::default(),
        })
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::Invalid("max_concurrent_pages must be positive"));
        }
        self.max_concurrency = max;
        Ok(self)
    }

    pub fn with_partial_failure(mut self, policy: PartialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Fetch every page of `source` and merge them in page order.
    pub async fn fetch_all<T, S>(&self, source: &S) -> Result<Aggregated<T>, FinalFailure>
    where
        T: Send,
        S: PageSource<T> + ?Sized,
    {
        let t0 = Instant::now();

        let first = self.executor.execute(|| source.fetch_page(1)).await?;
        counter!("aggregation_pages_total").increment(1);

        let total = first.total_results.unwrap_or(0);
        if total == 0 {
            tracing::debug!(target: "aggregate", "first page reports no results");
            return Ok(Aggregated::empty());
        }

        // An empty first page ends the run whatever the reported total says.
        let pages = if first.items.is_empty() {
            1
        } else {
            first
                .total_pages
                .map(|n| n.max(1))
                .unwrap_or_else(|| page_count(total, self.page_size))
        };
        let mut items = first.items;
        let mut failed_pages = Vec::new();

        if pages > 1 {
            // `buffered` yields in input order, so results line up with page numbers.
            let rest: Vec<(u32, Result<Page<T>, FinalFailure>)> = stream::iter(2..=pages)
                .map(|page| async move {
                    let res = self.executor.execute(|| source.fetch_page(page)).await;
                    (page, res)
                })
                .buffered(self.max_concurrency)
                .collect()
                .await;
            counter!("aggregation_pages_total").increment(rest.len() as u64);

            let mut first_failure: Option<FinalFailure> = None;
            for (page, res) in rest {
                match res {
                    Ok(p) => items.extend(p.items),
                    Err(e) => {
                        failed_pages.push(page);
                        if first_failure.is_none() {
                            first_failure = Some(e);
                        }
                    }
                }
            }

            if let Some(err) = first_failure {
                match self.policy {
                    PartialFailurePolicy::FailFast => return Err(err),
                    PartialFailurePolicy::PartialMerge => tracing::warn!(
                        target: "aggregate",
                        failed = ?failed_pages,
                        page_count = pages,
                        "merging partial result"
                    ),
                }
            }
        }

        histogram!("aggregation_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            target: "aggregate",
            total_results = total,
            page_count = pages,
            merged = items.len(),
            "aggregation finished"
        );

        Ok(Aggregated {
            items,
            total_results: total,
            page_count: pages,
            failed_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_rounds_up_with_floor_of_one() {
        assert_eq!(page_count(25, 10), 3);
        assert_eq!(page_count(20, 10), 2);
        assert_eq!(page_count(1, 10), 1);
        assert_eq!(page_count(0, 10), 1);
    }

    #[test]
    fn zero_page_size_rejected_at_construction() {
        let exec = RetryExecutor::new(
            crate::retry::RetryPolicy::new(1, std::time::Duration::ZERO).unwrap(),
        );
        assert!(PaginatedAggregator::new(exec.clone(), 0).is_err());
        assert!(PaginatedAggregator::new(exec, 10)
            .unwrap()
            .with_max_concurrency(0)
            .is_err());
    }
}
