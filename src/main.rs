//! Movie aggregator service entrypoint.
//! Loads config, wires upstream clients, caches, services and both schedulers,
//! then serves the HTTP API.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use movie_aggregator::api::{create_router, AppState};
use movie_aggregator::aggregate::PaginatedAggregator;
use movie_aggregator::cache::{MemoryStore, SingleFlightCache};
use movie_aggregator::config::{self, AppConfig};
use movie_aggregator::metrics::Metrics;
use movie_aggregator::notify::{email::EmailNotifier, LogNotifier, Notifier};
use movie_aggregator::publish::{LogPublisher, ReleasePoller};
use movie_aggregator::releases::{NewReleases, NewReleasesService};
use movie_aggregator::retry::{RetryExecutor, RetryPolicy};
use movie_aggregator::reviews::{MovieReviews, ReviewsService, WatchProvidersService};
use movie_aggregator::search::{MovieSearchService, SearchResults};
use movie_aggregator::subscription::{MemoryRepository, SubscriptionMatchingScheduler};
use movie_aggregator::upstream::{
    http::build_client, omdb::OmdbClient, tmdb::TmdbClient, WatchProviders,
};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,movie_aggregator=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn pick_notifier() -> Arc<dyn Notifier> {
    match EmailNotifier::from_env() {
        Ok(n) => Arc::new(n),
        Err(e) => {
            tracing::warn!(error = ?e, "email delivery not configured; notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg: AppConfig = config::load_config_default()?;
    cfg.validate()?;

    // Installed before anything records, so early series are kept.
    let metrics = if cfg.server.metrics {
        Some(Metrics::init()?)
    } else {
        None
    };

    let executor = RetryExecutor::new(RetryPolicy::from_settings(&cfg.retry)?);
    let http = build_client(&cfg.upstream)?;

    let omdb = Arc::new(OmdbClient::from_env(http.clone(), cfg.upstream.omdb_base_url.clone()));
    let tmdb = Arc::new(TmdbClient::from_env(
        http,
        cfg.upstream.tmdb_base_url.clone(),
        cfg.upstream.region.clone(),
    ));

    let search_agg = PaginatedAggregator::new(executor.clone(), cfg.search.page_size)?
        .with_max_concurrency(cfg.search.max_concurrent_pages)?
        .with_partial_failure(cfg.search.partial_failure);
    let search = Arc::new(MovieSearchService::new(
        omdb,
        search_agg,
        SingleFlightCache::new(Arc::new(MemoryStore::<SearchResults>::new())),
        Duration::from_secs(cfg.search.cache_ttl_secs),
    ));

    let release_agg = PaginatedAggregator::new(executor.clone(), cfg.releases.page_size)?
        .with_max_concurrency(cfg.releases.max_concurrent_pages)?
        .with_partial_failure(cfg.releases.partial_failure);
    let releases = Arc::new(NewReleasesService::new(
        tmdb.clone(),
        release_agg,
        SingleFlightCache::new(Arc::new(MemoryStore::<NewReleases>::new())),
        Duration::from_secs(cfg.releases.cache_ttl_secs),
        Duration::from_secs(cfg.releases.empty_ttl_secs),
    ));

    let review_agg = PaginatedAggregator::new(executor.clone(), cfg.reviews.page_size)?
        .with_max_concurrency(cfg.reviews.max_concurrent_pages)?
        .with_partial_failure(cfg.reviews.partial_failure);
    let reviews = Arc::new(ReviewsService::new(
        tmdb.clone(),
        review_agg,
        SingleFlightCache::new(Arc::new(MemoryStore::<MovieReviews>::new())),
        Duration::from_secs(cfg.reviews.cache_ttl_secs),
    ));
    let providers = Arc::new(WatchProvidersService::new(
        tmdb.clone(),
        executor.clone(),
        SingleFlightCache::new(Arc::new(MemoryStore::<WatchProviders>::new())),
        Duration::from_secs(cfg.reviews.providers_ttl_secs),
    ));

    // Subscriptions posted over HTTP land where the scheduler reads them.
    let subscriptions = Arc::new(MemoryRepository::new());
    let scheduler = Arc::new(SubscriptionMatchingScheduler::new(
        subscriptions.clone(),
        tmdb,
        pick_notifier(),
        executor,
        SingleFlightCache::new(Arc::new(MemoryStore::<BTreeSet<String>>::new())),
        cfg.scheduler.clone(),
    ));
    let poller = Arc::new(ReleasePoller::new(
        releases.clone(),
        Arc::new(LogPublisher),
        cfg.releases.topic_prefix.clone(),
        Duration::from_secs(cfg.releases.poll_interval_secs),
    ));
    let _scheduler_task = scheduler.spawn();
    let _poller_task = poller.spawn();

    let mut router = create_router(AppState {
        search,
        releases,
        reviews,
        providers,
        subscriptions,
    });
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    let addr = cfg.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "movie aggregator listening");
    axum::serve(listener, router).await.context("http server")?;
    Ok(())
}
