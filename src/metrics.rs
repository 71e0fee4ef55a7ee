use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the series this service emits.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        describe_counter!("upstream_attempts_total", "Upstream calls, retries included");
        describe_counter!("upstream_retries_total", "Upstream calls repeated after a transient failure");
        describe_counter!("upstream_failures_total", "Operations that ended in a final failure");
        describe_counter!("cache_hits_total", "Lookups served from the cache");
        describe_counter!("cache_misses_total", "Lookups that had to join or start a fill");
        describe_counter!("single_flight_joins_total", "Callers that attached to a running fill");
        describe_counter!("aggregation_pages_total", "Upstream pages fetched by aggregations");
        describe_histogram!("aggregation_duration_ms", Unit::Milliseconds, "Wall time of one aggregation");
        describe_counter!("scheduler_runs_total", "Subscription matching runs");
        describe_counter!("scheduler_matches_total", "Interests matched to available platforms");
        describe_counter!("scheduler_failed_groups_total", "Movie groups skipped after a failure");
        describe_counter!("scheduler_notify_failures_total", "Notifications that could not be delivered");
        describe_counter!("releases_published_total", "Daily release listings published");

        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
