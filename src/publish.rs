// src/publish.rs
//! Publishing of the daily new-release listing to a message bus topic.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::releases::NewReleasesService;

#[async_trait::async_trait]
pub trait ReleasePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// Writes every publication to the log.
pub struct LogPublisher;

#[async_trait::async_trait]
impl ReleasePublisher for LogPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        tracing::info!(target: "publish", topic, bytes = payload.len(), "release listing published (log only)");
        Ok(())
    }
}

pub fn topic_for(prefix: &str, day: NaiveDate) -> String {
    format!("{prefix}{}", day.format("%Y-%m-%d"))
}

pub struct ReleasePoller {
    releases: Arc<NewReleasesService>,
    publisher: Arc<dyn ReleasePublisher>,
    topic_prefix: String,
    interval: Duration,
}

impl ReleasePoller {
    pub fn new(
        releases: Arc<NewReleasesService>,
        publisher: Arc<dyn ReleasePublisher>,
        topic_prefix: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            releases,
            publisher,
            topic_prefix: topic_prefix.into(),
            interval,
        }
    }

    /// Load today's listing and publish it. Returns the topic written to.
    pub async fn poll_once(&self) -> Result<String> {
        let listing = self
            .releases
            .today()
            .await
            .context("loading today's releases")?;
        let topic = topic_for(&self.topic_prefix, listing.date);
        let payload = serde_json::to_string(&listing).context("serializing release listing")?;
        self.publisher
            .publish(&topic, payload)
            .await
            .with_context(|| format!("publishing to {topic}"))?;
        counter!("releases_published_total").increment(1);
        tracing::info!(target: "publish", topic = %topic, movies = listing.movies.len(), "release listing published");
        Ok(topic)
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.poll_once().await {
                    tracing::warn!(target: "publish", error = ?e, "release poll failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_carries_iso_date() {
        let d = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        assert_eq!(topic_for("new-movies-", d), "new-movies-2025-07-04");
    }
}
