//! Periodic matching of fresh subscriptions against live streaming availability.
//!
//! One run: load the last two days of interests, group them by movie, look up
//! availability once per movie, intersect with each interest's requested
//! platforms and notify every match independently. A failing group or a
//! failing notification is logged and skipped; it never aborts the run.
//! Nothing is persisted between runs, so a re-run may notify the same
//! recipient again.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{lookup_window, InterestRecord, MatchResult, SubscriptionRepository};
use crate::cache::SingleFlightCache;
use crate::config::SchedulerSettings;
use crate::notify::{Notification, Notifier};
use crate::retry::{FinalFailure, RetryExecutor};
use crate::upstream::AvailabilitySource;

pub const AVAILABILITY_KEY_PREFIX: &str = "watchProviders:";

/// Counters for one scheduled run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub interests: usize,
    pub groups: usize,
    pub failed_groups: usize,
    pub matches: usize,
    pub notified: usize,
    pub notify_failures: usize,
}

#[derive(Debug, Default)]
struct GroupOutcome {
    matches: usize,
    notified: usize,
    notify_failures: usize,
}

pub struct SubscriptionMatchingScheduler {
    repo: Arc<dyn SubscriptionRepository>,
    availability: Arc<dyn AvailabilitySource>,
    notifier: Arc<dyn Notifier>,
    executor: RetryExecutor,
    cache: SingleFlightCache<BTreeSet<String>>,
    settings: SchedulerSettings,
}

impl SubscriptionMatchingScheduler {
    pub fn new(
        repo: Arc<dyn SubscriptionRepository>,
        availability: Arc<dyn AvailabilitySource>,
        notifier: Arc<dyn Notifier>,
        executor: RetryExecutor,
        cache: SingleFlightCache<BTreeSet<String>>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            repo,
            availability,
            notifier,
            executor,
            cache,
            settings,
        }
    }

    pub async fn run_once(&self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    /// One run as if the clock read `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        counter!("scheduler_runs_total").increment(1);
        let (from, to) = lookup_window(now.date_naive());

        let interests = match self.repo.find_created_between(from, to).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "scheduler", error = ?e, "loading interests failed; skipping run");
                return RunSummary::default();
            }
        };

        let mut groups: BTreeMap<i64, Vec<InterestRecord>> = BTreeMap::new();
        for interest in interests.iter() {
            groups
                .entry(interest.target_item_id)
                .or_default()
                .push(interest.clone());
        }

        let mut summary = RunSummary {
            interests: interests.len(),
            groups: groups.len(),
            ..RunSummary::default()
        };

        let outcomes: Vec<(i64, anyhow::Result<GroupOutcome>)> = stream::iter(groups)
            .map(|(item_id, members)| async move {
                tracing::debug!(target: "scheduler", item_id, members = members.len(), "processing group");
                (item_id, self.process_group(item_id, members).await)
            })
            .buffer_unordered(self.settings.group_concurrency)
            .collect()
            .await;

        for (item_id, outcome) in outcomes {
            match outcome {
                Ok(g) => {
                    summary.matches += g.matches;
                    summary.notified += g.notified;
                    summary.notify_failures += g.notify_failures;
                }
                Err(e) => {
                    summary.failed_groups += 1;
                    counter!("scheduler_failed_groups_total").increment(1);
                    tracing::warn!(target: "scheduler", item_id, error = ?e, "group skipped");
                }
            }
        }

        counter!("scheduler_matches_total").increment(summary.matches as u64);
        tracing::info!(
            target: "scheduler",
            interests = summary.interests,
            groups = summary.groups,
            failed_groups = summary.failed_groups,
            matches = summary.matches,
            notified = summary.notified,
            notify_failures = summary.notify_failures,
            "subscription run finished"
        );
        summary
    }

    async fn process_group(
        &self,
        item_id: i64,
        members: Vec<InterestRecord>,
    ) -> anyhow::Result<GroupOutcome> {
        let ids: Vec<i64> = members.iter().map(|m| m.interest_id).collect();
        let requested = self
            .repo
            .conditions_for(&ids)
            .await
            .with_context(|| format!("loading requested platforms for item {item_id}"))?;
        let available = self
            .available_for(item_id)
            .await
            .with_context(|| format!("availability lookup for item {item_id}"))?;

        let requested = &requested;
        let available = &available;
        let empty = BTreeSet::new();
        let empty = &empty;

        let outcome = stream::iter(members)
            .map(|interest| async move {
                let wanted = requested.get(&interest.interest_id).unwrap_or(empty);
                match MatchResult::compute(interest.interest_id, wanted, available) {
                    Some(m) => Some((interest, m)),
                    None => {
                        tracing::debug!(target: "scheduler", interest_id = interest.interest_id, "no requested platform available yet");
                        None
                    }
                }
            })
            .buffer_unordered(self.settings.match_concurrency)
            .filter_map(future::ready)
            .map(|(interest, m)| async move {
                let notification = Notification::for_match(&interest, &m);
                match self.notifier.notify(&notification).await {
                    Ok(()) => true,
                    Err(e) => {
                        counter!("scheduler_notify_failures_total").increment(1);
                        tracing::warn!(
                            target: "scheduler",
                            interest_id = m.interest_id,
                            notifier = self.notifier.name(),
                            error = ?e,
                            "notification failed"
                        );
                        false
                    }
                }
            })
            .buffer_unordered(self.settings.notify_concurrency)
            .fold(GroupOutcome::default(), |mut acc, sent| {
                acc.matches += 1;
                if sent {
                    acc.notified += 1;
                } else {
                    acc.notify_failures += 1;
                }
                future::ready(acc)
            })
            .await;

        Ok(outcome)
    }

    /// Available platforms for one movie, through the cache and retry policy.
    async fn available_for(&self, item_id: i64) -> Result<BTreeSet<String>, FinalFailure> {
        let key = format!("{AVAILABILITY_KEY_PREFIX}{item_id}");
        let source = Arc::clone(&self.availability);
        let executor = self.executor.clone();
        let ttl = Duration::from_secs(self.settings.availability_ttl_secs);

        self.cache
            .get_or_fill(&key, ttl, move || async move {
                executor
                    .execute(|| source.available_conditions(item_id))
                    .await
            })
            .await
    }

    /// Run every `interval_secs` until the handle is aborted. Runs never overlap.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(self.settings.interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tracing::info!(target: "scheduler", "polling for streaming release subscriptions");
                self.run_once().await;
            }
        })
    }
}
