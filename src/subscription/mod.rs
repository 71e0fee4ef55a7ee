//! Streaming-release subscriptions: interest records, the repository seam the
//! scheduler reads them through, and the matching rule.

pub mod scheduler;

pub use scheduler::{RunSummary, SubscriptionMatchingScheduler};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// A user's request to hear about one movie. Requested condition tags are
/// stored separately and loaded per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterestRecord {
    pub interest_id: i64,
    pub target_item_id: i64,
    pub item_name: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
}

/// Conditions an interest asked for that are available now. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub interest_id: i64,
    pub satisfied_conditions: BTreeSet<String>,
}

impl MatchResult {
    /// `None` when nothing requested is available.
    pub fn compute(
        interest_id: i64,
        requested: &BTreeSet<String>,
        available: &BTreeSet<String>,
    ) -> Option<Self> {
        let satisfied: BTreeSet<String> = requested.intersection(available).cloned().collect();
        if satisfied.is_empty() {
            return None;
        }
        Some(Self {
            interest_id,
            satisfied_conditions: satisfied,
        })
    }
}

/// `[yesterday 00:00, tomorrow 00:00)` in UTC around `today`.
pub fn lookup_window(today: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let end = today.checked_add_days(Days::new(1)).unwrap_or(today);
    (
        start.and_time(chrono::NaiveTime::MIN).and_utc(),
        end.and_time(chrono::NaiveTime::MIN).and_utc(),
    )
}

/// Read side of subscription storage.
#[async_trait::async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Interests with `from <= created_at < to`.
    async fn find_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InterestRecord>>;

    /// Requested condition tags keyed by interest id. Ids with no tags may be absent.
    async fn conditions_for(&self, interest_ids: &[i64]) -> Result<HashMap<i64, BTreeSet<String>>>;
}

/// In-process repository.
#[derive(Default)]
pub struct MemoryRepository {
    interests: RwLock<Vec<InterestRecord>>,
    conditions: RwLock<HashMap<i64, BTreeSet<String>>>,
    last_id: AtomicI64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<I, S>(&self, record: InterestRecord, conditions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: BTreeSet<String> = conditions.into_iter().map(Into::into).collect();
        self.last_id.fetch_max(record.interest_id, Ordering::SeqCst);
        self.conditions.write().insert(record.interest_id, tags);
        self.interests.write().push(record);
    }

    /// Record a new interest under the next free id and return it.
    pub fn subscribe<I, S>(
        &self,
        target_item_id: i64,
        item_name: impl Into<String>,
        recipient: impl Into<String>,
        conditions: I,
        created_at: DateTime<Utc>,
    ) -> InterestRecord
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = InterestRecord {
            interest_id: self.last_id.fetch_add(1, Ordering::SeqCst) + 1,
            target_item_id,
            item_name: item_name.into(),
            recipient: recipient.into(),
            created_at,
        };
        self.insert(record.clone(), conditions);
        record
    }

    pub fn len(&self) -> usize {
        self.interests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SubscriptionRepository for MemoryRepository {
    async fn find_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InterestRecord>> {
        Ok(self
            .interests
            .read()
            .iter()
            .filter(|r| r.created_at >= from && r.created_at < to)
            .cloned()
            .collect())
    }

    async fn conditions_for(&self, interest_ids: &[i64]) -> Result<HashMap<i64, BTreeSet<String>>> {
        let all = self.conditions.read();
        Ok(interest_ids
            .iter()
            .filter_map(|id| all.get(id).map(|tags| (*id, tags.clone())))
            .collect())
    }
}
