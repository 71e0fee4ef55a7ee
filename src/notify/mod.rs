pub mod email;

use anyhow::Result;
use serde::Serialize;

use crate::subscription::{InterestRecord, MatchResult};

/// A fully formed message for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub interest_id: i64,
}

impl Notification {
    /// Streaming-release notice for a matched interest.
    pub fn for_match(interest: &InterestRecord, m: &MatchResult) -> Self {
        let platforms = m
            .satisfied_conditions
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            recipient: interest.recipient.clone(),
            subject: format!("{} is now streaming", interest.item_name),
            body: format!(
                "Good news! \"{}\" is now available on: {}.\n",
                interest.item_name, platforms
            ),
            interest_id: m.interest_id,
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, n: &Notification) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Logs instead of sending; used when no delivery channel is configured.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &Notification) -> Result<()> {
        tracing::info!(
            target: "notify",
            recipient = %n.recipient,
            interest_id = n.interest_id,
            subject = %n.subject,
            "notification (log only)"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    #[test]
    fn match_notice_names_movie_and_platforms() {
        let interest = InterestRecord {
            interest_id: 4,
            target_item_id: 603,
            item_name: "The Matrix".into(),
            recipient: "neo@example.com".into(),
            created_at: Utc::now(),
        };
        let m = MatchResult {
            interest_id: 4,
            satisfied_conditions: BTreeSet::from(["Netflix".to_string(), "Hulu".to_string()]),
        };
        let n = Notification::for_match(&interest, &m);
        assert_eq!(n.recipient, "neo@example.com");
        assert_eq!(n.subject, "The Matrix is now streaming");
        assert!(n.body.contains("Hulu, Netflix"));
    }
}
