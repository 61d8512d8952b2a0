//! Sanctions screening against a periodically refreshed snapshot
//!
//! The feed itself is an external collaborator; this module owns the
//! snapshot, its age, and the screening checkpoints. Screening runs at
//! submission, acceptance, and immediately before commit; a snapshot
//! older than the configured window cannot be trusted.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ledger_core::AccountId;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// External sanctions-list collaborator
#[async_trait]
pub trait SanctionsFeed: Send + Sync {
    /// Fetch the full current list of sanctioned account identifiers
    async fn fetch(&self) -> Result<HashSet<String>>;
}

/// In-memory feed for tests and local runs
pub struct StaticFeed {
    entries: RwLock<HashSet<String>>,
}

impl StaticFeed {
    /// Create with an empty list
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashSet::new()),
        }
    }

    /// Add an entry to the list
    pub fn add(&self, id: impl Into<String>) {
        self.entries.write().insert(normalize(&id.into()));
    }
}

impl Default for StaticFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SanctionsFeed for StaticFeed {
    async fn fetch(&self) -> Result<HashSet<String>> {
        Ok(self.entries.read().clone())
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

struct Snapshot {
    entries: HashSet<String>,
    fetched_at: DateTime<Utc>,
}

/// Screening service holding the current snapshot
pub struct SanctionsScreen {
    feed: Arc<dyn SanctionsFeed>,
    snapshot: RwLock<Option<Snapshot>>,
    max_age: Duration,
}

impl SanctionsScreen {
    /// Create; the first screen forces a fetch
    pub fn new(feed: Arc<dyn SanctionsFeed>, max_age: Duration) -> Self {
        Self {
            feed,
            snapshot: RwLock::new(None),
            max_age,
        }
    }

    /// Refresh the snapshot if missing or older than the window
    pub async fn refresh_if_stale(&self) -> Result<()> {
        let needs_refresh = match &*self.snapshot.read() {
            Some(s) => Utc::now() - s.fetched_at > self.max_age,
            None => true,
        };

        if needs_refresh {
            let entries = self.feed.fetch().await?;
            tracing::info!(entries = entries.len(), "Sanctions snapshot refreshed");
            *self.snapshot.write() = Some(Snapshot {
                entries,
                fetched_at: Utc::now(),
            });
        }

        Ok(())
    }

    /// Age of the current snapshot in seconds (i64::MAX when absent)
    pub fn snapshot_age_s(&self) -> i64 {
        self.snapshot
            .read()
            .as_ref()
            .map(|s| (Utc::now() - s.fetched_at).num_seconds())
            .unwrap_or(i64::MAX)
    }

    /// Screen a set of accounts. Refreshes first if stale, then returns
    /// (account, hit) pairs. Errors if the snapshot still cannot be
    /// trusted after refresh.
    pub async fn screen(&self, accounts: &[AccountId]) -> Result<Vec<(AccountId, bool)>> {
        self.refresh_if_stale().await?;

        let snapshot = self.snapshot.read();
        let snapshot = snapshot.as_ref().ok_or(Error::SanctionsStale {
            age_s: i64::MAX,
            max_s: self.max_age.num_seconds(),
        })?;

        let age_s = (Utc::now() - snapshot.fetched_at).num_seconds();
        if age_s > self.max_age.num_seconds() {
            return Err(Error::SanctionsStale {
                age_s,
                max_s: self.max_age.num_seconds(),
            });
        }

        Ok(accounts
            .iter()
            .map(|a| {
                let hit = snapshot.entries.contains(&normalize(a.as_str()));
                if hit {
                    tracing::error!(account = %a, "Sanctions list match");
                }
                (a.clone(), hit)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_screen_flags_listed_account() {
        let feed = Arc::new(StaticFeed::new());
        feed.add("BAD-001");

        let screen = SanctionsScreen::new(feed, Duration::hours(6));
        let results = screen
            .screen(&[AccountId::new("SUP-001"), AccountId::new("BAD-001")])
            .await
            .unwrap();

        assert_eq!(results[0].1, false);
        assert_eq!(results[1].1, true);
    }

    #[tokio::test]
    async fn test_screen_is_case_insensitive() {
        let feed = Arc::new(StaticFeed::new());
        feed.add("bad-001");

        let screen = SanctionsScreen::new(feed, Duration::hours(6));
        let results = screen.screen(&[AccountId::new("BAD-001")]).await.unwrap();
        assert!(results[0].1);
    }

    #[tokio::test]
    async fn test_snapshot_age_tracked() {
        let feed = Arc::new(StaticFeed::new());
        let screen = SanctionsScreen::new(feed, Duration::hours(6));

        assert_eq!(screen.snapshot_age_s(), i64::MAX);
        screen.refresh_if_stale().await.unwrap();
        assert!(screen.snapshot_age_s() < 5);
    }
}
