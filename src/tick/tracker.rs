//! Tick change detection
//!
//! Per scope the tracker is either Unknown (nothing committed) or
//! Known(last committed token). `observe` never writes; the caller commits
//! once the corresponding report has been handed off, so a failed delivery
//! leaves the change pending for the next run.

use crate::core::config::TickPolicy;
use crate::core::error::Result;
use crate::core::types::ScopeKey;
use crate::tick::store::TickStore;
use chrono::{DateTime, NaiveDate, Utc};

/// Outcome of comparing a fetched token with the committed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickChange {
    Changed {
        previous: Option<String>,
        current: String,
    },
    Unchanged,
}

impl TickChange {
    pub fn is_changed(&self) -> bool {
        matches!(self, TickChange::Changed { .. })
    }
}

pub struct TickTracker<S: TickStore> {
    store: S,
    namespace: String,
    policy: TickPolicy,
}

impl<S: TickStore> TickTracker<S> {
    /// `namespace` separates independent consumers sharing one store
    pub fn new(store: S, namespace: impl Into<String>, policy: TickPolicy) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy,
        }
    }

    pub fn policy(&self) -> TickPolicy {
        self.policy
    }

    /// `"<namespace>/<scope storage key>"`
    pub fn storage_key(&self, scope: &ScopeKey) -> String {
        format!("{}/{}", self.namespace, scope.storage_key())
    }

    pub fn last_committed(&self, scope: &ScopeKey) -> Option<String> {
        self.store.get(&self.storage_key(scope))
    }

    /// Compare `current` against the committed token without persisting it
    pub fn observe(&self, scope: &ScopeKey, current: &str) -> TickChange {
        let previous = self.last_committed(scope);

        let changed = match previous.as_deref() {
            None => true,
            Some(last) if last == current => false,
            Some(last) => match self.policy {
                TickPolicy::Exact => true,
                TickPolicy::Daily => match (utc_date(last), utc_date(current)) {
                    (Some(a), Some(b)) => a != b,
                    _ => true,
                },
            },
        };

        if changed {
            TickChange::Changed {
                previous,
                current: current.to_string(),
            }
        } else {
            TickChange::Unchanged
        }
    }

    /// Make `token` the comparison baseline for `scope`
    pub fn commit(&mut self, scope: &ScopeKey, token: &str) -> Result<()> {
        let key = self.storage_key(scope);
        self.store.set(&key, token)?;
        tracing::info!(scope = %key, token, "Committed tick");
        Ok(())
    }
}

fn utc_date(token: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(token)
        .ok()
        .map(|ts| ts.with_timezone(&Utc).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::store::MemoryTickStore;

    fn tracker(policy: TickPolicy) -> TickTracker<MemoryTickStore> {
        TickTracker::new(MemoryTickStore::new(), "report", policy)
    }

    #[test]
    fn test_first_observation_is_changed() {
        let t = tracker(TickPolicy::Exact);
        let change = t.observe(&ScopeKey::Global, "2025-01-01T00:00:00Z");
        assert_eq!(
            change,
            TickChange::Changed {
                previous: None,
                current: "2025-01-01T00:00:00Z".into()
            }
        );
    }

    #[test]
    fn test_observe_does_not_commit() {
        let t = tracker(TickPolicy::Exact);
        assert!(t.observe(&ScopeKey::Global, "a").is_changed());
        assert!(t.observe(&ScopeKey::Global, "a").is_changed());
        assert_eq!(t.last_committed(&ScopeKey::Global), None);
    }

    #[test]
    fn test_commit_sets_baseline() {
        let mut t = tracker(TickPolicy::Exact);
        t.commit(&ScopeKey::Global, "2025-01-01T00:00:00Z").unwrap();
        assert_eq!(
            t.observe(&ScopeKey::Global, "2025-01-01T00:00:00Z"),
            TickChange::Unchanged
        );
        assert!(t.observe(&ScopeKey::Global, "2025-01-02T00:00:00Z").is_changed());
    }

    #[test]
    fn test_exact_policy_is_byte_exact() {
        let mut t = tracker(TickPolicy::Exact);
        t.commit(&ScopeKey::Global, "2025-01-01T00:00:00Z").unwrap();
        assert!(t.observe(&ScopeKey::Global, "2025-01-01T00:00:00.000Z").is_changed());
        assert!(t.observe(&ScopeKey::Global, "2025-01-01T12:00:00Z").is_changed());
    }

    #[test]
    fn test_daily_policy_collapses_same_date() {
        let mut t = tracker(TickPolicy::Daily);
        t.commit(&ScopeKey::Global, "2025-01-01T00:00:00Z").unwrap();
        assert_eq!(
            t.observe(&ScopeKey::Global, "2025-01-01T17:30:00Z"),
            TickChange::Unchanged
        );
        assert!(t.observe(&ScopeKey::Global, "2025-01-02T00:00:00Z").is_changed());
        // Unparsable tokens fall back to exact comparison
        t.commit(&ScopeKey::Global, "marker-1").unwrap();
        assert!(t.observe(&ScopeKey::Global, "marker-2").is_changed());
    }

    #[test]
    fn test_scopes_and_namespaces_are_independent() {
        let mut store = MemoryTickStore::new();
        {
            let mut announce = TickTracker::new(&mut store, "announce", TickPolicy::Exact);
            announce.commit(&ScopeKey::Global, "t1").unwrap();
        }
        let report = TickTracker::new(&mut store, "report", TickPolicy::Exact);
        assert!(report.observe(&ScopeKey::Global, "t1").is_changed());
        assert!(report
            .observe(&ScopeKey::faction("House of Saga"), "t1")
            .is_changed());
        assert_eq!(
            report.storage_key(&ScopeKey::faction("House of Saga")),
            "report/faction:house of saga"
        );
    }
}
