//! Per-faction influence risk analysis
//!
//! Walks every system a faction is present in and, for the systems it
//! controls, flags low influence (with the first reportable conflict) and
//! the first rival sitting within striking distance. Lookup failures skip
//! the affected system or rival; only a failed root faction lookup fails
//! the whole evaluation.

use crate::core::config::MonitorConfig;
use crate::core::error::{BgsError, Result};
use crate::core::types::{FactionPresence, Name, SystemSnapshot};
use crate::source::DataSource;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Thresholds and limits for one analyzer
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Percent; controlled systems strictly below are low influence
    pub low_influence_threshold: f64,
    /// Influence points; a lead of `(0, close_threshold]` is close
    pub close_threshold: f64,
    /// Bound for each data source call
    pub query_timeout: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            low_influence_threshold: 39.0,
            close_threshold: 19.0,
            query_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&MonitorConfig> for AnalysisConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            low_influence_threshold: config.thresholds.low_influence,
            close_threshold: config.thresholds.close_competitor,
            query_timeout: config.source.timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowInfluenceEntry {
    pub system_name: String,
    pub influence_pct: f64,
    /// "<Kind> with <opponent>" of the first reportable conflict
    pub conflict_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorEntry {
    pub system_name: String,
    pub own_influence_pct: f64,
    pub rival_name: String,
    pub rival_influence_pct: f64,
}

/// Result of evaluating one faction, in presence order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub faction_name: String,
    pub low_influence_systems: Vec<LowInfluenceEntry>,
    pub close_competitor_systems: Vec<CompetitorEntry>,
    pub has_reportable_conflict: bool,
}

impl AnalysisResult {
    pub fn new(faction_name: impl Into<String>) -> Self {
        Self {
            faction_name: faction_name.into(),
            low_influence_systems: Vec::new(),
            close_competitor_systems: Vec::new(),
            has_reportable_conflict: false,
        }
    }

    pub fn entry_count(&self) -> usize {
        self.low_influence_systems.len() + self.close_competitor_systems.len()
    }

    pub fn is_all_clear(&self) -> bool {
        self.entry_count() == 0
    }
}

/// `0 < own - rival <= threshold`, on unrounded percentages
pub fn is_close_competitor(own_pct: f64, rival_pct: f64, threshold: f64) -> bool {
    let diff = own_pct - rival_pct;
    diff > 0.0 && diff <= threshold
}

pub struct InfluenceAnalyzer<S: DataSource> {
    source: Arc<S>,
    config: AnalysisConfig,
}

impl<S: DataSource> InfluenceAnalyzer<S> {
    pub fn new(source: Arc<S>, config: AnalysisConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Evaluate every system of presence of `faction`
    pub async fn analyze(&self, faction: &Name) -> Result<AnalysisResult> {
        let timeout = self.config.query_timeout;
        let record = with_timeout(timeout, self.source.fetch_faction(faction)).await?;

        let mut result = AnalysisResult::new(record.name.as_str());

        for presence in &record.presence {
            let system = match with_timeout(timeout, self.source.fetch_system(&presence.system_name)).await {
                Ok(system) => system,
                Err(e) => {
                    tracing::warn!(
                        faction = %record.name,
                        system = %presence.system_name,
                        error = %e,
                        "Skipping system"
                    );
                    continue;
                }
            };

            if !system.is_controlled_by(&record.name) {
                continue;
            }

            self.check_low_influence(presence, &mut result);

            if let Some(entry) = self.find_close_rival(&record.name, presence, &system).await {
                result.close_competitor_systems.push(entry);
            }
        }

        tracing::info!(
            faction = %result.faction_name,
            low_influence = result.low_influence_systems.len(),
            close_competitors = result.close_competitor_systems.len(),
            conflict = result.has_reportable_conflict,
            "Faction analysed"
        );

        Ok(result)
    }

    fn check_low_influence(&self, presence: &FactionPresence, result: &mut AnalysisResult) {
        let influence_pct = presence.influence_pct();
        if influence_pct >= self.config.low_influence_threshold {
            return;
        }

        let conflict_summary = presence.first_reportable_conflict().map(|c| c.summary());
        if conflict_summary.is_some() {
            result.has_reportable_conflict = true;
        }

        result.low_influence_systems.push(LowInfluenceEntry {
            system_name: presence.system_name.to_string(),
            influence_pct,
            conflict_summary,
        });
    }

    /// Query every rival concurrently, then take the first qualifying one in
    /// the system's faction-list order (not the closest one).
    async fn find_close_rival(
        &self,
        faction: &Name,
        presence: &FactionPresence,
        system: &SystemSnapshot,
    ) -> Option<CompetitorEntry> {
        let rivals: Vec<Name> = system.rivals_of(faction).cloned().collect();
        if rivals.is_empty() {
            return None;
        }

        let timeout = self.config.query_timeout;
        let mut lookups = JoinSet::new();
        for (idx, rival) in rivals.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            let system_name = system.name.clone();
            lookups.spawn(async move {
                let influence = with_timeout(
                    timeout,
                    source.fetch_faction_influence(&rival, &system_name),
                )
                .await;
                (idx, influence)
            });
        }

        let mut influences: Vec<Option<f64>> = vec![None; rivals.len()];
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((idx, Ok(influence))) => influences[idx] = influence,
                Ok((idx, Err(e))) => {
                    tracing::warn!(
                        system = %system.name,
                        rival = %rivals[idx],
                        error = %e,
                        "Rival influence unavailable"
                    );
                }
                Err(e) => {
                    tracing::warn!(system = %system.name, error = %e, "Rival lookup task failed");
                }
            }
        }

        let own_pct = presence.influence_pct();
        rivals
            .into_iter()
            .zip(influences)
            .find_map(|(rival, influence)| {
                let rival_pct = influence? * 100.0;
                tracing::debug!(system = %system.name, rival = %rival, own_pct, rival_pct, "Rival influence");
                is_close_competitor(own_pct, rival_pct, self.config.close_threshold).then(|| {
                    CompetitorEntry {
                        system_name: system.name.to_string(),
                        own_influence_pct: own_pct,
                        rival_name: rival.to_string(),
                        rival_influence_pct: rival_pct,
                    }
                })
            })
    }
}

/// A timed-out call degrades to `Unavailable` like any other transport error
async fn with_timeout<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(BgsError::Unavailable(format!(
            "query timed out after {:?}",
            timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Conflict, ConflictKind, ConflictStatus, FactionRecord};
    use crate::source::MemorySource;

    fn presence(system: &str, influence: f64, conflicts: Vec<Conflict>) -> FactionPresence {
        FactionPresence {
            system_name: Name::new(system),
            influence,
            conflicts,
        }
    }

    fn system(name: &str, controller: &str, factions: &[&str]) -> SystemSnapshot {
        SystemSnapshot::new(
            name,
            Some(Name::new(controller)),
            factions.iter().map(|f| Name::new(*f)),
        )
    }

    fn faction(name: &str, presence: Vec<FactionPresence>) -> FactionRecord {
        FactionRecord {
            name: Name::new(name),
            presence,
            updated_at: None,
        }
    }

    fn analyzer(source: MemorySource) -> InfluenceAnalyzer<MemorySource> {
        InfluenceAnalyzer::new(Arc::new(source), AnalysisConfig::default())
    }

    #[test]
    fn test_close_competitor_bounds() {
        assert!(is_close_competitor(60.0, 45.0, 19.0));
        assert!(is_close_competitor(60.0, 41.0, 19.0));
        assert!(!is_close_competitor(60.0, 40.0, 19.0));
        assert!(!is_close_competitor(45.0, 45.0, 19.0));
        assert!(!is_close_competitor(40.0, 45.0, 19.0));
    }

    #[tokio::test]
    async fn test_first_reportable_conflict_wins() {
        let mut source = MemorySource::new();
        source.insert_faction(faction(
            "Torval Mining Ltd",
            vec![presence(
                "Bast",
                0.30,
                vec![
                    Conflict::new(ConflictKind::Unrest, ConflictStatus::Active, "Noise"),
                    Conflict::new(ConflictKind::Election, ConflictStatus::Pending, "First Co"),
                    Conflict::new(ConflictKind::War, ConflictStatus::Active, "Second Co"),
                ],
            )],
        ));
        source.insert_system(system("Bast", "Torval Mining Ltd", &["Torval Mining Ltd"]));

        let result = analyzer(source)
            .analyze(&Name::new("Torval Mining Ltd"))
            .await
            .unwrap();
        assert_eq!(result.low_influence_systems.len(), 1);
        assert_eq!(
            result.low_influence_systems[0].conflict_summary.as_deref(),
            Some("Election with First Co")
        );
        assert!(result.has_reportable_conflict);
    }

    #[tokio::test]
    async fn test_low_influence_without_conflict() {
        let mut source = MemorySource::new();
        source.insert_faction(faction(
            "House of Saga",
            vec![presence(
                "Ross 128",
                0.20,
                vec![Conflict::new(ConflictKind::War, ConflictStatus::Inactive, "Old Foe")],
            )],
        ));
        source.insert_system(system("Ross 128", "House of Saga", &["House of Saga"]));

        let result = analyzer(source).analyze(&Name::new("House of Saga")).await.unwrap();
        assert_eq!(result.low_influence_systems[0].conflict_summary, None);
        assert!(!result.has_reportable_conflict);
    }

    #[tokio::test]
    async fn test_first_qualifying_rival_not_closest() {
        let mut source = MemorySource::new();
        source.insert_faction(faction("Us", vec![presence("Sol", 0.60, vec![])]));
        source.insert_faction(faction("Far", vec![presence("Sol", 0.10, vec![])]));
        source.insert_faction(faction("Close", vec![presence("Sol", 0.45, vec![])]));
        source.insert_faction(faction("Closest", vec![presence("Sol", 0.55, vec![])]));
        source.insert_system(system("Sol", "Us", &["Far", "Us", "Close", "Closest"]));

        let result = analyzer(source).analyze(&Name::new("Us")).await.unwrap();
        assert_eq!(result.close_competitor_systems.len(), 1);
        assert_eq!(result.close_competitor_systems[0].rival_name, "Close");
    }

    #[tokio::test]
    async fn test_unavailable_rival_is_skipped() {
        let mut source = MemorySource::new();
        source.insert_faction(faction("Us", vec![presence("Sol", 0.60, vec![])]));
        source.insert_faction(faction("Broken", vec![presence("Sol", 0.50, vec![])]));
        source.insert_faction(faction("Fine", vec![presence("Sol", 0.50, vec![])]));
        source.insert_system(system("Sol", "Us", &["Us", "Broken", "Fine"]));
        source.mark_unavailable("Broken");

        let result = analyzer(source).analyze(&Name::new("Us")).await.unwrap();
        assert_eq!(result.close_competitor_systems[0].rival_name, "Fine");
    }

    #[tokio::test]
    async fn test_slow_rival_times_out() {
        let mut source = MemorySource::new();
        source.insert_faction(faction("Us", vec![presence("Sol", 0.60, vec![])]));
        source.insert_faction(faction("Slow", vec![presence("Sol", 0.50, vec![])]));
        source.insert_system(system("Sol", "Us", &["Us", "Slow"]));
        source.set_latency("Slow", Duration::from_secs(5));

        let config = AnalysisConfig {
            query_timeout: Duration::from_millis(50),
            ..AnalysisConfig::default()
        };
        let analyzer = InfluenceAnalyzer::new(Arc::new(source), config);
        let result = analyzer.analyze(&Name::new("Us")).await.unwrap();
        assert!(result.close_competitor_systems.is_empty());
    }

    #[tokio::test]
    async fn test_missing_faction_fails_root_lookup() {
        let err = analyzer(MemorySource::new())
            .analyze(&Name::new("Nobody"))
            .await
            .unwrap_err();
        assert!(matches!(err, BgsError::NotFound(_)));
    }
}
