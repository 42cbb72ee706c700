//! Run context: one data source, one notifier and one tick store,
//! constructed once per process and threaded through every operation.

use crate::analysis::{AnalysisConfig, InfluenceAnalyzer};
use crate::core::config::{MonitorConfig, TickScopeMode};
use crate::core::error::{BgsError, Result};
use crate::core::types::{Name, ScopeKey};
use crate::report::builder::ReportBuilder;
use crate::report::notifier::{deliver_in_order, AnyNotifier, Notifier};
use crate::source::{AnySource, DataSource};
use crate::tick::store::{JsonFileTickStore, TickStore};
use crate::tick::tracker::{TickChange, TickTracker};
use std::sync::Arc;

/// Tracker namespace for tick announcements
pub const ANNOUNCE_NAMESPACE: &str = "announce";
/// Tracker namespace for report cycles
pub const REPORT_NAMESPACE: &str = "report";

/// What happened to each monitored faction in one report cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportCycle {
    /// Factions whose pages were all delivered
    pub delivered: Vec<String>,
    /// Factions not reported: unchanged tick or unknown to the source
    pub skipped: Vec<String>,
    /// Factions whose delivery failed part-way
    pub failed: Vec<String>,
    /// Factions whose root lookup failed (source down, timed out, malformed)
    pub unreachable: Vec<String>,
    /// Tick scopes committed at the end of the cycle
    pub commits: usize,
}

impl ReportCycle {
    /// Every faction that could be evaluated was delivered
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unreachable.is_empty()
    }
}

enum FactionOutcome {
    Delivered,
    Skipped,
    Failed,
    Unreachable,
}

pub struct Monitor<S: DataSource, N: Notifier, T: TickStore> {
    config: MonitorConfig,
    source: Arc<S>,
    notifier: N,
    store: T,
    builder: ReportBuilder,
}

impl Monitor<AnySource, AnyNotifier, JsonFileTickStore> {
    /// Build the configured backends
    pub fn from_config(config: MonitorConfig) -> Result<Self> {
        let source = AnySource::from_config(&config.source)?;
        let notifier = AnyNotifier::from_config(&config.delivery, &config.source)?;
        let store = JsonFileTickStore::open(&config.tick.cache_path);
        Self::new(config, Arc::new(source), notifier, store)
    }
}

impl<S: DataSource, N: Notifier, T: TickStore> Monitor<S, N, T> {
    /// Fails fast on invalid configuration
    pub fn new(config: MonitorConfig, source: Arc<S>, notifier: N, store: T) -> Result<Self> {
        config.validate()?;
        let builder = ReportBuilder::new(config.thresholds.page_capacity);
        tracing::info!(
            factions = config.factions.len(),
            policy = ?config.tick.policy,
            scope = ?config.tick.scope,
            "Monitor ready"
        );
        Ok(Self {
            config,
            source,
            notifier,
            store,
            builder,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn store(&self) -> &T {
        &self.store
    }

    fn tracker(&mut self, namespace: &str) -> TickTracker<&mut T> {
        TickTracker::new(&mut self.store, namespace, self.config.tick.policy)
    }

    async fn current_tick(&self, scope: &ScopeKey) -> Result<Option<String>> {
        let timeout = self.config.source.timeout();
        match tokio::time::timeout(timeout, self.source.fetch_current_tick(scope)).await {
            Ok(result) => result,
            Err(_) => Err(BgsError::Unavailable(format!(
                "tick lookup for {} timed out after {:?}",
                scope, timeout
            ))),
        }
    }

    /// Announce a new galaxy tick to every announce destination.
    ///
    /// Commits only after all destinations received the page.
    pub async fn announce_tick(&mut self) -> Result<TickChange> {
        let scope = ScopeKey::Global;
        let Some(token) = self.current_tick(&scope).await? else {
            tracing::warn!("No galaxy tick available");
            return Ok(TickChange::Unchanged);
        };

        let change = self.tracker(ANNOUNCE_NAMESPACE).observe(&scope, &token);
        if !change.is_changed() {
            tracing::info!(token = %token, "Tick unchanged, skipping announcement");
            return Ok(change);
        }

        tracing::info!(token = %token, "New tick detected");
        let page = self.builder.tick_page(&token);
        for destination in self.config.announce_destinations() {
            deliver_in_order(&self.notifier, &destination, std::slice::from_ref(&page)).await?;
        }

        self.tracker(ANNOUNCE_NAMESPACE).commit(&scope, &token)?;
        Ok(change)
    }

    /// Maintenance on/off notice to every announce destination
    pub async fn announce_maintenance(&self, active: bool) -> Result<()> {
        let page = self.builder.maintenance_page(active);
        for destination in self.config.announce_destinations() {
            deliver_in_order(&self.notifier, &destination, std::slice::from_ref(&page)).await?;
        }
        tracing::info!(active, "Maintenance announcement sent");
        Ok(())
    }

    /// One report cycle over every monitored faction, gated on ticks unless
    /// `force` is set.
    pub async fn run_reports(&mut self, force: bool) -> Result<ReportCycle> {
        match self.config.tick.scope {
            TickScopeMode::Global => self.run_reports_global(force).await,
            TickScopeMode::PerFaction => self.run_reports_per_faction(force).await,
        }
    }

    async fn run_reports_global(&mut self, force: bool) -> Result<ReportCycle> {
        let mut cycle = ReportCycle::default();
        let scope = ScopeKey::Global;
        let token = self.gate(&scope, force).await;
        if token.is_none() && !force {
            cycle.skipped = self.config.factions.iter().map(|f| f.name.clone()).collect();
            return Ok(cycle);
        }

        for faction in self.config.factions.clone() {
            let outcome = self.report_faction(&faction.name, &faction.destination).await;
            record(&mut cycle, &faction.name, outcome);
        }

        if let Some(token) = token.flatten() {
            if cycle.is_complete() {
                self.tracker(REPORT_NAMESPACE).commit(&scope, &token)?;
                cycle.commits += 1;
            } else {
                tracing::warn!(
                    failed = cycle.failed.len(),
                    unreachable = cycle.unreachable.len(),
                    "Reports outstanding, tick left uncommitted"
                );
            }
        }
        Ok(cycle)
    }

    async fn run_reports_per_faction(&mut self, force: bool) -> Result<ReportCycle> {
        let mut cycle = ReportCycle::default();

        for faction in self.config.factions.clone() {
            let scope = ScopeKey::faction(faction.name.as_str());
            let token = self.gate(&scope, force).await;
            if token.is_none() && !force {
                cycle.skipped.push(faction.name.clone());
                continue;
            }

            let outcome = self.report_faction(&faction.name, &faction.destination).await;
            let delivered = matches!(outcome, FactionOutcome::Delivered);
            record(&mut cycle, &faction.name, outcome);

            if let (true, Some(token)) = (delivered, token.flatten()) {
                self.tracker(REPORT_NAMESPACE).commit(&scope, &token)?;
                cycle.commits += 1;
            }
        }
        Ok(cycle)
    }

    /// `None`: do not report. `Some(None)`: report without a token to
    /// commit (forced run, tick unknown). `Some(Some(token))`: report, then
    /// commit `token`.
    async fn gate(&mut self, scope: &ScopeKey, force: bool) -> Option<Option<String>> {
        let token = match self.current_tick(scope).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "Tick lookup failed");
                None
            }
        };

        let Some(token) = token else {
            if force {
                return Some(None);
            }
            tracing::warn!(scope = %scope, "No tick token, skipping report");
            return None;
        };

        let change = self.tracker(REPORT_NAMESPACE).observe(scope, &token);
        if change.is_changed() || force {
            Some(Some(token))
        } else {
            tracing::info!(scope = %scope, token = %token, "Tick unchanged, skipping report");
            None
        }
    }

    async fn report_faction(&self, faction: &str, destination: &str) -> FactionOutcome {
        let analyzer = InfluenceAnalyzer::new(
            Arc::clone(&self.source),
            AnalysisConfig::from(&self.config),
        );

        let result = match analyzer.analyze(&Name::new(faction)).await {
            Ok(result) => result,
            Err(BgsError::NotFound(what)) => {
                tracing::warn!(faction, what = %what, "Faction unknown to the source, no report");
                return FactionOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(faction, error = %e, "Faction lookup failed, report deferred");
                return FactionOutcome::Unreachable;
            }
        };

        let pages = self.builder.build(&result);
        match deliver_in_order(&self.notifier, destination, &pages).await {
            Ok(()) => {
                tracing::info!(faction, destination, pages = pages.len(), "Report delivered");
                FactionOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(faction, destination, error = %e, "Report delivery failed");
                FactionOutcome::Failed
            }
        }
    }
}

fn record(cycle: &mut ReportCycle, faction: &str, outcome: FactionOutcome) {
    let bucket = match outcome {
        FactionOutcome::Delivered => &mut cycle.delivered,
        FactionOutcome::Skipped => &mut cycle.skipped,
        FactionOutcome::Failed => &mut cycle.failed,
        FactionOutcome::Unreachable => &mut cycle.unreachable,
    };
    bucket.push(faction.to_string());
}
