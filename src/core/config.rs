//! Monitor configuration loaded from TOML
//!
//! Every threshold the analysis and paging use lives here, with the
//! defaults the reports have historically been produced with.

use crate::core::error::{BgsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "bgs-monitor.toml";

/// A faction to evaluate and where its pages go
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoredFaction {
    /// Faction name as known to the data source (case-insensitive)
    pub name: String,
    /// Destination key handed to the notifier
    pub destination: String,
}

/// Analysis and paging thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Controlled systems below this influence percentage are reported
    ///
    /// 39.0 by default. Some deployments ran with 49.0 to get earlier
    /// warnings at the cost of noisier reports.
    pub low_influence: f64,

    /// Maximum lead, in influence points, at which a rival counts as close
    ///
    /// A rival qualifies when `0 < own - rival <= close_competitor`.
    pub close_competitor: f64,

    /// Maximum entries per report page
    ///
    /// 25 matches the field limit of the chat embeds pages are rendered to.
    pub page_capacity: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            low_influence: 39.0,
            close_competitor: 19.0,
            page_capacity: 25,
        }
    }
}

/// Which backend answers faction/system/tick queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Remote,
    Sqlite,
    Fixture,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Base URL of the faction/system query API
    pub api_url: String,
    /// Galaxy tick endpoint
    pub tick_url: String,
    /// Database path for the sqlite backend
    pub database: String,
    /// JSON snapshot path for the fixture backend
    pub fixture: String,
    /// Upper bound for every single data source call
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Remote,
            api_url: "https://elitebgs.app/api/ebgs/v5".into(),
            tick_url: "http://tick.infomancer.uk/galtick.json".into(),
            database: "bgs.db".into(),
            fixture: "bgs-fixture.json".into(),
            timeout_secs: 15,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How report cycles are gated on ticks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickScopeMode {
    /// One galaxy tick gates every faction
    Global,
    /// Each faction is gated on its own update marker
    PerFaction,
}

/// When two different tokens still count as the same tick
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Any byte difference is a change
    Exact,
    /// Tokens on the same UTC calendar date as the committed one are not
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub cache_path: String,
    pub scope: TickScopeMode,
    pub policy: TickPolicy,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            cache_path: "tick_cache/ticks.json".into(),
            scope: TickScopeMode::Global,
            policy: TickPolicy::Exact,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    Stdout,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub notifier: NotifierKind,
    /// Destination key -> webhook URL
    pub webhooks: BTreeMap<String, String>,
    /// Destinations for tick and maintenance announcements.
    /// Empty means every faction destination.
    pub announce_destinations: Vec<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            notifier: NotifierKind::Stdout,
            webhooks: BTreeMap::new(),
            announce_destinations: Vec::new(),
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub factions: Vec<MonitoredFaction>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub tick: TickConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl MonitorConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply `BGS_WEBHOOK_<DESTINATION>` overrides
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BgsError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let mut config: MonitorConfig = toml::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Webhook URLs are secrets and may come from the environment instead
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let destinations: Vec<String> = self
            .factions
            .iter()
            .map(|f| f.destination.clone())
            .chain(self.delivery.announce_destinations.iter().cloned())
            .collect();

        for destination in destinations {
            let var = webhook_env_var(&destination);
            if let Some(url) = lookup(&var).filter(|u| !u.trim().is_empty()) {
                self.delivery.webhooks.insert(destination, url.trim().to_string());
            }
        }
    }

    /// Validate before any evaluation starts. Every error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.factions.is_empty() {
            return Err(BgsError::Config("no monitored factions configured".into()));
        }

        for faction in &self.factions {
            if faction.name.trim().is_empty() {
                return Err(BgsError::Config("monitored faction with empty name".into()));
            }
            if faction.destination.trim().is_empty() {
                return Err(BgsError::Config(format!(
                    "faction '{}' has no destination",
                    faction.name
                )));
            }
        }

        let t = &self.thresholds;
        if !t.low_influence.is_finite() || t.low_influence <= 0.0 {
            return Err(BgsError::Config(format!(
                "low_influence threshold ({}) must be a positive number",
                t.low_influence
            )));
        }
        if !t.close_competitor.is_finite() || t.close_competitor <= 0.0 {
            return Err(BgsError::Config(format!(
                "close_competitor threshold ({}) must be a positive number",
                t.close_competitor
            )));
        }
        if t.page_capacity == 0 {
            return Err(BgsError::Config("page_capacity must be at least 1".into()));
        }

        if self.source.timeout_secs == 0 {
            return Err(BgsError::Config("source timeout_secs must be > 0".into()));
        }

        if self.delivery.notifier == NotifierKind::Webhook {
            for destination in self.all_destinations() {
                if !self.delivery.webhooks.contains_key(&destination) {
                    return Err(BgsError::Config(format!(
                        "no webhook URL for destination '{}' (set {})",
                        destination,
                        webhook_env_var(&destination)
                    )));
                }
            }
        }

        Ok(())
    }

    /// Destinations receiving tick and maintenance announcements
    pub fn announce_destinations(&self) -> Vec<String> {
        if !self.delivery.announce_destinations.is_empty() {
            return self.delivery.announce_destinations.clone();
        }
        let mut out: Vec<String> = Vec::new();
        for faction in &self.factions {
            if !out.contains(&faction.destination) {
                out.push(faction.destination.clone());
            }
        }
        out
    }

    fn all_destinations(&self) -> Vec<String> {
        let mut out = self.announce_destinations();
        for faction in &self.factions {
            if !out.contains(&faction.destination) {
                out.push(faction.destination.clone());
            }
        }
        out
    }
}

/// `BGS_WEBHOOK_<DESTINATION>`, uppercased with non-alphanumerics as `_`
pub fn webhook_env_var(destination: &str) -> String {
    let suffix: String = destination
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("BGS_WEBHOOK_{}", suffix)
}
