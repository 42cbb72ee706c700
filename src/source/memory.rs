//! In-memory snapshot source
//!
//! Holds a fixed picture of factions, systems and ticks. Loaded from a JSON
//! fixture for offline runs and built directly by tests.

use crate::core::error::{BgsError, Result};
use crate::core::types::{canonical_tick, FactionRecord, Name, ScopeKey, SystemSnapshot};
use crate::source::DataSource;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// On-disk fixture layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub factions: Vec<FactionRecord>,
    #[serde(default)]
    pub systems: Vec<SystemSnapshot>,
    /// Storage key (`"global"`, `"faction:<name>"`) -> raw token
    #[serde(default)]
    pub ticks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    factions: HashMap<Name, FactionRecord>,
    systems: HashMap<Name, SystemSnapshot>,
    ticks: HashMap<String, String>,
    unavailable: HashSet<Name>,
    latency: HashMap<Name, Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let mut source = Self::new();
        for faction in fixture.factions {
            source.insert_faction(faction);
        }
        for system in fixture.systems {
            source.insert_system(system);
        }
        for (key, token) in fixture.ticks {
            source.ticks.insert(key, canonical_tick(&token));
        }
        source
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BgsError::Config(format!("Failed to read fixture {:?}: {}", path, e))
        })?;
        let fixture: Fixture = serde_json::from_str(&contents)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn insert_faction(&mut self, faction: FactionRecord) {
        self.factions.insert(faction.name.clone(), faction);
    }

    pub fn insert_system(&mut self, system: SystemSnapshot) {
        self.systems.insert(system.name.clone(), system);
    }

    pub fn set_tick(&mut self, scope: &ScopeKey, raw: &str) {
        self.ticks.insert(scope.storage_key(), canonical_tick(raw));
    }

    /// Every lookup of this faction or system fails with `Unavailable`
    pub fn mark_unavailable(&mut self, name: impl Into<Name>) {
        self.unavailable.insert(name.into());
    }

    /// Delay every lookup of this faction or system
    pub fn set_latency(&mut self, name: impl Into<Name>, delay: Duration) {
        self.latency.insert(name.into(), delay);
    }

    async fn gate(&self, name: &Name) -> Result<()> {
        if let Some(delay) = self.latency.get(name) {
            tokio::time::sleep(*delay).await;
        }
        if self.unavailable.contains(name) {
            return Err(BgsError::Unavailable(format!("{} is unavailable", name)));
        }
        Ok(())
    }
}

impl DataSource for MemorySource {
    async fn fetch_faction(&self, name: &Name) -> Result<FactionRecord> {
        self.gate(name).await?;
        self.factions
            .get(name)
            .cloned()
            .ok_or_else(|| BgsError::NotFound(format!("faction {}", name)))
    }

    async fn fetch_system(&self, name: &Name) -> Result<SystemSnapshot> {
        self.gate(name).await?;
        self.systems
            .get(name)
            .cloned()
            .ok_or_else(|| BgsError::NotFound(format!("system {}", name)))
    }

    async fn fetch_current_tick(&self, scope: &ScopeKey) -> Result<Option<String>> {
        if let Some(token) = self.ticks.get(&scope.storage_key()) {
            return Ok(Some(token.clone()));
        }
        match scope {
            ScopeKey::Global => Ok(None),
            ScopeKey::Faction(name) => Ok(self
                .factions
                .get(name)
                .and_then(|f| f.updated_at.as_deref())
                .map(canonical_tick)),
        }
    }
}
