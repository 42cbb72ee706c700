//! HTTP client for the faction/system query API and the galaxy tick feed
//!
//! Responses are loosely typed: any field may be missing or differently
//! cased. They are decoded into wire structs with defaulted optional
//! fields and then converted to the typed core records, dropping the
//! pieces that cannot be interpreted.

use crate::core::config::SourceConfig;
use crate::core::error::{BgsError, Result};
use crate::core::types::{
    canonical_tick, Conflict, ConflictKind, ConflictStatus, FactionPresence, FactionRecord, Name,
    ScopeKey, SystemSnapshot,
};
use crate::source::DataSource;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

/// Remote API data source
pub struct RemoteSource {
    client: Client,
    api_url: String,
    tick_url: String,
}

impl RemoteSource {
    /// Create a client; `timeout` bounds every request
    pub fn new(api_url: String, tick_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BgsError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            tick_url,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.tick_url.clone(), config.timeout())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.client.get(url).query(query).send().await?;

        if !response.status().is_success() {
            return Err(BgsError::Unavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BgsError::Malformed(format!("{}: {}", url, e)))
    }

    async fn get_docs<T: DeserializeOwned>(&self, endpoint: &str, name: &Name) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.api_url, endpoint);
        let page: DocsPage<T> = self.get_json(&url, &[("name", name.as_str())]).await?;
        Ok(page.docs)
    }
}

impl DataSource for RemoteSource {
    async fn fetch_faction(&self, name: &Name) -> Result<FactionRecord> {
        let docs: Vec<FactionDoc> = self.get_docs("factions", name).await?;
        docs.into_iter()
            .map(FactionDoc::into_record)
            .find(|record| &record.name == name)
            .ok_or_else(|| BgsError::NotFound(format!("faction {}", name)))
    }

    async fn fetch_system(&self, name: &Name) -> Result<SystemSnapshot> {
        let docs: Vec<SystemDoc> = self.get_docs("systems", name).await?;
        docs.into_iter()
            .map(SystemDoc::into_snapshot)
            .find(|snapshot| &snapshot.name == name)
            .ok_or_else(|| BgsError::NotFound(format!("system {}", name)))
    }

    async fn fetch_current_tick(&self, scope: &ScopeKey) -> Result<Option<String>> {
        match scope {
            ScopeKey::Global => {
                let tick: GalaxyTick = self.get_json(&self.tick_url, &[]).await?;
                if tick.last_galaxy_tick.is_none() {
                    tracing::warn!("Tick feed response has no lastGalaxyTick field");
                }
                Ok(tick
                    .last_galaxy_tick
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| canonical_tick(&t)))
            }
            ScopeKey::Faction(name) => {
                let record = self.fetch_faction(name).await?;
                Ok(record.updated_at.as_deref().map(canonical_tick))
            }
        }
    }
}

// Wire format
//
// Every field decodes leniently: `null`, a missing key or a value of the
// wrong type reads as absent, and an undecodable list entry is dropped on
// its own. A bad field never fails the surrounding document.

#[derive(Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct DocsPage<T> {
    #[serde(default = "Vec::new", deserialize_with = "lenient_vec")]
    docs: Vec<T>,
}

#[derive(Deserialize)]
struct GalaxyTick {
    #[serde(rename = "lastGalaxyTick", default, deserialize_with = "lenient")]
    last_galaxy_tick: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FactionDoc {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    updated_at: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    faction_presence: Vec<PresenceDoc>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PresenceDoc {
    #[serde(deserialize_with = "lenient")]
    system_name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    influence: Option<f64>,
    #[serde(deserialize_with = "lenient_vec")]
    conflicts: Vec<ConflictDoc>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ConflictDoc {
    #[serde(rename = "type", deserialize_with = "lenient")]
    kind: Option<String>,
    #[serde(deserialize_with = "lenient")]
    status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    opponent_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SystemDoc {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    controlling_minor_faction_cased: Option<String>,
    #[serde(deserialize_with = "lenient")]
    controlling_minor_faction: Option<String>,
    #[serde(deserialize_with = "lenient_vec")]
    factions: Vec<SystemFactionDoc>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SystemFactionDoc {
    #[serde(deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    name_lower: Option<String>,
}

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring field of unexpected type");
            Ok(None)
        }
    }
}

fn lenient_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            tracing::warn!(found = %other, "Expected a list, ignoring field");
            return Ok(Vec::new());
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable list entry");
                None
            }
        })
        .collect())
}

impl FactionDoc {
    fn into_record(self) -> FactionRecord {
        let name = Name::new(self.name.unwrap_or_default());
        let presence = self
            .faction_presence
            .into_iter()
            .filter_map(|p| p.into_presence(&name))
            .collect();
        FactionRecord {
            name,
            presence,
            updated_at: self.updated_at,
        }
    }
}

impl PresenceDoc {
    fn into_presence(self, faction: &Name) -> Option<FactionPresence> {
        let system_name = Name::new(self.system_name.unwrap_or_default());
        if system_name.is_empty() {
            tracing::warn!(faction = %faction, "Dropping presence entry without system name");
            return None;
        }
        let Some(influence) = self.influence.filter(|i| i.is_finite()) else {
            tracing::warn!(faction = %faction, system = %system_name, "Dropping presence entry without influence");
            return None;
        };
        let conflicts = self
            .conflicts
            .into_iter()
            .filter_map(ConflictDoc::into_conflict)
            .collect();
        Some(FactionPresence {
            system_name,
            influence,
            conflicts,
        })
    }
}

impl ConflictDoc {
    fn into_conflict(self) -> Option<Conflict> {
        let opponent = Name::new(self.opponent_name?);
        if opponent.is_empty() {
            return None;
        }
        Some(Conflict {
            kind: ConflictKind::from_source(self.kind.as_deref().unwrap_or_default()),
            status: ConflictStatus::from_source(self.status.as_deref().unwrap_or_default()),
            opponent_name: opponent,
        })
    }
}

impl SystemDoc {
    fn into_snapshot(self) -> SystemSnapshot {
        let controller = self
            .controlling_minor_faction_cased
            .or(self.controlling_minor_faction)
            .map(Name::new);
        let factions = self
            .factions
            .into_iter()
            .filter_map(|f| f.name.or(f.name_lower))
            .map(Name::new);
        SystemSnapshot::new(self.name.unwrap_or_default(), controller, factions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let source = RemoteSource::new(
            "https://api.example.com/v5/".into(),
            "https://tick.example.com/galtick.json".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(source.api_url, "https://api.example.com/v5");
        assert_eq!(source.tick_url, "https://tick.example.com/galtick.json");
    }

    #[test]
    fn test_decode_faction_doc() {
        let json = r#"{"docs": [{
            "name": "Torval Mining Ltd",
            "updated_at": "2025-01-01T00:00:00.000Z",
            "faction_presence": [
                {"system_name": "Bast", "influence": 0.35, "conflicts": [
                    {"type": "war", "status": "active", "opponent_name": "Rival Co"},
                    {"type": "election", "status": ""}
                ]},
                {"system_name": "Sol"},
                {"influence": 0.2}
            ]
        }]}"#;
        let page: DocsPage<FactionDoc> = serde_json::from_str(json).unwrap();
        let record = page.docs.into_iter().next().unwrap().into_record();
        assert_eq!(record.name, Name::new("torval mining ltd"));
        assert_eq!(record.presence.len(), 1);
        let bast = &record.presence[0];
        assert_eq!(bast.influence, 0.35);
        assert_eq!(bast.conflicts.len(), 1);
        assert_eq!(bast.conflicts[0].summary(), "War with Rival Co");
    }

    #[test]
    fn test_decode_system_doc() {
        let json = r#"{"docs": [{
            "name": "Sol",
            "controlling_minor_faction": "house of saga",
            "factions": [{"name": "House of Saga"}, {"name_lower": "other faction"}, {}]
        }]}"#;
        let page: DocsPage<SystemDoc> = serde_json::from_str(json).unwrap();
        let snapshot = page.docs.into_iter().next().unwrap().into_snapshot();
        assert_eq!(snapshot.present_factions.len(), 2);
        assert!(snapshot.is_controlled_by(&Name::new("House of Saga")));
    }

    #[test]
    fn test_null_conflicts_keep_presence() {
        let json = r#"{"docs": [{
            "name": "Torval Mining Ltd",
            "faction_presence": [
                {"system_name": "Bast", "influence": 0.35, "conflicts": null}
            ]
        }]}"#;
        let page: DocsPage<FactionDoc> = serde_json::from_str(json).unwrap();
        let record = page.docs.into_iter().next().unwrap().into_record();
        assert_eq!(record.presence.len(), 1);
        assert!(record.presence[0].conflicts.is_empty());
    }

    #[test]
    fn test_bad_influence_drops_only_that_entry() {
        let json = r#"{"docs": [{
            "name": "Torval Mining Ltd",
            "faction_presence": [
                {"system_name": "Bast", "influence": 0.35, "conflicts": []},
                {"system_name": "Sol", "influence": "n/a"},
                "not an object"
            ]
        }]}"#;
        let page: DocsPage<FactionDoc> = serde_json::from_str(json).unwrap();
        let record = page.docs.into_iter().next().unwrap().into_record();
        assert_eq!(record.presence.len(), 1);
        assert_eq!(record.presence[0].system_name, Name::new("Bast"));
        assert_eq!(record.presence[0].influence, 0.35);
    }

    #[test]
    fn test_bad_system_fields_are_absent() {
        let json = r#"{"docs": [{
            "name": "Sol",
            "controlling_minor_faction": 42,
            "factions": {"name": "House of Saga"}
        }]}"#;
        let page: DocsPage<SystemDoc> = serde_json::from_str(json).unwrap();
        let snapshot = page.docs.into_iter().next().unwrap().into_snapshot();
        assert_eq!(snapshot.name, Name::new("Sol"));
        assert!(snapshot.controller().is_none());
        assert!(snapshot.present_factions.is_empty());
    }

    #[test]
    fn test_missing_docs_is_empty() {
        let page: DocsPage<SystemDoc> = serde_json::from_str("{}").unwrap();
        assert!(page.docs.is_empty());
    }

    #[test]
    fn test_decode_galaxy_tick() {
        let tick: GalaxyTick =
            serde_json::from_str(r#"{"lastGalaxyTick": "2025-01-01T00:00:00.000Z"}"#).unwrap();
        assert_eq!(
            tick.last_galaxy_tick.map(|t| canonical_tick(&t)).as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }
}
