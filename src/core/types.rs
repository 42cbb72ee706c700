//! Core record types shared by every data source and the analysis pipeline

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A faction or system name.
///
/// Keeps the display form from the source and a case-normalized key.
/// Equality and hashing use the key only, so comparisons never need to
/// lowercase again after the data source boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Name {
    display: String,
    key: String,
}

impl Name {
    pub fn new(raw: impl Into<String>) -> Self {
        let display = raw.into().trim().to_string();
        let key = normalize_name(&display);
        Self { display, key }
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// Case-normalized comparison key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Normalization applied to every name crossing the data source boundary
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<String> for Name {
    fn from(raw: String) -> Self {
        Name::new(raw)
    }
}

impl From<&str> for Name {
    fn from(raw: &str) -> Self {
        Name::new(raw)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.display
    }
}

/// Conflict type as reported by the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    War,
    Election,
    Unrest,
    Other,
}

impl ConflictKind {
    pub fn from_source(raw: &str) -> Self {
        let compact: String = normalize_name(raw)
            .chars()
            .filter(|c| !matches!(c, ' ' | '_'))
            .collect();
        match compact.as_str() {
            "war" | "civilwar" => ConflictKind::War,
            "election" => ConflictKind::Election,
            "unrest" | "civilunrest" => ConflictKind::Unrest,
            _ => ConflictKind::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConflictKind::War => "War",
            ConflictKind::Election => "Election",
            ConflictKind::Unrest => "Unrest",
            ConflictKind::Other => "Conflict",
        }
    }
}

/// Lifecycle state of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStatus {
    Pending,
    Active,
    Inactive,
}

impl ConflictStatus {
    /// Unknown or empty status strings count as inactive
    pub fn from_source(raw: &str) -> Self {
        match normalize_name(raw).as_str() {
            "pending" => ConflictStatus::Pending,
            "active" => ConflictStatus::Active,
            _ => ConflictStatus::Inactive,
        }
    }
}

/// A contested state between two factions in one system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub status: ConflictStatus,
    pub opponent_name: Name,
}

impl Conflict {
    pub fn new(kind: ConflictKind, status: ConflictStatus, opponent: impl Into<Name>) -> Self {
        Self {
            kind,
            status,
            opponent_name: opponent.into(),
        }
    }

    /// Wars and elections that are pending or running
    pub fn is_reportable(&self) -> bool {
        matches!(self.kind, ConflictKind::War | ConflictKind::Election)
            && matches!(self.status, ConflictStatus::Pending | ConflictStatus::Active)
    }

    /// One-line summary, e.g. "War with Rival Co"
    pub fn summary(&self) -> String {
        format!("{} with {}", self.kind.label(), self.opponent_name)
    }
}

/// One faction's footprint in one system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionPresence {
    pub system_name: Name,
    /// Fraction of total system influence, 0.0 - 1.0
    pub influence: f64,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl FactionPresence {
    pub fn influence_pct(&self) -> f64 {
        self.influence * 100.0
    }

    /// First reportable conflict in source order
    pub fn first_reportable_conflict(&self) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.is_reportable())
    }
}

/// A faction and every system it is present in, in source order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionRecord {
    pub name: Name,
    #[serde(default)]
    pub presence: Vec<FactionPresence>,
    /// Source-side update marker, if the backend provides one
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl FactionRecord {
    pub fn presence_in(&self, system: &Name) -> Option<&FactionPresence> {
        self.presence.iter().find(|p| &p.system_name == system)
    }
}

/// State of one star system at observation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub name: Name,
    #[serde(default)]
    pub controlling_faction_name: Option<Name>,
    /// Factions with any presence, in source order without duplicates
    #[serde(default)]
    pub present_factions: Vec<Name>,
}

impl SystemSnapshot {
    pub fn new(
        name: impl Into<Name>,
        controller: Option<Name>,
        factions: impl IntoIterator<Item = Name>,
    ) -> Self {
        let mut present_factions: Vec<Name> = Vec::new();
        for faction in factions {
            if !faction.is_empty() && !present_factions.contains(&faction) {
                present_factions.push(faction);
            }
        }
        Self {
            name: name.into(),
            controlling_faction_name: controller.filter(|c| !c.is_empty()),
            present_factions,
        }
    }

    /// The controller, only if it is also listed as present
    pub fn controller(&self) -> Option<&Name> {
        self.controlling_faction_name
            .as_ref()
            .filter(|c| self.present_factions.contains(c))
    }

    pub fn is_controlled_by(&self, faction: &Name) -> bool {
        self.controller() == Some(faction)
    }

    /// Every present faction except `faction`, in source order
    pub fn rivals_of<'a>(&'a self, faction: &'a Name) -> impl Iterator<Item = &'a Name> + 'a {
        self.present_factions.iter().filter(move |f| *f != faction)
    }
}

/// Scope a tick token is tracked under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Global,
    Faction(Name),
}

impl ScopeKey {
    pub fn faction(name: impl Into<Name>) -> Self {
        ScopeKey::Faction(name.into())
    }

    /// Storage key: `"global"` or `"faction:<normalized name>"`
    pub fn storage_key(&self) -> String {
        match self {
            ScopeKey::Global => "global".to_string(),
            ScopeKey::Faction(name) => format!("faction:{}", name.key()),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Canonical tick token.
///
/// RFC 3339 timestamps are rendered as `YYYY-MM-DDTHH:MM:SSZ` in UTC, dropping
/// fractional seconds. Anything else passes through trimmed.
pub fn canonical_tick(raw: &str) -> String {
    let trimmed = raw.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(ts) => ts
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_case_insensitive_equality() {
        let a = Name::new("Torval Mining Ltd");
        let b = Name::new("  torval mining ltd ");
        assert_eq!(a, b);
        assert_eq!(b.as_str(), "torval mining ltd");
        assert_eq!(a.key(), "torval mining ltd");
    }

    #[test]
    fn test_conflict_reportable() {
        assert!(Conflict::new(ConflictKind::War, ConflictStatus::Active, "X").is_reportable());
        assert!(Conflict::new(ConflictKind::Election, ConflictStatus::Pending, "X").is_reportable());
        assert!(!Conflict::new(ConflictKind::War, ConflictStatus::Inactive, "X").is_reportable());
        assert!(!Conflict::new(ConflictKind::Unrest, ConflictStatus::Active, "X").is_reportable());
    }

    #[test]
    fn test_conflict_kind_from_source() {
        assert_eq!(ConflictKind::from_source("civilwar"), ConflictKind::War);
        assert_eq!(ConflictKind::from_source("Election"), ConflictKind::Election);
        assert_eq!(ConflictKind::from_source("boom"), ConflictKind::Other);
        assert_eq!(ConflictStatus::from_source(""), ConflictStatus::Inactive);
    }

    #[test]
    fn test_conflict_summary() {
        let c = Conflict::new(ConflictKind::War, ConflictStatus::Active, "Rival Co");
        assert_eq!(c.summary(), "War with Rival Co");
    }

    #[test]
    fn test_controller_must_be_present() {
        let sys = SystemSnapshot::new(
            "Bast",
            Some(Name::new("Ghost Faction")),
            vec![Name::new("Torval Mining Ltd")],
        );
        assert!(sys.controller().is_none());

        let sys = SystemSnapshot::new(
            "Bast",
            Some(Name::new("torval mining ltd")),
            vec![Name::new("Torval Mining Ltd"), Name::new("Rival Co")],
        );
        assert!(sys.is_controlled_by(&Name::new("TORVAL MINING LTD")));
    }

    #[test]
    fn test_present_factions_deduplicated() {
        let sys = SystemSnapshot::new(
            "Sol",
            None,
            vec![Name::new("A"), Name::new("a"), Name::new("B"), Name::new("")],
        );
        assert_eq!(sys.present_factions.len(), 2);
        let target = Name::new("A");
        let rivals: Vec<_> = sys.rivals_of(&target).collect();
        assert_eq!(rivals, vec![&Name::new("B")]);
    }

    #[test]
    fn test_scope_storage_key() {
        assert_eq!(ScopeKey::Global.storage_key(), "global");
        assert_eq!(
            ScopeKey::faction("House of Saga").storage_key(),
            "faction:house of saga"
        );
    }

    #[test]
    fn test_canonical_tick() {
        assert_eq!(
            canonical_tick("2025-01-01T00:00:00.000Z"),
            "2025-01-01T00:00:00Z"
        );
        assert_eq!(
            canonical_tick("2025-01-01T02:00:00+02:00"),
            "2025-01-01T00:00:00Z"
        );
        assert_eq!(canonical_tick(" marker-17 "), "marker-17");
    }
}
