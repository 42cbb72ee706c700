//! Data sources for faction, system, influence and tick lookups
//!
//! Every backend answers the same four queries. Names and tick tokens are
//! normalized here, at the boundary, so nothing downstream compares raw
//! strings from a backend.

pub mod memory;
pub mod remote;
pub mod sqlite;

use crate::core::config::{SourceConfig, SourceKind};
use crate::core::error::Result;
use crate::core::types::{FactionRecord, Name, ScopeKey, SystemSnapshot};
use std::future::Future;
use std::path::Path;

pub use memory::MemorySource;
pub use remote::RemoteSource;
pub use sqlite::SqliteSource;

/// Uniform query interface over a remote API or a local database.
///
/// Errors are never fatal to a caller: `NotFound` means the entity is
/// absent, `Unavailable` a transport or query failure, `Malformed` a
/// response the backend could not decode.
pub trait DataSource: Send + Sync + 'static {
    fn fetch_faction(&self, name: &Name) -> impl Future<Output = Result<FactionRecord>> + Send;

    fn fetch_system(&self, name: &Name) -> impl Future<Output = Result<SystemSnapshot>> + Send;

    /// Influence fraction of `faction` in `system`, `None` without presence
    fn fetch_faction_influence(
        &self,
        faction: &Name,
        system: &Name,
    ) -> impl Future<Output = Result<Option<f64>>> + Send {
        async move {
            let record = self.fetch_faction(faction).await?;
            Ok(record.presence_in(system).map(|p| p.influence))
        }
    }

    /// Latest canonical tick token for a scope
    fn fetch_current_tick(
        &self,
        scope: &ScopeKey,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Backend chosen at runtime from configuration
pub enum AnySource {
    Remote(RemoteSource),
    Sqlite(SqliteSource),
    Memory(MemorySource),
}

impl AnySource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        match config.kind {
            SourceKind::Remote => Ok(AnySource::Remote(RemoteSource::from_config(config)?)),
            SourceKind::Sqlite => Ok(AnySource::Sqlite(SqliteSource::open(
                Path::new(&config.database),
                config.timeout(),
            )?)),
            SourceKind::Fixture => Ok(AnySource::Memory(MemorySource::load(Path::new(
                &config.fixture,
            ))?)),
        }
    }
}

impl DataSource for AnySource {
    async fn fetch_faction(&self, name: &Name) -> Result<FactionRecord> {
        match self {
            AnySource::Remote(s) => s.fetch_faction(name).await,
            AnySource::Sqlite(s) => s.fetch_faction(name).await,
            AnySource::Memory(s) => s.fetch_faction(name).await,
        }
    }

    async fn fetch_system(&self, name: &Name) -> Result<SystemSnapshot> {
        match self {
            AnySource::Remote(s) => s.fetch_system(name).await,
            AnySource::Sqlite(s) => s.fetch_system(name).await,
            AnySource::Memory(s) => s.fetch_system(name).await,
        }
    }

    async fn fetch_faction_influence(&self, faction: &Name, system: &Name) -> Result<Option<f64>> {
        match self {
            AnySource::Remote(s) => s.fetch_faction_influence(faction, system).await,
            AnySource::Sqlite(s) => s.fetch_faction_influence(faction, system).await,
            AnySource::Memory(s) => s.fetch_faction_influence(faction, system).await,
        }
    }

    async fn fetch_current_tick(&self, scope: &ScopeKey) -> Result<Option<String>> {
        match self {
            AnySource::Remote(s) => s.fetch_current_tick(scope).await,
            AnySource::Sqlite(s) => s.fetch_current_tick(scope).await,
            AnySource::Memory(s) => s.fetch_current_tick(scope).await,
        }
    }
}
