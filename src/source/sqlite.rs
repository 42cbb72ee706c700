//! Local replicated database source
//!
//! Normalized tables:
//! `factions(id, name)`, `systems(id, name, controlling_faction_id)`,
//! `faction_presence(faction_id, system_id, influence)`,
//! `conflicts(system_id, faction1_id, faction2_id, type, status)` and
//! `ticks(scope_key, token)` for tick markers.

use crate::core::error::{BgsError, Result};
use crate::core::types::{
    canonical_tick, normalize_name, Conflict, ConflictKind, ConflictStatus, FactionPresence,
    FactionRecord, Name, ScopeKey, SystemSnapshot,
};
use crate::source::DataSource;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// SQL function applying the same case folding as [`Name::key`]. The
/// built-in `lower()` only folds ASCII.
const NAME_KEY_FN: &str = "name_key";

pub struct SqliteSource {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Open a database file; writers holding it longer than `busy_timeout`
    /// fail the query with `Unavailable` instead of stalling it
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.create_scalar_function(
            NAME_KEY_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let raw: Option<String> = ctx.get(0)?;
                Ok(raw.map(|r| normalize_name(&r)))
            },
        )?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Run a read on the blocking pool so a slow query never holds up
    /// runtime workers, and an abandoned one is simply not awaited
    async fn read<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            query(&*guard)
        })
        .await
        .map_err(|e| BgsError::Unavailable(format!("sqlite query task failed: {}", e)))?
    }

    /// Insert a faction if missing, returning its id
    pub fn upsert_faction(&self, name: &str) -> Result<i64> {
        let conn = self.lock()?;
        faction_id_or_insert(&conn, name)
    }

    /// Insert or update a system and its controller
    pub fn upsert_system(&self, name: &str, controller: Option<&str>) -> Result<i64> {
        let conn = self.lock()?;
        let controller_id = match controller {
            Some(c) => Some(faction_id_or_insert(&conn, c)?),
            None => None,
        };
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM systems WHERE name_key(name) = ?1",
                params![normalize_name(name)],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE systems SET controlling_faction_id = ?1 WHERE id = ?2",
                    params![controller_id, id],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO systems (name, controlling_faction_id) VALUES (?1, ?2)",
                    params![name.trim(), controller_id],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    /// Record a faction's influence in a system
    pub fn set_presence(&self, faction: &str, system: &str, influence: f64) -> Result<()> {
        let conn = self.lock()?;
        let faction_id = faction_id_or_insert(&conn, faction)?;
        let system_id = system_id(&conn, system)?;
        conn.execute(
            "INSERT INTO faction_presence (faction_id, system_id, influence) VALUES (?1, ?2, ?3)
             ON CONFLICT(faction_id, system_id) DO UPDATE SET influence = excluded.influence",
            params![faction_id, system_id, influence],
        )?;
        Ok(())
    }

    pub fn add_conflict(
        &self,
        system: &str,
        faction1: &str,
        faction2: &str,
        kind: &str,
        status: &str,
    ) -> Result<()> {
        let conn = self.lock()?;
        let system_id = system_id(&conn, system)?;
        let f1 = faction_id_or_insert(&conn, faction1)?;
        let f2 = faction_id_or_insert(&conn, faction2)?;
        conn.execute(
            "INSERT INTO conflicts (system_id, faction1_id, faction2_id, type, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![system_id, f1, f2, kind, status],
        )?;
        Ok(())
    }

    pub fn set_tick(&self, scope: &ScopeKey, token: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO ticks (scope_key, token) VALUES (?1, ?2)
             ON CONFLICT(scope_key) DO UPDATE SET token = excluded.token",
            params![scope.storage_key(), token],
        )?;
        Ok(())
    }
}

impl DataSource for SqliteSource {
    async fn fetch_faction(&self, name: &Name) -> Result<FactionRecord> {
        let name = name.clone();
        self.read(move |conn| load_faction(conn, &name)).await
    }

    async fn fetch_system(&self, name: &Name) -> Result<SystemSnapshot> {
        let name = name.clone();
        self.read(move |conn| load_system(conn, &name)).await
    }

    async fn fetch_faction_influence(&self, faction: &Name, system: &Name) -> Result<Option<f64>> {
        let (faction, system) = (faction.clone(), system.clone());
        self.read(move |conn| load_influence(conn, &faction, &system)).await
    }

    async fn fetch_current_tick(&self, scope: &ScopeKey) -> Result<Option<String>> {
        let scope = scope.clone();
        self.read(move |conn| load_tick(conn, &scope)).await
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| BgsError::Unavailable("sqlite connection poisoned".into()))
}

fn load_faction(conn: &Connection, name: &Name) -> Result<FactionRecord> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, name FROM factions WHERE name_key(name) = ?1",
            params![name.key()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (faction_id, display) =
        row.ok_or_else(|| BgsError::NotFound(format!("faction {}", name)))?;
    let faction = Name::new(display);

    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, fp.influence
         FROM faction_presence fp
         JOIN systems s ON s.id = fp.system_id
         WHERE fp.faction_id = ?1
         ORDER BY fp.rowid ASC",
    )?;
    let rows = stmt.query_map(params![faction_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<f64>>(2)?,
        ))
    })?;

    let mut presence = Vec::new();
    for row in rows {
        let (system_id, system_name, influence) = row?;
        let Some(influence) = influence else {
            tracing::warn!(faction = %faction, system = %system_name, "Presence row without influence");
            continue;
        };
        presence.push(FactionPresence {
            system_name: Name::new(system_name),
            influence,
            conflicts: load_conflicts(conn, faction_id, system_id)?,
        });
    }

    let scope = ScopeKey::Faction(faction.clone());
    let updated_at = load_tick(conn, &scope)?;

    Ok(FactionRecord {
        name: faction,
        presence,
        updated_at,
    })
}

fn load_system(conn: &Connection, name: &Name) -> Result<SystemSnapshot> {
    let row: Option<(i64, String, Option<String>)> = conn
        .query_row(
            "SELECT s.id, s.name, cf.name
             FROM systems s
             LEFT JOIN factions cf ON cf.id = s.controlling_faction_id
             WHERE name_key(s.name) = ?1",
            params![name.key()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let (system_id, display, controller) =
        row.ok_or_else(|| BgsError::NotFound(format!("system {}", name)))?;

    let mut stmt = conn.prepare(
        "SELECT f.name
         FROM faction_presence fp
         JOIN factions f ON f.id = fp.faction_id
         WHERE fp.system_id = ?1
         ORDER BY fp.rowid ASC",
    )?;
    let factions = stmt
        .query_map(params![system_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(SystemSnapshot::new(
        display,
        controller.map(Name::new),
        factions.into_iter().map(Name::new),
    ))
}

fn load_influence(conn: &Connection, faction: &Name, system: &Name) -> Result<Option<f64>> {
    let influence: Option<Option<f64>> = conn
        .query_row(
            "SELECT fp.influence
             FROM faction_presence fp
             JOIN factions f ON f.id = fp.faction_id
             JOIN systems s ON s.id = fp.system_id
             WHERE name_key(f.name) = ?1 AND name_key(s.name) = ?2",
            params![faction.key(), system.key()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(influence.flatten())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS factions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS systems (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            controlling_faction_id INTEGER REFERENCES factions(id)
        );

        CREATE TABLE IF NOT EXISTS faction_presence (
            faction_id INTEGER NOT NULL REFERENCES factions(id),
            system_id INTEGER NOT NULL REFERENCES systems(id),
            influence REAL,
            PRIMARY KEY (faction_id, system_id)
        );

        CREATE TABLE IF NOT EXISTS conflicts (
            system_id INTEGER NOT NULL REFERENCES systems(id),
            faction1_id INTEGER NOT NULL REFERENCES factions(id),
            faction2_id INTEGER NOT NULL REFERENCES factions(id),
            type TEXT,
            status TEXT
        );

        CREATE TABLE IF NOT EXISTS ticks (
            scope_key TEXT PRIMARY KEY,
            token TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conflicts_system ON conflicts(system_id);
        ",
    )?;
    Ok(())
}

fn faction_id_or_insert(conn: &Connection, name: &str) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM factions WHERE name_key(name) = ?1",
            params![normalize_name(name)],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute("INSERT INTO factions (name) VALUES (?1)", params![name.trim()])?;
    Ok(conn.last_insert_rowid())
}

fn system_id(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row(
        "SELECT id FROM systems WHERE name_key(name) = ?1",
        params![normalize_name(name)],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| BgsError::NotFound(format!("system {}", name)))
}

fn load_conflicts(conn: &Connection, faction_id: i64, system_id: i64) -> Result<Vec<Conflict>> {
    let mut stmt = conn.prepare(
        "SELECT c.type, c.status, o.name
         FROM conflicts c
         JOIN factions o
           ON o.id = CASE WHEN c.faction1_id = ?1 THEN c.faction2_id ELSE c.faction1_id END
         WHERE c.system_id = ?2 AND (c.faction1_id = ?1 OR c.faction2_id = ?1)
         ORDER BY c.rowid ASC",
    )?;
    let rows = stmt.query_map(params![faction_id, system_id], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut conflicts = Vec::new();
    for row in rows {
        let (kind, status, opponent) = row?;
        conflicts.push(Conflict {
            kind: ConflictKind::from_source(kind.as_deref().unwrap_or_default()),
            status: ConflictStatus::from_source(status.as_deref().unwrap_or_default()),
            opponent_name: Name::new(opponent),
        });
    }
    Ok(conflicts)
}

fn load_tick(conn: &Connection, scope: &ScopeKey) -> Result<Option<String>> {
    let token: Option<String> = conn
        .query_row(
            "SELECT token FROM ticks WHERE scope_key = ?1",
            params![scope.storage_key()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(token.map(|t| canonical_tick(&t)))
}
