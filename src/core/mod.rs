pub mod config;
pub mod error;
pub mod types;

pub use types::{Conflict, ConflictKind, ConflictStatus, FactionPresence, FactionRecord, Name, ScopeKey, SystemSnapshot};
