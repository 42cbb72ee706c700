use thiserror::Error;

#[derive(Error, Debug)]
pub enum BgsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    SqliteError(#[from] rusqlite::Error),
}

impl BgsError {
    /// Only configuration problems stop a run; every lookup error degrades.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BgsError::Config(_))
    }
}

impl From<reqwest::Error> for BgsError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BgsError::Malformed(e.to_string())
        } else {
            BgsError::Unavailable(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, BgsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_is_fatal() {
        assert!(BgsError::Config("no factions".into()).is_fatal());
        assert!(!BgsError::NotFound("Bast".into()).is_fatal());
        assert!(!BgsError::Unavailable("timeout".into()).is_fatal());
        assert!(!BgsError::Malformed("influence".into()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = BgsError::NotFound("faction Rival Co".into());
        assert_eq!(err.to_string(), "Not found: faction Rival Co");
    }
}
