//! Error types for the tile cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    StoreOpen(Box<sqlx::Error>),
    Version { found: u32, requested: u32 },
    Transaction(Box<sqlx::Error>),
    Policy(Box<CacheError>),
    Serialization(String),
    NotInitialized,
    Config(String),
}

impl CacheError {
    /// Error-kind code recorded alongside the message in `last_error`
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::StoreOpen(_) | CacheError::Version { .. } => "StoreOpenError",
            CacheError::Transaction(_)
            | CacheError::Serialization(_)
            | CacheError::NotInitialized => "TransactionError",
            CacheError::Policy(_) => "PolicyError",
            CacheError::Config(_) => "ConfigError",
        }
    }

    /// Reclassify a store failure raised while opening the store
    pub(crate) fn into_open_error(self) -> Self {
        match self {
            CacheError::Transaction(err) => CacheError::StoreOpen(err),
            other => other,
        }
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::StoreOpen(err) => write!(f, "Failed to open store: {}", err),
            CacheError::Version { found, requested } => write!(
                f,
                "Store version {} is newer than requested version {}",
                found, requested
            ),
            CacheError::Transaction(err) => write!(f, "Transaction failed: {}", err),
            CacheError::Policy(err) => write!(f, "Cleanup failed: {}", err),
            CacheError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            CacheError::NotInitialized => write!(f, "Cache store is not initialized"),
            CacheError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::StoreOpen(err) | CacheError::Transaction(err) => Some(err.as_ref()),
            CacheError::Policy(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Transaction(Box::new(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
