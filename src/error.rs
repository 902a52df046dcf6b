// Error types for the catalog core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("MP4 parse error: {0}")]
    Mp4(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("server busy")]
    ServerBusy,

    #[error("Encoder error: {0}")]
    Encoder(String),
}

impl CatalogError {
    /// Message safe to hand to a client. Input errors and policy rejections
    /// carry their own text; everything else collapses to a fixed string so
    /// storage/subprocess details never leave the process boundary.
    pub fn public_message(&self) -> String {
        match self {
            CatalogError::InvalidInput(msg) => msg.clone(),
            CatalogError::NotFound(what) => format!("Not found: {}", what),
            CatalogError::ServerBusy => "Server busy: too many concurrent jobs".to_string(),
            _ => "Internal error".to_string(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, CatalogError::ServerBusy)
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
