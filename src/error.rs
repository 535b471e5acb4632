use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Source {source_name} failed: {message}")]
    Source { source_name: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IngestError {
    pub fn storage(message: impl Into<String>) -> Self {
        IngestError::Storage {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
