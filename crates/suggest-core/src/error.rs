use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    /// Two items with different identities were asked to merge.
    #[error("Cannot merge items with different ids: {left} != {right}")]
    IdentityMismatch { left: String, right: String },

    /// An alias resolved to something other than exactly one physical index.
    #[error("Alias '{alias}' resolves to {} indices: {indices:?}", indices.len())]
    AliasConflict { alias: String, indices: Vec<String> },

    #[error("Invalid word: {0}")]
    InvalidWord(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SuggestError>;
