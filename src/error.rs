use std::path::PathBuf;

use crate::generation::GenerationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("corpus file {path}: {reason}")]
    Corpus { path: PathBuf, reason: String },

    #[error("index artifacts are inconsistent: {0}")]
    IndexMismatch(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
}
