use thiserror::Error;

use crate::identity::Identity;
use crate::record::RecordKind;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity component `{component}` must not be empty")]
    InvalidComponent { component: &'static str },
}

/// Failure reported by a storage backend. Never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("{kind} record {identity} already exists")]
    Duplicate { kind: RecordKind, identity: Identity },

    #[error("{kind} record {identity} not found")]
    NotFound { kind: RecordKind, identity: Identity },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
