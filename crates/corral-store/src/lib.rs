//! Persistent catalog for the control plane.
//!
//! The catalog is the source of declared truth: which backends exist, which
//! models should be present on them, how pools group the two, and the job
//! queue the reconciler feeds.  Backed by [`sqlx`] with the `sqlite` feature;
//! migrations are embedded at compile time and run by [`Catalog::connect`].
//! Swapping to another sqlx database means changing the URL scheme and the
//! pool type, nothing above this crate cares.

mod catalog;
mod types;

pub use catalog::Catalog;
pub use types::{
    AccessEntry, Backend, Job, Model, Permission, Pool, QueueItem, BACKEND_TYPE_OLLAMA,
};

use thiserror::Error;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row does not exist (also: popping an empty queue).
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A job payload failed to (de)serialize.
    #[error("job payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Anything else from the database driver.
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_owned())
            }
            _ => StoreError::Database(e),
        }
    }
}
