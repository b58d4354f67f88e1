//! Error kinds for a rewrite run.
//!
//! All of these are terminal: the destination object store and the staging
//! area are append-only, so a failed run is deleted wholesale and retried
//! once the cause is fixed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An object the origin store was expected to hold is missing.
    #[error("object {hash} not found in object store")]
    NotFound { hash: String },

    /// Malformed envelope header, tree entry, or commit payload.
    #[error("corrupt object {hash}: {reason}")]
    CorruptObject { hash: String, reason: String },

    /// The zlib stream of a loose object would not inflate.
    #[error("zlib failure on object {hash}: {source}")]
    Codec {
        hash: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// Memo-table collision, non-linear history, or a tree that was never
    /// rewritten in phase 1. Always a bug or bad input, never retried.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

impl Error {
    /// Shorthand for [`Error::CorruptObject`].
    pub(crate) fn corrupt(hash: &crate::hash::Sha1, reason: impl Into<String>) -> Self {
        Error::CorruptObject {
            hash: hash.hex(),
            reason: reason.into(),
        }
    }
}
