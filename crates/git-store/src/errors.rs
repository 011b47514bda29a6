//! Error taxonomy shared by every git-store component.
//!
//! "Object not found" and "ref not found" are first-class variants rather
//! than stringly errors, so callers can map them to 404s or empty
//! advertisements without inspecting messages. Decoder corruption collapses
//! into a single `Malformed` class.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    /// Repository, ref, or object is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Authentication missing or invalid.
    #[error("unauthorized")]
    Unauthorized,

    /// Branch-protection rejection or ownership violation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Merge conflict or a lost TOCTOU race.
    #[error("conflict: {files:?}")]
    Conflict { files: Vec<String> },

    /// Corrupt pack/object/pkt input where recovery also failed.
    #[error("malformed: {0}")]
    Malformed(String),

    /// Blob-store or cache I/O failure; propagated unchanged.
    #[error("transport: {0}")]
    Transport(String),
}

impl GitError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GitError::NotFound(what.into())
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        GitError::Malformed(what.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        GitError::Transport(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GitError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, GitError>;
