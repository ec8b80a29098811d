//! Error taxonomy for timeline, mixer, transport and persistence operations.
//!
//! Every control-plane operation validates before it mutates, so an `Err`
//! always means "nothing changed". The one exception is clip creation with
//! a failing content import, which reports the import failure alongside a
//! successfully created clip (see [`crate::ClipImport`]).

use std::path::PathBuf;

use thiserror::Error;

use crate::state::TimeMs;

/// What kind of entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Role,
    Clip,
    Section,
    Channel,
    Content,
    Unit,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Role => "role",
            EntityKind::Clip => "clip",
            EntityKind::Section => "section",
            EntityKind::Channel => "channel",
            EntityKind::Content => "content",
            EntityKind::Unit => "unit",
        };
        f.write_str(name)
    }
}

/// Errors produced by the engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced entity does not exist.
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntityKind, name: String },

    /// Title already taken within its scope.
    #[error("{kind} title already in use: {title}")]
    DuplicateTitle { kind: EntityKind, title: String },

    /// Interval collides with an existing clip on the same channel.
    #[error("clip '{clip}' overlaps [{start}, {end}) on channel '{channel}'")]
    Overlap {
        clip: String,
        channel: String,
        start: TimeMs,
        end: TimeMs,
    },

    /// A time boundary lies outside the range it must fall in.
    #[error("invalid boundary: {0}")]
    InvalidBoundary(String),

    /// Content could not be read or decoded.
    #[error("failed to import '{}': {reason}", path.display())]
    ImportFailure { path: PathBuf, reason: String },

    /// Operation is not legal in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Filesystem failure at the persistence/export boundary.
    #[error("I/O failure on '{}': {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Project document could not be encoded or decoded.
    #[error("malformed project document: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub(crate) fn not_found(kind: EntityKind, name: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn duplicate(kind: EntityKind, title: impl Into<String>) -> Self {
        EngineError::DuplicateTitle {
            kind,
            title: title.into(),
        }
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        EngineError::IllegalState(message.into())
    }

    pub(crate) fn boundary(message: impl Into<String>) -> Self {
        EngineError::InvalidBoundary(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::IoFailure {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
