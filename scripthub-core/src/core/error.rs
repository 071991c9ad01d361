//! Error types for the ScriptHub core library.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::storage::EntityKind;

/// Why a remote fetch failed, classified so the UI can show actionable text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkFailure {
    /// The remote API refused the request because of rate limiting.
    RateLimited,
    /// The repository, branch, or path does not exist.
    NotFound,
    /// Authentication is missing or insufficient.
    AccessDenied,
    /// The request did not complete in time.
    Timeout,
    /// Any other transport or protocol failure.
    Other,
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::RateLimited => "rate limited",
            Self::NotFound => "not found",
            Self::AccessDenied => "access denied",
            Self::Timeout => "timed out",
            Self::Other => "request failed",
        };
        f.write_str(label)
    }
}

/// What a bulk pipeline managed to persist before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialProgress {
    pub categories_created: usize,
    pub scripts_created: usize,
    pub cause: String,
}

/// All errors that can occur within the ScriptHub core library.
#[derive(Debug, Error)]
pub enum ScriptHubError {
    /// User input was rejected before anything was persisted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An operation referenced an id that is not in the collection.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A reparent would make a category its own ancestor.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// The parent links form a cycle or point at missing categories.
    #[error("Corrupt category tree: {0}")]
    CorruptTree(String),

    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A non-SQLite backend refused a write.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A remote fetch failed.
    #[error("Network error ({kind}): {message}")]
    Network { kind: NetworkFailure, message: String },

    /// The download exceeds the size threshold and was not confirmed.
    #[error("Download of {bytes} bytes exceeds the {threshold} byte limit and needs confirmation")]
    ConfirmationRequired { bytes: u64, threshold: u64 },

    /// The caller cancelled a subscription download.
    #[error("Operation cancelled")]
    Cancelled,

    /// A bulk import stopped after persisting part of its work.
    #[error("Import stopped after {} categories and {} scripts: {}", .0.categories_created, .0.scripts_created, .0.cause)]
    PartialImport(PartialProgress),

    /// A transfer manifest is missing or has an unsupported version.
    #[error("Invalid export format: {0}")]
    Format(String),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON could not be read or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An archive could not be read.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Convenience alias that pins the error type to [`ScriptHubError`].
pub type Result<T> = std::result::Result<T, ScriptHubError>;

impl ScriptHubError {
    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    pub(crate) fn network(kind: NetworkFailure, message: impl Into<String>) -> Self {
        Self::Network { kind, message: message.into() }
    }

    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::InvalidMove(msg) => msg.clone(),
            Self::NotFound { kind, .. } => format!("{kind} no longer exists"),
            Self::CorruptTree(_) => "The category tree is damaged; try re-importing a backup".to_string(),
            Self::Database(e) => format!("Failed to save: {e}"),
            Self::Persistence(e) => format!("Failed to save: {e}"),
            Self::Network { kind, .. } => match kind {
                NetworkFailure::RateLimited => {
                    "GitHub rate limit reached. Add a token in settings or try again later".to_string()
                }
                NetworkFailure::NotFound => "Repository not found. Check the address".to_string(),
                NetworkFailure::AccessDenied => {
                    "Access denied. The repository may be private".to_string()
                }
                NetworkFailure::Timeout => "The request timed out".to_string(),
                NetworkFailure::Other => "Could not reach the repository".to_string(),
            },
            Self::ConfirmationRequired { bytes, .. } => format!(
                "This repository is about {} MB. Confirm to download it anyway",
                bytes / (1024 * 1024)
            ),
            Self::Cancelled => "Cancelled".to_string(),
            Self::PartialImport(p) => format!(
                "Import stopped early: {} categories and {} scripts were created",
                p.categories_created, p.scripts_created
            ),
            Self::Format(msg) => format!("Not a ScriptHub export: {msg}"),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::Zip(e) => format!("Archive error: {e}"),
        }
    }
}
