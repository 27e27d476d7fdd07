//! Error taxonomy for the indexer core
//!
//! Every failure the search pipeline can surface falls into one of four
//! buckets. Definition errors are authoring defects and are never retried,
//! authentication errors are retried once per search, extraction errors are
//! scoped to a single item, and transport errors fail the search for one site.

use thiserror::Error;

/// Errors raised by the indexer core.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Malformed template, unknown filter, undeclared variable or bad definition.
    #[error("Definition error: {0}")]
    Definition(String),

    /// Login failed or the session was rejected by the site.
    #[error("Authentication failed for {site}: {reason}")]
    Authentication { site: String, reason: String },

    /// The response as a whole could not be parsed.
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// Network failure or an unexpected HTTP status.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
}

impl IndexerError {
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition(message.into())
    }

    pub fn auth(site: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            site: site.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Coarse classification surfaced to consumers of search results.
    pub fn kind(&self) -> FailureKind {
        match self {
            IndexerError::Definition(_) => FailureKind::Definition,
            IndexerError::Authentication { .. } => FailureKind::Authentication,
            IndexerError::Extraction(_) => FailureKind::Extraction,
            IndexerError::Transport { .. } => FailureKind::Transport,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, IndexerError::Authentication { .. })
    }
}

impl From<reqwest::Error> for IndexerError {
    fn from(e: reqwest::Error) -> Self {
        IndexerError::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for IndexerError {
    fn from(e: serde_yaml::Error) -> Self {
        IndexerError::Definition(format!("invalid YAML definition: {}", e))
    }
}

/// A single item that could not be turned into a release.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ExtractionError {
    pub field: String,
    pub reason: String,
}

impl ExtractionError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "missing")
    }
}

/// Failure classes as reported per site search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Definition,
    Authentication,
    Extraction,
    Transport,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Definition => write!(f, "definition"),
            FailureKind::Authentication => write!(f, "authentication"),
            FailureKind::Extraction => write!(f, "extraction"),
            FailureKind::Transport => write!(f, "transport"),
        }
    }
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;
