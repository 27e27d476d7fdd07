//! Indexer definitions and implementations
//!
//! This module contains native Rust implementations of torrent indexers
//! as well as the Cardigann YAML-based definition engine.
//!
//! # Adding a new indexer
//!
//! 1. Create a new file in this directory (e.g., `myindexer.rs`)
//! 2. Implement the `Indexer` trait for your indexer
//! 3. Add it to the `AVAILABLE_INDEXERS` list
//! 4. Construct it in [`build_indexer`]

pub mod cardigann;
pub mod revolutiontt;
pub mod torrentday;

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use super::Indexer;
use super::error::{IndexerError, Result};
use super::types::{IndexerSettings, TrackerType};
use cardigann::{CardigannDefinition, CardigannIndexer};
use revolutiontt::RevolutionTTIndexer;
use torrentday::TorrentDayIndexer;

/// Information about an available indexer type
#[derive(Debug, Clone)]
pub struct IndexerTypeInfo {
    /// Unique identifier for this indexer type (e.g., "torrentday")
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tracker_type: TrackerType,
    /// Language code
    pub language: &'static str,
    /// Primary site URL
    pub site_link: &'static str,
    /// Credentials that must be present for searches to work
    pub required_credentials: &'static [CredentialType],
}

/// List of all available native indexer types
pub static AVAILABLE_INDEXERS: Lazy<Vec<IndexerTypeInfo>> = Lazy::new(|| {
    vec![
        IndexerTypeInfo {
            id: "torrentday",
            name: "TorrentDay",
            description: "TorrentDay (TD) is a Private site for TV / MOVIES / GENERAL",
            tracker_type: TrackerType::Private,
            language: "en-US",
            site_link: torrentday::SITE_LINKS[0],
            required_credentials: &[CredentialType::Cookie],
        },
        IndexerTypeInfo {
            id: "revolutiontt",
            name: "RevolutionTT",
            description: "The Revolution has begun",
            tracker_type: TrackerType::Private,
            language: "en-US",
            site_link: revolutiontt::SITE_LINKS[0],
            required_credentials: &[CredentialType::Username, CredentialType::Password],
        },
    ]
});

/// Get information about all available indexer types
pub fn get_available_indexers() -> &'static [IndexerTypeInfo] {
    &AVAILABLE_INDEXERS
}

/// Get information about a specific indexer type
pub fn get_indexer_info(id: &str) -> Option<&'static IndexerTypeInfo> {
    AVAILABLE_INDEXERS.iter().find(|i| i.id.eq_ignore_ascii_case(id))
}

/// Credential types used by indexers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    /// Session cookie
    Cookie,
    Username,
    Password,
}

impl CredentialType {
    /// Whether `settings` carries this credential
    pub fn is_present(&self, settings: &IndexerSettings) -> bool {
        settings
            .get(&self.to_string())
            .is_some_and(|v| !v.trim().is_empty())
    }
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialType::Cookie => write!(f, "cookie"),
            CredentialType::Username => write!(f, "username"),
            CredentialType::Password => write!(f, "password"),
        }
    }
}

impl std::str::FromStr for CredentialType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cookie" => Ok(CredentialType::Cookie),
            "username" => Ok(CredentialType::Username),
            "password" => Ok(CredentialType::Password),
            _ => Err(anyhow::anyhow!("Unknown credential type: {}", s)),
        }
    }
}

/// Credentials a native indexer type needs but `settings` lacks
pub fn missing_credentials(kind: &str, settings: &IndexerSettings) -> Vec<CredentialType> {
    get_indexer_info(kind)
        .map(|info| {
            info.required_credentials
                .iter()
                .filter(|c| !c.is_present(settings))
                .copied()
                .collect()
        })
        .unwrap_or_default()
}

/// Construct a configured site.
///
/// `kind` names a native indexer type or the id of a loaded Cardigann
/// definition; native types win when both exist.
pub fn build_indexer(
    kind: &str,
    id: &str,
    settings: &IndexerSettings,
    definitions: &HashMap<String, Arc<CardigannDefinition>>,
) -> Result<Arc<dyn Indexer>> {
    let indexer: Arc<dyn Indexer> = match kind.to_lowercase().as_str() {
        "torrentday" => Arc::new(TorrentDayIndexer::new(id, settings)),
        "revolutiontt" => Arc::new(RevolutionTTIndexer::new(id, settings)?),
        other => {
            let definition = definitions
                .get(other)
                .cloned()
                .ok_or_else(|| IndexerError::definition(format!("unknown indexer type '{}'", kind)))?;
            Arc::new(CardigannIndexer::new(id, definition, settings)?)
        }
    };
    debug!(
        indexer_id = id,
        kind,
        indexer_type = %indexer.indexer_type(),
        configured = indexer.is_configured(),
        "Built indexer"
    );
    Ok(indexer)
}
