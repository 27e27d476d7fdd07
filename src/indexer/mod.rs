//! Torrent indexer core
//!
//! Every site adapter, hand-written or driven by a Cardigann YAML definition,
//! plugs the same four pieces into the search pipeline:
//!
//! - a [`RequestGenerator`] that turns a [`SearchCriteria`] into a lazy
//!   [`RequestChain`],
//! - an [`Authenticator`] that logs in and recognizes rejected sessions,
//! - a [`ResponseParser`] that extracts per-item [`FieldBag`]s,
//! - a [`ResponseNormalizer`] that turns field bags into [`ReleaseInfo`].
//!
//! [`IndexerManager`] owns the configured adapters and their sessions and runs
//! searches through [`pipeline::search`].
//!
//! # Example
//!
//! ```ignore
//! use indexgate::indexer::{IndexerManager, SearchCriteria};
//!
//! let manager = IndexerManager::new(transport, ManagerOptions::default());
//! manager.register(Arc::new(indexer));
//! let results = manager
//!     .search_all(&SearchCriteria::tv_search("Breaking Bad").with_season_episode(1, Some("1")))
//!     .await;
//! ```

pub mod categories;
pub mod context;
pub mod definitions;
pub mod error;
pub mod magnet;
pub mod manager;
pub mod normalize;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod template;
pub mod transport;
pub mod types;

pub use error::{ExtractionError, FailureKind, IndexerError, Result};
pub use manager::{IndexerManager, IndexerSearchResult, ManagerOptions, SearchFailure};
pub use normalize::{FieldBag, ResponseNormalizer, ResponseParser};
pub use request::{RequestChain, RequestDescriptor};
pub use session::{Authenticator, CookieJar, SessionManager, SiteSession};
pub use transport::{HttpTransport, IndexerResponse, ReqwestTransport};
pub use types::{
    IndexerCapabilities, IndexerSettings, IndexerType, QueryType, ReleaseInfo, SearchCriteria, TrackerType,
};

/// Builds the outbound requests for one site
pub trait RequestGenerator: Send + Sync {
    /// Requests for a search. Category filtered paths produce nothing.
    fn search_requests(&self, criteria: &SearchCriteria) -> Result<RequestChain<'_>>;

    /// Requests for the latest releases, with no search term
    fn recent_requests(&self) -> Result<RequestChain<'_>> {
        self.search_requests(&SearchCriteria::recent())
    }
}

/// Core trait for all indexer implementations
///
/// This trait defines the interface that all indexers must implement,
/// whether they are native Rust implementations or Cardigann YAML-based.
pub trait Indexer: Send + Sync {
    /// Unique identifier for this configured site
    fn id(&self) -> &str;

    /// Display name for the indexer
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// The type of indexer (native, cardigann)
    fn indexer_type(&self) -> IndexerType;

    /// The site URL, always ending in `/`
    fn site_link(&self) -> &str;

    fn tracker_type(&self) -> TrackerType;

    /// Language of the indexer (e.g., "en-US")
    fn language(&self) -> &str;

    fn capabilities(&self) -> &IndexerCapabilities;

    /// Whether the credentials this site needs are present
    fn is_configured(&self) -> bool;

    fn generator(&self) -> &dyn RequestGenerator;

    fn parser(&self) -> &dyn ResponseParser;

    fn normalizer(&self) -> &ResponseNormalizer;

    fn authenticator(&self) -> &dyn Authenticator;

    /// Check if this indexer can handle the given query
    fn can_handle_query(&self, query: &SearchCriteria) -> bool {
        self.capabilities().supports(query.query_type)
    }
}
