//! Indexer Manager
//!
//! The IndexerManager is responsible for:
//! - Holding the configured indexer instances and their login sessions
//! - Orchestrating searches across multiple indexers
//! - Caching search results
//! - Rate limiting to avoid tracker bans

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;

use super::error::{FailureKind, IndexerError, Result};
use super::pipeline;
use super::session::{SessionManager, SiteSession};
use super::transport::HttpTransport;
use super::types::{ReleaseInfo, SearchCriteria};
use super::Indexer;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Maximum concurrent searches per indexer
const MAX_CONCURRENT_SEARCHES: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct ManagerOptions {
    pub cache_ttl: Duration,
    /// Concurrent searches allowed against one site
    pub max_concurrent_searches: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            max_concurrent_searches: MAX_CONCURRENT_SEARCHES,
        }
    }
}

/// Why a site produced no results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&IndexerError> for SearchFailure {
    fn from(e: &IndexerError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Outcome of searching one site
#[derive(Debug, Clone, Serialize)]
pub struct IndexerSearchResult {
    pub indexer_id: String,
    pub indexer_name: String,
    pub releases: Vec<ReleaseInfo>,
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub error: Option<SearchFailure>,
}

impl IndexerSearchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Manages all configured indexer instances
pub struct IndexerManager {
    transport: Arc<dyn HttpTransport>,
    sessions: SessionManager,
    /// Loaded indexer instances by site id
    indexers: RwLock<HashMap<String, Arc<dyn Indexer>>>,
    cache: SearchCache,
    /// Rate limiting semaphores per indexer
    rate_limiters: RwLock<HashMap<String, Arc<Semaphore>>>,
    options: ManagerOptions,
}

impl IndexerManager {
    pub fn new(transport: Arc<dyn HttpTransport>, options: ManagerOptions) -> Self {
        Self {
            transport,
            sessions: SessionManager::new(),
            indexers: RwLock::new(HashMap::new()),
            cache: SearchCache::new(options.cache_ttl),
            rate_limiters: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Add a configured site. A site with the same id is replaced and its
    /// session torn down.
    pub fn register(&self, indexer: Arc<dyn Indexer>) {
        let id = indexer.id().to_string();
        let replaced = self.indexers.write().insert(id.clone(), indexer.clone()).is_some();
        if replaced {
            self.teardown(&id);
        }

        self.rate_limiters.write().insert(
            id.clone(),
            Arc::new(Semaphore::new(self.options.max_concurrent_searches.max(1))),
        );

        tracing::info!(
            indexer_id = %id,
            indexer_name = %indexer.name(),
            indexer_type = %indexer.indexer_type(),
            configured = indexer.is_configured(),
            replaced,
            "Loaded indexer"
        );
    }

    /// Replace a site's configuration; the next search logs in again
    pub fn reconfigure(&self, indexer: Arc<dyn Indexer>) {
        self.register(indexer);
    }

    /// Remove a site and tear down its session
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.indexers.write().remove(id).is_some();
        self.rate_limiters.write().remove(id);
        self.teardown(id);
        if removed {
            tracing::info!(indexer_id = %id, "Unloaded indexer");
        }
        removed
    }

    fn teardown(&self, id: &str) {
        self.sessions.remove(id);
        self.cache.remove_site(id);
    }

    /// Get a loaded indexer by site id
    pub fn get_indexer(&self, id: &str) -> Option<Arc<dyn Indexer>> {
        self.indexers.read().get(id).cloned()
    }

    /// Get all loaded indexers
    pub fn get_all_indexers(&self) -> Vec<Arc<dyn Indexer>> {
        self.indexers.read().values().cloned().collect()
    }

    /// The login session of a site, created on first use
    pub fn session(&self, id: &str) -> Arc<SiteSession> {
        self.sessions.session(id)
    }

    /// Search across all configured indexers that support the query
    pub async fn search_all(&self, query: &SearchCriteria) -> Vec<IndexerSearchResult> {
        let ids: Vec<String> = self.indexers.read().keys().cloned().collect();
        self.search_indexers(&ids, query).await
    }

    /// Search specific indexers
    pub async fn search_indexers(&self, indexer_ids: &[String], query: &SearchCriteria) -> Vec<IndexerSearchResult> {
        let indexers: Vec<_> = self
            .indexers
            .read()
            .iter()
            .filter(|(id, _)| indexer_ids.contains(id))
            .filter(|(id, idx)| {
                let usable = idx.is_configured() && idx.can_handle_query(query);
                if !usable {
                    tracing::debug!(indexer_id = %id, "Skipping indexer for this query");
                }
                usable
            })
            .map(|(_, idx)| idx.clone())
            .collect();

        let mut handles = Vec::with_capacity(indexers.len());
        for indexer in indexers {
            let job = SearchJob {
                session: self.sessions.session(indexer.id()),
                rate_limiter: self.rate_limiters.read().get(indexer.id()).cloned(),
                transport: self.transport.clone(),
                cache: self.cache.clone(),
                indexer,
            };
            let query = query.clone();
            handles.push(tokio::spawn(async move { job.run(&query).await }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(error = %e, "Indexer search task panicked");
                }
            }
        }
        results
    }

    /// Search one site and return its releases or the error
    pub async fn search(&self, id: &str, query: &SearchCriteria) -> Result<Vec<ReleaseInfo>> {
        let indexer = self
            .get_indexer(id)
            .ok_or_else(|| IndexerError::definition(format!("unknown site '{}'", id)))?;
        let _permit = self.permit(id).await;
        pipeline::search(indexer.as_ref(), &self.sessions.session(id), self.transport.as_ref(), query).await
    }

    /// Latest releases of one site
    pub async fn recent(&self, id: &str) -> Result<Vec<ReleaseInfo>> {
        let indexer = self
            .get_indexer(id)
            .ok_or_else(|| IndexerError::definition(format!("unknown site '{}'", id)))?;
        let _permit = self.permit(id).await;
        pipeline::recent(indexer.as_ref(), &self.sessions.session(id), self.transport.as_ref()).await
    }

    async fn permit(&self, id: &str) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let limiter = self.rate_limiters.read().get(id).cloned()?;
        limiter.acquire_owned().await.ok()
    }

    /// Drop expired cache entries
    pub fn cleanup_cache(&self) {
        self.cache.cleanup();
    }
}

impl std::fmt::Debug for IndexerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerManager")
            .field("indexers_count", &self.indexers.read().len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// Everything one spawned site search needs
struct SearchJob {
    indexer: Arc<dyn Indexer>,
    session: Arc<SiteSession>,
    transport: Arc<dyn HttpTransport>,
    cache: SearchCache,
    rate_limiter: Option<Arc<Semaphore>>,
}

impl SearchJob {
    async fn run(self, query: &SearchCriteria) -> IndexerSearchResult {
        let start = Instant::now();
        let indexer = self.indexer.as_ref();
        let cache_key = format!("{}:{}", indexer.id(), query.cache_key());

        let result = |releases, from_cache, error| IndexerSearchResult {
            indexer_id: indexer.id().to_string(),
            indexer_name: indexer.name().to_string(),
            releases,
            elapsed_ms: start.elapsed().as_millis() as u64,
            from_cache,
            error,
        };

        // Check cache first
        if query.cache {
            if let Some(cached) = self.cache.get(&cache_key) {
                tracing::debug!(indexer_id = %indexer.id(), releases = cached.len(), "Serving cached results");
                return result(cached, true, None);
            }
        }

        let _permit = match &self.rate_limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };

        match pipeline::search(indexer, &self.session, self.transport.as_ref(), query).await {
            Ok(releases) => {
                if query.cache {
                    self.cache.insert(cache_key, releases.clone());
                }
                result(releases, false, None)
            }
            Err(e) => {
                tracing::error!(
                    indexer_id = %indexer.id(),
                    indexer_name = %indexer.name(),
                    kind = %e.kind(),
                    error = %e,
                    "Search failed"
                );
                result(vec![], false, Some(SearchFailure::from(&e)))
            }
        }
    }
}

/// Simple in-memory search cache
#[derive(Clone)]
struct SearchCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

struct CacheEntry {
    releases: Vec<ReleaseInfo>,
    expires_at: Instant,
}

impl SearchCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn get(&self, key: &str) -> Option<Vec<ReleaseInfo>> {
        let entries = self.entries.read();
        entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.releases.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, key: String, releases: Vec<ReleaseInfo>) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CacheEntry {
                releases,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Forget everything cached for one site
    fn remove_site(&self, site_id: &str) {
        let prefix = format!("{}:", site_id);
        self.entries.write().retain(|key, _| !key.starts_with(&prefix));
    }

    /// Remove expired entries
    fn cleanup(&self) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::definitions::torrentday::TorrentDayIndexer;
    use crate::indexer::session::SessionStatus;
    use crate::indexer::transport::{IndexerResponse, ScriptedTransport};
    use crate::indexer::types::IndexerSettings;
    use pretty_assertions::assert_eq;

    const ONE_ROW: &str = r#"[{"name": "Show.S01E01", "t": 1, "c": 7, "size": 100, "seeders": 1,
        "leechers": 0, "ctime": 1700000000}]"#;

    fn torrentday(id: &str, cookie: Option<&str>) -> Arc<dyn Indexer> {
        let settings = IndexerSettings {
            cookie: cookie.map(str::to_string),
            ..Default::default()
        };
        Arc::new(TorrentDayIndexer::new(id, &settings))
    }

    fn manager(transport: Arc<ScriptedTransport>) -> IndexerManager {
        IndexerManager::new(transport, ManagerOptions::default())
    }

    #[tokio::test]
    async fn test_search_all_caches_results() {
        let transport = Arc::new(ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ONE_ROW)));
        let manager = manager(transport.clone());
        manager.register(torrentday("td", Some("uid=1")));

        let query = SearchCriteria::search("show");
        let first = manager.search_all(&query).await;
        assert_eq!(first.len(), 1);
        assert!(first[0].is_success());
        assert!(!first[0].from_cache);
        assert_eq!(first[0].releases.len(), 1);

        let second = manager.search_all(&query).await;
        assert!(second[0].from_cache);
        assert_eq!(second[0].releases, first[0].releases);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let transport = Arc::new(ScriptedTransport::new(|req, _| {
            if req.url.starts_with("https://bad.example/") {
                IndexerResponse::new(&req.url, 500, "oops")
            } else {
                IndexerResponse::new(&req.url, 200, ONE_ROW)
            }
        }));
        let manager = manager(transport);
        manager.register(torrentday("good", Some("uid=1")));
        let bad = IndexerSettings {
            cookie: Some("uid=1".into()),
            base_url: Some("https://bad.example".into()),
            ..Default::default()
        };
        manager.register(Arc::new(TorrentDayIndexer::new("bad", &bad)));

        let mut results = manager.search_all(&SearchCriteria::search("show")).await;
        results.sort_by(|a, b| a.indexer_id.cmp(&b.indexer_id));
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].error.as_ref().map(|e| e.kind),
            Some(FailureKind::Transport)
        );
        assert!(results[0].releases.is_empty());
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn test_unconfigured_sites_are_skipped() {
        let transport = Arc::new(ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ONE_ROW)));
        let manager = manager(transport.clone());
        manager.register(torrentday("td", None));

        assert!(manager.search_all(&SearchCriteria::search("show")).await.is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_reconfigure_tear_down_session() {
        let transport = Arc::new(ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ONE_ROW)));
        let manager = manager(transport);
        manager.register(torrentday("td", Some("uid=1")));

        manager.search("td", &SearchCriteria::search("show")).await.unwrap();
        assert_eq!(manager.session("td").status(), SessionStatus::Authenticated);

        manager.reconfigure(torrentday("td", Some("uid=2")));
        assert_eq!(manager.session("td").status(), SessionStatus::Unauthenticated);

        manager.search("td", &SearchCriteria::search("show")).await.unwrap();
        assert_eq!(manager.session("td").cookies().get("uid"), Some("2"));

        assert!(manager.remove("td"));
        assert!(manager.get_indexer("td").is_none());
        assert!(manager.search("td", &SearchCriteria::search("show")).await.is_err());
    }

    #[test]
    fn test_cache_expiry_and_site_removal() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.insert("a:1".into(), vec![]);
        cache.insert("b:1".into(), vec![]);
        cache.remove_site("a");
        assert!(cache.get("a:1").is_none());
        assert!(cache.get("b:1").is_some());

        let expired = SearchCache::new(Duration::from_nanos(1));
        expired.insert("a:1".into(), vec![]);
        std::thread::sleep(Duration::from_millis(2));
        assert!(expired.get("a:1").is_none());
        expired.cleanup();
        assert!(expired.entries.read().is_empty());
    }
}
