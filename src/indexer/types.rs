//! Core types for the indexer system
//!
//! These types are modeled after the Torznab specification: a search comes in
//! as [`SearchCriteria`], every site describes itself with
//! [`IndexerCapabilities`], and results come back as [`ReleaseInfo`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::categories::{CategoryMapper, CategoryMapping};

/// The type of indexer implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexerType {
    /// Hand-written Rust adapter (e.g., TorrentDay)
    #[default]
    Native,
    /// Cardigann YAML-based definition
    Cardigann,
}

impl std::fmt::Display for IndexerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexerType::Native => write!(f, "native"),
            IndexerType::Cardigann => write!(f, "cardigann"),
        }
    }
}

/// Privacy level of a tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrackerType {
    Public,
    SemiPrivate,
    #[default]
    Private,
}

impl std::fmt::Display for TrackerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerType::Public => write!(f, "public"),
            TrackerType::SemiPrivate => write!(f, "semi-private"),
            TrackerType::Private => write!(f, "private"),
        }
    }
}

impl std::str::FromStr for TrackerType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(TrackerType::Public),
            "semi-private" | "semiprivate" | "semi-public" => Ok(TrackerType::SemiPrivate),
            "private" => Ok(TrackerType::Private),
            _ => Err(anyhow::anyhow!("Unknown tracker type: {}", s)),
        }
    }
}

/// Type of search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// General text search
    #[default]
    Search,
    /// TV show search (supports season/episode)
    TvSearch,
    /// Movie search
    MovieSearch,
    /// Music search
    MusicSearch,
    /// Book search
    BookSearch,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Search => write!(f, "search"),
            QueryType::TvSearch => write!(f, "tvsearch"),
            QueryType::MovieSearch => write!(f, "movie"),
            QueryType::MusicSearch => write!(f, "music"),
            QueryType::BookSearch => write!(f, "book"),
        }
    }
}

/// What a site can search for and how its categories map
#[derive(Debug, Clone, Default)]
pub struct IndexerCapabilities {
    /// Search modes the site accepts
    pub search_modes: Vec<QueryType>,
    /// Query parameters supported per mode (e.g. "season", "imdbid")
    pub mode_params: Vec<(QueryType, Vec<String>)>,
    /// Whether raw search is supported
    pub supports_raw_search: bool,
    /// Site category mapping
    pub categories: CategoryMapper,
}

impl IndexerCapabilities {
    /// Create default capabilities (search only)
    pub fn new() -> Self {
        Self {
            search_modes: vec![QueryType::Search],
            ..Default::default()
        }
    }

    /// Enable a search mode with its supported parameters
    pub fn with_mode(mut self, mode: QueryType, params: &[&str]) -> Self {
        if !self.search_modes.contains(&mode) {
            self.search_modes.push(mode);
        }
        self.mode_params
            .push((mode, params.iter().map(|p| p.to_string()).collect()));
        self
    }

    /// Add a category mapping
    pub fn add_category(&mut self, tracker_id: impl Into<String>, torznab_cat: i32, desc: &str) {
        self.categories
            .add(CategoryMapping::new(tracker_id, torznab_cat, desc));
    }

    pub fn supports(&self, mode: QueryType) -> bool {
        self.search_modes.contains(&mode)
    }

    /// Check if a mode accepts a given parameter
    pub fn has_param(&self, mode: QueryType, param: &str) -> bool {
        self.mode_params
            .iter()
            .any(|(m, params)| *m == mode && params.iter().any(|p| p == param))
    }
}

/// Per-site settings supplied by whoever configures the site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexerSettings {
    /// Overrides the adapter's default site link
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Raw `Cookie:` header string for cookie based sites
    #[serde(default)]
    pub cookie: Option<String>,
    /// Free-form adapter settings (e.g. `freeleech`, `sort`)
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl IndexerSettings {
    /// Look up a setting; `username`, `password` and `cookie` fall back to
    /// the dedicated credential fields.
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.settings.get(key) {
            return Some(value.as_str());
        }
        match key {
            "username" => self.username.as_deref(),
            "password" => self.password.as_deref(),
            "cookie" => self.cookie.as_deref(),
            _ => None,
        }
    }

    /// True for "true", "1", "on" and "yes"
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes"))
    }

    /// Site link with a trailing slash, preferring the configured base URL
    pub fn site_link(&self, default: &str) -> String {
        let link = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(default)
            .trim();
        if link.ends_with('/') {
            link.to_string()
        } else {
            format!("{}/", link)
        }
    }
}

/// A search request against one or more sites
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// The type of search
    pub query_type: QueryType,

    /// Free-text search term
    pub search_term: Option<String>,

    /// Canonical categories to search in
    pub categories: Vec<i32>,

    /// Maximum number of results
    pub limit: Option<i32>,

    /// Offset for pagination
    pub offset: Option<i32>,

    /// Whether cached results may be returned
    pub cache: bool,

    // TV-specific fields
    /// Season number
    pub season: Option<i32>,
    /// Episode number/identifier
    pub episode: Option<String>,
    /// IMDB ID (e.g., "tt1234567")
    pub imdb_id: Option<String>,
    /// TVDB ID
    pub tvdb_id: Option<i32>,
    /// TVRage ID
    pub rage_id: Option<i32>,
    /// TMDB ID
    pub tmdb_id: Option<i32>,
    /// TVMaze ID
    pub tvmaze_id: Option<i32>,
    /// Trakt ID
    pub trakt_id: Option<i32>,

    // Music-specific fields
    pub album: Option<String>,
    pub artist: Option<String>,
    pub label: Option<String>,
    pub track: Option<String>,

    // Book-specific fields
    pub title: Option<String>,
    pub author: Option<String>,

    /// Release year
    pub year: Option<i32>,
}

impl SearchCriteria {
    /// Create a new search query
    pub fn search(term: &str) -> Self {
        Self {
            query_type: QueryType::Search,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Create a TV search query
    pub fn tv_search(term: &str) -> Self {
        Self {
            query_type: QueryType::TvSearch,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Create a movie search query
    pub fn movie_search(term: &str) -> Self {
        Self {
            query_type: QueryType::MovieSearch,
            search_term: Some(term.to_string()),
            cache: true,
            ..Default::default()
        }
    }

    /// Latest releases, no search term
    pub fn recent() -> Self {
        Self::default()
    }

    /// Add season/episode to a TV search
    pub fn with_season_episode(mut self, season: i32, episode: Option<&str>) -> Self {
        self.season = Some(season);
        self.episode = episode.map(|s| s.to_string());
        self
    }

    /// Add IMDB ID to the query
    pub fn with_imdb(mut self, imdb_id: &str) -> Self {
        self.imdb_id = Some(imdb_id.to_string());
        self
    }

    /// Add categories to the query
    pub fn with_categories(mut self, cats: Vec<i32>) -> Self {
        self.categories = cats;
        self
    }

    /// Get the episode search string (e.g., "S01E05")
    pub fn get_episode_string(&self) -> Option<String> {
        self.season.map(|s| {
            if let Some(ref ep) = self.episode {
                match ep.parse::<i32>() {
                    Ok(n) => format!("S{:02}E{:02}", s, n),
                    Err(_) => format!("S{:02}E{}", s, ep),
                }
            } else {
                format!("S{:02}", s)
            }
        })
    }

    /// Search term with the episode string appended, for sites without TV modes
    pub fn sanitized_tv_search_string(&self) -> String {
        let mut parts = vec![];
        if let Some(term) = self.search_term.as_deref().filter(|t| !t.trim().is_empty()) {
            parts.push(term.trim().to_string());
        }
        if let Some(ep) = self.get_episode_string() {
            parts.push(ep);
        }
        parts.join(" ")
    }

    /// IMDB ID with the "tt" prefix, zero padded to seven digits
    pub fn full_imdb_id(&self) -> Option<String> {
        let short = self.imdb_id_short()?;
        let n: i64 = short.parse().ok()?;
        Some(format!("tt{:07}", n))
    }

    /// Get IMDB ID without the "tt" prefix
    pub fn imdb_id_short(&self) -> Option<String> {
        self.imdb_id
            .as_ref()
            .map(|id| id.trim().trim_start_matches("tt").to_string())
            .filter(|id| !id.is_empty())
    }

    /// Create a cache key hash for this query
    pub fn cache_key(&self) -> String {
        use sha2::{Digest, Sha256};
        let json = serde_json::to_string(self).unwrap_or_default();
        let hash = Sha256::digest(json.as_bytes());
        format!("{:x}", hash)
    }
}

/// A normalized release as returned by any site adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Release title
    pub title: String,

    /// Unique, stable identifier within the site (usually the details URL)
    pub guid: String,

    /// Download link (torrent file or NZB)
    pub link: Option<String>,

    /// Magnet URI
    pub magnet_uri: Option<String>,

    /// InfoHash
    pub info_hash: Option<String>,

    /// Details page URL
    pub details: Option<String>,

    /// Publication date
    pub publish_date: DateTime<Utc>,

    /// Canonical category IDs
    pub categories: Vec<i32>,

    /// File size in bytes
    pub size: Option<i64>,

    /// Number of files in the torrent
    pub files: Option<i32>,

    /// Number of times snatched/downloaded
    pub grabs: Option<i32>,

    /// Description
    pub description: Option<String>,

    /// IMDB ID (numeric part), 0 when unknown
    pub imdb: i64,

    /// Number of seeders
    pub seeders: Option<i32>,
    /// Number of peers (seeders + leechers)
    pub peers: Option<i32>,

    /// Download volume factor (0 = freeleech, 1 = normal)
    pub download_volume_factor: f64,
    /// Upload volume factor (usually 1, can be 2 for double upload)
    pub upload_volume_factor: f64,

    /// Minimum ratio required
    pub minimum_ratio: Option<f64>,
    /// Minimum seed time in seconds
    pub minimum_seed_time: Option<i64>,

    /// The indexer that found this release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexer_name: Option<String>,
}

impl ReleaseInfo {
    /// Create a new release with minimal info
    pub fn new(title: String, guid: String, publish_date: DateTime<Utc>) -> Self {
        Self {
            title,
            guid,
            publish_date,
            link: None,
            magnet_uri: None,
            info_hash: None,
            details: None,
            categories: vec![],
            size: None,
            files: None,
            grabs: None,
            description: None,
            imdb: 0,
            seeders: None,
            peers: None,
            download_volume_factor: 1.0,
            upload_volume_factor: 1.0,
            minimum_ratio: None,
            minimum_seed_time: None,
            indexer_id: None,
            indexer_name: None,
        }
    }
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self::new(String::new(), String::new(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_string() {
        let q = SearchCriteria::tv_search("Show").with_season_episode(1, Some("5"));
        assert_eq!(q.get_episode_string().as_deref(), Some("S01E05"));
        assert_eq!(q.sanitized_tv_search_string(), "Show S01E05");

        let q = SearchCriteria::tv_search("Show").with_season_episode(3, None);
        assert_eq!(q.get_episode_string().as_deref(), Some("S03"));

        let q = SearchCriteria::tv_search("Show").with_season_episode(2024, Some("10/12"));
        assert_eq!(q.get_episode_string().as_deref(), Some("S2024E10/12"));
    }

    #[test]
    fn test_imdb_forms() {
        let q = SearchCriteria::movie_search("").with_imdb("tt0133093");
        assert_eq!(q.imdb_id_short().as_deref(), Some("0133093"));
        assert_eq!(q.full_imdb_id().as_deref(), Some("tt0133093"));

        let q = SearchCriteria::movie_search("").with_imdb("133093");
        assert_eq!(q.full_imdb_id().as_deref(), Some("tt0133093"));
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = SearchCriteria::search("ubuntu").with_categories(vec![4000]);
        let b = SearchCriteria::search("ubuntu").with_categories(vec![4000]);
        let c = SearchCriteria::search("debian").with_categories(vec![4000]);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_capabilities_modes() {
        let caps = IndexerCapabilities::new().with_mode(QueryType::TvSearch, &["q", "season", "ep"]);
        assert!(caps.supports(QueryType::Search));
        assert!(caps.supports(QueryType::TvSearch));
        assert!(!caps.supports(QueryType::BookSearch));
        assert!(caps.has_param(QueryType::TvSearch, "season"));
        assert!(!caps.has_param(QueryType::TvSearch, "imdbid"));
    }

    #[test]
    fn test_settings_lookup() {
        let mut settings = IndexerSettings {
            base_url: Some("https://mirror.example".into()),
            username: Some("alice".into()),
            cookie: Some("uid=1".into()),
            ..Default::default()
        };
        settings.settings.insert("freeleech".into(), "True".into());
        settings.settings.insert("username".into(), "override".into());

        assert_eq!(settings.get("username"), Some("override"));
        assert_eq!(settings.get("cookie"), Some("uid=1"));
        assert_eq!(settings.get("password"), None);
        assert!(settings.flag("freeleech"));
        assert!(!settings.flag("sort"));
        assert_eq!(settings.site_link("https://default.example/"), "https://mirror.example/");
        assert_eq!(
            IndexerSettings::default().site_link("https://default.example"),
            "https://default.example/"
        );
    }

    #[test]
    fn test_tracker_type_parse() {
        assert_eq!("semi-private".parse::<TrackerType>().unwrap(), TrackerType::SemiPrivate);
        assert_eq!(TrackerType::Public.to_string(), "public");
        assert!("weird".parse::<TrackerType>().is_err());
    }
}
