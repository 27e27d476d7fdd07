//! TorrentDay indexer implementation
//!
//! TorrentDay is a private tracker with a JSON search endpoint (`t.json`).
//!
//! # Authentication
//!
//! TorrentDay uses cookie-based authentication. Users copy the cookie from a
//! logged-in browser session into the site's `cookie` credential. There is no
//! login exchange; a redirect on search means the cookie stopped working.

use serde::Deserialize;
use tracing::info;

use crate::indexer::categories::{CategoryMapper, CategoryMapping, cats};
use crate::indexer::error::{ExtractionError, IndexerError, Result};
use crate::indexer::normalize::{FieldBag, ItemResult, ReleasePolicy, ResponseNormalizer, ResponseParser, fields};
use crate::indexer::request::{AcceptType, RequestChain, RequestDescriptor};
use crate::indexer::session::{Authenticator, StaticCookieAuthenticator};
use crate::indexer::template::filters::form_urlencode;
use crate::indexer::transport::IndexerResponse;
use crate::indexer::types::{IndexerCapabilities, IndexerSettings, IndexerType, QueryType, SearchCriteria, TrackerType};
use crate::indexer::{Indexer, RequestGenerator};

/// Known TorrentDay mirrors; the first is the default
pub const SITE_LINKS: &[&str] = &[
    "https://torrentday.cool/",
    "https://tday.love/",
    "https://secure.torrentday.com/",
    "https://classic.torrentday.com/",
    "https://www.torrentday.com/",
    "https://torrentday.it/",
    "https://td.findnemo.net/",
    "https://td.getcrazy.me/",
    "https://td.venom.global/",
    "https://td.workisboring.net/",
];

/// Get category mappings (tracker category -> Torznab category)
fn category_mappings() -> Vec<CategoryMapping> {
    vec![
        // Movies
        CategoryMapping::new("96", cats::MOVIES_UHD, "Movie/4K"),
        CategoryMapping::new("25", cats::MOVIES_SD, "Movies/480p"),
        CategoryMapping::new("11", cats::MOVIES_BLURAY, "Movies/Bluray"),
        CategoryMapping::new("5", cats::MOVIES_BLURAY, "Movies/Bluray-Full"),
        CategoryMapping::new("3", cats::MOVIES_DVD, "Movies/DVD-R"),
        CategoryMapping::new("21", cats::MOVIES_SD, "Movies/MP4"),
        CategoryMapping::new("22", cats::MOVIES_FOREIGN, "Movies/Non-English"),
        CategoryMapping::new("13", cats::MOVIES, "Movies/Packs"),
        CategoryMapping::new("44", cats::MOVIES_SD, "Movies/SD/x264"),
        CategoryMapping::new("48", cats::MOVIES_HD, "Movies/x265"),
        CategoryMapping::new("1", cats::MOVIES_SD, "Movies/XviD"),
        // TV
        CategoryMapping::new("24", cats::TV_SD, "TV/480p"),
        CategoryMapping::new("32", cats::TV_HD, "TV/Bluray"),
        CategoryMapping::new("31", cats::TV_SD, "TV/DVD-R"),
        CategoryMapping::new("33", cats::TV_SD, "TV/DVD-Rip"),
        CategoryMapping::new("46", cats::TV_SD, "TV/Mobile"),
        CategoryMapping::new("14", cats::TV, "TV/Packs"),
        CategoryMapping::new("26", cats::TV_SD, "TV/SD/x264"),
        CategoryMapping::new("7", cats::TV_HD, "TV/x264"),
        CategoryMapping::new("34", cats::TV_HD, "TV/x265"),
        CategoryMapping::new("2", cats::TV_SD, "TV/XviD"),
        CategoryMapping::new("29", cats::TV_ANIME, "Anime"),
        CategoryMapping::new("30", cats::TV_DOCUMENTARY, "Documentary"),
        // Music
        CategoryMapping::new("17", cats::AUDIO_MP3, "Music/Audio"),
        CategoryMapping::new("27", cats::AUDIO_LOSSLESS, "Music/Flac"),
        CategoryMapping::new("23", cats::AUDIO, "Music/Non-English"),
        CategoryMapping::new("41", cats::AUDIO, "Music/Packs"),
        CategoryMapping::new("16", cats::AUDIO_VIDEO, "Music/Video"),
        CategoryMapping::new("42", cats::AUDIO_AUDIOBOOK, "Audio Books"),
        // Games
        CategoryMapping::new("4", cats::PC_GAMES, "PC/Games"),
        CategoryMapping::new("18", cats::CONSOLE, "PS3"),
        CategoryMapping::new("10", cats::CONSOLE_PS4, "PS4"),
        CategoryMapping::new("9", cats::CONSOLE_XBOX, "Xbox"),
        // Other
        CategoryMapping::new("28", cats::PC_0DAY, "Appz/Packs"),
        CategoryMapping::new("43", cats::PC_MAC, "Mac"),
        CategoryMapping::new("20", cats::BOOKS, "Books"),
        CategoryMapping::new("47", cats::OTHER, "Fonts"),
        CategoryMapping::new("6", cats::XXX, "XXX/Movies"),
        CategoryMapping::new("15", cats::XXX, "XXX/Packs"),
    ]
}

fn build_capabilities() -> IndexerCapabilities {
    let mut caps = IndexerCapabilities::new()
        .with_mode(QueryType::Search, &["q"])
        .with_mode(QueryType::TvSearch, &["q", "season", "ep", "imdbid"])
        .with_mode(QueryType::MovieSearch, &["q", "imdbid"])
        .with_mode(QueryType::MusicSearch, &["q"])
        .with_mode(QueryType::BookSearch, &["q"]);
    caps.categories = CategoryMapper::new(category_mappings());
    caps
}

/// Builds `t.json` search requests
pub struct TorrentDayRequestGenerator {
    id: String,
    site_link: String,
    categories: CategoryMapper,
}

impl RequestGenerator for TorrentDayRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria) -> Result<RequestChain<'_>> {
        let mut site_cats = self.categories.to_site_ids(&criteria.categories);
        if site_cats.is_empty() {
            site_cats = self.categories.site_ids();
        }

        let query = match criteria.full_imdb_id() {
            Some(imdb) => imdb,
            None => {
                let term = match criteria.query_type {
                    QueryType::TvSearch => criteria.sanitized_tv_search_string(),
                    _ => criteria.search_term.clone().unwrap_or_default(),
                };
                form_urlencode(term.trim())
            }
        };

        let url = format!("{}t.json?{};q={}", self.site_link, site_cats.join(";"), query);
        info!(indexer_id = %self.id, url = %url, "Adding request");

        let mut chain = RequestChain::new();
        chain.add(std::iter::once(Ok(RequestDescriptor::get(url, AcceptType::Json))));
        Ok(chain)
    }
}

/// One element of the `t.json` array
#[derive(Debug, Deserialize)]
struct TorrentDayRow {
    name: String,
    t: i64,
    c: serde_json::Value,
    size: i64,
    #[serde(default)]
    files: Option<i64>,
    #[serde(default)]
    completed: Option<i64>,
    seeders: i64,
    leechers: i64,
    ctime: i64,
    #[serde(rename = "imdb-id", default)]
    imdb_id: Option<String>,
    #[serde(rename = "download-multiplier", default)]
    download_multiplier: Option<f64>,
}

impl TorrentDayRow {
    fn into_fields(self) -> FieldBag {
        let category = match self.c {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };

        let mut bag = FieldBag::new();
        bag.set(fields::TITLE, self.name)
            .set(fields::DETAILS, format!("details.php?id={}", self.t))
            .set(fields::DOWNLOAD, format!("download.php/{0}/{0}.torrent", self.t))
            .set(fields::DATE, self.ctime.to_string())
            .set(fields::SIZE, self.size.to_string())
            .set(fields::SEEDERS, self.seeders.to_string())
            .set(fields::LEECHERS, self.leechers.to_string())
            .set(fields::CATEGORY, category)
            .set(fields::UPLOAD_VOLUME_FACTOR, "1");
        if let Some(files) = self.files {
            bag.set(fields::FILES, files.to_string());
        }
        if let Some(grabs) = self.completed {
            bag.set(fields::GRABS, grabs.to_string());
        }
        if let Some(imdb) = self.imdb_id {
            bag.set(fields::IMDB, imdb);
        }
        if let Some(factor) = self.download_multiplier {
            bag.set(fields::DOWNLOAD_VOLUME_FACTOR, factor.to_string());
        }
        bag
    }
}

/// Parses the `t.json` array; a malformed element only skips that element
pub struct TorrentDayParser;

impl ResponseParser for TorrentDayParser {
    fn parse(&self, response: &IndexerResponse) -> Result<Vec<ItemResult>> {
        let rows: Vec<serde_json::Value> = serde_json::from_str(&response.body).map_err(|e| {
            IndexerError::Extraction(ExtractionError::new("body", format!("expected a JSON array: {}", e)))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| {
                serde_json::from_value::<TorrentDayRow>(row)
                    .map(TorrentDayRow::into_fields)
                    .map_err(|e| ExtractionError::new("row", e.to_string()))
            })
            .collect())
    }
}

/// TorrentDay indexer
pub struct TorrentDayIndexer {
    id: String,
    site_link: String,
    capabilities: IndexerCapabilities,
    configured: bool,
    generator: TorrentDayRequestGenerator,
    parser: TorrentDayParser,
    normalizer: ResponseNormalizer,
    authenticator: StaticCookieAuthenticator,
}

impl TorrentDayIndexer {
    pub fn new(id: impl Into<String>, settings: &IndexerSettings) -> Self {
        let id = id.into();
        let site_link = settings.site_link(SITE_LINKS[0]);
        let capabilities = build_capabilities();
        let cookie = settings.get("cookie").filter(|c| !c.trim().is_empty());

        if cookie.is_none() {
            tracing::warn!(indexer_id = %id, "Cookie is empty - authentication will fail");
        }

        Self {
            generator: TorrentDayRequestGenerator {
                id: id.clone(),
                site_link: site_link.clone(),
                categories: capabilities.categories.clone(),
            },
            parser: TorrentDayParser,
            normalizer: ResponseNormalizer::new(id.clone(), "TorrentDay", site_link.clone())
                .with_categories(capabilities.categories.clone())
                .with_policy(ReleasePolicy::private_tracker()),
            authenticator: StaticCookieAuthenticator::new(id.clone(), cookie),
            configured: cookie.is_some(),
            capabilities,
            site_link,
            id,
        }
    }
}

impl Indexer for TorrentDayIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "TorrentDay"
    }

    fn description(&self) -> &str {
        "TorrentDay (TD) is a Private site for TV / MOVIES / GENERAL"
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::Native
    }

    fn site_link(&self) -> &str {
        &self.site_link
    }

    fn tracker_type(&self) -> TrackerType {
        TrackerType::Private
    }

    fn language(&self) -> &str {
        "en-US"
    }

    fn capabilities(&self) -> &IndexerCapabilities {
        &self.capabilities
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    fn generator(&self) -> &dyn RequestGenerator {
        &self.generator
    }

    fn parser(&self) -> &dyn ResponseParser {
        &self.parser
    }

    fn normalizer(&self) -> &ResponseNormalizer {
        &self.normalizer
    }

    fn authenticator(&self) -> &dyn Authenticator {
        &self.authenticator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn indexer() -> TorrentDayIndexer {
        let settings = IndexerSettings {
            cookie: Some("uid=1; pass=abc".into()),
            ..Default::default()
        };
        TorrentDayIndexer::new("td", &settings)
    }

    fn urls(indexer: &TorrentDayIndexer, criteria: &SearchCriteria) -> Vec<String> {
        let chain = indexer.generator().search_requests(criteria).unwrap();
        chain.collect_all().unwrap().into_iter().flatten().map(|r| r.url).collect()
    }

    #[test]
    fn test_search_url() {
        let indexer = indexer();
        let query = SearchCriteria::search("the office").with_categories(vec![cats::TV_HD]);
        assert_eq!(
            urls(&indexer, &query),
            vec!["https://torrentday.cool/t.json?32;7;34;q=the+office"]
        );
    }

    #[test]
    fn test_imdb_search_and_category_fallback() {
        let indexer = indexer();
        let query = SearchCriteria::movie_search("ignored").with_imdb("tt0133093");
        let url = &urls(&indexer, &query)[0];
        assert!(url.starts_with("https://torrentday.cool/t.json?96;25;11;"));
        assert!(url.ends_with(";q=tt0133093"));
        assert_eq!(url.matches(';').count(), category_mappings().len());
    }

    #[test]
    fn test_tv_search_uses_episode_string() {
        let indexer = indexer();
        let query = SearchCriteria::tv_search("Show")
            .with_season_episode(1, Some("2"))
            .with_categories(vec![cats::TV_ANIME]);
        assert_eq!(urls(&indexer, &query), vec!["https://torrentday.cool/t.json?29;q=Show+S01E02"]);
    }

    const BODY: &str = r#"[
        {"name": "Show.S01E02.720p", "t": 4521, "c": 7, "size": 1567663063, "files": 2,
         "completed": 40, "seeders": 12, "leechers": 3, "ctime": 1700000000,
         "imdb-id": "tt0944947", "download-multiplier": 0},
        {"name": "Broken row", "t": "not a number"},
        {"name": "Other", "t": 4522, "c": "24", "size": 100, "seeders": 0, "leechers": 0, "ctime": 1700000100}
    ]"#;

    #[test]
    fn test_parse_and_normalize() {
        let indexer = indexer();
        let response = IndexerResponse::new("https://torrentday.cool/t.json", 200, BODY);
        let batch = indexer.normalizer().normalize(&response, indexer.parser()).unwrap();

        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.releases.len(), 2);

        let first = &batch.releases[0];
        assert_eq!(first.title, "Show.S01E02.720p");
        assert_eq!(first.guid, "https://torrentday.cool/details.php?id=4521");
        assert_eq!(
            first.link.as_deref(),
            Some("https://torrentday.cool/download.php/4521/4521.torrent")
        );
        assert_eq!(first.publish_date.timestamp(), 1_700_000_000);
        assert_eq!(first.categories, vec![cats::TV, cats::TV_HD]);
        assert_eq!(first.size, Some(1_567_663_063));
        assert_eq!(first.files, Some(2));
        assert_eq!(first.grabs, Some(40));
        assert_eq!(first.seeders, Some(12));
        assert_eq!(first.peers, Some(15));
        assert_eq!(first.imdb, 944947);
        assert_eq!(first.download_volume_factor, 0.0);
        assert_eq!(first.upload_volume_factor, 1.0);
        assert_eq!(first.minimum_ratio, Some(1.0));
        assert_eq!(first.minimum_seed_time, Some(172_800));

        let second = &batch.releases[1];
        assert_eq!(second.imdb, 0);
        assert_eq!(second.download_volume_factor, 1.0);
        assert_eq!(second.categories, vec![cats::TV, cats::TV_SD]);
    }

    #[test]
    fn test_non_array_body_fails_response() {
        let response = IndexerResponse::new("https://torrentday.cool/t.json", 200, "<html>login</html>");
        assert_matches!(TorrentDayParser.parse(&response), Err(IndexerError::Extraction(_)));
    }

    #[test]
    fn test_configuration() {
        assert!(indexer().is_configured());
        let unconfigured = TorrentDayIndexer::new("td", &IndexerSettings::default());
        assert!(!unconfigured.is_configured());
        assert!(unconfigured.can_handle_query(&SearchCriteria::tv_search("x")));
    }
}
