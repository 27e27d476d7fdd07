//! RevolutionTT indexer implementation
//!
//! RevolutionTT is a private general tracker with a classic TBDev style
//! `browse.php` results table.
//!
//! # Authentication
//!
//! Username and password are posted to `takelogin.php` after fetching
//! `login.php` for its session cookie. The site answers with a redirect chain
//! which is followed here; the login worked when the final page links to
//! `/logout.php`. Sessions are kept for 30 days.
//!
//! # Configuration
//!
//! - `username` / `password`: account credentials (required)
//! - `base_url`: mirror override

use async_trait::async_trait;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::indexer::categories::{CategoryMapper, CategoryMapping, cats};
use crate::indexer::error::{ExtractionError, IndexerError, Result};
use crate::indexer::normalize::{FieldBag, ItemResult, ReleasePolicy, ResponseNormalizer, ResponseParser, fields};
use crate::indexer::request::{AcceptType, Param, RequestChain, RequestDescriptor, encode_params};
use crate::indexer::session::{Authenticator, CookieJar, LoginOutcome};
use crate::indexer::transport::{HttpTransport, IndexerResponse};
use crate::indexer::types::{IndexerCapabilities, IndexerSettings, IndexerType, QueryType, SearchCriteria, TrackerType};
use crate::indexer::{Indexer, RequestGenerator};

pub const SITE_LINKS: &[&str] = &["https://revolutiontt.me/"];

/// Redirect hops followed after posting the login form
const MAX_LOGIN_REDIRECTS: usize = 5;

const LOGGED_IN_MARKER: &str = "/logout.php";

static ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("#torrents-table > tbody > tr").unwrap());
static DETAILS: Lazy<Selector> = Lazy::new(|| Selector::parse(".br_right > a").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
static DOWNLOAD: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(4) > a").unwrap());
static DATE: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(6) nobr").unwrap());
static SIZE: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(7)").unwrap());
static FILES: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(7) > a").unwrap());
static GRABS: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(8)").unwrap());
static SEEDERS: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(9)").unwrap());
static LEECHERS: Lazy<Selector> = Lazy::new(|| Selector::parse("td:nth-child(10)").unwrap());
static CATEGORY: Lazy<Selector> = Lazy::new(|| Selector::parse(".br_type > a").unwrap());
static IMDB: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"a[href*="www.imdb.com/"]"#).unwrap());

fn category_mappings() -> Vec<CategoryMapping> {
    vec![
        CategoryMapping::new("23", cats::TV_ANIME, "Anime"),
        CategoryMapping::new("22", cats::PC_0DAY, "Appz/Misc"),
        CategoryMapping::new("1", cats::PC_0DAY, "Appz/PC-ISO"),
        CategoryMapping::new("36", cats::BOOKS_EBOOK, "E-Book"),
        CategoryMapping::new("4", cats::PC_GAMES, "Games/PC-ISO"),
        CategoryMapping::new("21", cats::PC_GAMES, "Games/PC-Rips"),
        CategoryMapping::new("16", cats::CONSOLE, "Games/PS3"),
        CategoryMapping::new("40", cats::CONSOLE_PS4, "Games/PS4"),
        CategoryMapping::new("39", cats::CONSOLE_XBOX, "Games/XBOX360"),
        CategoryMapping::new("48", cats::MOVIES_UHD, "Movies/4K"),
        CategoryMapping::new("11", cats::MOVIES_BLURAY, "Movies/BluRay"),
        CategoryMapping::new("10", cats::MOVIES_DVD, "Movies/DVD-R"),
        CategoryMapping::new("12", cats::MOVIES_HD, "Movies/HD-x264"),
        CategoryMapping::new("13", cats::MOVIES_SD, "Movies/SD-x264"),
        CategoryMapping::new("44", cats::MOVIES_FOREIGN, "Movies/Foreign"),
        CategoryMapping::new("43", cats::MOVIES_WEBDL, "Movies/Web-DL"),
        CategoryMapping::new("8", cats::AUDIO_MP3, "Music"),
        CategoryMapping::new("46", cats::AUDIO_LOSSLESS, "Music/Flac"),
        CategoryMapping::new("29", cats::AUDIO_VIDEO, "Music/Videos"),
        CategoryMapping::new("42", cats::TV_HD, "TV/HD"),
        CategoryMapping::new("7", cats::TV_SD, "TV/SD"),
        CategoryMapping::new("45", cats::TV, "TV/Packs"),
        CategoryMapping::new("47", cats::TV_UHD, "TV/4K"),
        CategoryMapping::new("17", cats::XXX, "XXX"),
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

/// First run of digits in `text`
fn leading_number(text: &str) -> Option<String> {
    static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d[\d,]*").unwrap());
    NUMBER_RE.find(text).map(|m| m.as_str().replace(',', ""))
}

fn text_of(row: ElementRef<'_>, selector: &Selector) -> Option<String> {
    row.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Builds `browse.php` search requests
pub struct RevolutionTTRequestGenerator {
    id: String,
    site_link: String,
    categories: CategoryMapper,
}

impl RequestGenerator for RevolutionTTRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria) -> Result<RequestChain<'_>> {
        let mut params = vec![Param::new("incldead", "1")];

        match criteria.full_imdb_id() {
            Some(imdb) => {
                params.push(Param::new("titleonly", "0"));
                params.push(Param::new("search", imdb));
            }
            None => {
                let term = match criteria.query_type {
                    QueryType::TvSearch => criteria.sanitized_tv_search_string(),
                    _ => criteria.search_term.as_deref().unwrap_or_default().trim().to_string(),
                };
                params.push(Param::new("titleonly", "1"));
                params.push(Param::new("search", term));
            }
        }

        for cat in self.categories.to_site_ids(&criteria.categories) {
            params.push(Param::new(format!("c{}", cat), "1"));
        }

        let url = format!("{}browse.php?{}", self.site_link, encode_params(&params));
        info!(indexer_id = %self.id, url = %url, "Adding request");

        let mut chain = RequestChain::new();
        chain.add(std::iter::once(Ok(RequestDescriptor::get(url, AcceptType::Html))));
        Ok(chain)
    }
}

/// Extracts rows from the `#torrents-table` results table
pub struct RevolutionTTParser;

impl RevolutionTTParser {
    /// `None` for rows without a download link (support and donation banners)
    fn parse_row(row: ElementRef<'_>) -> Option<ItemResult> {
        let download = row.select(&DOWNLOAD).next()?.value().attr("href")?.to_string();
        Some(Self::extract(row, download))
    }

    fn extract(row: ElementRef<'_>, download: String) -> ItemResult {
        let details = row
            .select(&DETAILS)
            .next()
            .ok_or_else(|| ExtractionError::missing(fields::DETAILS))?;
        let href = details
            .value()
            .attr("href")
            .ok_or_else(|| ExtractionError::missing(fields::DETAILS))?;
        let title = text_of(details, &TITLE).ok_or_else(|| ExtractionError::missing(fields::TITLE))?;
        let title = title.strip_prefix("[REQ] ").unwrap_or(&title);

        let mut bag = FieldBag::new();
        bag.set(fields::TITLE, title)
            .set(fields::DETAILS, href)
            .set(fields::DOWNLOAD, download)
            .set(fields::DATE, text_of(row, &DATE).ok_or_else(|| ExtractionError::missing(fields::DATE))?)
            .set(fields::DOWNLOAD_VOLUME_FACTOR, "1")
            .set(fields::UPLOAD_VOLUME_FACTOR, "1");

        // size is the first text node, the file count is a link after it
        if let Some(size) = row
            .select(&SIZE)
            .next()
            .and_then(|td| td.text().next().map(str::trim).map(str::to_string))
        {
            bag.set(fields::SIZE, size);
        }
        if let Some(files) = text_of(row, &FILES).as_deref().and_then(leading_number) {
            bag.set(fields::FILES, files);
        }
        if let Some(grabs) = text_of(row, &GRABS).as_deref().and_then(leading_number) {
            bag.set(fields::GRABS, grabs);
        }
        if let Some(seeders) = text_of(row, &SEEDERS) {
            bag.set(fields::SEEDERS, seeders);
        }
        if let Some(leechers) = text_of(row, &LEECHERS) {
            bag.set(fields::LEECHERS, leechers);
        }
        if let Some(cat) = row.select(&CATEGORY).next().and_then(|a| a.value().attr("href")) {
            bag.set(fields::CATEGORY, cat.replace("browse.php?cat=", ""));
        }
        if let Some(imdb) = row.select(&IMDB).next().and_then(|a| a.value().attr("href")) {
            bag.set(fields::IMDB, imdb);
        }
        Ok(bag)
    }
}

impl ResponseParser for RevolutionTTParser {
    fn parse(&self, response: &IndexerResponse) -> Result<Vec<ItemResult>> {
        let document = Html::parse_document(&response.body);
        let items: Vec<ItemResult> = document
            .select(&ROWS)
            .skip(1)
            .filter_map(Self::parse_row)
            .collect();
        debug!(rows = items.len(), url = %response.url, "Extracted RevolutionTT rows");
        Ok(items)
    }
}

/// Form login against `takelogin.php`
pub struct RevolutionTTAuthenticator {
    site_id: String,
    site_link: Url,
    username: Option<String>,
    password: Option<String>,
}

impl RevolutionTTAuthenticator {
    fn url(&self, path: &str) -> Result<Url> {
        self.site_link
            .join(path)
            .map_err(|e| IndexerError::definition(format!("invalid url '{}': {}", path, e)))
    }

    async fn send(
        &self,
        transport: &dyn HttpTransport,
        request: RequestDescriptor,
        jar: &mut CookieJar,
    ) -> Result<IndexerResponse> {
        let response = transport.execute(&request, jar).await?;
        for header in response.set_cookies() {
            jar.apply_set_cookie(header);
        }
        Ok(response)
    }
}

#[async_trait]
impl Authenticator for RevolutionTTAuthenticator {
    async fn login(&self, transport: &dyn HttpTransport) -> Result<LoginOutcome> {
        let (Some(username), Some(password)) = (self.username.as_deref(), self.password.as_deref()) else {
            return Err(IndexerError::auth(&self.site_id, "username and password are required"));
        };

        let mut jar = CookieJar::new();
        let login_page = self.url("login.php")?;
        self.send(transport, RequestDescriptor::get(login_page.as_str(), AcceptType::Html), &mut jar)
            .await?;

        let mut current = self.url("takelogin.php")?;
        let form = vec![Param::new("username", username), Param::new("password", password)];
        let mut response = self
            .send(transport, RequestDescriptor::post(current.as_str(), form, AcceptType::Html), &mut jar)
            .await?;

        for _ in 0..MAX_LOGIN_REDIRECTS {
            let Some(location) = response.location().filter(|_| response.is_redirect()) else {
                break;
            };
            current = current
                .join(location)
                .map_err(|e| IndexerError::auth(&self.site_id, format!("bad redirect '{}': {}", location, e)))?;
            debug!(site = %self.site_id, url = %current, "Following login redirect");
            response = self
                .send(transport, RequestDescriptor::get(current.as_str(), AcceptType::Html), &mut jar)
                .await?;
        }

        if response.body.contains(LOGGED_IN_MARKER) {
            debug!(site = %self.site_id, "RevolutionTT authentication succeeded");
            Ok(LoginOutcome::new(jar, Some(Utc::now() + Duration::days(30))))
        } else {
            Err(IndexerError::auth(&self.site_id, "RevolutionTT authentication failed"))
        }
    }

    fn needs_login(&self, response: &IndexerResponse) -> bool {
        response.is_redirect() || !response.body.contains(LOGGED_IN_MARKER)
    }
}

/// RevolutionTT indexer
pub struct RevolutionTTIndexer {
    id: String,
    site_link: String,
    capabilities: IndexerCapabilities,
    configured: bool,
    generator: RevolutionTTRequestGenerator,
    parser: RevolutionTTParser,
    normalizer: ResponseNormalizer,
    authenticator: RevolutionTTAuthenticator,
}

impl RevolutionTTIndexer {
    pub fn new(id: impl Into<String>, settings: &IndexerSettings) -> Result<Self> {
        let id = id.into();
        let site_link = settings.site_link(SITE_LINKS[0]);
        let parsed_link = Url::parse(&site_link)
            .map_err(|e| IndexerError::definition(format!("invalid site link '{}': {}", site_link, e)))?;
        let capabilities = build_capabilities();

        let username = settings.get("username").filter(|v| !v.is_empty()).map(str::to_string);
        let password = settings.get("password").filter(|v| !v.is_empty()).map(str::to_string);
        let configured = username.is_some() && password.is_some();
        if !configured {
            tracing::warn!(indexer_id = %id, "Username or password missing - login will fail");
        }

        Ok(Self {
            generator: RevolutionTTRequestGenerator {
                id: id.clone(),
                site_link: site_link.clone(),
                categories: capabilities.categories.clone(),
            },
            parser: RevolutionTTParser,
            normalizer: ResponseNormalizer::new(id.clone(), "RevolutionTT", site_link.clone())
                .with_categories(capabilities.categories.clone())
                .with_policy(ReleasePolicy::private_tracker()),
            authenticator: RevolutionTTAuthenticator {
                site_id: id.clone(),
                site_link: parsed_link,
                username,
                password,
            },
            configured,
            capabilities,
            site_link,
            id,
        })
    }
}

impl Indexer for RevolutionTTIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "RevolutionTT"
    }

    fn description(&self) -> &str {
        "The Revolution has begun"
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
