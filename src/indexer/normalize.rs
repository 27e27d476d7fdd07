//! Response normalization
//!
//! Site parsers turn a raw response into [`FieldBag`]s, one per item, with
//! string values under the names in [`fields`]. The [`ResponseNormalizer`]
//! applies the coercions every site shares (sizes, counts, dates, IMDB ids,
//! category mapping, policy defaults) and produces [`ReleaseInfo`]s in
//! source order. Items that fail are skipped and counted.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::categories::CategoryMapper;
use super::error::{ExtractionError, Result};
use super::magnet;
use super::transport::IndexerResponse;
use super::types::ReleaseInfo;

/// Well-known field names
pub mod fields {
    pub const TITLE: &str = "title";
    pub const GUID: &str = "guid";
    pub const DETAILS: &str = "details";
    pub const DOWNLOAD: &str = "download";
    pub const MAGNET: &str = "magnet";
    pub const INFOHASH: &str = "infohash";
    pub const DATE: &str = "date";
    pub const SIZE: &str = "size";
    pub const FILES: &str = "files";
    pub const GRABS: &str = "grabs";
    pub const SEEDERS: &str = "seeders";
    pub const LEECHERS: &str = "leechers";
    pub const PEERS: &str = "peers";
    pub const CATEGORY: &str = "category";
    pub const IMDB: &str = "imdb";
    pub const DESCRIPTION: &str = "description";
    pub const DOWNLOAD_VOLUME_FACTOR: &str = "downloadvolumefactor";
    pub const UPLOAD_VOLUME_FACTOR: &str = "uploadvolumefactor";
    pub const MINIMUM_RATIO: &str = "minimumratio";
    pub const MINIMUM_SEED_TIME: &str = "minimumseedtime";
}

/// One extracted item: named, possibly multi-valued string fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldBag {
    values: BTreeMap<String, Vec<String>>,
}

pub type ItemResult = std::result::Result<FieldBag, ExtractionError>;

impl FieldBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing previous values
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.to_string(), vec![value.into()]);
        self
    }

    /// Add another value to a field
    pub fn push(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.values.entry(name.to_string()).or_default().push(value.into());
        self
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// First non-blank value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn require(&self, name: &str) -> std::result::Result<&str, ExtractionError> {
        self.get(name).ok_or_else(|| ExtractionError::missing(name))
    }

    pub fn int(&self, name: &str) -> std::result::Result<Option<i64>, ExtractionError> {
        self.get(name)
            .map(|v| coerce_int(v).ok_or_else(|| ExtractionError::new(name, format!("not a number: '{}'", v))))
            .transpose()
    }

    /// Integer field that must fit an i32 counter (seeders, files, grabs)
    pub fn count(&self, name: &str) -> std::result::Result<Option<i32>, ExtractionError> {
        self.int(name)?
            .map(|v| i32::try_from(v).map_err(|_| ExtractionError::new(name, format!("out of range: {}", v))))
            .transpose()
    }

    pub fn float(&self, name: &str) -> std::result::Result<Option<f64>, ExtractionError> {
        self.get(name)
            .map(|v| coerce_float(v).ok_or_else(|| ExtractionError::new(name, format!("not a number: '{}'", v))))
            .transpose()
    }

    pub fn size(&self, name: &str) -> std::result::Result<Option<i64>, ExtractionError> {
        self.get(name)
            .map(|v| parse_size(v).ok_or_else(|| ExtractionError::new(name, format!("not a size: '{}'", v))))
            .transpose()
    }
}

/// Parse a human readable size ("1.46 GB", "700MiB", "1,024 KB") into bytes.
/// Units are binary multiples; a bare number is bytes.
pub fn parse_size(input: &str) -> Option<i64> {
    static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*([0-9][0-9,\s]*(?:\.[0-9]+)?)\s*([kmgtp]?i?b?|bytes?)?\s*$").unwrap()
    });

    let caps = SIZE_RE.captures(input)?;
    let number: f64 = caps[1].replace([',', ' '], "").parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
    let multiplier: f64 = match unit.chars().next() {
        Some('k') => 1024.0,
        Some('m') => 1024.0 * 1024.0,
        Some('g') => 1024.0 * 1024.0 * 1024.0,
        Some('t') => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        Some('p') => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some((number * multiplier) as i64)
}

fn normalize_number(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '_'))
        .collect()
}

/// Integer coercion tolerant of thousands separators; decimals truncate
pub fn coerce_int(input: &str) -> Option<i64> {
    let normalized = normalize_number(input);
    normalized
        .parse::<i64>()
        .ok()
        .or_else(|| normalized.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

pub fn coerce_float(input: &str) -> Option<f64> {
    normalize_number(input).parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Numeric part of an IMDB id; `0` when absent or unparsable
pub fn parse_imdb_id(input: Option<&str>) -> i64 {
    static IMDB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(?:^|tt|/)(\d{1,9})\b").unwrap());

    input
        .and_then(|s| IMDB_RE.captures(s.trim()))
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

/// Unix seconds as an instant
pub fn unix_to_datetime(timestamp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0).single()
}

/// Unix seconds in a caller supplied timezone
pub fn unix_to_local<Tz: TimeZone>(timestamp: i64, tz: &Tz) -> Option<DateTime<Tz>> {
    unix_to_datetime(timestamp).map(|d| d.with_timezone(tz))
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d.%m.%Y %H:%M",
];

/// Parse a publish date. Digits are unix seconds; strings without an offset
/// are read in `site_tz`.
pub fn parse_date(input: &str, site_tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok().and_then(unix_to_datetime);
    }
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_rfc2822(s) {
        return Some(d.with_timezone(&Utc));
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    site_tz
        .from_local_datetime(&naive)
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// Site policy used when an item does not say otherwise
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasePolicy {
    pub download_volume_factor: f64,
    pub upload_volume_factor: f64,
    pub minimum_ratio: Option<f64>,
    pub minimum_seed_time: Option<i64>,
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        Self {
            download_volume_factor: 1.0,
            upload_volume_factor: 1.0,
            minimum_ratio: None,
            minimum_seed_time: None,
        }
    }
}

impl ReleasePolicy {
    /// Ratio 1 and 48 hours of seeding
    pub fn private_tracker() -> Self {
        Self {
            minimum_ratio: Some(1.0),
            minimum_seed_time: Some(172_800),
            ..Self::default()
        }
    }
}

/// Site specific extraction of items from a raw response.
///
/// A whole-response failure (unparsable JSON, missing results table) is an
/// error; a single bad item is an `Err` entry in the returned list.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, response: &IndexerResponse) -> Result<Vec<ItemResult>>;
}

impl<F> ResponseParser for F
where
    F: Fn(&IndexerResponse) -> Result<Vec<ItemResult>> + Send + Sync,
{
    fn parse(&self, response: &IndexerResponse) -> Result<Vec<ItemResult>> {
        self(response)
    }
}

/// Releases from one response plus the number of skipped items
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub releases: Vec<ReleaseInfo>,
    pub skipped: usize,
}

/// Turns field bags into releases for one site
#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    site_id: String,
    site_name: String,
    site_link: String,
    categories: CategoryMapper,
    policy: ReleasePolicy,
    site_timezone: FixedOffset,
}

impl ResponseNormalizer {
    pub fn new(site_id: impl Into<String>, site_name: impl Into<String>, site_link: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            site_name: site_name.into(),
            site_link: site_link.into(),
            categories: CategoryMapper::default(),
            policy: ReleasePolicy::default(),
            site_timezone: Utc.fix(),
        }
    }

    pub fn with_categories(mut self, categories: CategoryMapper) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_policy(mut self, policy: ReleasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timezone(mut self, tz: FixedOffset) -> Self {
        self.site_timezone = tz;
        self
    }

    pub fn policy(&self) -> &ReleasePolicy {
        &self.policy
    }

    /// Run `parser` over a response and normalize every item it yields
    pub fn normalize(&self, response: &IndexerResponse, parser: &dyn ResponseParser) -> Result<NormalizedBatch> {
        let items = parser.parse(response)?;
        let total = items.len();
        let mut batch = NormalizedBatch::default();

        for (index, item) in items.into_iter().enumerate() {
            match item.and_then(|bag| self.to_release(&bag)) {
                Ok(release) => batch.releases.push(release),
                Err(e) => {
                    debug!(site = %self.site_id, index, error = %e, "Skipping item");
                    batch.skipped += 1;
                }
            }
        }

        if batch.skipped > 0 {
            warn!(
                site = %self.site_id,
                skipped = batch.skipped,
                total,
                url = %response.url,
                "Some items could not be parsed"
            );
        }
        Ok(batch)
    }

    /// Normalize a single item
    pub fn to_release(&self, bag: &FieldBag) -> std::result::Result<ReleaseInfo, ExtractionError> {
        let title = bag.require(fields::TITLE)?.to_string();

        let details = bag.get(fields::DETAILS).map(|d| self.resolve(d)).transpose()?;
        let link = bag.get(fields::DOWNLOAD).map(|d| self.resolve(d)).transpose()?;
        let mut magnet_uri = bag.get(fields::MAGNET).map(str::to_string);
        let mut info_hash = bag.get(fields::INFOHASH).map(str::to_string);

        if info_hash.is_none() {
            info_hash = magnet_uri.as_deref().and_then(magnet::info_hash_from_magnet);
        }
        if magnet_uri.is_none() && link.is_none() {
            if let Some(hash) = info_hash.as_deref() {
                magnet_uri = Some(magnet::build_public_magnet_link(hash, &title)?);
            }
        }
        if link.is_none() && magnet_uri.is_none() {
            return Err(ExtractionError::missing(fields::DOWNLOAD));
        }

        let guid = bag
            .get(fields::GUID)
            .map(str::to_string)
            .or_else(|| details.clone())
            .or_else(|| link.clone())
            .or_else(|| magnet_uri.clone())
            .ok_or_else(|| ExtractionError::missing(fields::GUID))?;

        let publish_date = match bag.get(fields::DATE) {
            Some(raw) => parse_date(raw, &self.site_timezone)
                .ok_or_else(|| ExtractionError::new(fields::DATE, format!("unrecognized date '{}'", raw)))?,
            None => Utc::now(),
        };

        let mut categories: Vec<i32> = bag
            .all(fields::CATEGORY)
            .iter()
            .flat_map(|token| self.categories.to_canonical(token))
            .collect();
        categories.sort();
        categories.dedup();

        let seeders = bag.count(fields::SEEDERS)?;
        let leechers = bag.count(fields::LEECHERS)?;
        let peers = match (bag.count(fields::PEERS)?, seeders, leechers) {
            (Some(p), _, _) => Some(p),
            (None, Some(s), Some(l)) => Some(
                s.checked_add(l)
                    .ok_or_else(|| ExtractionError::new(fields::PEERS, "seeders + leechers out of range"))?,
            ),
            (None, s, None) => s,
            (None, None, l) => l,
        };

        let mut release = ReleaseInfo::new(title, guid, publish_date);
        release.details = details;
        release.link = link;
        release.magnet_uri = magnet_uri;
        release.info_hash = info_hash;
        release.categories = categories;
        release.size = bag.size(fields::SIZE)?;
        release.files = bag.count(fields::FILES)?;
        release.grabs = bag.count(fields::GRABS)?;
        release.description = bag.get(fields::DESCRIPTION).map(str::to_string);
        release.imdb = parse_imdb_id(bag.get(fields::IMDB));
        release.seeders = seeders;
        release.peers = peers;
        release.download_volume_factor = bag
            .float(fields::DOWNLOAD_VOLUME_FACTOR)?
            .unwrap_or(self.policy.download_volume_factor);
        release.upload_volume_factor = bag
            .float(fields::UPLOAD_VOLUME_FACTOR)?
            .unwrap_or(self.policy.upload_volume_factor);
        release.minimum_ratio = bag.float(fields::MINIMUM_RATIO)?.or(self.policy.minimum_ratio);
        release.minimum_seed_time = bag.int(fields::MINIMUM_SEED_TIME)?.or(self.policy.minimum_seed_time);
        release.indexer_id = Some(self.site_id.clone());
        release.indexer_name = Some(self.site_name.clone());
        Ok(release)
    }

    fn resolve(&self, link: &str) -> std::result::Result<String, ExtractionError> {
        if link.starts_with("magnet:") {
            return Ok(link.to_string());
        }
        match Url::parse(link) {
            Ok(url) => Ok(url.to_string()),
            Err(_) => Url::parse(&self.site_link)
                .and_then(|base| base.join(link))
                .map(|u| u.to_string())
                .map_err(|e| ExtractionError::new("link", format!("cannot resolve '{}': {}", link, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::categories::{CategoryMapping, cats};
    use pretty_assertions::assert_eq;

    fn normalizer() -> ResponseNormalizer {
        ResponseNormalizer::new("site", "Site", "https://site.example/")
            .with_categories(CategoryMapper::new(vec![
                CategoryMapping::new("7", cats::TV_SD, "TV/SD"),
                CategoryMapping::new("24", cats::MOVIES_HD, "Movies/HD"),
            ]))
            .with_policy(ReleasePolicy::private_tracker())
    }

    fn item(title: &str) -> FieldBag {
        FieldBag::new()
            .with(fields::TITLE, title)
            .with(fields::DETAILS, format!("details.php?id={}", title.len()))
            .with(fields::DOWNLOAD, "download.php/1/1.torrent")
    }

    #[test]
    fn test_parse_size_table() {
        let table: &[(&str, i64)] = &[
            ("1.46 GB", 1_567_663_063),
            ("700 MB", 734_003_200),
            ("700MiB", 734_003_200),
            ("1,024 KB", 1_048_576),
            ("2 TB", 2_199_023_255_552),
            ("512", 512),
            ("512 B", 512),
            ("3 bytes", 3),
        ];
        for (input, expected) in table {
            assert_eq!(parse_size(input), Some(*expected), "{input}");
        }
        assert_eq!(parse_size("big"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(coerce_int("1,234"), Some(1234));
        assert_eq!(coerce_int(" 12 "), Some(12));
        assert_eq!(coerce_int("1 234 567"), Some(1_234_567));
        assert_eq!(coerce_int("3.7"), Some(3));
        assert_eq!(coerce_int("n/a"), None);
    }

    #[test]
    fn test_imdb_ids() {
        assert_eq!(parse_imdb_id(Some("tt1234567")), 1_234_567);
        assert_eq!(parse_imdb_id(Some("https://www.imdb.com/title/tt0133093/")), 133_093);
        assert_eq!(parse_imdb_id(Some("0133093")), 133_093);
        assert_eq!(parse_imdb_id(Some("")), 0);
        assert_eq!(parse_imdb_id(None), 0);
    }

    #[test]
    fn test_unix_timestamp_in_fixed_timezone() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = unix_to_local(1_700_000_000, &tz).unwrap();
        assert_eq!(local.to_rfc3339(), "2023-11-15T00:13:20+02:00");
        assert_eq!(
            unix_to_datetime(1_700_000_000).unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_parse_date_formats() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_date("2024-03-01 12:30:00", &utc), Some(expected));
        assert_eq!(parse_date("2024-03-0112:30:00", &utc), Some(expected));
        assert_eq!(parse_date("2024-03-01T12:30:00Z", &utc), Some(expected));
        assert_eq!(parse_date("Fri, 01 Mar 2024 12:30:00 +0000", &utc), Some(expected));
        assert_eq!(parse_date("1709296200", &utc), Some(expected));

        let cet = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(parse_date("2024-03-01 13:30:00", &cet), Some(expected));
        assert_eq!(parse_date("yesterday-ish", &utc), None);
    }

    #[test]
    fn test_to_release_applies_policy_and_peers() {
        let bag = item("Show.S01E01.720p")
            .with(fields::SEEDERS, "12")
            .with(fields::LEECHERS, "3")
            .with(fields::SIZE, "1.46 GB")
            .with(fields::CATEGORY, "7")
            .with(fields::IMDB, "tt1234567")
            .with(fields::DATE, "1700000000");
        let r = normalizer().to_release(&bag).unwrap();
        assert_eq!(r.peers, Some(15));
        assert_eq!(r.seeders, Some(12));
        assert_eq!(r.size, Some(1_567_663_063));
        assert_eq!(r.categories, vec![cats::TV, cats::TV_SD]);
        assert_eq!(r.imdb, 1_234_567);
        assert_eq!(r.minimum_ratio, Some(1.0));
        assert_eq!(r.minimum_seed_time, Some(172_800));
        assert_eq!(r.download_volume_factor, 1.0);
        assert_eq!(r.guid, "https://site.example/details.php?id=16");
        assert_eq!(r.link.as_deref(), Some("https://site.example/download.php/1/1.torrent"));
        assert_eq!(r.indexer_id.as_deref(), Some("site"));
    }

    #[test]
    fn test_oversized_counters_are_item_errors() {
        let sum = item("a").with(fields::SEEDERS, "2147483647").with(fields::LEECHERS, "1");
        let err = normalizer().to_release(&sum).unwrap_err();
        assert_eq!(err.field, fields::PEERS);

        let seeders = item("b").with(fields::SEEDERS, "3000000000");
        assert_eq!(normalizer().to_release(&seeders).unwrap_err().field, fields::SEEDERS);

        let grabs = item("c").with(fields::GRABS, "3,000,000,000");
        assert_eq!(normalizer().to_release(&grabs).unwrap_err().field, fields::GRABS);

        let explicit = item("d").with(fields::SEEDERS, "2147483647").with(fields::LEECHERS, "1").with(fields::PEERS, "9");
        assert_eq!(normalizer().to_release(&explicit).unwrap().peers, Some(9));
    }

    #[test]
    fn test_item_overrides_policy() {
        let bag = item("Free").with(fields::DOWNLOAD_VOLUME_FACTOR, "0");
        let r = normalizer().to_release(&bag).unwrap();
        assert_eq!(r.download_volume_factor, 0.0);
        assert_eq!(r.upload_volume_factor, 1.0);
    }

    #[test]
    fn test_magnet_only_item() {
        let bag = FieldBag::new()
            .with(fields::TITLE, "Public Thing")
            .with(fields::INFOHASH, "0123456789abcdef0123456789abcdef01234567");
        let r = normalizer().to_release(&bag).unwrap();
        assert!(r.magnet_uri.as_deref().unwrap().starts_with("magnet:?xt=urn:btih:"));
        assert_eq!(r.guid, r.magnet_uri.clone().unwrap());
    }

    #[test]
    fn test_normalize_skips_bad_items_and_keeps_order() {
        let parser = |_: &IndexerResponse| -> Result<Vec<ItemResult>> {
            Ok(vec![
                Ok(item("newest")),
                Err(ExtractionError::new("row", "banner row")),
                Ok(FieldBag::new().with(fields::DETAILS, "x")),
                Ok(item("middle").with(fields::SEEDERS, "lots")),
                Ok(item("oldest")),
            ])
        };
        let response = IndexerResponse::new("https://site.example/browse.php", 200, "");
        let batch = normalizer().normalize(&response, &parser).unwrap();
        let titles: Vec<_> = batch.releases.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["newest", "oldest"]);
        assert_eq!(batch.skipped, 3);
    }
}
