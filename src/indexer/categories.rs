//! Canonical category taxonomy and site category mapping
//!
//! Canonical categories follow the Newznab numbering scheme. Main categories
//! are in thousands (1000, 2000, etc.) and subcategories add tens (2010, 2020,
//! etc.). Each site declares how its own category tokens map onto this table;
//! [`CategoryMapper`] translates in both directions.

use serde::{Deserialize, Serialize};

/// Marker that inverts a search path's category filter when it is the first token.
pub const EXCLUDE_MARKER: &str = "!";

/// A mapping from a site category token to a canonical category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// The site's native category token (string for flexibility)
    pub tracker_id: String,
    /// The canonical category ID
    pub torznab_cat: i32,
    /// Description of the category
    pub description: Option<String>,
    /// Part of the adapter's default category set
    #[serde(default)]
    pub default: bool,
}

impl CategoryMapping {
    pub fn new(tracker_id: impl Into<String>, torznab_cat: i32, desc: impl Into<String>) -> Self {
        Self {
            tracker_id: tracker_id.into(),
            torznab_cat,
            description: Some(desc.into()),
            default: false,
        }
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }
}

/// A canonical category definition
#[derive(Debug, Clone)]
pub struct TorznabCategory {
    pub id: i32,
    pub name: &'static str,
    pub parent_id: Option<i32>,
}

impl TorznabCategory {
    pub const fn new(id: i32, name: &'static str, parent_id: Option<i32>) -> Self {
        Self {
            id,
            name,
            parent_id,
        }
    }

    /// Check if this is a parent category
    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Standard Torznab categories (based on Newznab spec)
pub static TORZNAB_CATEGORIES: &[TorznabCategory] = &[
    // Console (1000)
    TorznabCategory::new(1000, "Console", None),
    TorznabCategory::new(1010, "Console/NDS", Some(1000)),
    TorznabCategory::new(1020, "Console/PSP", Some(1000)),
    TorznabCategory::new(1030, "Console/Wii", Some(1000)),
    TorznabCategory::new(1040, "Console/Xbox", Some(1000)),
    TorznabCategory::new(1050, "Console/Xbox 360", Some(1000)),
    TorznabCategory::new(1060, "Console/WiiWare", Some(1000)),
    TorznabCategory::new(1070, "Console/Xbox 360 DLC", Some(1000)),
    TorznabCategory::new(1080, "Console/PS3", Some(1000)),
    TorznabCategory::new(1090, "Console/Other", Some(1000)),
    TorznabCategory::new(1110, "Console/3DS", Some(1000)),
    TorznabCategory::new(1120, "Console/PS Vita", Some(1000)),
    TorznabCategory::new(1130, "Console/WiiU", Some(1000)),
    TorznabCategory::new(1140, "Console/Xbox One", Some(1000)),
    TorznabCategory::new(1150, "Console/PS4", Some(1000)),
    TorznabCategory::new(1180, "Console/Switch", Some(1000)),
    // Movies (2000)
    TorznabCategory::new(2000, "Movies", None),
    TorznabCategory::new(2010, "Movies/Foreign", Some(2000)),
    TorznabCategory::new(2020, "Movies/Other", Some(2000)),
    TorznabCategory::new(2030, "Movies/SD", Some(2000)),
    TorznabCategory::new(2040, "Movies/HD", Some(2000)),
    TorznabCategory::new(2045, "Movies/UHD", Some(2000)),
    TorznabCategory::new(2050, "Movies/BluRay", Some(2000)),
    TorznabCategory::new(2060, "Movies/3D", Some(2000)),
    TorznabCategory::new(2070, "Movies/DVD", Some(2000)),
    TorznabCategory::new(2080, "Movies/WEB-DL", Some(2000)),
    // Audio (3000)
    TorznabCategory::new(3000, "Audio", None),
    TorznabCategory::new(3010, "Audio/MP3", Some(3000)),
    TorznabCategory::new(3020, "Audio/Video", Some(3000)),
    TorznabCategory::new(3030, "Audio/Audiobook", Some(3000)),
    TorznabCategory::new(3040, "Audio/Lossless", Some(3000)),
    TorznabCategory::new(3050, "Audio/Other", Some(3000)),
    TorznabCategory::new(3060, "Audio/Foreign", Some(3000)),
    // PC (4000)
    TorznabCategory::new(4000, "PC", None),
    TorznabCategory::new(4010, "PC/0day", Some(4000)),
    TorznabCategory::new(4020, "PC/ISO", Some(4000)),
    TorznabCategory::new(4030, "PC/Mac", Some(4000)),
    TorznabCategory::new(4040, "PC/Mobile-Other", Some(4000)),
    TorznabCategory::new(4050, "PC/Games", Some(4000)),
    TorznabCategory::new(4060, "PC/Mobile-iOS", Some(4000)),
    TorznabCategory::new(4070, "PC/Mobile-Android", Some(4000)),
    // TV (5000)
    TorznabCategory::new(5000, "TV", None),
    TorznabCategory::new(5010, "TV/WEB-DL", Some(5000)),
    TorznabCategory::new(5020, "TV/Foreign", Some(5000)),
    TorznabCategory::new(5030, "TV/SD", Some(5000)),
    TorznabCategory::new(5040, "TV/HD", Some(5000)),
    TorznabCategory::new(5045, "TV/UHD", Some(5000)),
    TorznabCategory::new(5050, "TV/Other", Some(5000)),
    TorznabCategory::new(5060, "TV/Sport", Some(5000)),
    TorznabCategory::new(5070, "TV/Anime", Some(5000)),
    TorznabCategory::new(5080, "TV/Documentary", Some(5000)),
    // XXX (6000) - Adult content
    TorznabCategory::new(6000, "XXX", None),
    TorznabCategory::new(6010, "XXX/DVD", Some(6000)),
    TorznabCategory::new(6020, "XXX/WMV", Some(6000)),
    TorznabCategory::new(6030, "XXX/XviD", Some(6000)),
    TorznabCategory::new(6040, "XXX/x264", Some(6000)),
    TorznabCategory::new(6050, "XXX/Pack", Some(6000)),
    TorznabCategory::new(6060, "XXX/ImageSet", Some(6000)),
    TorznabCategory::new(6070, "XXX/Other", Some(6000)),
    TorznabCategory::new(6080, "XXX/SD", Some(6000)),
    TorznabCategory::new(6090, "XXX/WEB-DL", Some(6000)),
    // Books (7000)
    TorznabCategory::new(7000, "Books", None),
    TorznabCategory::new(7010, "Books/Mags", Some(7000)),
    TorznabCategory::new(7020, "Books/EBook", Some(7000)),
    TorznabCategory::new(7030, "Books/Comics", Some(7000)),
    TorznabCategory::new(7040, "Books/Technical", Some(7000)),
    TorznabCategory::new(7050, "Books/Other", Some(7000)),
    TorznabCategory::new(7060, "Books/Foreign", Some(7000)),
    // Other (8000)
    TorznabCategory::new(8000, "Other", None),
    TorznabCategory::new(8010, "Other/Misc", Some(8000)),
    TorznabCategory::new(8020, "Other/Hashed", Some(8000)),
];

/// Common category constants
pub mod cats {
    pub const CONSOLE: i32 = 1000;
    pub const MOVIES: i32 = 2000;
    pub const AUDIO: i32 = 3000;
    pub const PC: i32 = 4000;
    pub const TV: i32 = 5000;
    pub const XXX: i32 = 6000;
    pub const BOOKS: i32 = 7000;
    pub const OTHER: i32 = 8000;

    pub const MOVIES_FOREIGN: i32 = 2010;
    pub const MOVIES_SD: i32 = 2030;
    pub const MOVIES_HD: i32 = 2040;
    pub const MOVIES_UHD: i32 = 2045;
    pub const MOVIES_BLURAY: i32 = 2050;
    pub const MOVIES_3D: i32 = 2060;
    pub const MOVIES_DVD: i32 = 2070;
    pub const MOVIES_WEBDL: i32 = 2080;

    pub const TV_WEBDL: i32 = 5010;
    pub const TV_FOREIGN: i32 = 5020;
    pub const TV_SD: i32 = 5030;
    pub const TV_HD: i32 = 5040;
    pub const TV_UHD: i32 = 5045;
    pub const TV_SPORT: i32 = 5060;
    pub const TV_ANIME: i32 = 5070;
    pub const TV_DOCUMENTARY: i32 = 5080;

    pub const AUDIO_MP3: i32 = 3010;
    pub const AUDIO_VIDEO: i32 = 3020;
    pub const AUDIO_AUDIOBOOK: i32 = 3030;
    pub const AUDIO_LOSSLESS: i32 = 3040;

    pub const BOOKS_MAGS: i32 = 7010;
    pub const BOOKS_EBOOK: i32 = 7020;
    pub const BOOKS_COMICS: i32 = 7030;

    pub const PC_0DAY: i32 = 4010;
    pub const PC_MAC: i32 = 4030;
    pub const PC_MOBILE_OTHER: i32 = 4040;
    pub const PC_GAMES: i32 = 4050;

    pub const CONSOLE_PS4: i32 = 1150;
    pub const CONSOLE_XBOX: i32 = 1040;
    pub const CONSOLE_WII: i32 = 1030;
    pub const CONSOLE_OTHER: i32 = 1090;
}

/// Get a category by ID
pub fn get_category(id: i32) -> Option<&'static TorznabCategory> {
    TORZNAB_CATEGORIES.iter().find(|c| c.id == id)
}

/// Look up a category by its display name, e.g. "Movies/HD"
pub fn find_category_by_name(name: &str) -> Option<&'static TorznabCategory> {
    let name = name.trim();
    TORZNAB_CATEGORIES
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Get all subcategories for a parent category
pub fn get_subcategories(parent_id: i32) -> Vec<&'static TorznabCategory> {
    TORZNAB_CATEGORIES
        .iter()
        .filter(|c| c.parent_id == Some(parent_id))
        .collect()
}

/// Get the parent category for a given category
pub fn get_parent_category(id: i32) -> Option<&'static TorznabCategory> {
    let cat = get_category(id)?;
    cat.parent_id.and_then(get_category)
}

/// Expand categories to include all subcategories
/// E.g., [2000] -> [2000, 2010, 2020, 2030, 2040, 2045, 2050, 2060, 2070, 2080]
pub fn expand_categories(categories: &[i32]) -> Vec<i32> {
    let mut expanded = vec![];

    for &cat in categories {
        expanded.push(cat);
        expanded.extend(get_subcategories(cat).into_iter().map(|c| c.id));
    }

    expanded.sort();
    expanded.dedup();
    expanded
}

/// Bidirectional translation between canonical categories and one site's tokens.
///
/// The table is many-to-many. The mapper never substitutes defaults on its own;
/// [`CategoryMapper::default_site_ids`] is there for adapters that want to.
#[derive(Debug, Clone, Default)]
pub struct CategoryMapper {
    mappings: Vec<CategoryMapping>,
}

impl CategoryMapper {
    pub fn new(mappings: Vec<CategoryMapping>) -> Self {
        Self { mappings }
    }

    pub fn add(&mut self, mapping: CategoryMapping) {
        self.mappings.push(mapping);
    }

    pub fn mappings(&self) -> &[CategoryMapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Site tokens for a set of canonical categories.
    ///
    /// Parent categories match their children's mappings too. The result keeps
    /// declaration order and contains no duplicates.
    pub fn to_site_ids(&self, canonical: &[i32]) -> Vec<String> {
        if canonical.is_empty() {
            return vec![];
        }

        let expanded = expand_categories(canonical);
        let mut result: Vec<String> = Vec::new();
        for mapping in &self.mappings {
            if expanded.contains(&mapping.torznab_cat) && !result.contains(&mapping.tracker_id) {
                result.push(mapping.tracker_id.clone());
            }
        }
        result
    }

    /// Canonical categories for one site token, parents included, sorted.
    pub fn to_canonical(&self, token: &str) -> Vec<i32> {
        let token = token.trim();
        if token.is_empty() {
            return vec![];
        }

        let mut result = Vec::new();
        for mapping in self
            .mappings
            .iter()
            .filter(|m| m.tracker_id.eq_ignore_ascii_case(token))
        {
            result.push(mapping.torznab_cat);
            if let Some(parent) = get_parent_category(mapping.torznab_cat) {
                result.push(parent.id);
            }
        }
        result.sort();
        result.dedup();
        result
    }

    /// Every distinct site token in declaration order.
    pub fn site_ids(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for mapping in &self.mappings {
            if !result.contains(&mapping.tracker_id) {
                result.push(mapping.tracker_id.clone());
            }
        }
        result
    }

    /// Site tokens flagged as the adapter's default set.
    pub fn default_site_ids(&self) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        for mapping in self.mappings.iter().filter(|m| m.default) {
            if !result.contains(&mapping.tracker_id) {
                result.push(mapping.tracker_id.clone());
            }
        }
        result
    }
}

/// Evaluate a search path's category filter against the query's site tokens.
///
/// An empty filter always matches. A filter whose first token is
/// [`EXCLUDE_MARKER`] matches when there is no intersection.
pub fn path_matches(site_tokens: &[String], filter: &[String]) -> bool {
    let Some(first) = filter.first() else {
        return true;
    };

    let invert = first == EXCLUDE_MARKER;
    let candidates = if invert { &filter[1..] } else { filter };
    let intersects = site_tokens.iter().any(|t| candidates.contains(t));

    if invert { !intersects } else { intersects }
}
