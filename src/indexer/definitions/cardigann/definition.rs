//! Cardigann YAML definition schema
//!
//! ```yaml
//! id: example-tracker
//! name: Example Tracker
//! type: private
//! links:
//!   - https://example-tracker.com/
//!
//! caps:
//!   categorymappings:
//!     - {id: 1, cat: Movies/HD, desc: "HD Movies", default: true}
//!     - {id: 2, cat: TV/HD, desc: "HD TV Shows"}
//!   modes:
//!     search: [q]
//!     tv-search: [q, season, ep]
//!
//! settings:
//!   - {name: username, type: text, label: Username}
//!   - {name: password, type: password, label: Password}
//!
//! login:
//!   path: login.php
//!   method: post
//!   inputs:
//!     username: "{{ .Config.username }}"
//!     password: "{{ .Config.password }}"
//!   error:
//!     - selector: div.error
//!   test:
//!     path: index.php
//!     selector: a[href*="logout.php"]
//!
//! search:
//!   paths:
//!     - path: browse.php
//!     - path: requests.php
//!       categories: ["!", "1"]
//!   inputs:
//!     search: "{{ .Keywords }}"
//!     $raw: "{{ range .Categories }}c{{ . }}=1&{{ end }}"
//!   keywordsfilters:
//!     - name: re_replace
//!       args: ["[^a-zA-Z0-9]+", " "]
//!   rows:
//!     selector: table.torrents > tbody > tr
//!   fields:
//!     title:
//!       selector: a.title
//!     download:
//!       selector: a[href^="download.php"]
//!       attribute: href
//! ```
//!
//! Maps that carry meaning in their order (inputs, fields, case) are kept as
//! ordered pair lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::indexer::categories::{CategoryMapper, CategoryMapping, find_category_by_name, get_category};
use crate::indexer::error::{IndexerError, Result};
use crate::indexer::template::filters::FilterDef;
use crate::indexer::types::{IndexerCapabilities, QueryType};

/// Cardigann YAML indexer definition
#[derive(Debug, Clone, Deserialize)]
pub struct CardigannDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(rename = "type")]
    pub tracker_type: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub legacylinks: Vec<String>,
    #[serde(default)]
    pub caps: CapabilitiesBlock,
    #[serde(default)]
    pub settings: Vec<SettingsField>,
    pub login: Option<LoginBlock>,
    pub search: SearchBlock,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilitiesBlock {
    #[serde(default, deserialize_with = "ordered_strings")]
    pub categories: Vec<(String, String)>,
    #[serde(default)]
    pub categorymappings: Vec<CategoryMappingDef>,
    #[serde(default)]
    pub modes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub allowrawsearch: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMappingDef {
    #[serde(deserialize_with = "scalar_string")]
    pub id: String,
    #[serde(deserialize_with = "scalar_string")]
    pub cat: String,
    pub desc: Option<String>,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub label: Option<String>,
    pub default: Option<serde_yaml::Value>,
}

impl SettingsField {
    pub fn is_checkbox(&self) -> bool {
        self.field_type.as_deref() == Some("checkbox")
    }

    /// Settings of these types are information only and never hold a value
    pub fn is_informational(&self) -> bool {
        matches!(self.field_type.as_deref(), Some(t) if t.starts_with("info"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginBlock {
    pub path: Option<String>,
    pub submitpath: Option<String>,
    pub method: Option<String>,
    /// CSS selector of the login form when `method: form`
    pub form: Option<String>,
    #[serde(default, deserialize_with = "ordered_strings")]
    pub inputs: Vec<(String, String)>,
    #[serde(default)]
    pub error: Vec<ErrorBlock>,
    pub test: Option<TestBlock>,
}

impl LoginBlock {
    pub fn method(&self) -> &str {
        self.method.as_deref().unwrap_or("post")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBlock {
    pub selector: String,
    pub message: Option<SelectorBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorBlock {
    pub selector: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestBlock {
    pub path: Option<String>,
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchBlock {
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<SearchPathDef>,
    #[serde(default, deserialize_with = "ordered_strings")]
    pub inputs: Vec<(String, String)>,
    #[serde(default, deserialize_with = "ordered_headers")]
    pub headers: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub keywordsfilters: Vec<FilterDef>,
    #[serde(default)]
    pub error: Vec<ErrorBlock>,
    pub rows: RowsBlock,
    #[serde(default, deserialize_with = "ordered_fields")]
    pub fields: Vec<(String, FieldSelector)>,
}

/// One templated request pattern
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPathDef {
    pub path: String,
    pub method: Option<String>,
    #[serde(default, deserialize_with = "ordered_strings")]
    pub inputs: Vec<(String, String)>,
    #[serde(default, deserialize_with = "scalar_strings")]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub inheritinputs: bool,
    pub response: Option<ResponseBlock>,
}

impl SearchPathDef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: None,
            inputs: vec![],
            categories: vec![],
            inheritinputs: true,
            response: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseBlock {
    #[serde(rename = "type")]
    pub response_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowsBlock {
    pub selector: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSelector {
    pub selector: Option<String>,
    pub text: Option<String>,
    pub attribute: Option<String>,
    pub remove: Option<String>,
    #[serde(default)]
    pub optional: bool,
    pub default: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterDef>,
    #[serde(default, deserialize_with = "ordered_strings")]
    pub case: Vec<(String, String)>,
}

fn default_true() -> bool {
    true
}

impl CardigannDefinition {
    /// Parse and validate a YAML definition
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut definition: CardigannDefinition = serde_yaml::from_str(yaml)?;

        if definition.search.paths.is_empty() {
            match definition.search.path.take() {
                Some(path) => definition.search.paths.push(SearchPathDef::new(path)),
                None => {
                    return Err(IndexerError::definition(format!(
                        "definition '{}' has no search paths",
                        definition.id
                    )));
                }
            }
        }
        if definition.links.is_empty() {
            return Err(IndexerError::definition(format!(
                "definition '{}' has no links",
                definition.id
            )));
        }
        // Surfaces unknown category names at load time
        definition.category_mapper()?;

        Ok(definition)
    }

    pub fn site_link(&self) -> &str {
        self.links.first().map(String::as_str).unwrap_or_default()
    }

    /// Category mapping declared by `caps.categories` and `caps.categorymappings`
    pub fn category_mapper(&self) -> Result<CategoryMapper> {
        let mut mapper = CategoryMapper::default();
        for (id, cat) in &self.caps.categories {
            mapper.add(CategoryMapping::new(id.clone(), resolve_category(cat, &self.id)?, cat.clone()));
        }
        for m in &self.caps.categorymappings {
            let desc = m.desc.clone().unwrap_or_else(|| m.cat.clone());
            mapper.add(
                CategoryMapping::new(m.id.clone(), resolve_category(&m.cat, &self.id)?, desc).with_default(m.default),
            );
        }
        Ok(mapper)
    }

    pub fn capabilities(&self) -> Result<IndexerCapabilities> {
        let mut caps = IndexerCapabilities::new();
        for (mode, params) in &self.caps.modes {
            let query_type = match mode.as_str() {
                "search" => QueryType::Search,
                "tv-search" => QueryType::TvSearch,
                "movie-search" => QueryType::MovieSearch,
                "music-search" => QueryType::MusicSearch,
                "book-search" => QueryType::BookSearch,
                _ => continue,
            };
            let params: Vec<&str> = params.iter().map(String::as_str).collect();
            caps = caps.with_mode(query_type, &params);
        }
        caps.supports_raw_search = self.caps.allowrawsearch;
        caps.categories = self.category_mapper()?;
        Ok(caps)
    }
}

/// "Movies/HD" or "2040" to a canonical id
fn resolve_category(cat: &str, definition_id: &str) -> Result<i32> {
    if let Ok(id) = cat.trim().parse::<i32>() {
        if get_category(id).is_some() {
            return Ok(id);
        }
    }
    find_category_by_name(cat).map(|c| c.id).ok_or_else(|| {
        IndexerError::definition(format!(
            "definition '{}' maps to unknown category '{}'",
            definition_id, cat
        ))
    })
}

fn scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(d)?;
    scalar(&value).ok_or_else(|| serde::de::Error::custom("expected a scalar"))
}

fn scalar_strings<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<String>, D::Error> {
    let values = Option::<Vec<serde_yaml::Value>>::deserialize(d)?.unwrap_or_default();
    values
        .iter()
        .map(|v| scalar(v).ok_or_else(|| serde::de::Error::custom("expected a list of scalars")))
        .collect()
}

fn ordered_mapping<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<(String, serde_yaml::Value)>, D::Error> {
    let mapping = Option::<serde_yaml::Mapping>::deserialize(d)?.unwrap_or_default();
    mapping
        .into_iter()
        .map(|(k, v)| {
            scalar(&k)
                .map(|k| (k, v))
                .ok_or_else(|| serde::de::Error::custom("mapping keys must be scalars"))
        })
        .collect()
}

fn ordered_strings<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<(String, String)>, D::Error> {
    ordered_mapping(d)?
        .into_iter()
        .map(|(k, v)| {
            scalar(&v)
                .map(|v| (k.clone(), v))
                .ok_or_else(|| serde::de::Error::custom(format!("value of '{}' must be a scalar", k)))
        })
        .collect()
}

fn ordered_headers<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<(String, Vec<String>)>, D::Error> {
    ordered_mapping(d)?
        .into_iter()
        .map(|(k, v)| {
            let values = match &v {
                serde_yaml::Value::Sequence(seq) => seq.iter().filter_map(scalar).collect(),
                other => scalar(other).into_iter().collect(),
            };
            Ok((k, values))
        })
        .collect()
}

fn ordered_fields<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<(String, FieldSelector)>, D::Error> {
    ordered_mapping(d)?
        .into_iter()
        .map(|(k, v)| {
            let field = match v {
                // `title: a.title` is shorthand for a selector
                serde_yaml::Value::String(selector) => FieldSelector {
                    selector: Some(selector),
                    ..Default::default()
                },
                other => serde_yaml::from_value(other)
                    .map_err(|e| serde::de::Error::custom(format!("field '{}': {}", k, e)))?,
            };
            Ok((k, field))
        })
        .collect()
}
