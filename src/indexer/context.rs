//! Variable context that templates are rendered against
//!
//! Keys are dotted paths with a leading dot (`.Query.Q`, `.Categories`).
//! A context is built fresh for every search and every recognized key is
//! present before rendering starts; unset values are [`Value::Null`].

use std::collections::BTreeMap;

use chrono::{Datelike, Utc};

use super::error::Result;
use super::template::filters::{FilterDef, apply_filters};
use super::types::SearchCriteria;

/// Query keys every search context declares, in addition to `.Config.*`
pub const QUERY_KEYS: &[&str] = &[
    ".Query.Type",
    ".Query.Q",
    ".Query.Series",
    ".Query.Ep",
    ".Query.Season",
    ".Query.Movie",
    ".Query.Year",
    ".Query.Limit",
    ".Query.Offset",
    ".Query.Extended",
    ".Query.Categories",
    ".Query.APIKey",
    ".Query.TVDBID",
    ".Query.TVRageID",
    ".Query.IMDBID",
    ".Query.IMDBIDShort",
    ".Query.TMDBID",
    ".Query.TVMazeID",
    ".Query.TraktID",
    ".Query.Album",
    ".Query.Artist",
    ".Query.Label",
    ".Query.Track",
    ".Query.Episode",
    ".Query.Author",
    ".Query.Title",
    ".Query.Keywords",
    ".Keywords",
    ".Categories",
];

/// A template value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Str(String),
    List(Vec<String>),
    Bool(bool),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used when a value is substituted into output
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Str(s) => s.clone(),
            Value::List(items) => format!("[{}]", items.join(" ")),
            Value::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Mapping from dotted variable names to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    vars: BTreeMap<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables shared by every request of a site: `.Config.*`, `.True`,
    /// `.False` and `.Today.Year`.
    pub fn base<I, K>(config: I, site_link: &str) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut ctx = Self::new();
        ctx.set(".True", "True");
        ctx.set(".False", Value::Null);
        ctx.set(".Today.Year", Utc::now().year().to_string());
        ctx.set(".Config.sitelink", site_link);
        for (key, value) in config {
            ctx.set(format!(".Config.{}", key.as_ref()), value);
        }
        ctx
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Populate every query key from a search, then derive `.Keywords`.
    ///
    /// `site_categories` are the already mapped site tokens for `.Categories`.
    pub fn with_query(
        mut self,
        criteria: Option<&SearchCriteria>,
        site_categories: Vec<String>,
        keywords_filters: &[FilterDef],
    ) -> Result<Self> {
        for key in QUERY_KEYS {
            self.set(*key, Value::Null);
        }

        if let Some(q) = criteria {
            let non_empty = |s: &Option<String>| s.clone().filter(|v| !v.trim().is_empty());
            let num = |n: Option<i32>| n.map(|v| v.to_string());

            self.set(".Query.Type", q.query_type.to_string());
            self.set(".Query.Q", non_empty(&q.search_term));
            self.set(".Query.Ep", q.episode.clone());
            self.set(".Query.Season", num(q.season));
            self.set(".Query.Year", num(q.year));
            self.set(".Query.Limit", num(q.limit));
            self.set(".Query.Offset", num(q.offset));
            self.set(
                ".Query.Categories",
                Value::List(q.categories.iter().map(|c| c.to_string()).collect()),
            );
            self.set(".Query.TVDBID", num(q.tvdb_id));
            self.set(".Query.TVRageID", num(q.rage_id));
            self.set(".Query.IMDBID", q.full_imdb_id());
            self.set(".Query.IMDBIDShort", q.imdb_id_short());
            self.set(".Query.TMDBID", num(q.tmdb_id));
            self.set(".Query.TVMazeID", num(q.tvmaze_id));
            self.set(".Query.TraktID", num(q.trakt_id));
            self.set(".Query.Album", q.album.clone());
            self.set(".Query.Artist", q.artist.clone());
            self.set(".Query.Label", q.label.clone());
            self.set(".Query.Track", q.track.clone());
            self.set(".Query.Episode", q.get_episode_string());
            self.set(".Query.Author", q.author.clone());
            self.set(".Query.Title", q.title.clone());
        }

        self.set(".Categories", Value::List(site_categories));

        let mut tokens: Vec<String> = Vec::new();
        for key in [".Query.Q", ".Query.Series", ".Query.Movie", ".Query.Year", ".Query.Episode"] {
            if let Some(v) = self.get_str(key).filter(|v| !v.trim().is_empty()) {
                tokens.push(v.to_string());
            }
        }
        let keywords = tokens.join(" ");
        let filtered = apply_filters(&keywords, keywords_filters)?;
        self.set(".Query.Keywords", keywords);
        self.set(".Keywords", filtered);

        Ok(self)
    }
}
