//! Outbound request descriptors and the lazy request chain
//!
//! A [`RequestChain`] is a list of tiers; each tier holds one or more lazily
//! evaluated groups of [`RequestDescriptor`]s. The pipeline executes tiers in
//! order and stops at the first tier that produced releases, so later tiers
//! act as fallbacks (e.g. an id search followed by a text search).

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::context::VariableContext;
use super::error::Result;
use super::template::filters::form_urlencode;

/// Input key whose rendered value is a pre-encoded query string
pub const RAW_INPUT_KEY: &str = "$raw";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Parse a definition's method string; anything but "post" is GET
    pub fn from_definition(method: Option<&str>) -> Self {
        match method {
            Some(m) if m.eq_ignore_ascii_case("post") => HttpMethod::Post,
            _ => HttpMethod::Get,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// What kind of body the site is expected to answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptType {
    #[default]
    Html,
    Json,
    Rss,
}

impl AcceptType {
    pub fn header_value(&self) -> &'static str {
        match self {
            AcceptType::Html => "text/html,application/xhtml+xml,*/*;q=0.8",
            AcceptType::Json => "application/json",
            AcceptType::Rss => "application/rss+xml,application/xml,text/xml",
        }
    }
}

/// One key/value pair of a query string or form body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    pub key: String,
    pub value: String,
    /// Already encoded; emitted verbatim
    pub raw: bool,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            raw: false,
        }
    }

    pub fn raw(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            raw: true,
        }
    }
}

/// Append `param`, replacing the value of an earlier non-raw pair with the same key
pub fn upsert_param(params: &mut Vec<Param>, param: Param) {
    if !param.raw {
        if let Some(existing) = params.iter_mut().find(|p| !p.raw && p.key == param.key) {
            existing.value = param.value;
            return;
        }
    }
    params.push(param);
}

/// Encode pairs in insertion order as `k=v&k=v`
pub fn encode_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| {
            if p.raw {
                format!("{}={}", p.key, p.value)
            } else {
                format!("{}={}", form_urlencode(&p.key), form_urlencode(&p.value))
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Split a rendered raw block into literal pairs.
///
/// Fragments are separated by `&`, key and value by the first `=`. Fragments
/// with an empty key are dropped and a missing value becomes "".
pub fn split_raw_block(rendered: &str) -> Vec<(String, String)> {
    rendered
        .split('&')
        .filter_map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// A concrete outbound request. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub accept: AcceptType,
    /// Form body pairs for POST requests
    pub form: Vec<Param>,
    /// Context the request was rendered from
    #[serde(skip)]
    pub context: Arc<VariableContext>,
}

impl RequestDescriptor {
    pub fn get(url: impl Into<String>, accept: AcceptType) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: vec![],
            accept,
            form: vec![],
            context: Arc::new(VariableContext::new()),
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<Param>, accept: AcceptType) -> Self {
        Self {
            method: HttpMethod::Post,
            form,
            ..Self::get(url, accept)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_context(mut self, context: Arc<VariableContext>) -> Self {
        self.context = context;
        self
    }

    /// url-encoded form body, if this is a POST with pairs
    pub fn body(&self) -> Option<String> {
        (self.method == HttpMethod::Post && !self.form.is_empty()).then(|| encode_params(&self.form))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A lazily evaluated group of requests (one search path or page set)
pub type RequestGroup<'a> = Box<dyn Iterator<Item = Result<RequestDescriptor>> + Send + 'a>;

/// Ordered tiers of lazily built request groups
#[derive(Default)]
pub struct RequestChain<'a> {
    tiers: Vec<Vec<RequestGroup<'a>>>,
}

impl<'a> RequestChain<'a> {
    pub fn new() -> Self {
        Self { tiers: vec![vec![]] }
    }

    /// Add a group to the current tier
    pub fn add<I>(&mut self, group: I)
    where
        I: IntoIterator<Item = Result<RequestDescriptor>>,
        I::IntoIter: Send + 'a,
    {
        if self.tiers.is_empty() {
            self.tiers.push(vec![]);
        }
        if let Some(tier) = self.tiers.last_mut() {
            tier.push(Box::new(group.into_iter()));
        }
    }

    /// Start a new fallback tier
    pub fn add_tier(&mut self) {
        if self.tiers.last().is_some_and(|t| !t.is_empty()) {
            self.tiers.push(vec![]);
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.iter().filter(|t| !t.is_empty()).count()
    }

    /// Consume the chain tier by tier
    pub fn into_tiers(self) -> impl Iterator<Item = Vec<RequestGroup<'a>>> {
        self.tiers.into_iter().filter(|t| !t.is_empty())
    }

    /// Materialize every tier. Stops at the first build error.
    pub fn collect_all(self) -> Result<Vec<Vec<RequestDescriptor>>> {
        self.into_tiers()
            .map(|tier| tier.into_iter().flatten().collect::<Result<Vec<_>>>())
            .collect()
    }
}

impl fmt::Debug for RequestChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChain")
            .field("tiers", &self.tiers.iter().map(Vec::len).collect::<Vec<_>>())
            .finish()
    }
}
