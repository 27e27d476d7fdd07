//! HTTP transport seam
//!
//! The core only needs "execute this descriptor with these cookies and give
//! me status, headers and body back". Redirects are not followed so that
//! adapters can see login redirects.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE};
use tracing::debug;

use super::error::{IndexerError, Result};
use super::request::{HttpMethod, RequestDescriptor};
use super::session::CookieJar;

/// Raw response handed to parsers and login checks
#[derive(Debug, Clone, Default)]
pub struct IndexerResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl IndexerResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: vec![],
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All `Set-Cookie` header values
    pub fn set_cookies(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }
}

/// Executes request descriptors
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor, cookies: &CookieJar) -> Result<IndexerResponse>;
}

/// Transport backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &RequestDescriptor, cookies: &CookieJar) -> Result<IndexerResponse> {
        debug!(url = %request.url, method = %request.method, "Executing request");

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        builder = builder.header(ACCEPT, request.accept.header_value());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !cookies.is_empty() {
            builder = builder.header(COOKIE, cookies.to_header());
        }
        if let Some(body) = request.body() {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| IndexerError::transport(format!("failed to read body from {}: {}", url, e)))?;

        Ok(IndexerResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

/// Transport answering from a closure, recording every request it sees
#[cfg(test)]
pub(crate) struct ScriptedTransport {
    handler: Box<dyn Fn(&RequestDescriptor, &CookieJar) -> IndexerResponse + Send + Sync>,
    seen: parking_lot::Mutex<Vec<(RequestDescriptor, CookieJar)>>,
}

#[cfg(test)]
impl ScriptedTransport {
    pub(crate) fn new(handler: impl Fn(&RequestDescriptor, &CookieJar) -> IndexerResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            seen: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<(RequestDescriptor, CookieJar)> {
        self.seen.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &RequestDescriptor, cookies: &CookieJar) -> Result<IndexerResponse> {
        self.seen.lock().push((request.clone(), cookies.clone()));
        Ok((self.handler)(request, cookies))
    }
}
