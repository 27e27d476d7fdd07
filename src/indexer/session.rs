//! Per-site cookie sessions
//!
//! Each configured site owns one [`SiteSession`]. The session walks through
//! `Unauthenticated -> Authenticating -> Authenticated -> Expired` and back.
//! Login attempts are serialized by an async mutex: callers that arrive while
//! a login is in flight wait for it and share its outcome, success or failure.
//!
//! Expiry is checked lazily whenever the session is consulted.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::error::{IndexerError, Result};
use super::transport::{HttpTransport, IndexerResponse};

/// Cookie name/value pairs for one site
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Cookie:` header style string, e.g. `"uid=1; pass=abc"`
    pub fn from_header(header: &str) -> Self {
        let mut jar = Self::new();
        for part in header.split(';') {
            if let Some((name, value)) = part.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    jar.set(name, value.trim());
                }
            }
        }
        jar
    }

    pub fn to_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Apply one `Set-Cookie` header value. Deleted cookies are removed.
    pub fn apply_set_cookie(&mut self, header: &str) {
        let mut attrs = header.split(';');
        let Some((name, value)) = attrs.next().and_then(|kv| kv.split_once('=')) else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let value = value.trim();
        let deleted = value.is_empty()
            || value.eq_ignore_ascii_case("deleted")
            || attrs.any(|a| {
                let a = a.trim();
                a.eq_ignore_ascii_case("max-age=0") || a.starts_with("Max-Age=-") || a.starts_with("max-age=-")
            });
        if deleted {
            self.cookies.remove(name);
        } else {
            self.set(name, value);
        }
    }

    pub fn merge(&mut self, other: &CookieJar) {
        for (k, v) in &other.cookies {
            self.cookies.insert(k.clone(), v.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Login state of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

/// Result of a successful login flow
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoginOutcome {
    pub cookies: CookieJar,
    /// `None` means the session lasts until invalidated
    pub expires: Option<DateTime<Utc>>,
}

impl LoginOutcome {
    pub fn new(cookies: CookieJar, expires: Option<DateTime<Utc>>) -> Self {
        Self { cookies, expires }
    }
}

/// Adapter-supplied login flow and session check
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run the site's login exchange and return the resulting cookies
    async fn login(&self, transport: &dyn HttpTransport) -> Result<LoginOutcome>;

    /// Whether a response shows that the current session was not accepted
    fn needs_login(&self, response: &IndexerResponse) -> bool;
}

/// Authenticator for sites configured with a raw cookie string.
///
/// Login performs no request; the configured cookie becomes the jar. A
/// redirect means the site no longer accepts it.
#[derive(Debug, Clone)]
pub struct StaticCookieAuthenticator {
    site_id: String,
    cookie: Option<String>,
}

impl StaticCookieAuthenticator {
    pub fn new(site_id: impl Into<String>, cookie: Option<&str>) -> Self {
        Self {
            site_id: site_id.into(),
            cookie: cookie.map(str::to_string),
        }
    }
}

#[async_trait]
impl Authenticator for StaticCookieAuthenticator {
    async fn login(&self, _transport: &dyn HttpTransport) -> Result<LoginOutcome> {
        let jar = self
            .cookie
            .as_deref()
            .map(CookieJar::from_header)
            .unwrap_or_default();
        if jar.is_empty() {
            return Err(IndexerError::auth(&self.site_id, "no cookie configured"));
        }
        Ok(LoginOutcome::new(jar, None))
    }

    fn needs_login(&self, response: &IndexerResponse) -> bool {
        response.is_redirect()
    }
}

/// Cookies handed to a request pipeline, tagged with the login generation
/// they came from so stale expiry reports can be ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTicket {
    pub cookies: CookieJar,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct LastLogin {
    at: DateTime<Utc>,
    error: Option<String>,
}

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    cookies: CookieJar,
    expires_at: Option<DateTime<Utc>>,
    generation: u64,
    last_login: Option<LastLogin>,
}

/// Session of one site
#[derive(Debug)]
pub struct SiteSession {
    site_id: String,
    state: RwLock<SessionState>,
    login_lock: tokio::sync::Mutex<()>,
}

impl SiteSession {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            state: RwLock::new(SessionState {
                status: SessionStatus::Unauthenticated,
                cookies: CookieJar::new(),
                expires_at: None,
                generation: 0,
                last_login: None,
            }),
            login_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Current status, applying lazy expiry first
    pub fn status(&self) -> SessionStatus {
        self.check_expiry();
        self.state.read().status
    }

    pub fn cookies(&self) -> CookieJar {
        self.state.read().cookies.clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expires_at
    }

    pub fn last_login_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_login.as_ref().map(|l| l.at)
    }

    fn check_expiry(&self) {
        let mut state = self.state.write();
        if state.status == SessionStatus::Authenticated
            && state.expires_at.is_some_and(|exp| exp <= Utc::now())
        {
            info!(site = %self.site_id, "Session expired");
            state.status = SessionStatus::Expired;
        }
    }

    fn valid_ticket(&self) -> Option<SessionTicket> {
        self.check_expiry();
        let state = self.state.read();
        (state.status == SessionStatus::Authenticated).then(|| SessionTicket {
            cookies: state.cookies.clone(),
            generation: state.generation,
        })
    }

    /// Return usable cookies, running `login` first when the session is not
    /// authenticated. At most one login runs at a time; concurrent callers
    /// wait for it and get the same cookies or the same failure.
    pub async fn ensure_authenticated<F, Fut>(&self, login: F) -> Result<SessionTicket>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<LoginOutcome>>,
    {
        if let Some(ticket) = self.valid_ticket() {
            return Ok(ticket);
        }

        let seen_generation = self.state.read().generation;
        let _guard = self.login_lock.lock().await;

        if let Some(ticket) = self.valid_ticket() {
            return Ok(ticket);
        }
        {
            let state = self.state.read();
            if state.generation != seen_generation {
                if let Some(LastLogin { error: Some(reason), .. }) = &state.last_login {
                    return Err(IndexerError::auth(&self.site_id, reason.clone()));
                }
            }
        }

        self.state.write().status = SessionStatus::Authenticating;
        info!(site = %self.site_id, "Logging in");

        match login().await {
            Ok(outcome) => {
                let mut state = self.state.write();
                state.status = SessionStatus::Authenticated;
                state.cookies = outcome.cookies;
                state.expires_at = outcome.expires;
                state.generation += 1;
                state.last_login = Some(LastLogin {
                    at: Utc::now(),
                    error: None,
                });
                info!(
                    site = %self.site_id,
                    cookies = state.cookies.len(),
                    expires = ?state.expires_at,
                    "Login succeeded"
                );
                Ok(SessionTicket {
                    cookies: state.cookies.clone(),
                    generation: state.generation,
                })
            }
            Err(e) => {
                let mut state = self.state.write();
                state.status = SessionStatus::Unauthenticated;
                state.cookies = CookieJar::new();
                state.expires_at = None;
                state.generation += 1;
                let reason = match &e {
                    IndexerError::Authentication { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                state.last_login = Some(LastLogin {
                    at: Utc::now(),
                    error: Some(reason),
                });
                warn!(site = %self.site_id, error = %e, "Login failed");
                Err(match e {
                    IndexerError::Authentication { .. } => e,
                    other => IndexerError::auth(&self.site_id, other.to_string()),
                })
            }
        }
    }

    /// Report that the site rejected cookies from `generation`.
    /// Reports about an older login are ignored.
    pub fn mark_expired(&self, generation: u64) -> bool {
        let mut state = self.state.write();
        if state.generation == generation && state.status == SessionStatus::Authenticated {
            info!(site = %self.site_id, "Site reported session no longer valid");
            state.status = SessionStatus::Expired;
            true
        } else {
            false
        }
    }

    /// Merge cookies the site set on an ordinary response
    pub fn update_cookies<'a>(&self, set_cookies: impl IntoIterator<Item = &'a str>) {
        let mut state = self.state.write();
        for header in set_cookies {
            state.cookies.apply_set_cookie(header);
        }
    }

    /// Drop the session entirely; the next use logs in again
    pub fn invalidate(&self, reason: &str) {
        let mut state = self.state.write();
        debug!(site = %self.site_id, reason, "Invalidating session");
        state.status = SessionStatus::Unauthenticated;
        state.cookies = CookieJar::new();
        state.expires_at = None;
        state.generation += 1;
        state.last_login = Some(LastLogin {
            at: Utc::now(),
            error: Some(reason.to_string()),
        });
    }
}

/// Registry of site sessions, owned by whoever manages the configured sites
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SiteSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session of a site, created on first use
    pub fn session(&self, site_id: &str) -> Arc<SiteSession> {
        if let Some(s) = self.sessions.read().get(site_id) {
            return s.clone();
        }
        self.sessions
            .write()
            .entry(site_id.to_string())
            .or_insert_with(|| Arc::new(SiteSession::new(site_id)))
            .clone()
    }

    pub fn get(&self, site_id: &str) -> Option<Arc<SiteSession>> {
        self.sessions.read().get(site_id).cloned()
    }

    /// Tear down a site's session (site removed or reconfigured)
    pub fn remove(&self, site_id: &str) -> bool {
        self.sessions.write().remove(site_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn jar(header: &str) -> CookieJar {
        CookieJar::from_header(header)
    }

    #[test]
    fn test_cookie_header_roundtrip() {
        let j = jar("uid=1; pass=abc ;  ; broken");
        assert_eq!(j.len(), 2);
        assert_eq!(j.get("pass"), Some("abc"));
        assert_eq!(j.to_header(), "pass=abc; uid=1");
    }

    #[test]
    fn test_set_cookie_parsing() {
        let mut j = jar("uid=1");
        j.apply_set_cookie("pass=xyz; expires=Wed, 21 Oct 2026 07:28:00 GMT; path=/; HttpOnly");
        assert_eq!(j.get("pass"), Some("xyz"));
        j.apply_set_cookie("uid=deleted; Max-Age=0");
        assert_eq!(j.get("uid"), None);
        j.apply_set_cookie("garbage");
        assert_eq!(j.len(), 1);
    }

    #[tokio::test]
    async fn test_login_then_reuse() {
        let session = SiteSession::new("site");
        assert_eq!(session.status(), SessionStatus::Unauthenticated);

        let ticket = session
            .ensure_authenticated(|| async { Ok(LoginOutcome::new(jar("a=1"), None)) })
            .await
            .unwrap();
        assert_eq!(ticket.cookies.get("a"), Some("1"));
        assert_eq!(session.status(), SessionStatus::Authenticated);

        let again = session
            .ensure_authenticated(|| async { Err(IndexerError::definition("logged in twice")) })
            .await
            .unwrap();
        assert_eq!(again, ticket);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let session = Arc::new(SiteSession::new("site"));
        let logins = Arc::new(AtomicUsize::new(0));

        let call = |session: Arc<SiteSession>, logins: Arc<AtomicUsize>| async move {
            session
                .ensure_authenticated(|| async {
                    logins.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok(LoginOutcome::new(jar("sid=42"), None))
                })
                .await
        };

        let (a, b) = tokio::join!(
            call(session.clone(), logins.clone()),
            call(session.clone(), logins.clone())
        );
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().cookies, b.unwrap().cookies);
    }

    #[tokio::test]
    async fn test_waiters_share_failure() {
        let session = Arc::new(SiteSession::new("site"));
        let logins = Arc::new(AtomicUsize::new(0));

        let call = |session: Arc<SiteSession>, logins: Arc<AtomicUsize>| async move {
            session
                .ensure_authenticated(|| async {
                    logins.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Err(IndexerError::auth("site", "bad password"))
                })
                .await
        };

        let (a, b) = tokio::join!(
            call(session.clone(), logins.clone()),
            call(session.clone(), logins.clone())
        );
        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_matches!(a, Err(IndexerError::Authentication { .. }));
        assert_matches!(b, Err(IndexerError::Authentication { reason, .. }) if reason == "bad password");
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let session = SiteSession::new("site");
        let past = Utc::now() - Duration::seconds(1);
        session
            .ensure_authenticated(|| async { Ok(LoginOutcome::new(jar("a=1"), Some(past))) })
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Expired);

        let future = Utc::now() + Duration::days(30);
        let ticket = session
            .ensure_authenticated(|| async { Ok(LoginOutcome::new(jar("a=2"), Some(future))) })
            .await
            .unwrap();
        assert_eq!(ticket.cookies.get("a"), Some("2"));
        assert_eq!(session.expires_at(), Some(future));
    }

    #[tokio::test]
    async fn test_stale_expiry_report_is_ignored() {
        let session = SiteSession::new("site");
        let first = session
            .ensure_authenticated(|| async { Ok(LoginOutcome::new(jar("a=1"), None)) })
            .await
            .unwrap();
        assert!(session.mark_expired(first.generation));
        let second = session
            .ensure_authenticated(|| async { Ok(LoginOutcome::new(jar("a=2"), None)) })
            .await
            .unwrap();

        assert!(!session.mark_expired(first.generation));
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert!(session.mark_expired(second.generation));
    }

    #[tokio::test]
    async fn test_non_auth_login_error_becomes_auth_error() {
        let session = SiteSession::new("site");
        let err = session
            .ensure_authenticated(|| async { Err(IndexerError::status(500, "boom")) })
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_manager_registry() {
        let manager = SessionManager::new();
        let a = manager.session("a");
        assert!(Arc::ptr_eq(&a, &manager.session("a")));
        assert_eq!(manager.len(), 1);
        assert!(manager.remove("a"));
        assert!(manager.get("a").is_none());
        assert!(!Arc::ptr_eq(&a, &manager.session("a")));
    }

    #[tokio::test]
    async fn test_static_cookie_authenticator() {
        let transport = crate::indexer::transport::ScriptedTransport::new(|req, _| {
            IndexerResponse::new(&req.url, 200, "")
        });

        let auth = StaticCookieAuthenticator::new("td", Some("uid=1; pass=x"));
        let outcome = auth.login(&transport).await.unwrap();
        assert_eq!(outcome.cookies.get("uid"), Some("1"));
        assert_eq!(outcome.expires, None);
        assert!(transport.requests().is_empty());

        let missing = StaticCookieAuthenticator::new("td", None);
        assert_matches!(missing.login(&transport).await, Err(IndexerError::Authentication { .. }));

        let redirect = IndexerResponse::new("https://td/t.json", 302, "").with_header("Location", "/login.php");
        assert!(auth.needs_login(&redirect));
        assert!(!auth.needs_login(&IndexerResponse::new("https://td/t.json", 200, "[]")));
    }

    #[test]
    fn test_update_cookies() {
        let session = SiteSession::new("site");
        session.update_cookies(["cf=1; path=/", "sid=2"]);
        assert_eq!(session.cookies().to_header(), "cf=1; sid=2");
    }
}
