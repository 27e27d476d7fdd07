//! Search execution for one site
//!
//! Authenticates through the site's [`SiteSession`], walks the request chain
//! tier by tier and normalizes every response. The first tier that yields
//! releases wins. A response the authenticator flags as logged out triggers
//! one re-login and a retry of the tier; a second rejection invalidates the
//! session for every caller.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::error::{IndexerError, Result};
use super::request::{RequestChain, RequestDescriptor};
use super::session::{SessionTicket, SiteSession};
use super::transport::HttpTransport;
use super::types::{ReleaseInfo, SearchCriteria};
use super::Indexer;

enum TierOutcome {
    Releases(Vec<ReleaseInfo>),
    LoginRequired,
}

/// Run a search against one site
pub async fn search(
    indexer: &dyn Indexer,
    session: &SiteSession,
    transport: &dyn HttpTransport,
    criteria: &SearchCriteria,
) -> Result<Vec<ReleaseInfo>> {
    let chain = indexer.generator().search_requests(criteria)?;
    run(indexer, session, transport, chain).await
}

/// Fetch the site's latest releases
pub async fn recent(
    indexer: &dyn Indexer,
    session: &SiteSession,
    transport: &dyn HttpTransport,
) -> Result<Vec<ReleaseInfo>> {
    let chain = indexer.generator().recent_requests()?;
    run(indexer, session, transport, chain).await
}

async fn login(indexer: &dyn Indexer, session: &SiteSession, transport: &dyn HttpTransport) -> Result<SessionTicket> {
    session
        .ensure_authenticated(|| indexer.authenticator().login(transport))
        .await
}

async fn run(
    indexer: &dyn Indexer,
    session: &SiteSession,
    transport: &dyn HttpTransport,
    chain: RequestChain<'_>,
) -> Result<Vec<ReleaseInfo>> {
    let mut ticket = login(indexer, session, transport).await?;
    let mut retried = false;

    for (tier_index, tier) in chain.into_tiers().enumerate() {
        let requests = tier.into_iter().flatten().collect::<Result<Vec<_>>>()?;
        if requests.is_empty() {
            continue;
        }

        loop {
            match execute_tier(indexer, session, transport, &requests).await? {
                TierOutcome::Releases(releases) if releases.is_empty() => {
                    debug!(indexer_id = %indexer.id(), tier = tier_index, "Tier returned no releases");
                    break;
                }
                TierOutcome::Releases(releases) => {
                    info!(
                        indexer_id = %indexer.id(),
                        tier = tier_index,
                        releases = releases.len(),
                        "Search completed"
                    );
                    return Ok(releases);
                }
                TierOutcome::LoginRequired if retried => {
                    let reason = "session rejected again after logging in";
                    warn!(indexer_id = %indexer.id(), "Site rejected a fresh session, invalidating");
                    session.invalidate(reason);
                    return Err(IndexerError::auth(indexer.id(), reason));
                }
                TierOutcome::LoginRequired => {
                    info!(indexer_id = %indexer.id(), "Site requires login, re-authenticating");
                    retried = true;
                    session.mark_expired(ticket.generation);
                    ticket = login(indexer, session, transport).await?;
                }
            }
        }
    }

    info!(indexer_id = %indexer.id(), "Search completed with no releases");
    Ok(vec![])
}

/// Execute every request of a tier concurrently and normalize the responses
async fn execute_tier(
    indexer: &dyn Indexer,
    session: &SiteSession,
    transport: &dyn HttpTransport,
    requests: &[RequestDescriptor],
) -> Result<TierOutcome> {
    // Cookies set by earlier tiers must go out with this one
    let cookies = session.cookies();
    let responses = join_all(requests.iter().map(|r| transport.execute(r, &cookies))).await;

    let mut releases = Vec::new();
    for response in responses {
        let response = response?;
        session.update_cookies(response.set_cookies());

        if indexer.authenticator().needs_login(&response) {
            debug!(indexer_id = %indexer.id(), url = %response.url, status = response.status, "Response requires login");
            return Ok(TierOutcome::LoginRequired);
        }
        if !response.is_success() {
            return Err(IndexerError::status(
                response.status,
                format!("{} returned HTTP {}", response.url, response.status),
            ));
        }

        let batch = indexer.normalizer().normalize(&response, indexer.parser())?;
        releases.extend(batch.releases);
    }
    Ok(TierOutcome::Releases(releases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::RequestGenerator;
    use crate::indexer::definitions::torrentday::TorrentDayIndexer;
    use crate::indexer::normalize::{ResponseNormalizer, ResponseParser};
    use crate::indexer::request::AcceptType;
    use crate::indexer::session::{Authenticator, SessionStatus};
    use crate::indexer::transport::{IndexerResponse, ScriptedTransport};
    use crate::indexer::types::{IndexerCapabilities, IndexerSettings, IndexerType, TrackerType};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ONE_ROW: &str = r#"[{"name": "Show.S01E01", "t": 1, "c": 7, "size": 100, "seeders": 1,
        "leechers": 0, "ctime": 1700000000}]"#;

    fn torrentday() -> TorrentDayIndexer {
        let settings = IndexerSettings {
            cookie: Some("uid=1; pass=abc".into()),
            ..Default::default()
        };
        TorrentDayIndexer::new("td", &settings)
    }

    #[tokio::test]
    async fn test_search_returns_releases() {
        let indexer = torrentday();
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ONE_ROW));

        let releases = search(&indexer, &session, &transport, &SearchCriteria::search("show"))
            .await
            .unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].indexer_id.as_deref(), Some("td"));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1.get("pass"), Some("abc"));
    }

    #[tokio::test]
    async fn test_relogin_once_then_succeed() {
        let indexer = torrentday();
        let session = SiteSession::new("td");
        let calls = AtomicUsize::new(0);
        let transport = ScriptedTransport::new(move |req, _| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                IndexerResponse::new(&req.url, 302, "").with_header("Location", "login.php")
            } else {
                IndexerResponse::new(&req.url, 200, ONE_ROW)
            }
        });

        let releases = search(&indexer, &session, &transport, &SearchCriteria::search("show"))
            .await
            .unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(session.status(), SessionStatus::Authenticated);
    }

    #[tokio::test]
    async fn test_second_rejection_invalidates_session() {
        let indexer = torrentday();
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| {
            IndexerResponse::new(&req.url, 302, "").with_header("Location", "login.php")
        });

        let result = search(&indexer, &session, &transport, &SearchCriteria::search("show")).await;
        assert_matches!(result, Err(IndexerError::Authentication { site, .. }) if site == "td");
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(session.status(), SessionStatus::Unauthenticated);
        assert!(session.cookies().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_fails_search() {
        let indexer = torrentday();
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 503, "busy"));

        let result = search(&indexer, &session, &transport, &SearchCriteria::search("show")).await;
        assert_matches!(result, Err(IndexerError::Transport { status: Some(503), .. }));
    }

    #[tokio::test]
    async fn test_login_failure_sends_no_requests() {
        let indexer = TorrentDayIndexer::new("td", &IndexerSettings::default());
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ONE_ROW));

        let result = search(&indexer, &session, &transport, &SearchCriteria::search("show")).await;
        assert_matches!(result, Err(IndexerError::Authentication { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_response_cookies_reach_session() {
        let indexer = torrentday();
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| {
            IndexerResponse::new(&req.url, 200, ONE_ROW).with_header("Set-Cookie", "cf_clearance=zz; path=/")
        });

        search(&indexer, &session, &transport, &SearchCriteria::search("show"))
            .await
            .unwrap();
        assert_eq!(session.cookies().get("cf_clearance"), Some("zz"));
        assert_eq!(session.cookies().get("uid"), Some("1"));
    }

    /// Two tiers: an exact lookup first, a broad search as fallback
    struct TieredGenerator;

    impl RequestGenerator for TieredGenerator {
        fn search_requests(&self, _criteria: &SearchCriteria) -> Result<RequestChain<'_>> {
            let mut chain = RequestChain::new();
            chain.add([Ok(RequestDescriptor::get("https://td.example/exact.json", AcceptType::Json))]);
            chain.add_tier();
            chain.add([
                Ok(RequestDescriptor::get("https://td.example/broad1.json", AcceptType::Json)),
                Ok(RequestDescriptor::get("https://td.example/broad2.json", AcceptType::Json)),
            ]);
            chain.add_tier();
            chain.add([Ok(RequestDescriptor::get("https://td.example/never.json", AcceptType::Json))]);
            Ok(chain)
        }
    }

    struct Tiered(TorrentDayIndexer);

    impl Indexer for Tiered {
        fn id(&self) -> &str {
            self.0.id()
        }
        fn name(&self) -> &str {
            self.0.name()
        }
        fn description(&self) -> &str {
            self.0.description()
        }
        fn indexer_type(&self) -> IndexerType {
            self.0.indexer_type()
        }
        fn site_link(&self) -> &str {
            self.0.site_link()
        }
        fn tracker_type(&self) -> TrackerType {
            self.0.tracker_type()
        }
        fn language(&self) -> &str {
            self.0.language()
        }
        fn capabilities(&self) -> &IndexerCapabilities {
            self.0.capabilities()
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn generator(&self) -> &dyn RequestGenerator {
            &TieredGenerator
        }
        fn parser(&self) -> &dyn ResponseParser {
            self.0.parser()
        }
        fn normalizer(&self) -> &ResponseNormalizer {
            self.0.normalizer()
        }
        fn authenticator(&self) -> &dyn Authenticator {
            self.0.authenticator()
        }
    }

    #[tokio::test]
    async fn test_first_tier_with_results_wins() {
        let indexer = Tiered(torrentday());
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| {
            let body = if req.url.ends_with("exact.json") { "[]" } else { ONE_ROW };
            IndexerResponse::new(&req.url, 200, body)
        });

        let releases = search(&indexer, &session, &transport, &SearchCriteria::search("show"))
            .await
            .unwrap();
        assert_eq!(releases.len(), 2);

        let urls: Vec<String> = transport.requests().into_iter().map(|(r, _)| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://td.example/exact.json",
                "https://td.example/broad1.json",
                "https://td.example/broad2.json",
            ]
        );
    }

    #[tokio::test]
    async fn test_later_tiers_send_cookies_from_earlier_responses() {
        let indexer = Tiered(torrentday());
        let session = SiteSession::new("td");
        let transport = ScriptedTransport::new(|req, _| {
            if req.url.ends_with("exact.json") {
                IndexerResponse::new(&req.url, 200, "[]").with_header("Set-Cookie", "cf_clearance=zz; path=/")
            } else {
                IndexerResponse::new(&req.url, 200, ONE_ROW)
            }
        });

        search(&indexer, &session, &transport, &SearchCriteria::search("show"))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].1.get("cf_clearance"), None);
        for (request, cookies) in &requests[1..] {
            assert_eq!(cookies.get("cf_clearance"), Some("zz"), "{}", request.url);
            assert_eq!(cookies.get("uid"), Some("1"));
        }
    }
}
