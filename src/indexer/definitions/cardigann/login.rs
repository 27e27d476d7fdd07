//! Login flows declared by a definition's `login` block

use std::sync::Arc;

use async_trait::async_trait;
use scraper::Html;
use tracing::{debug, info};
use url::Url;

use super::definition::{CardigannDefinition, LoginBlock, TestBlock};
use super::{css, find_error, has_match};
use crate::indexer::context::VariableContext;
use crate::indexer::error::{IndexerError, Result};
use crate::indexer::request::{AcceptType, Param, RequestDescriptor, encode_params, upsert_param};
use crate::indexer::session::{Authenticator, CookieJar, LoginOutcome};
use crate::indexer::template::TemplateRenderer;
use crate::indexer::transport::{HttpTransport, IndexerResponse};

/// Hidden fields and action of a login page form
#[derive(Debug, Default, PartialEq)]
struct LoginForm {
    action: Option<String>,
    inputs: Vec<(String, String)>,
}

/// Runs the login exchange of a Cardigann definition
pub struct CardigannLogin {
    definition: Arc<CardigannDefinition>,
    base: VariableContext,
    renderer: Arc<dyn TemplateRenderer>,
    site_link: Url,
}

impl CardigannLogin {
    pub fn new(
        definition: Arc<CardigannDefinition>,
        base: VariableContext,
        site_link: &str,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let site_link = Url::parse(site_link)
            .map_err(|e| IndexerError::definition(format!("invalid site link '{}': {}", site_link, e)))?;
        Ok(Self {
            definition,
            base,
            renderer,
            site_link,
        })
    }

    fn site(&self) -> &str {
        &self.definition.id
    }

    fn resolve(&self, base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| IndexerError::definition(format!("cannot resolve login path '{}': {}", path, e)))
    }

    fn render_inputs(&self, inputs: &[(String, String)], ctx: &VariableContext) -> Result<Vec<Param>> {
        let mut params = Vec::with_capacity(inputs.len());
        for (key, value) in inputs {
            let rendered = self.renderer.render(value, ctx, None)?;
            upsert_param(&mut params, Param::new(key.clone(), rendered));
        }
        Ok(params)
    }

    async fn send(
        &self,
        transport: &dyn HttpTransport,
        request: RequestDescriptor,
        jar: &mut CookieJar,
    ) -> Result<IndexerResponse> {
        debug!(site = %self.site(), url = %request.url, method = %request.method, "Login request");
        let response = transport.execute(&request, jar).await?;
        for header in response.set_cookies() {
            jar.apply_set_cookie(header);
        }
        Ok(response)
    }

    /// Collect the hidden inputs and action of the login form
    fn extract_form(&self, body: &str, selector: &str) -> Result<LoginForm> {
        let document = Html::parse_document(body);
        let form_selector = css(selector)?;
        let input_selector = css("input[name]")?;

        let Some(form) = document.select(&form_selector).next() else {
            return Err(IndexerError::auth(
                self.site(),
                format!("login form '{}' not found", selector),
            ));
        };

        let mut result = LoginForm {
            action: form.value().attr("action").map(str::to_string),
            inputs: Vec::new(),
        };
        for input in form.select(&input_selector) {
            let el = input.value();
            let kind = el.attr("type").unwrap_or("text");
            if kind.eq_ignore_ascii_case("submit") || kind.eq_ignore_ascii_case("checkbox") {
                continue;
            }
            if let Some(name) = el.attr("name") {
                result
                    .inputs
                    .push((name.to_string(), el.attr("value").unwrap_or_default().to_string()));
            }
        }
        Ok(result)
    }

    fn check_login_errors(&self, login: &LoginBlock, body: &str, ctx: &VariableContext) -> Result<()> {
        if login.error.is_empty() {
            return Ok(());
        }
        let document = Html::parse_document(body);
        match find_error(&document, &login.error, self.renderer.as_ref(), ctx)? {
            Some(message) => Err(IndexerError::auth(self.site(), message)),
            None => Ok(()),
        }
    }

    fn test_selector_matches(&self, body: &str, selector: &str) -> Result<bool> {
        let document = Html::parse_document(body);
        has_match(&document, selector)
    }

    async fn verify(
        &self,
        transport: &dyn HttpTransport,
        test: &TestBlock,
        last: Option<&IndexerResponse>,
        jar: &CookieJar,
    ) -> Result<()> {
        let fetched;
        let response = match (test.path.as_deref(), last) {
            (None, Some(last)) => last,
            (path, _) => {
                let url = self.resolve(&self.site_link, path.unwrap_or(""))?;
                fetched = transport
                    .execute(&RequestDescriptor::get(url.to_string(), AcceptType::Html), jar)
                    .await?;
                &fetched
            }
        };

        if response.is_redirect() {
            return Err(IndexerError::auth(
                self.site(),
                format!(
                    "login test redirected to {}",
                    response.location().unwrap_or("an unknown location")
                ),
            ));
        }
        if let Some(selector) = test.selector.as_deref() {
            if !self.test_selector_matches(&response.body, selector)? {
                return Err(IndexerError::auth(
                    self.site(),
                    format!("login test selector '{}' did not match", selector),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Authenticator for CardigannLogin {
    async fn login(&self, transport: &dyn HttpTransport) -> Result<LoginOutcome> {
        let Some(login) = self.definition.login.as_ref() else {
            return Ok(LoginOutcome::new(CookieJar::new(), None));
        };

        let ctx = self.base.clone().with_query(None, vec![], &[])?;
        let mut jar = CookieJar::new();
        let login_path = login.path.as_deref().unwrap_or("");

        let response = match login.method().to_ascii_lowercase().as_str() {
            "cookie" => {
                let cookie = ctx.get_str(".Config.cookie").unwrap_or_default();
                if cookie.trim().is_empty() {
                    return Err(IndexerError::auth(self.site(), "no cookie configured"));
                }
                jar = CookieJar::from_header(cookie);
                None
            }
            "post" => {
                let url = self.resolve(&self.site_link, login_path)?;
                let params = self.render_inputs(&login.inputs, &ctx)?;
                let request = RequestDescriptor::post(url.to_string(), params, AcceptType::Html);
                Some(self.send(transport, request, &mut jar).await?)
            }
            "get" => {
                let mut url = self.resolve(&self.site_link, login_path)?.to_string();
                let params = self.render_inputs(&login.inputs, &ctx)?;
                if !params.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&encode_params(&params));
                }
                Some(self.send(transport, RequestDescriptor::get(url, AcceptType::Html), &mut jar).await?)
            }
            "form" => {
                let page_url = self.resolve(&self.site_link, login_path)?;
                let page = self
                    .send(transport, RequestDescriptor::get(page_url.to_string(), AcceptType::Html), &mut jar)
                    .await?;
                let form = self.extract_form(&page.body, login.form.as_deref().unwrap_or("form"))?;

                let mut params: Vec<Param> = form.inputs.into_iter().map(|(k, v)| Param::new(k, v)).collect();
                for param in self.render_inputs(&login.inputs, &ctx)? {
                    upsert_param(&mut params, param);
                }

                let submit = match (login.submitpath.as_deref(), form.action.as_deref()) {
                    (Some(path), _) => self.resolve(&self.site_link, path)?,
                    (None, Some(action)) if !action.trim().is_empty() => self.resolve(&page_url, action)?,
                    _ => page_url,
                };
                let request = RequestDescriptor::post(submit.to_string(), params, AcceptType::Html);
                Some(self.send(transport, request, &mut jar).await?)
            }
            other => {
                return Err(IndexerError::definition(format!(
                    "{}: unsupported login method '{}'",
                    self.site(),
                    other
                )));
            }
        };

        if let Some(response) = &response {
            self.check_login_errors(login, &response.body, &ctx)?;
            if response.status >= 400 {
                return Err(IndexerError::auth(
                    self.site(),
                    format!("login returned HTTP {}", response.status),
                ));
            }
        }

        if let Some(test) = &login.test {
            self.verify(transport, test, response.as_ref(), &jar).await?;
        }

        info!(site = %self.site(), method = login.method(), cookies = jar.len(), "Login exchange complete");
        Ok(LoginOutcome::new(jar, None))
    }

    fn needs_login(&self, response: &IndexerResponse) -> bool {
        let Some(login) = self.definition.login.as_ref() else {
            return false;
        };
        if response.is_redirect() {
            return true;
        }
        let Some(selector) = login.test.as_ref().and_then(|t| t.selector.as_deref()) else {
            return false;
        };
        let structured = response
            .header("content-type")
            .is_some_and(|ct| ct.contains("json") || ct.contains("xml"));
        if structured {
            return false;
        }
        !self.test_selector_matches(&response.body, selector).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::context::Value;
    use crate::indexer::request::HttpMethod;
    use crate::indexer::template::GoTemplate;
    use crate::indexer::transport::ScriptedTransport;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const FORM_YAML: &str = r#"
id: formsite
name: Form Site
links: [https://form.example/]
settings:
  - {name: username, type: text}
  - {name: password, type: password}
login:
  path: login.php
  method: form
  form: form#login
  inputs:
    username: "{{ .Config.username }}"
    password: "{{ .Config.password }}"
  error:
    - selector: div.error
  test:
    path: index.php
    selector: a[href*="logout"]
search:
  path: browse.php
  rows:
    selector: tr
"#;

    const LOGIN_PAGE: &str = r#"<html><body>
        <form id="login" action="takelogin.php" method="post">
          <input type="hidden" name="token" value="t0k">
          <input type="text" name="username">
          <input type="password" name="password">
          <input type="submit" name="go" value="Login">
        </form></body></html>"#;

    fn login(yaml: &str, config: Vec<(&str, Value)>) -> CardigannLogin {
        let def = Arc::new(CardigannDefinition::from_yaml(yaml).unwrap());
        let base = VariableContext::base(config, "https://form.example/");
        CardigannLogin::new(def, base, "https://form.example/", Arc::new(GoTemplate)).unwrap()
    }

    fn credentials() -> Vec<(&'static str, Value)> {
        vec![("username", Value::from("alice")), ("password", Value::from("s3cret"))]
    }

    #[tokio::test]
    async fn test_form_login_submits_hidden_inputs() {
        let transport = ScriptedTransport::new(|req, cookies| match req.url.as_str() {
            "https://form.example/login.php" => {
                IndexerResponse::new(&req.url, 200, LOGIN_PAGE).with_header("Set-Cookie", "pre=1; path=/")
            }
            "https://form.example/takelogin.php" => {
                assert_eq!(cookies.get("pre"), Some("1"));
                IndexerResponse::new(&req.url, 302, "")
                    .with_header("Location", "index.php")
                    .with_header("Set-Cookie", "uid=7; path=/")
            }
            "https://form.example/index.php" => {
                IndexerResponse::new(&req.url, 200, r#"<a href="logout.php">Logout</a>"#)
            }
            other => panic!("unexpected request {other}"),
        });

        let outcome = login(FORM_YAML, credentials()).login(&transport).await.unwrap();
        assert_eq!(outcome.cookies.get("uid"), Some("7"));
        assert_eq!(outcome.cookies.get("pre"), Some("1"));
        assert_eq!(outcome.expires, None);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        let submit = &requests[1].0;
        assert_eq!(submit.method, HttpMethod::Post);
        assert_eq!(
            submit.body().as_deref(),
            Some("token=t0k&username=alice&password=s3cret")
        );
    }

    #[tokio::test]
    async fn test_error_selector_becomes_auth_error() {
        let transport = ScriptedTransport::new(|req, _| {
            if req.url == "https://form.example/login.php" {
                IndexerResponse::new(&req.url, 200, LOGIN_PAGE)
            } else {
                IndexerResponse::new(&req.url, 200, r#"<div class="error"> Wrong password </div>"#)
            }
        });

        let err = login(FORM_YAML, credentials()).login(&transport).await.unwrap_err();
        assert_matches!(err, IndexerError::Authentication { ref reason, .. } if reason == "Wrong password");
    }

    #[tokio::test]
    async fn test_failed_test_selector_rejects_login() {
        let transport = ScriptedTransport::new(|req, _| match req.url.as_str() {
            "https://form.example/login.php" => IndexerResponse::new(&req.url, 200, LOGIN_PAGE),
            _ => IndexerResponse::new(&req.url, 200, "<p>please log in</p>"),
        });

        let err = login(FORM_YAML, credentials()).login(&transport).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_cookie_method_uses_configured_cookie() {
        let yaml = r#"
id: cookiesite
name: Cookie Site
links: [https://form.example/]
settings:
  - {name: cookie, type: text}
login:
  method: cookie
search:
  path: browse.php
  rows:
    selector: tr
"#;
        let transport = ScriptedTransport::new(|req, _| IndexerResponse::new(&req.url, 200, ""));
        let outcome = login(yaml, vec![("cookie", Value::from("uid=1; pass=abc"))])
            .login(&transport)
            .await
            .unwrap();
        assert_eq!(outcome.cookies.to_header(), "pass=abc; uid=1");
        assert!(transport.requests().is_empty());

        let err = login(yaml, vec![("cookie", Value::from(" "))])
            .login(&transport)
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_needs_login() {
        let login = login(FORM_YAML, credentials());
        let redirect = IndexerResponse::new("https://form.example/browse.php", 302, "")
            .with_header("Location", "login.php");
        assert!(login.needs_login(&redirect));

        let logged_out = IndexerResponse::new("https://form.example/browse.php", 200, "<p>login</p>");
        assert!(login.needs_login(&logged_out));

        let logged_in = IndexerResponse::new(
            "https://form.example/browse.php",
            200,
            r#"<a href="/logout.php">x</a><table></table>"#,
        );
        assert!(!login.needs_login(&logged_in));

        let json = IndexerResponse::new("https://form.example/api", 200, "[]")
            .with_header("Content-Type", "application/json");
        assert!(!login.needs_login(&json));
    }
}
