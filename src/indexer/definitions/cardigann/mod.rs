//! Cardigann YAML definition engine
//!
//! A definition describes a site declaratively: how to log in, which search
//! paths to request and how to pull fields out of each result row. This
//! module turns one definition plus the user's settings into an [`Indexer`].

mod definition;
mod generator;
mod login;
mod parser;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use tracing::{info, warn};

pub use definition::{
    CapabilitiesBlock, CardigannDefinition, ErrorBlock, FieldSelector, LoginBlock, SearchBlock, SearchPathDef,
    SettingsField,
};
pub use generator::CardigannRequestGenerator;
pub use login::CardigannLogin;
pub use parser::CardigannParser;

use crate::indexer::context::{Value, VariableContext};
use crate::indexer::error::{IndexerError, Result};
use crate::indexer::normalize::{ResponseNormalizer, ResponseParser};
use crate::indexer::session::Authenticator;
use crate::indexer::template::{GoTemplate, TemplateRenderer};
use crate::indexer::types::{IndexerCapabilities, IndexerSettings, IndexerType, TrackerType};
use crate::indexer::{Indexer, RequestGenerator};

pub(crate) fn css(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| IndexerError::definition(format!("invalid selector '{}': {:?}", selector, e)))
}

/// Trimmed text content of an element
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

pub(crate) fn has_match(document: &Html, selector: &str) -> Result<bool> {
    Ok(document.select(&css(selector)?).next().is_some())
}

/// Message of the first error block whose selector matches the document
pub(crate) fn find_error(
    document: &Html,
    blocks: &[ErrorBlock],
    renderer: &dyn TemplateRenderer,
    ctx: &VariableContext,
) -> Result<Option<String>> {
    for block in blocks {
        let selector = css(&block.selector)?;
        let Some(matched) = document.select(&selector).next() else {
            continue;
        };

        let message = match block.message.as_ref() {
            Some(message) if message.text.is_some() => {
                renderer.render(message.text.as_deref().unwrap_or_default(), ctx, None)?
            }
            Some(message) if message.selector.is_some() => {
                let inner = css(message.selector.as_deref().unwrap_or_default())?;
                document
                    .select(&inner)
                    .next()
                    .map(element_text)
                    .unwrap_or_else(|| element_text(matched))
            }
            _ => element_text(matched),
        };

        return Ok(Some(if message.is_empty() {
            format!("error selector '{}' matched", block.selector)
        } else {
            message
        }));
    }
    Ok(None)
}

/// `.Config.*` values for every setting the definition declares
pub fn config_values(definition: &CardigannDefinition, settings: &IndexerSettings) -> Vec<(String, Value)> {
    definition
        .settings
        .iter()
        .filter(|field| !field.is_informational())
        .map(|field| {
            let configured = settings.get(&field.name).map(str::to_string);
            let fallback = field.default.as_ref().and_then(|d| match d {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                serde_yaml::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            });
            let raw = configured.or(fallback);

            let value = if field.is_checkbox() {
                let on = raw
                    .as_deref()
                    .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "on"));
                if on { Value::from("True") } else { Value::Null }
            } else {
                Value::from(raw)
            };
            (field.name.clone(), value)
        })
        .collect()
}

/// A configured site driven by a Cardigann definition
pub struct CardigannIndexer {
    id: String,
    definition: Arc<CardigannDefinition>,
    site_link: String,
    capabilities: IndexerCapabilities,
    tracker_type: TrackerType,
    configured: bool,
    generator: CardigannRequestGenerator,
    parser: CardigannParser,
    normalizer: ResponseNormalizer,
    login: CardigannLogin,
}

impl CardigannIndexer {
    pub fn new(id: impl Into<String>, definition: Arc<CardigannDefinition>, settings: &IndexerSettings) -> Result<Self> {
        Self::with_renderer(id, definition, settings, Arc::new(GoTemplate))
    }

    pub fn with_renderer(
        id: impl Into<String>,
        definition: Arc<CardigannDefinition>,
        settings: &IndexerSettings,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let id = id.into();
        let site_link = settings.site_link(definition.site_link());
        let base = VariableContext::base(config_values(&definition, settings), &site_link);

        let capabilities = definition.capabilities()?;
        let tracker_type = definition
            .tracker_type
            .as_deref()
            .and_then(|t| t.parse().ok())
            .unwrap_or_default();

        let generator =
            CardigannRequestGenerator::new(definition.clone(), base.clone(), &site_link, renderer.clone())?;
        let parser = CardigannParser::new(definition.clone(), base.clone(), renderer.clone())?;
        let login = CardigannLogin::new(definition.clone(), base, &site_link, renderer)?;
        let normalizer = ResponseNormalizer::new(id.clone(), definition.name.clone(), site_link.clone())
            .with_categories(capabilities.categories.clone());

        let configured = Self::credentials_present(&definition, settings);

        Ok(Self {
            id,
            definition,
            site_link,
            capabilities,
            tracker_type,
            configured,
            generator,
            parser,
            normalizer,
            login,
        })
    }

    fn credentials_present(definition: &CardigannDefinition, settings: &IndexerSettings) -> bool {
        let Some(login) = definition.login.as_ref() else {
            return true;
        };
        let needed: &[&str] = if login.method().eq_ignore_ascii_case("cookie") {
            &["cookie"]
        } else {
            &["username", "password"]
        };
        needed
            .iter()
            .filter(|name| definition.settings.iter().any(|s| s.name == **name))
            .all(|name| settings.get(name).is_some_and(|v| !v.trim().is_empty()))
    }

    pub fn definition(&self) -> &CardigannDefinition {
        &self.definition
    }
}

impl Indexer for CardigannIndexer {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        self.definition.description.as_deref().unwrap_or_default()
    }

    fn indexer_type(&self) -> IndexerType {
        IndexerType::Cardigann
    }

    fn site_link(&self) -> &str {
        &self.site_link
    }

    fn tracker_type(&self) -> TrackerType {
        self.tracker_type
    }

    fn language(&self) -> &str {
        self.definition.language.as_deref().unwrap_or("en-US")
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
        &self.login
    }
}

/// Load every `*.yml`/`*.yaml` definition in a directory, keyed by id.
///
/// Files that fail to parse are logged and skipped.
pub fn load_definitions(dir: &Path) -> Result<HashMap<String, Arc<CardigannDefinition>>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        IndexerError::definition(format!("cannot read definitions from {}: {}", dir.display(), e))
    })?;

    let mut definitions = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"));
        if !is_yaml {
            continue;
        }

        let loaded = std::fs::read_to_string(&path)
            .map_err(|e| IndexerError::definition(format!("cannot read {}: {}", path.display(), e)))
            .and_then(|yaml| CardigannDefinition::from_yaml(&yaml));
        match loaded {
            Ok(definition) => {
                definitions.insert(definition.id.clone(), Arc::new(definition));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping definition"),
        }
    }

    info!(dir = %dir.display(), count = definitions.len(), "Loaded Cardigann definitions");
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::types::{QueryType, SearchCriteria};
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
id: demo
name: Demo
description: A demo tracker
type: semi-private
links: [https://demo.example]
caps:
  categorymappings:
    - {id: 1, cat: Movies}
  modes:
    search: [q]
    movie-search: [q, imdbid]
settings:
  - {name: username, type: text}
  - {name: password, type: password}
  - {name: freeleech, type: checkbox, default: false}
  - {name: sort, type: select, default: added}
  - {name: info, type: info, label: Read me}
login:
  path: takelogin.php
  method: post
  inputs:
    username: "{{ .Config.username }}"
search:
  path: "browse.php?fl={{ if .Config.freeleech }}1{{ else }}0{{ end }}&sort={{ .Config.sort }}"
  rows:
    selector: tr
"#;

    fn definition() -> Arc<CardigannDefinition> {
        Arc::new(CardigannDefinition::from_yaml(YAML).unwrap())
    }

    #[test]
    fn test_config_values() {
        let mut settings = IndexerSettings {
            username: Some("alice".into()),
            ..Default::default()
        };
        settings.settings.insert("freeleech".into(), "true".into());

        let values = config_values(&definition(), &settings);
        assert_eq!(
            values,
            vec![
                ("username".to_string(), Value::from("alice")),
                ("password".to_string(), Value::Null),
                ("freeleech".to_string(), Value::from("True")),
                ("sort".to_string(), Value::from("added")),
            ]
        );
    }

    #[test]
    fn test_indexer_metadata() {
        let settings = IndexerSettings {
            username: Some("alice".into()),
            ..Default::default()
        };
        let indexer = CardigannIndexer::new("demo-1", definition(), &settings).unwrap();
        assert_eq!(indexer.id(), "demo-1");
        assert_eq!(indexer.name(), "Demo");
        assert_eq!(indexer.site_link(), "https://demo.example/");
        assert_eq!(indexer.tracker_type(), TrackerType::SemiPrivate);
        assert_eq!(indexer.indexer_type(), IndexerType::Cardigann);
        assert!(!indexer.is_configured());
        assert!(indexer.can_handle_query(&SearchCriteria::movie_search("x")));
        assert!(!indexer.capabilities().supports(QueryType::TvSearch));
    }

    #[test]
    fn test_checkbox_drives_search_path() {
        let mut settings = IndexerSettings {
            username: Some("alice".into()),
            password: Some("pw".into()),
            ..Default::default()
        };
        let indexer = CardigannIndexer::new("demo-1", definition(), &settings).unwrap();
        assert!(indexer.is_configured());
        let chain = indexer.generator().recent_requests().unwrap();
        let urls: Vec<String> = chain.collect_all().unwrap().into_iter().flatten().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://demo.example/browse.php?fl=0&sort=added"]);

        settings.settings.insert("freeleech".into(), "on".into());
        let indexer = CardigannIndexer::new("demo-1", definition(), &settings).unwrap();
        let chain = indexer.generator().recent_requests().unwrap();
        let urls: Vec<String> = chain.collect_all().unwrap().into_iter().flatten().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://demo.example/browse.php?fl=1&sort=added"]);
    }

    #[test]
    fn test_find_error_message_forms() {
        let document = Html::parse_document(
            r#"<div class="warn"><b>Oops</b></div><p class="why">Bad password</p>"#,
        );
        let ctx = VariableContext::new();
        let blocks: Vec<ErrorBlock> = serde_yaml::from_str(
            r#"
- selector: div.missing
- selector: div.warn
  message:
    selector: p.why
"#,
        )
        .unwrap();
        assert_eq!(
            find_error(&document, &blocks, &GoTemplate, &ctx).unwrap().as_deref(),
            Some("Bad password")
        );

        let blocks: Vec<ErrorBlock> = serde_yaml::from_str(
            r#"
- selector: div.warn
  message:
    text: "Login failed"
"#,
        )
        .unwrap();
        assert_eq!(
            find_error(&document, &blocks, &GoTemplate, &ctx).unwrap().as_deref(),
            Some("Login failed")
        );

        assert_eq!(find_error(&document, &[], &GoTemplate, &ctx).unwrap(), None);
    }

    #[test]
    fn test_invalid_selector_is_definition_error() {
        assert!(matches!(css("td[["), Err(IndexerError::Definition(_))));
    }
}
