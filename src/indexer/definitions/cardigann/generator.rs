//! Request chain builder for Cardigann definitions

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::definition::{CardigannDefinition, SearchPathDef};
use crate::indexer::RequestGenerator;
use crate::indexer::categories::{CategoryMapper, path_matches};
use crate::indexer::context::VariableContext;
use crate::indexer::error::{IndexerError, Result};
use crate::indexer::request::{
    AcceptType, HttpMethod, Param, RAW_INPUT_KEY, RequestChain, RequestDescriptor, encode_params, split_raw_block,
    upsert_param,
};
use crate::indexer::template::filters::form_urlencode;
use crate::indexer::template::{EscapeFn, TemplateRenderer};
use crate::indexer::types::SearchCriteria;

const URL_ESCAPE: EscapeFn = form_urlencode;

/// Builds request chains from a definition's search block
pub struct CardigannRequestGenerator {
    definition: Arc<CardigannDefinition>,
    base: VariableContext,
    categories: CategoryMapper,
    renderer: Arc<dyn TemplateRenderer>,
    site_link: Url,
}

impl CardigannRequestGenerator {
    pub fn new(
        definition: Arc<CardigannDefinition>,
        base: VariableContext,
        site_link: &str,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let categories = definition.category_mapper()?;
        let site_link = Url::parse(site_link)
            .map_err(|e| IndexerError::definition(format!("invalid site link '{}': {}", site_link, e)))?;
        Ok(Self {
            definition,
            base,
            categories,
            renderer,
            site_link,
        })
    }

    /// Variable context for one search
    pub fn context_for(&self, criteria: &SearchCriteria) -> Result<(VariableContext, Vec<String>)> {
        let mut mapped = self.categories.to_site_ids(&criteria.categories);
        if mapped.is_empty() {
            mapped = self.categories.default_site_ids();
        }
        let ctx = self.base.clone().with_query(
            Some(criteria),
            mapped.clone(),
            &self.definition.search.keywordsfilters,
        )?;
        Ok((ctx, mapped))
    }

    fn build_request(&self, path: &SearchPathDef, ctx: &Arc<VariableContext>) -> Result<RequestDescriptor> {
        let search = &self.definition.search;

        let rendered = self
            .renderer
            .render(&path.path, ctx, Some(URL_ESCAPE))?
            .replace('+', "%20");
        let mut url = self
            .site_link
            .join(&rendered)
            .map_err(|e| IndexerError::definition(format!("cannot resolve search path '{}': {}", rendered, e)))?
            .to_string();

        let method = HttpMethod::from_definition(path.method.as_deref());

        let inherited: &[(String, String)] = if path.inheritinputs { &search.inputs } else { &[] };
        let mut params: Vec<Param> = Vec::new();
        for (key, value) in inherited.iter().chain(path.inputs.iter()) {
            if key == RAW_INPUT_KEY {
                let raw = self.renderer.render(value, ctx, Some(URL_ESCAPE))?;
                for (k, v) in split_raw_block(&raw) {
                    params.push(Param::raw(k, v));
                }
            } else {
                let rendered = self.renderer.render(value, ctx, None)?;
                upsert_param(&mut params, Param::new(key.clone(), rendered));
            }
        }

        let accept = match path.response.as_ref().and_then(|r| r.response_type.as_deref()) {
            Some("json") => AcceptType::Json,
            Some("xml") => AcceptType::Rss,
            _ => AcceptType::Html,
        };

        let mut request = match method {
            HttpMethod::Get => {
                if !params.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&encode_params(&params));
                }
                RequestDescriptor::get(url, accept)
            }
            HttpMethod::Post => RequestDescriptor::post(url, params, accept),
        };

        for (name, values) in &search.headers {
            if let Some(first) = values.first() {
                let value = self.renderer.render(first, ctx, None)?;
                request = request.with_header(name.clone(), value);
            }
        }

        info!(indexer_id = %self.definition.id, url = %request.url, method = %request.method, "Adding request");
        Ok(request.with_context(ctx.clone()))
    }

    fn chain_for(&self, criteria: &SearchCriteria) -> Result<RequestChain<'_>> {
        let (ctx, mapped) = self.context_for(criteria)?;
        let ctx = Arc::new(ctx);

        let requests = self.definition.search.paths.iter().filter_map(move |path| {
            if !mapped.is_empty() && !path_matches(&mapped, &path.categories) {
                debug!(
                    indexer_id = %self.definition.id,
                    path = %path.path,
                    "Skipping search path, categories do not match"
                );
                return None;
            }
            Some(self.build_request(path, &ctx))
        });

        let mut chain = RequestChain::new();
        chain.add(requests);
        Ok(chain)
    }
}

impl RequestGenerator for CardigannRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria) -> Result<RequestChain<'_>> {
        self.chain_for(criteria)
    }

    fn recent_requests(&self) -> Result<RequestChain<'_>> {
        self.chain_for(&SearchCriteria::recent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::categories::cats;
    use crate::indexer::context::Value;
    use crate::indexer::template::GoTemplate;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts render calls and records the templates it saw
    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl TemplateRenderer for CountingRenderer {
        fn render(&self, template: &str, ctx: &VariableContext, escape: Option<EscapeFn>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(template.to_string());
            GoTemplate.render(template, ctx, escape)
        }
    }

    const YAML: &str = r#"
id: demo
name: Demo
links: [https://demo.example/]
caps:
  categorymappings:
    - {id: 5000, cat: TV, default: true}
    - {id: 5030, cat: TV/SD}
    - {id: 2000, cat: Movies}
settings:
  - {name: sort, type: select}
search:
  paths:
    - path: "browse/{{ .Keywords }}"
    - path: tv.php
      categories: [5000]
    - path: movies.php
      categories: [2000]
      inputs:
        only: movies
    - path: post.php
      method: post
      inheritinputs: false
      categories: ["!", 2000]
      inputs:
        q: "{{ .Keywords }}"
  inputs:
    search: "{{ .Keywords }}"
    sort: "{{ .Config.sort }}"
    $raw: "{{ range .Categories }}c{{ . }}=1&{{ end }}=junk"
  headers:
    X-Requested-With: ["XMLHttpRequest", "ignored"]
  rows:
    selector: tr
"#;

    fn generator(renderer: Arc<dyn TemplateRenderer>) -> CardigannRequestGenerator {
        let def = Arc::new(CardigannDefinition::from_yaml(YAML).unwrap());
        let base = VariableContext::base(vec![("sort", Value::from("added"))], "https://demo.example/");
        CardigannRequestGenerator::new(def, base, "https://demo.example/", renderer).unwrap()
    }

    fn urls(chain: RequestChain<'_>) -> Vec<RequestDescriptor> {
        chain.collect_all().unwrap().into_iter().flatten().collect()
    }

    #[test]
    fn test_two_matching_paths_scenario() {
        let yaml = r#"
id: pair
name: Pair
links: [https://pair.example/]
caps:
  categorymappings:
    - {id: 5000, cat: TV}
    - {id: 5030, cat: TV/SD}
search:
  paths:
    - path: a.php
    - path: b.php
      categories: [5000]
  rows:
    selector: tr
"#;
        let def = Arc::new(CardigannDefinition::from_yaml(yaml).unwrap());
        let generator = CardigannRequestGenerator::new(
            def,
            VariableContext::new(),
            "https://pair.example/",
            Arc::new(GoTemplate),
        )
        .unwrap();
        let query = SearchCriteria::search("x").with_categories(vec![cats::TV, cats::TV_SD]);
        let requests = urls(generator.search_requests(&query).unwrap());
        let urls: Vec<_> = requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://pair.example/a.php", "https://pair.example/b.php"]);
    }

    #[test]
    fn test_filtered_paths_never_render() {
        let renderer = Arc::new(CountingRenderer::default());
        let generator = generator(renderer.clone());

        let query = SearchCriteria::search("the office").with_categories(vec![cats::MOVIES]);
        let requests = urls(generator.search_requests(&query).unwrap());

        // browse (no filter) and movies.php; tv.php filtered, post.php excluded by "!"
        assert_eq!(requests.len(), 2);
        let seen = renderer.seen.lock().clone();
        assert!(!seen.iter().any(|t| t == "tv.php" || t == "post.php"));
        // path, three inherited inputs and a header each, plus movies.php's own input
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_path_escaping_and_query_string() {
        let generator = generator(Arc::new(GoTemplate));
        let query = SearchCriteria::search("the office").with_categories(vec![cats::MOVIES]);
        let requests = urls(generator.search_requests(&query).unwrap());

        assert_eq!(
            requests[0].url,
            "https://demo.example/browse/the%20office?search=the+office&sort=added&c2000=1"
        );
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(requests[0].header("X-Requested-With"), Some("XMLHttpRequest"));
        assert_eq!(requests[0].context.get_str(".Keywords"), Some("the office"));
        assert_eq!(
            requests[1].url,
            "https://demo.example/movies.php?search=the+office&sort=added&c2000=1&only=movies"
        );
    }

    #[test]
    fn test_default_categories_and_inverted_post_path() {
        let generator = generator(Arc::new(GoTemplate));
        let requests = urls(generator.search_requests(&SearchCriteria::search("x")).unwrap());

        // No categories requested: default set ["5000"] applies
        let urls: Vec<_> = requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://demo.example/browse/x?search=x&sort=added&c5000=1",
                "https://demo.example/tv.php?search=x&sort=added&c5000=1",
                "https://demo.example/post.php",
            ]
        );
        let post = &requests[2];
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(post.body().as_deref(), Some("q=x"));
    }

    #[test]
    fn test_recent_requests_have_no_keywords() {
        let generator = generator(Arc::new(GoTemplate));
        let requests = urls(generator.recent_requests().unwrap());
        assert_eq!(requests[0].url, "https://demo.example/browse/?search=&sort=added&c5000=1");
        assert_eq!(requests[0].context.get(".Query.Q"), Some(&Value::Null));
    }

    #[test]
    fn test_bad_template_surfaces_as_definition_error() {
        let yaml = YAML.replace("{{ .Config.sort }}", "{{ .Config.missing }}");
        let def = Arc::new(CardigannDefinition::from_yaml(&yaml).unwrap());
        let generator = CardigannRequestGenerator::new(
            def,
            VariableContext::base(Vec::<(String, Value)>::new(), "https://demo.example/"),
            "https://demo.example/",
            Arc::new(GoTemplate),
        )
        .unwrap();
        let chain = generator.search_requests(&SearchCriteria::search("x")).unwrap();
        assert_matches!(chain.collect_all(), Err(IndexerError::Definition(_)));
    }
}
