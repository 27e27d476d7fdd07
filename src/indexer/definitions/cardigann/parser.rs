//! Row extraction for Cardigann HTML responses

use std::collections::HashSet;
use std::sync::Arc;

use scraper::{ElementRef, Html};
use tracing::debug;

use super::definition::{CardigannDefinition, FieldSelector};
use super::{css, element_text, find_error};
use crate::indexer::context::{Value, VariableContext};
use crate::indexer::error::{ExtractionError, IndexerError, Result};
use crate::indexer::normalize::{FieldBag, ItemResult, ResponseParser, fields};
use crate::indexer::template::TemplateRenderer;
use crate::indexer::template::filters::apply_filters;
use crate::indexer::transport::IndexerResponse;

/// Field name in a definition to the normalizer's field, `None` for
/// intermediate values that only feed later templates.
fn target_field(name: &str) -> Option<&str> {
    if name.starts_with('_') {
        return None;
    }
    Some(match name {
        "imdbid" => fields::IMDB,
        "comments" => fields::DETAILS,
        "categorydesc" => fields::CATEGORY,
        other => other,
    })
}

/// Extracts field bags from the rows selected by a definition's search block
pub struct CardigannParser {
    definition: Arc<CardigannDefinition>,
    row_context: VariableContext,
    renderer: Arc<dyn TemplateRenderer>,
}

impl CardigannParser {
    pub fn new(
        definition: Arc<CardigannDefinition>,
        base: VariableContext,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Result<Self> {
        let mut row_context = base.with_query(None, vec![], &[])?;
        for (name, _) in &definition.search.fields {
            row_context.set(format!(".Result.{}", name), Value::Null);
        }
        Ok(Self {
            definition,
            row_context,
            renderer,
        })
    }

    fn parse_row(&self, row: ElementRef<'_>) -> Result<ItemResult> {
        let mut ctx = self.row_context.clone();
        let mut bag = FieldBag::new();

        for (name, selector) in &self.definition.search.fields {
            let value = match self.field_value(row, selector, &ctx)? {
                Some(value) => value,
                None if selector.optional => match &selector.default {
                    Some(default) => self.renderer.render(default, &ctx, None)?,
                    None => continue,
                },
                None => return Ok(Err(ExtractionError::missing(name.as_str()))),
            };

            let value = apply_filters(&value, &selector.filters)?;
            ctx.set(format!(".Result.{}", name), value.clone());
            if let Some(field) = target_field(name) {
                bag.push(field, value);
            }
        }

        Ok(Ok(bag))
    }

    /// Raw value of one field before filters, `None` when it is missing
    fn field_value(&self, row: ElementRef<'_>, selector: &FieldSelector, ctx: &VariableContext) -> Result<Option<String>> {
        if let Some(text) = &selector.text {
            return Ok(Some(self.renderer.render(text, ctx, None)?));
        }

        let element = match selector.selector.as_deref().map(str::trim) {
            None | Some("") => row,
            Some(css_selector) => match row.select(&css(css_selector)?).next() {
                Some(el) => el,
                None => return Ok(None),
            },
        };

        if !selector.case.is_empty() {
            for (case_selector, value) in &selector.case {
                if case_selector == "*" || matches_or_contains(element, case_selector)? {
                    return Ok(Some(value.clone()));
                }
            }
            return Ok(None);
        }

        if let Some(attribute) = &selector.attribute {
            return Ok(element.value().attr(attribute).map(str::to_string));
        }

        match &selector.remove {
            Some(remove) => {
                let removed = css(remove)?;
                let skip: HashSet<_> = element
                    .select(&removed)
                    .flat_map(|el| el.descendants().map(|n| n.id()))
                    .collect();
                let text: String = element
                    .descendants()
                    .filter(|n| !skip.contains(&n.id()))
                    .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
                    .collect();
                Ok(Some(text.trim().to_string()))
            }
            None => Ok(Some(element_text(element))),
        }
    }
}

fn matches_or_contains(element: ElementRef<'_>, selector: &str) -> Result<bool> {
    let selector = css(selector)?;
    Ok(selector.matches(&element) || element.select(&selector).next().is_some())
}

impl ResponseParser for CardigannParser {
    fn parse(&self, response: &IndexerResponse) -> Result<Vec<ItemResult>> {
        let search = &self.definition.search;
        let document = Html::parse_document(&response.body);

        if let Some(message) = find_error(&document, &search.error, self.renderer.as_ref(), &self.row_context)? {
            return Err(IndexerError::transport(format!(
                "{} reported an error: {}",
                self.definition.id, message
            )));
        }

        let rows = css(&search.rows.selector)?;
        let mut items = Vec::new();
        for row in document.select(&rows) {
            items.push(self.parse_row(row)?);
        }
        debug!(indexer_id = %self.definition.id, rows = items.len(), url = %response.url, "Extracted rows");
        Ok(items)
    }
}
