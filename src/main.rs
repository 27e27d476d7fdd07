//! indexgate - search one configured indexer site from the command line
//!
//! Prints the normalized releases as JSON on stdout; logs go to stderr.

mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};

use indexgate::config::Config;
use indexgate::indexer::definitions::build_indexer;
use indexgate::indexer::definitions::cardigann::load_definitions;
use indexgate::indexer::{IndexerManager, ReqwestTransport, SearchCriteria};

use crate::cli::CliOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    indexgate::logging::init();

    let options = CliOptions::from_args()?;
    let config = Config::from_env()?;

    let definitions = match &config.definitions_path {
        Some(dir) => load_definitions(dir).context("Failed to load Cardigann definitions")?,
        None => HashMap::new(),
    };

    let sites = config.load_sites()?;
    let site = sites
        .iter()
        .find(|s| s.id == options.site_id)
        .ok_or_else(|| anyhow!("Site '{}' is not configured", options.site_id))?;
    if !site.enabled {
        tracing::warn!(indexer_id = %site.id, "Site is disabled in the sites file");
    }

    let indexer = build_indexer(&site.kind, &site.id, &site.settings, &definitions)
        .with_context(|| format!("Failed to set up site '{}'", site.id))?;

    let criteria = match &options.query {
        Some(q) => SearchCriteria::search(q),
        None => SearchCriteria::recent(),
    };

    if options.dry_run {
        let chain = match options.query {
            Some(_) => indexer.generator().search_requests(&criteria)?,
            None => indexer.generator().recent_requests()?,
        };
        let tiers = chain.collect_all()?;
        println!("{}", serde_json::to_string_pretty(&tiers)?);
        return Ok(());
    }

    let transport = ReqwestTransport::new(config.request_timeout, &config.user_agent)
        .context("Failed to build HTTP client")?;
    let manager = IndexerManager::new(Arc::new(transport), config.manager_options());
    manager.register(indexer);

    tracing::info!(indexer_id = %site.id, query = ?options.query, "Starting search");
    let releases = match options.query {
        Some(_) => manager.search(&site.id, &criteria).await,
        None => manager.recent(&site.id).await,
    }
    .with_context(|| format!("Search on '{}' failed", site.id))?;

    println!("{}", serde_json::to_string_pretty(&releases)?);
    Ok(())
}
