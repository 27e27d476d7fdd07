//! Minimal CLI parsing for the search command.

use std::env;

use anyhow::{Result, bail};

pub const USAGE: &str = "usage: indexgate [--dry-run] <site-id> [query...]\n\
                         \n\
                         Without a query the site's latest releases are fetched.\n\
                         --dry-run prints the request chain instead of sending it.";

#[derive(Debug, Default, PartialEq)]
pub struct CliOptions {
    pub dry_run: bool,
    pub site_id: String,
    /// Search text; `None` asks for the latest releases
    pub query: Option<String>,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = CliOptions::default();
        let mut positional = vec![];
        for arg in args {
            match arg.as_str() {
                "--dry-run" | "-n" => options.dry_run = true,
                "--help" | "-h" => bail!("{}", USAGE),
                _ if arg.starts_with("--") => bail!("unknown option '{}'\n{}", arg, USAGE),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        options.site_id = match positional.next() {
            Some(id) => id,
            None => bail!("{}", USAGE),
        };
        let query = positional.collect::<Vec<_>>().join(" ");
        options.query = (!query.trim().is_empty()).then_some(query);
        Ok(options)
    }
}
