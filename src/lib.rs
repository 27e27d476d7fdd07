//! indexgate - normalized search over torrent indexer sites
//!
//! Site adapters are either hand-written (see [`indexer::definitions`]) or
//! driven by Cardigann YAML definitions. [`indexer::IndexerManager`] runs
//! searches across configured sites and returns normalized releases.

pub mod config;
pub mod indexer;
pub mod logging;
