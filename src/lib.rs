//! horizons - follow people across feeds and webpages, archive what they
//! publish, summarize it, and send a digest
//!
//! The ingestion pipeline is: [`registry`] lists sources, [`fetch`] pulls raw
//! entries, [`normalize`] builds candidates, [`dedup`] classifies them
//! against the [`archive`], and [`coordinator`] drives one run across all
//! due sources. [`enrich`] and [`digest`] consume archived items afterward.

pub mod archive;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod digest;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod progress;
pub mod registry;

pub use error::{Error, Result};
