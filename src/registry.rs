//! Followees and the sources they publish through
//!
//! The registry is a read-only view built once from [`Config`]. Everything
//! downstream addresses sources by their stable id.

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Kind of content origin. Closed set: each kind has exactly one fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Webpage,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Rss => write!(f, "rss"),
            SourceKind::Webpage => write!(f, "webpage"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rss" | "atom" | "feed" => Ok(SourceKind::Rss),
            "webpage" | "article" => Ok(SourceKind::Webpage),
            _ => Err(Error::Config(format!("Unknown source kind: {}", s))),
        }
    }
}

/// A tracked person or entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Followee {
    pub slug: String,
    pub display_name: String,
    pub source_ids: Vec<String>,
}

/// One configured content origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    pub followee_id: String,
    pub kind: SourceKind,
    pub locator: String,
    pub name: Option<String>,
    pub cadence: Option<Duration>,
}

impl SourceSpec {
    /// Name for display, falling back to the locator
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.locator)
    }

    /// A source is due when it has no cadence, has never succeeded, or its
    /// cadence has elapsed since the last success.
    pub fn is_due(&self, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let (Some(cadence), Some(last)) = (self.cadence, last_success) else {
            return true;
        };
        let elapsed = now.signed_duration_since(last);
        match chrono::Duration::from_std(cadence) {
            Ok(cadence) => elapsed >= cadence,
            Err(_) => false,
        }
    }
}

/// Read-only view over loaded followees and sources
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    followees: BTreeMap<String, Followee>,
    sources: BTreeMap<String, SourceSpec>,
}

impl SourceRegistry {
    /// Build the registry, rejecting unknown kinds, bad locators, and id or
    /// (kind, locator) collisions.
    pub fn from_config(config: &Config) -> Result<Self> {
        let slug_re = Regex::new(r"^[a-z0-9][a-z0-9_-]*$")
            .map_err(|e| Error::Other(format!("Invalid slug pattern: {}", e)))?;

        let mut registry = SourceRegistry::default();

        for (slug, followee) in &config.followees {
            if !slug_re.is_match(slug) {
                return Err(Error::Config(format!(
                    "Invalid followee slug '{}': use lowercase letters, digits, '-' or '_'",
                    slug
                )));
            }

            let mut seen_pairs: HashSet<(SourceKind, String)> = HashSet::new();
            let mut source_ids = Vec::with_capacity(followee.sources.len());

            for (index, source) in followee.sources.iter().enumerate() {
                let kind: SourceKind = source.kind.parse()?;
                let locator = validate_locator(slug, &source.locator)?;

                if !seen_pairs.insert((kind, locator.clone())) {
                    return Err(Error::Config(format!(
                        "Followee '{}' lists {} source {} twice",
                        slug, kind, locator
                    )));
                }

                let id = match &source.id {
                    Some(id) if !id.trim().is_empty() => id.trim().to_string(),
                    _ => format!("{}-{}-{}", slug, kind, index + 1),
                };

                if registry.sources.contains_key(&id) {
                    return Err(Error::Config(format!("Duplicate source id: {}", id)));
                }

                source_ids.push(id.clone());
                registry.sources.insert(
                    id.clone(),
                    SourceSpec {
                        id,
                        followee_id: slug.clone(),
                        kind,
                        locator,
                        name: source.name.clone(),
                        cadence: source.cadence_secs.map(Duration::from_secs),
                    },
                );
            }

            registry.followees.insert(
                slug.clone(),
                Followee {
                    slug: slug.clone(),
                    display_name: followee.display_name.clone(),
                    source_ids,
                },
            );
        }

        Ok(registry)
    }

    /// All sources, ordered by id
    pub fn list_sources(&self) -> Vec<&SourceSpec> {
        self.sources.values().collect()
    }

    pub fn get_source(&self, id: &str) -> Option<&SourceSpec> {
        self.sources.get(id)
    }

    pub fn followee(&self, slug: &str) -> Option<&Followee> {
        self.followees.get(slug)
    }

    pub fn followees(&self) -> impl Iterator<Item = &Followee> {
        self.followees.values()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// A one-off webpage source for ad-hoc ingestion of a single URL
    pub fn manual_webpage(&self, followee: &str, url: &str) -> Result<SourceSpec> {
        if !self.followees.contains_key(followee) {
            return Err(Error::Config(format!("Unknown followee: {}", followee)));
        }
        let locator = validate_locator(followee, url)?;
        let digest = blake3::hash(locator.as_bytes()).to_hex();
        Ok(SourceSpec {
            id: format!("{}-manual-{}", followee, &digest[..8]),
            followee_id: followee.to_string(),
            kind: SourceKind::Webpage,
            locator,
            name: Some("Manual".to_string()),
            cadence: None,
        })
    }
}

fn validate_locator(followee: &str, raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|e| {
        Error::Config(format!(
            "Followee '{}' has an invalid source locator '{}': {}",
            followee, raw, e
        ))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Config(format!(
            "Followee '{}' source locator must be an http(s) URL: {}",
            followee, raw
        )));
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FolloweeConfig, SourceConfig};

    fn source(kind: &str, locator: &str) -> SourceConfig {
        SourceConfig {
            id: None,
            kind: kind.to_string(),
            locator: locator.to_string(),
            name: None,
            cadence_secs: None,
        }
    }

    fn config_with(slug: &str, sources: Vec<SourceConfig>) -> Config {
        let mut config = Config::default();
        config.followees.insert(
            slug.to_string(),
            FolloweeConfig {
                display_name: slug.to_uppercase(),
                sources,
            },
        );
        config
    }

    #[test]
    fn test_list_sources_is_sorted_by_id() {
        let mut config = config_with(
            "zed",
            vec![source("rss", "https://zed.example.com/feed")],
        );
        config.followees.insert(
            "amy".to_string(),
            FolloweeConfig {
                display_name: "Amy".to_string(),
                sources: vec![
                    source("webpage", "https://amy.example.com/about"),
                    source("rss", "https://amy.example.com/feed"),
                ],
            },
        );

        let registry = SourceRegistry::from_config(&config).unwrap();
        let ids: Vec<&str> = registry.list_sources().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["amy-rss-2", "amy-webpage-1", "zed-rss-1"]);
        assert_eq!(
            registry.followee("amy").unwrap().source_ids,
            vec!["amy-webpage-1", "amy-rss-2"]
        );
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let mut src = source("rss", "https://minimax.example.com/feed");
        src.id = Some("minimax-blog".to_string());
        let registry = SourceRegistry::from_config(&config_with("minimax", vec![src])).unwrap();
        assert!(registry.get_source("minimax-blog").is_some());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let config = config_with("bob", vec![source("bilibili", "https://bilibili.com/bob")]);
        assert!(matches!(
            SourceRegistry::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut a = source("rss", "https://a.example.com/feed");
        let mut b = source("webpage", "https://b.example.com/");
        a.id = Some("same".to_string());
        b.id = Some("same".to_string());
        let config = config_with("carol", vec![a, b]);
        assert!(matches!(
            SourceRegistry::from_config(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_kind_locator_rejected() {
        let config = config_with(
            "dave",
            vec![
                source("rss", "https://dave.example.com/feed"),
                source("rss", " https://dave.example.com/feed "),
            ],
        );
        assert!(SourceRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_same_locator_different_kind_allowed() {
        let config = config_with(
            "erin",
            vec![
                source("rss", "https://erin.example.com/"),
                source("webpage", "https://erin.example.com/"),
            ],
        );
        assert_eq!(SourceRegistry::from_config(&config).unwrap().list_sources().len(), 2);
    }

    #[test]
    fn test_non_http_locator_rejected() {
        let config = config_with("fay", vec![source("rss", "ftp://fay.example.com/feed")]);
        assert!(SourceRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut spec = SourceSpec {
            id: "x".to_string(),
            followee_id: "x".to_string(),
            kind: SourceKind::Rss,
            locator: "https://x.example.com/".to_string(),
            name: None,
            cadence: None,
        };
        assert!(spec.is_due(Some(now), now));

        spec.cadence = Some(Duration::from_secs(3600));
        assert!(spec.is_due(None, now));
        assert!(!spec.is_due(Some(now - chrono::Duration::minutes(10)), now));
        assert!(spec.is_due(Some(now - chrono::Duration::hours(2)), now));
    }

    #[test]
    fn test_manual_webpage_id_is_stable() {
        let config = config_with("gus", vec![]);
        let registry = SourceRegistry::from_config(&config).unwrap();
        let a = registry.manual_webpage("gus", "https://news.example.com/a").unwrap();
        let b = registry.manual_webpage("gus", "https://news.example.com/a").unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("gus-manual-"));
        assert!(registry.manual_webpage("nobody", "https://x.example.com").is_err());
    }
}
