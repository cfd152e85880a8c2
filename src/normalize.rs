//! Turn raw fetcher entries into canonical item candidates
//!
//! Identity of an item is its fingerprint: a BLAKE3 hash over the canonical
//! link and the normalized title. Body text is carried along but never
//! hashed, since feeds tend to decorate bodies differently on every fetch.

use crate::error::{Error, Result};
use crate::fetch::RawEntry;
use crate::parse::{collapse_whitespace, normalize_whitespace};
use crate::registry::SourceSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Title used when an entry has none
pub const UNTITLED: &str = "(untitled)";

/// Suffixes that mark a relative file name rather than a top-level domain
const FILE_EXTENSIONS: &[&str] = &[
    "htm", "html", "php", "asp", "aspx", "jsp", "cgi", "xml", "rss", "atom", "json", "txt",
    "pdf", "md",
];

/// Query parameters that only carry campaign or referral tracking
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "yclid", "dclid", "msclkid", "mc_cid", "mc_eid", "spm", "ref", "ref_src",
    "igshid",
];

/// A normalized entry ready for classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCandidate {
    pub source_id: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub body: String,
    pub fingerprint: String,
}

/// Normalizer settings
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_body_chars: usize,
}

impl Normalizer {
    pub fn new(max_body_chars: usize) -> Self {
        Self { max_body_chars }
    }

    /// Canonicalize one raw entry. Fails with [`Error::Parse`] when the link
    /// cannot be made into an http(s) URL.
    pub fn normalize(&self, source: &SourceSpec, entry: &RawEntry) -> Result<ItemCandidate> {
        let link = canonicalize_link(&entry.link, Some(&source.locator))?;
        let title = normalize_title(entry.title.as_deref());
        let body = truncate_chars(&normalize_whitespace(&entry.body), self.max_body_chars);
        let fingerprint = compute_fingerprint(&link, &title);

        Ok(ItemCandidate {
            source_id: source.id.clone(),
            title,
            link,
            published_at: entry.published_at,
            body,
            fingerprint,
        })
    }
}

/// Collapse whitespace; empty titles become [`UNTITLED`]
pub fn normalize_title(raw: Option<&str>) -> String {
    let title = raw.map(collapse_whitespace).unwrap_or_default();
    if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    }
}

/// Canonical form of a link:
/// relative links resolve against `base`, a missing scheme becomes https,
/// fragments and tracking parameters are dropped, and a trailing slash on a
/// non-root path is removed.
pub fn canonicalize_link(raw: &str, base: Option<&str>) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Parse("entry has no link".to_string()));
    }

    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let resolved = base
                .and_then(|b| Url::parse(b).ok())
                .filter(|_| !looks_like_bare_host(raw))
                .map(|b| b.join(raw));
            match resolved {
                Some(joined) => joined?,
                None => Url::parse(&format!("https://{}", raw.trim_start_matches('/')))?,
            }
        }
        Err(e) => return Err(Error::Parse(format!("invalid link '{}': {}", raw, e))),
    };

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::Parse(format!("unsupported link: {}", raw)));
    }

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// `example.com/post` has no scheme but names a host, unlike `/post`,
/// `post` or `index.php?p=1`
fn looks_like_bare_host(raw: &str) -> bool {
    if raw.starts_with('/') || raw.starts_with('.') {
        return false;
    }
    let host = raw.split(['/', '?', '#']).next().unwrap_or_default();
    let Some((_, label)) = host.rsplit_once('.') else {
        return false;
    };

    let label = label.to_ascii_lowercase();
    label.len() >= 2
        && label.chars().all(|c| c.is_ascii_alphabetic())
        && !FILE_EXTENSIONS.contains(&label.as_str())
}

/// Content fingerprint over canonical link and normalized title
pub fn compute_fingerprint(link: &str, title: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(link.as_bytes());
    hasher.update(b"\n");
    hasher.update(title.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Cut text to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceKind;

    fn spec() -> SourceSpec {
        SourceSpec {
            id: "minimax-blog".to_string(),
            followee_id: "minimax".to_string(),
            kind: SourceKind::Rss,
            locator: "https://blog.example.com/feed.xml".to_string(),
            name: None,
            cadence: None,
        }
    }

    fn entry(title: Option<&str>, link: &str, body: &str) -> RawEntry {
        RawEntry {
            title: title.map(str::to_string),
            link: link.to_string(),
            published_at: None,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_canonicalize_strips_tracking_and_fragment() {
        let link = canonicalize_link(
            "https://Blog.Example.com/posts/1/?utm_source=rss&id=7&fbclid=abc#comments",
            None,
        )
        .unwrap();
        assert_eq!(link, "https://blog.example.com/posts/1?id=7");
    }

    #[test]
    fn test_canonicalize_enforces_scheme() {
        assert_eq!(
            canonicalize_link("example.com/post", None).unwrap(),
            "https://example.com/post"
        );
        assert!(canonicalize_link("mailto:someone@example.com", None).is_err());
        assert!(canonicalize_link("   ", None).is_err());
    }

    #[test]
    fn test_canonicalize_resolves_relative() {
        assert_eq!(
            canonicalize_link("/posts/2", Some("https://blog.example.com/feed.xml")).unwrap(),
            "https://blog.example.com/posts/2"
        );
        assert_eq!(
            canonicalize_link("post.html", Some("https://blog.example.com/archive/")).unwrap(),
            "https://blog.example.com/archive/post.html"
        );
        assert_eq!(
            canonicalize_link("index.php?p=1", Some("https://blog.example.com/")).unwrap(),
            "https://blog.example.com/index.php?p=1"
        );
        assert_eq!(
            canonicalize_link("feed.xml", Some("https://blog.example.com/a/b")).unwrap(),
            "https://blog.example.com/a/feed.xml"
        );
        assert_eq!(
            canonicalize_link("news.example.org/launch", Some("https://blog.example.com/"))
                .unwrap(),
            "https://news.example.org/launch"
        );
    }

    #[test]
    fn test_root_path_keeps_slash() {
        assert_eq!(
            canonicalize_link("https://example.com/", None).unwrap(),
            "https://example.com/"
        );
    }

    #[test]
    fn test_fingerprint_ignores_body_and_whitespace() {
        let normalizer = Normalizer::new(100);
        let a = normalizer
            .normalize(&spec(), &entry(Some("Hello  World"), "https://blog.example.com/a", "one"))
            .unwrap();
        let b = normalizer
            .normalize(
                &spec(),
                &entry(Some(" Hello World\n"), "https://blog.example.com/a?utm_medium=x", "two"),
            )
            .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.body, b.body);

        let c = normalizer
            .normalize(&spec(), &entry(Some("Hello World!"), "https://blog.example.com/a", "one"))
            .unwrap();
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[test]
    fn test_missing_title_and_body_cap() {
        let normalizer = Normalizer::new(5);
        let candidate = normalizer
            .normalize(&spec(), &entry(None, "https://blog.example.com/x", "héllo wörld"))
            .unwrap();
        assert_eq!(candidate.title, UNTITLED);
        assert_eq!(candidate.body, "héllo");
        assert_eq!(candidate.source_id, "minimax-blog");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
