//! Digest delivery
//!
//! Collects recently published, summarized items, renders them grouped by
//! followee, and hands the result to a [`DigestSender`]. Items move to
//! `sent` only after the sender confirms delivery.

mod mailer;

pub use mailer::*;

use crate::archive::ArchiveStore;
use crate::config::DigestConfig;
use crate::error::Result;
use crate::models::{EnrichmentStatus, Item};
use crate::registry::SourceRegistry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// Delivers a rendered digest
#[async_trait]
pub trait DigestSender: Send + Sync {
    async fn send(&self, subject: &str, plain: &str, html: &str) -> Result<()>;
}

/// A rendered digest ready to send
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub subject: String,
    pub markdown: String,
    pub html: String,
    pub item_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Delivery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestStats {
    pub items: usize,
    pub sent: bool,
    pub marked_sent: usize,
    pub errors: Vec<String>,
}

/// Load the items for a digest window and render them. Returns `None` when
/// nothing qualifies.
pub async fn prepare_digest(
    store: &ArchiveStore,
    registry: &SourceRegistry,
    config: &DigestConfig,
    now: DateTime<Utc>,
) -> Result<Option<Digest>> {
    let since = now - Duration::days(i64::from(config.history_days));
    let items = store
        .list_items_since(EnrichmentStatus::Summarized, since, config.max_items)
        .await?;

    if items.is_empty() {
        info!(history_days = config.history_days, "No summarized items for a digest");
        return Ok(None);
    }

    let followee_of: HashMap<String, String> = store
        .list_source_records()
        .await?
        .into_iter()
        .map(|record| (record.id, record.followee_id))
        .collect();

    Ok(Some(build_digest(&items, &followee_of, registry, now)))
}

/// Render items as Markdown grouped by followee, newest first within a group
pub fn build_digest(
    items: &[Item],
    followee_of: &HashMap<String, String>,
    registry: &SourceRegistry,
    now: DateTime<Utc>,
) -> Digest {
    let mut groups: BTreeMap<String, Vec<&Item>> = BTreeMap::new();
    for item in items {
        let slug = followee_of
            .get(&item.source_id)
            .cloned()
            .unwrap_or_else(|| item.source_id.clone());
        groups.entry(slug).or_default().push(item);
    }

    let date = now.format("%Y-%m-%d");
    let mut markdown = format!("# Horizons digest {}\n\n", date);
    markdown.push_str(&format!(
        "{} new {} from {} {}.\n",
        items.len(),
        if items.len() == 1 { "item" } else { "items" },
        groups.len(),
        if groups.len() == 1 { "followee" } else { "followees" },
    ));

    let mut item_ids = Vec::with_capacity(items.len());
    for (slug, mut group) in groups {
        group.sort_by(|a, b| sort_key(b).cmp(sort_key(a)));

        let name = registry
            .followee(&slug)
            .map(|f| f.display_name.as_str())
            .unwrap_or(&slug);
        markdown.push_str(&format!("\n## {}\n", name));

        for item in group {
            markdown.push_str(&format!("\n### [{}]({})\n\n", item.title, item.link));
            let when = item
                .published()
                .or_else(|| item.first_seen())
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "undated".to_string());
            markdown.push_str(&format!("*{} · {}*\n\n", when, item.source_id));

            if let Some(summary) = &item.summary {
                markdown.push_str(&demote_headings(summary));
                markdown.push('\n');
            }
            item_ids.push(item.id.clone());
        }
    }

    Digest {
        subject: format!("Horizons digest {}", date),
        html: markdown_to_html(&markdown),
        markdown,
        item_ids,
        generated_at: now,
    }
}

fn sort_key(item: &Item) -> &str {
    item.published_at.as_deref().unwrap_or(&item.first_seen_at)
}

/// Push summary headings below the digest's own item headings
fn demote_headings(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.starts_with('#') {
                format!("###{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut output = String::new();
    html::push_html(&mut output, parser);
    output
}

/// Send a digest once, then mark its items sent. Nothing is marked when the
/// send fails.
pub async fn send_digest(
    store: &ArchiveStore,
    sender: &dyn DigestSender,
    digest: &Digest,
    subject_prefix: &str,
) -> Result<DigestStats> {
    let subject = if subject_prefix.is_empty() {
        digest.subject.clone()
    } else {
        format!("{} {}", subject_prefix, digest.subject)
    };

    sender.send(&subject, &digest.markdown, &digest.html).await?;
    info!(items = digest.item_ids.len(), %subject, "Digest sent");

    let mut stats = DigestStats {
        items: digest.item_ids.len(),
        sent: true,
        ..Default::default()
    };

    for id in &digest.item_ids {
        match store.mark_sent(id).await {
            Ok(_) => stats.marked_sent += 1,
            Err(e) => {
                warn!(item_id = %id, "Failed to mark item sent: {}", e);
                stats.errors.push(format!("{}: {}", id, e));
            }
        }
    }

    Ok(stats)
}

/// Print digest delivery stats to console
pub fn print_digest_stats(stats: &DigestStats) {
    println!("\n📬 Digest Delivered\n");
    println!("Items included: {}", stats.items);
    println!("Marked sent:    {}", stats.marked_sent);

    if !stats.errors.is_empty() {
        println!("\n⚠️  Errors ({}):", stats.errors.len());
        for error in &stats.errors {
            println!("  - {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FolloweeConfig, SourceConfig};
    use crate::dedup::Classification;
    use crate::error::Error;
    use crate::normalize::{compute_fingerprint, ItemCandidate};
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSender {
        fail: bool,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DigestSender for RecordingSender {
        async fn send(&self, subject: &str, plain: &str, _html: &str) -> Result<()> {
            if self.fail {
                return Err(Error::Mail("connection reset".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), plain.to_string()));
            Ok(())
        }
    }

    fn registry() -> SourceRegistry {
        let mut config = Config::default();
        config.followees.insert(
            "minimax".to_string(),
            FolloweeConfig {
                display_name: "MiniMax".to_string(),
                sources: vec![SourceConfig {
                    id: Some("minimax-blog".to_string()),
                    kind: "rss".to_string(),
                    locator: "https://www.minimax.io/feed".to_string(),
                    name: None,
                    cadence_secs: None,
                }],
            },
        );
        SourceRegistry::from_config(&config).unwrap()
    }

    async fn seeded_store(
        now: DateTime<Utc>,
        posts: &[(&str, i64)],
    ) -> (ArchiveStore, SourceRegistry, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = ArchiveStore::open(&tmp.path().join("archive.db")).await.unwrap();
        let registry = registry();
        store.sync_sources(&registry).await.unwrap();

        let run = store.start_run().await.unwrap();
        for (title, days_ago) in posts {
            let link = format!("https://www.minimax.io/news/{}", title.replace(' ', "-"));
            let candidate = ItemCandidate {
                source_id: "minimax-blog".to_string(),
                fingerprint: compute_fingerprint(&link, title),
                title: title.to_string(),
                link,
                published_at: Some(now - Duration::days(*days_ago)),
                body: "text".to_string(),
            };
            let item = store
                .upsert_item(&candidate, &Classification::New, &run.id)
                .await
                .unwrap();
            store
                .attach_summary(&item.id, &format!("# {}\nKey points.", title))
                .await
                .unwrap();
        }
        (store, registry, tmp)
    }

    #[tokio::test]
    async fn test_digest_window_and_grouping() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 9, 0, 0).unwrap();
        let (store, registry, _tmp) =
            seeded_store(now, &[("fresh news", 1), ("older news", 3), ("stale news", 30)]).await;

        let digest = prepare_digest(&store, &registry, &DigestConfig::default(), now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(digest.item_ids.len(), 2);
        assert!(digest.markdown.contains("## MiniMax"));
        assert!(digest.markdown.contains("fresh news"));
        assert!(!digest.markdown.contains("stale news"));
        assert!(digest.markdown.contains("#### fresh news"));
        assert!(
            digest.markdown.find("fresh news").unwrap()
                < digest.markdown.find("older news").unwrap()
        );
        assert!(digest.html.contains("<h2>MiniMax</h2>"));
        assert_eq!(digest.subject, "Horizons digest 2024-05-08");
    }

    #[tokio::test]
    async fn test_send_marks_items_sent() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 9, 0, 0).unwrap();
        let (store, registry, _tmp) = seeded_store(now, &[("fresh news", 1)]).await;
        let digest = prepare_digest(&store, &registry, &DigestConfig::default(), now)
            .await
            .unwrap()
            .unwrap();

        let sender = RecordingSender::default();
        let stats = send_digest(&store, &sender, &digest, "[Horizons]")
            .await
            .unwrap();
        assert!(stats.sent);
        assert_eq!(stats.marked_sent, 1);
        assert_eq!(
            sender.sent.lock().unwrap()[0].0,
            "[Horizons] Horizons digest 2024-05-08"
        );

        let item = store.get_item(&digest.item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.get_status().unwrap(), EnrichmentStatus::Sent);

        // Sent items do not show up again
        assert!(prepare_digest(&store, &registry, &DigestConfig::default(), now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_send_leaves_items_summarized() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 9, 0, 0).unwrap();
        let (store, registry, _tmp) = seeded_store(now, &[("fresh news", 1)]).await;
        let digest = prepare_digest(&store, &registry, &DigestConfig::default(), now)
            .await
            .unwrap()
            .unwrap();

        let sender = RecordingSender {
            fail: true,
            ..Default::default()
        };
        assert!(send_digest(&store, &sender, &digest, "").await.is_err());

        let item = store.get_item(&digest.item_ids[0]).await.unwrap().unwrap();
        assert_eq!(item.get_status().unwrap(), EnrichmentStatus::Summarized);
    }

    #[test]
    fn test_demote_headings() {
        assert_eq!(demote_headings("# Title\ntext\n## Sub"), "#### Title\ntext\n##### Sub");
    }
}
