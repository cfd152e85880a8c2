//! End-to-end pipeline tests through the public library API:
//! config text -> registry -> run -> summarize -> digest

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use horizons::archive::ArchiveStore;
use horizons::config::Config;
use horizons::coordinator::{RunCoordinator, RunOptions};
use horizons::digest::{prepare_digest, send_digest, DigestSender};
use horizons::enrich::{summarize_pending, Summarizer};
use horizons::models::{EnrichmentStatus, Item, RunStatus, SourceState};
use horizons::registry::SourceRegistry;
use horizons::Result;

struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, item: &Item) -> Result<String> {
        Ok(format!("Key points from {}", item.title))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

#[derive(Default)]
struct Outbox {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl DigestSender for Outbox {
    async fn send(&self, subject: &str, plain: &str, _html: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("{}\n{}", subject, plain));
        Ok(())
    }
}

fn feed(base: &str) -> String {
    let now = Utc::now().to_rfc2822();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>MiniMax News</title>
<item><title>Open weights release</title><link>{base}/news/weights?utm_source=rss</link>
<pubDate>{now}</pubDate><description>&lt;p&gt;We are releasing weights.&lt;/p&gt;</description></item>
<item><title>Agent platform</title><link>{base}/news/agents</link>
<pubDate>{now}</pubDate><description>Agents for everyone.</description></item>
<item><title>No link here</title><description>Broken entry</description></item>
</channel></rss>"#
    )
}

async fn setup(server: &MockServer) -> (Config, ArchiveStore, SourceRegistry, TempDir) {
    let tmp = TempDir::new().unwrap();
    let text = format!(
        r#"
[fetch]
timeout_secs = 2
rate_limit_per_host = 1000.0

[followees.minimax]
display_name = "MiniMax"
sources = [
    {{ id = "minimax-blog", kind = "rss", locator = "{uri}/feed" }},
    {{ kind = "article", locator = "{uri}/about" }},
]
"#,
        uri = server.uri()
    );

    let mut config = Config::from_toml_str(&text).unwrap();
    config.paths.db_file = tmp.path().join("archive.db");

    let registry = SourceRegistry::from_config(&config).unwrap();
    let store = ArchiveStore::open(&config.paths.db_file).await.unwrap();
    (config, store, registry, tmp)
}

#[tokio::test]
async fn pipeline_archives_summarizes_and_sends() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(feed(&server.uri()), "application/rss+xml"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><head><meta property=\"og:title\" content=\"About MiniMax\"></head>\
             <body><main><p>We build foundation models.</p></main></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let (config, store, registry, _tmp) = setup(&server).await;
    assert!(registry.get_source("minimax-webpage-2").is_some());

    let coordinator = RunCoordinator::new(&config, store.clone(), registry.clone()).unwrap();
    let report = coordinator.run_once(&RunOptions::default()).await.unwrap();

    assert_eq!(report.status().unwrap(), RunStatus::Success);
    let blog = &report.outcomes[0];
    assert_eq!(blog.source_id, "minimax-blog");
    assert_eq!(blog.state, SourceState::SoftFailed);
    assert_eq!(blog.items_new, 2);
    assert_eq!(blog.soft_failures, 1);
    assert_eq!(report.outcomes[1].items_new, 1);

    let stored = store.list_items_for_run(&report.run.id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|i| i.run_id == report.run.id));
    assert!(stored
        .iter()
        .any(|i| i.link == format!("{}/news/weights", server.uri())));

    let stats = summarize_pending(&store, &EchoSummarizer, None, false)
        .await
        .unwrap();
    assert_eq!(stats.summarized, 3);

    let digest = prepare_digest(&store, &registry, &config.digest, Utc::now())
        .await
        .unwrap()
        .expect("summarized items within the window");
    let outbox = Outbox::default();
    let sent = send_digest(&store, &outbox, &digest, &config.mail.subject_prefix)
        .await
        .unwrap();
    assert_eq!(sent.marked_sent, 3);

    let message = outbox.messages.lock().unwrap()[0].clone();
    assert!(message.starts_with("[Horizons]"));
    assert!(message.contains("Open weights release"));

    let pending = store
        .get_unprocessed_items(EnrichmentStatus::Sent, None)
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn second_run_against_unchanged_upstream_adds_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(feed(&server.uri()), "application/rss+xml"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (config, store, registry, _tmp) = setup(&server).await;
    let coordinator = RunCoordinator::new(&config, store.clone(), registry).unwrap();

    let first = coordinator.run_once(&RunOptions::default()).await.unwrap();
    assert_eq!(first.status().unwrap(), RunStatus::Partial);

    let before = store.get_global_stats().await.unwrap().item_count;
    let second = coordinator.run_once(&RunOptions::default()).await.unwrap();
    let after = store.get_global_stats().await.unwrap().item_count;

    assert_eq!(before, after);
    assert!(second.outcomes.iter().all(|o| o.items_new == 0));

    let runs = store.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.is_finalized()));
}
