//! Digest command implementation

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::digest::{prepare_digest, send_digest, DigestStats, SmtpMailer};
use crate::error::Result;
use crate::registry::SourceRegistry;
use chrono::Utc;
use tracing::info;

/// Build the digest for the configured window and send it. With `dry_run`
/// the digest is printed and nothing is sent or marked.
pub async fn cmd_digest(
    config: &Config,
    store: &ArchiveStore,
    registry: &SourceRegistry,
    dry_run: bool,
) -> Result<Option<DigestStats>> {
    let Some(digest) = prepare_digest(store, registry, &config.digest, Utc::now()).await? else {
        println!("No summarized items in the last {} days.", config.digest.history_days);
        return Ok(None);
    };

    if dry_run {
        info!(items = digest.item_ids.len(), "Dry run, digest not sent");
        println!("Subject: {} {}\n", config.mail.subject_prefix, digest.subject);
        println!("{}", digest.markdown);
        return Ok(None);
    }

    let mailer = SmtpMailer::from_config(config)?;
    let stats = send_digest(store, &mailer, &digest, &config.mail.subject_prefix).await?;
    Ok(Some(stats))
}
