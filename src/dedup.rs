//! Three-way classification of candidates against the archive

use crate::archive::ArchiveStore;
use crate::error::Result;
use crate::models::{format_timestamp, Item};
use crate::normalize::ItemCandidate;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a candidate with what the archive already holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Classification {
    /// Nothing stored for this source yet
    New,
    /// Stored item whose mutable fields should be refreshed
    Update { item_id: String },
    /// Stored item with nothing to change
    Duplicate { item_id: String },
}

impl Classification {
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Classification::New => None,
            Classification::Update { item_id } | Classification::Duplicate { item_id } => {
                Some(item_id)
            }
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::New => write!(f, "new"),
            Classification::Update { .. } => write!(f, "update"),
            Classification::Duplicate { .. } => write!(f, "duplicate"),
        }
    }
}

/// Decide how a candidate relates to stored state.
///
/// `by_fingerprint` is the row under the same source with the same
/// fingerprint; `by_link` is the only row under the same source with the
/// same canonical link. A fingerprint match only counts as an update when
/// the candidate brings a different publish time, since body text is not
/// part of identity. A link match without a fingerprint match means the
/// title was corrected upstream, unless `run_id` already wrote that row:
/// then the link is shared by several entries of one fetch and the
/// candidate is a separate item.
pub fn decide(
    candidate: &ItemCandidate,
    by_fingerprint: Option<&Item>,
    by_link: Option<&Item>,
    run_id: Option<&str>,
) -> Classification {
    if let Some(existing) = by_fingerprint {
        let published_changed = candidate
            .published_at
            .map(|p| existing.published_at.as_deref() != Some(format_timestamp(&p).as_str()))
            .unwrap_or(false);

        return if published_changed {
            Classification::Update {
                item_id: existing.id.clone(),
            }
        } else {
            Classification::Duplicate {
                item_id: existing.id.clone(),
            }
        };
    }

    match by_link {
        Some(existing) if !run_id.is_some_and(|run| written_by(existing, run)) => {
            Classification::Update {
                item_id: existing.id.clone(),
            }
        }
        _ => Classification::New,
    }
}

fn written_by(item: &Item, run_id: &str) -> bool {
    item.run_id == run_id || item.updated_run_id.as_deref() == Some(run_id)
}

/// Classify a candidate against the archive without writing anything
pub async fn classify(store: &ArchiveStore, candidate: &ItemCandidate) -> Result<Classification> {
    let by_fingerprint = store
        .find_item_by_fingerprint(&candidate.source_id, &candidate.fingerprint)
        .await?;
    let by_link = match by_fingerprint {
        Some(_) => None,
        None => {
            store
                .find_sole_item_by_link(&candidate.source_id, &candidate.link)
                .await?
        }
    };
    Ok(decide(candidate, by_fingerprint.as_ref(), by_link.as_ref(), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::compute_fingerprint;
    use chrono::{TimeZone, Utc};

    fn candidate(title: &str, body: &str) -> ItemCandidate {
        let link = "https://blog.example.com/post".to_string();
        ItemCandidate {
            source_id: "blog".to_string(),
            fingerprint: compute_fingerprint(&link, title),
            title: title.to_string(),
            link,
            published_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()),
            body: body.to_string(),
        }
    }

    fn stored(from: &ItemCandidate) -> Item {
        Item {
            id: "item-1".to_string(),
            source_id: from.source_id.clone(),
            run_id: "run-1".to_string(),
            updated_run_id: None,
            fingerprint: from.fingerprint.clone(),
            title: from.title.clone(),
            link: from.link.clone(),
            published_at: from.published_at.as_ref().map(format_timestamp),
            content: from.body.clone(),
            first_seen_at: "2024-05-01T09:00:00.000000Z".to_string(),
            updated_at: "2024-05-01T09:00:00.000000Z".to_string(),
            status: "raw".to_string(),
            transcript: None,
            summary: None,
        }
    }

    #[test]
    fn test_unknown_is_new() {
        assert_eq!(decide(&candidate("A", "x"), None, None, None), Classification::New);
    }

    #[test]
    fn test_identical_is_duplicate() {
        let c = candidate("A", "x");
        let row = stored(&c);
        assert_eq!(
            decide(&c, Some(&row), None, None),
            Classification::Duplicate {
                item_id: "item-1".to_string()
            }
        );
    }

    #[test]
    fn test_body_only_change_is_duplicate() {
        let c = candidate("A", "x");
        let row = stored(&c);
        let later = candidate("A", "x (updated 2024-05-02)");
        assert!(matches!(
            decide(&later, Some(&row), None, None),
            Classification::Duplicate { .. }
        ));
    }

    #[test]
    fn test_new_publish_time_is_update() {
        let c = candidate("A", "x");
        let row = stored(&c);
        let mut moved = c.clone();
        moved.published_at = Some(Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap());
        assert!(matches!(
            decide(&moved, Some(&row), None, None),
            Classification::Update { .. }
        ));

        // A candidate without a publish time never erases the stored one
        moved.published_at = None;
        assert!(matches!(
            decide(&moved, Some(&row), None, None),
            Classification::Duplicate { .. }
        ));
    }

    #[test]
    fn test_title_correction_is_update() {
        let original = candidate("Tpyo in title", "x");
        let row = stored(&original);
        let corrected = candidate("Typo in title", "x");
        assert_ne!(original.fingerprint, corrected.fingerprint);
        assert_eq!(
            decide(&corrected, None, Some(&row), Some("run-2")),
            Classification::Update {
                item_id: "item-1".to_string()
            }
        );
    }

    #[test]
    fn test_link_written_this_run_is_not_a_correction() {
        let first = candidate("Episode 1", "x");
        let row = stored(&first);
        let second = candidate("Episode 2", "y");

        assert_eq!(
            decide(&second, None, Some(&row), Some("run-1")),
            Classification::New
        );

        let mut touched = row.clone();
        touched.run_id = "run-0".to_string();
        touched.updated_run_id = Some("run-1".to_string());
        assert_eq!(
            decide(&second, None, Some(&touched), Some("run-1")),
            Classification::New
        );
        assert!(matches!(
            decide(&second, None, Some(&touched), Some("run-2")),
            Classification::Update { .. }
        ));
    }
}
