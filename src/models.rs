//! Archive records and the small state types around them

use crate::error::{Error, Result};
use crate::parse::parse_timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Render a timestamp the way the archive stores it. Fixed precision and a
/// `Z` suffix keep stored values ordered when compared as text.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

/// Forward-only enrichment lifecycle of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Raw,
    Transcribed,
    Summarized,
    Sent,
}

impl EnrichmentStatus {
    pub const ALL: [EnrichmentStatus; 4] = [
        EnrichmentStatus::Raw,
        EnrichmentStatus::Transcribed,
        EnrichmentStatus::Summarized,
        EnrichmentStatus::Sent,
    ];

    /// Only strictly forward moves are allowed; stages may be skipped
    pub fn can_advance_to(self, next: EnrichmentStatus) -> bool {
        next > self
    }

    /// Every status an item may be in before moving to `self`
    pub fn predecessors(self) -> Vec<EnrichmentStatus> {
        Self::ALL.into_iter().filter(|s| *s < self).collect()
    }
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentStatus::Raw => write!(f, "raw"),
            EnrichmentStatus::Transcribed => write!(f, "transcribed"),
            EnrichmentStatus::Summarized => write!(f, "summarized"),
            EnrichmentStatus::Sent => write!(f, "sent"),
        }
    }
}

impl FromStr for EnrichmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(EnrichmentStatus::Raw),
            "transcribed" => Ok(EnrichmentStatus::Transcribed),
            "summarized" => Ok(EnrichmentStatus::Summarized),
            "sent" => Ok(EnrichmentStatus::Sent),
            _ => Err(Error::Config(format!("Unknown enrichment status: {}", s))),
        }
    }
}

/// An archived piece of content
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_id: String,
    /// Run that first stored the item
    pub run_id: String,
    /// Run that last applied an update
    pub updated_run_id: Option<String>,
    pub fingerprint: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<String>,
    pub content: String,
    pub first_seen_at: String,
    pub updated_at: String,
    pub status: String,
    pub transcript: Option<String>,
    pub summary: Option<String>,
}

impl Item {
    pub fn get_status(&self) -> Result<EnrichmentStatus> {
        self.status.parse()
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published_at.as_deref().and_then(parse_timestamp)
    }

    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.first_seen_at)
    }
}

/// Persisted state of a configured source
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub followee_id: String,
    pub kind: String,
    pub locator: String,
    pub name: Option<String>,
    pub cadence_secs: Option<i64>,
    pub last_success_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub last_error: Option<String>,
    /// Most recent published time seen from this source
    pub cursor: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SourceRecord {
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success_at.as_deref().and_then(parse_timestamp)
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    /// `failed` when sources were due but none could be reached, `partial`
    /// when any hard-failed, `success` otherwise
    pub fn from_outcomes(outcomes: &[SourceOutcome]) -> Self {
        let hard_failed = outcomes
            .iter()
            .filter(|o| o.state == SourceState::HardFailed)
            .count();

        if outcomes.is_empty() || hard_failed == 0 {
            RunStatus::Success
        } else if hard_failed == outcomes.len() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Partial => write!(f, "partial"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Config(format!("Unknown run status: {}", s))),
        }
    }
}

/// Terminal state of one source within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Stored,
    SoftFailed,
    HardFailed,
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Stored => write!(f, "stored"),
            SourceState::SoftFailed => write!(f, "soft_failed"),
            SourceState::HardFailed => write!(f, "hard_failed"),
        }
    }
}

/// What happened to one source during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub state: SourceState,
    pub items_found: usize,
    pub items_new: usize,
    pub items_updated: usize,
    pub items_duplicate: usize,
    pub soft_failures: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            state: SourceState::Stored,
            items_found: 0,
            items_new: 0,
            items_updated: 0,
            items_duplicate: 0,
            soft_failures: 0,
            error: None,
        }
    }

    pub fn hard_failed(source_id: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            state: SourceState::HardFailed,
            error: Some(error.to_string()),
            ..Self::new(source_id)
        }
    }
}

/// One ingestion pass
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub items_found: i64,
    pub items_new: i64,
    pub outcomes_json: Option<String>,
}

impl Run {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: now_timestamp(),
            finished_at: None,
            status: RunStatus::Running.to_string(),
            items_found: 0,
            items_new: 0,
            outcomes_json: None,
        }
    }

    pub fn get_status(&self) -> Result<RunStatus> {
        self.status.parse()
    }

    pub fn is_finalized(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn outcomes(&self) -> Vec<SourceOutcome> {
        self.outcomes_json
            .as_deref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    /// Close the run over its per-source outcomes
    pub fn finalize(&mut self, outcomes: &[SourceOutcome]) -> Result<()> {
        self.finished_at = Some(now_timestamp());
        self.status = RunStatus::from_outcomes(outcomes).to_string();
        self.items_found = outcomes.iter().map(|o| o.items_found as i64).sum();
        self.items_new = outcomes.iter().map(|o| o.items_new as i64).sum();
        self.outcomes_json = Some(serde_json::to_string(outcomes)?);
        Ok(())
    }
}

impl Default for Run {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_is_forward_only() {
        use EnrichmentStatus::*;
        assert!(Raw.can_advance_to(Transcribed));
        assert!(Raw.can_advance_to(Summarized));
        assert!(Summarized.can_advance_to(Sent));
        assert!(!Summarized.can_advance_to(Summarized));
        assert!(!Sent.can_advance_to(Raw));
        assert_eq!(Summarized.predecessors(), vec![Raw, Transcribed]);
        assert!(Raw.predecessors().is_empty());
    }

    #[test]
    fn test_status_round_trips_text() {
        for status in EnrichmentStatus::ALL {
            assert_eq!(status.to_string().parse::<EnrichmentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<EnrichmentStatus>().is_err());
    }

    #[test]
    fn test_run_status_from_outcomes() {
        let ok = SourceOutcome::new("a");
        let soft = SourceOutcome {
            state: SourceState::SoftFailed,
            ..SourceOutcome::new("b")
        };
        let hard = SourceOutcome::hard_failed("c", "connection refused");

        assert_eq!(RunStatus::from_outcomes(&[]), RunStatus::Success);
        assert_eq!(
            RunStatus::from_outcomes(&[ok.clone(), soft.clone()]),
            RunStatus::Success
        );
        assert_eq!(
            RunStatus::from_outcomes(&[ok, hard.clone()]),
            RunStatus::Partial
        );
        assert_eq!(RunStatus::from_outcomes(&[soft, hard.clone()]), RunStatus::Partial);
        assert_eq!(RunStatus::from_outcomes(&[hard]), RunStatus::Failed);
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert!(format_timestamp(&a).ends_with('Z'));
    }

    #[test]
    fn test_run_finalize() {
        let mut run = Run::new();
        let outcome = SourceOutcome {
            items_found: 3,
            items_new: 2,
            ..SourceOutcome::new("minimax-blog")
        };
        run.finalize(&[outcome.clone()]).unwrap();
        assert!(run.is_finalized());
        assert_eq!(run.get_status().unwrap(), RunStatus::Success);
        assert_eq!(run.items_found, 3);
        assert_eq!(run.outcomes(), vec![outcome]);
    }
}
