//! Core domain model for ranking releases and roster resolution.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "wrank-core";

/// Lifecycle of a release. `Published` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Draft,
    Published,
}

impl ReleaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseStatus::Draft => "draft",
            ReleaseStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(ReleaseStatus::Draft),
            "published" => Some(ReleaseStatus::Published),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    #[default]
    Unresolved,
    NeedsReview,
    Resolved,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Unresolved => "unresolved",
            RowStatus::NeedsReview => "needs_review",
            RowStatus::Resolved => "resolved",
        }
    }

    /// Unknown persisted values read back as `Unresolved`.
    pub fn from_db(value: &str) -> Self {
        match value {
            "needs_review" => RowStatus::NeedsReview,
            "resolved" => RowStatus::Resolved,
            _ => RowStatus::Unresolved,
        }
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One versioned, dated set of rankings for a source + season + week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingsRelease {
    pub id: i64,
    pub source: String,
    pub season: String,
    pub week_of: NaiveDate,
    pub status: ReleaseStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RankingsRelease {
    pub fn is_draft(&self) -> bool {
        self.status == ReleaseStatus::Draft
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub source: String,
    pub season: String,
    pub week_of: NaiveDate,
}

/// A pasted ranking line that passed parsing, awaiting insert as a staging row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PastedRow {
    pub rank: i32,
    pub name: String,
    pub school: String,
    pub previous_rank: Option<i32>,
}

/// Ranking entry awaiting confirmation before publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingRow {
    pub id: i64,
    pub release_id: i64,
    pub weight_class: i32,
    pub rank: i32,
    pub name: String,
    pub school: String,
    pub previous_rank: Option<i32>,
    pub external_id: Option<i64>,
    pub status: RowStatus,
    pub created_at: DateTime<Utc>,
}

impl StagingRow {
    /// Resolved status backed by a bound external id.
    pub fn is_publishable(&self) -> bool {
        self.status == RowStatus::Resolved && self.external_id.is_some()
    }

    /// Still waiting on an operator decision.
    pub fn awaits_resolution(&self) -> bool {
        self.external_id.is_none()
            && matches!(self.status, RowStatus::Unresolved | RowStatus::NeedsReview)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingCounts {
    pub total: i64,
    pub resolved: i64,
    pub needs_review: i64,
}

impl StagingCounts {
    pub fn tally<'a>(rows: impl IntoIterator<Item = &'a StagingRow>) -> Self {
        let mut counts = Self::default();
        for row in rows {
            counts.total += 1;
            match row.status {
                RowStatus::Resolved => counts.resolved += 1,
                RowStatus::NeedsReview => counts.needs_review += 1,
                RowStatus::Unresolved => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSummary {
    #[serde(flatten)]
    pub release: RankingsRelease,
    #[serde(flatten)]
    pub counts: StagingCounts,
}

/// Immutable snapshot of a staging row taken at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEntry {
    pub release_id: i64,
    pub weight_class: i32,
    pub rank: i32,
    pub previous_rank: Option<i32>,
    pub external_id: i64,
}

/// One wrestler listed by the external roster source. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub external_id: i64,
    /// "First Last" order.
    pub name: String,
    /// May be empty when the source page carries no team link near the wrestler.
    pub school: String,
}

/// Scored roster entry offered to the operator for a staging row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub external_id: i64,
    pub name: String,
    pub school: String,
    pub score: f64,
}

impl Candidate {
    pub fn from_entry(entry: &RosterEntry, score: f64) -> Self {
        Self {
            external_id: entry.external_id,
            name: entry.name.clone(),
            school: entry.school.clone(),
            score,
        }
    }
}

/// Durable identity record keyed by external id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrestlerProfile {
    pub external_id: i64,
    pub name: String,
}

/// Per-season line for a wrestler, keyed by (external id, season).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrestlerSeasonRecord {
    pub external_id: i64,
    pub season: String,
    pub class_year: Option<String>,
    pub team: Option<String>,
    pub wins: Option<i32>,
    pub losses: Option<i32>,
}

/// A resolved wrestler in a release, with staging name/school kept as fetch hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichTarget {
    pub external_id: i64,
    pub name_hint: String,
    pub school_hint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(status: RowStatus, external_id: Option<i64>) -> StagingRow {
        StagingRow {
            id: 1,
            release_id: 1,
            weight_class: 125,
            rank: 1,
            name: "John Smith".into(),
            school: "Ohio State".into(),
            previous_rank: None,
            external_id,
            status,
            created_at: Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn publishable_requires_status_and_external_id() {
        assert!(row(RowStatus::Resolved, Some(42)).is_publishable());
        assert!(!row(RowStatus::Resolved, None).is_publishable());
        assert!(!row(RowStatus::Unresolved, Some(42)).is_publishable());
    }

    #[test]
    fn awaiting_rows_exclude_bound_ids() {
        assert!(row(RowStatus::Unresolved, None).awaits_resolution());
        assert!(row(RowStatus::NeedsReview, None).awaits_resolution());
        assert!(!row(RowStatus::NeedsReview, Some(7)).awaits_resolution());
        assert!(!row(RowStatus::Resolved, None).awaits_resolution());
    }

    #[test]
    fn unknown_row_status_reads_as_unresolved() {
        assert_eq!(RowStatus::from_db("resolved"), RowStatus::Resolved);
        assert_eq!(RowStatus::from_db("needs_review"), RowStatus::NeedsReview);
        assert_eq!(RowStatus::from_db("pending"), RowStatus::Unresolved);
    }

    #[test]
    fn counts_tally_by_status() {
        let rows = vec![
            row(RowStatus::Resolved, Some(1)),
            row(RowStatus::NeedsReview, None),
            row(RowStatus::Unresolved, None),
        ];
        let counts = StagingCounts::tally(&rows);
        assert_eq!(counts, StagingCounts { total: 3, resolved: 1, needs_review: 1 });
    }

    #[test]
    fn summary_serializes_flat_camel_case() {
        let summary = ReleaseSummary {
            release: RankingsRelease {
                id: 9,
                source: "flo".into(),
                season: "2025-26".into(),
                week_of: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                status: ReleaseStatus::Draft,
                created_at: Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).single().unwrap(),
                published_at: None,
            },
            counts: StagingCounts { total: 2, resolved: 1, needs_review: 0 },
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["weekOf"], "2026-01-05");
        assert_eq!(value["status"], "draft");
        assert_eq!(value["needsReview"], 0);
        assert_eq!(value["total"], 2);
    }
}
