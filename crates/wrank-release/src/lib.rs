//! Release state machine: staging import, candidate resolution, publish gating
//! and post-publish enrichment.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use wrank_adapters::{FetchedProfile, RosterSource};
use wrank_core::{
    Candidate, NewRelease, RankingsRelease, ReleaseSummary, StagingCounts, StagingRow,
    WrestlerProfile, WrestlerSeasonRecord,
};
use wrank_storage::{AttachOutcome, FetchError, ReleaseStore, StoreError};

mod cache;
mod config;
mod matcher;
mod paste;

pub use cache::{Clock, RosterCache, SystemClock, DEFAULT_ROSTER_TTL};
pub use config::{load_source_config, ReleaseConfig};
pub use matcher::{
    name_score, normalize_loose, rank_candidates, school_score, score_candidate, MAX_CANDIDATES,
};
pub use paste::{looks_like_class_year, parse_rankings_paste, PasteError, PasteOutcome};

pub const CRATE_NAME: &str = "wrank-release";

/// Caller-facing categories; the web layer maps each to one status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Fetch,
    Persistence,
}

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{0}")]
    Validation(String),
    #[error("paste parsing failed")]
    PasteRejected(Vec<String>),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("cannot publish an empty release")]
    EmptyRelease,
    #[error("cannot publish: {0} unresolved staging row(s) remain")]
    UnresolvedRows(usize),
    #[error("roster source unavailable: {0}")]
    Upstream(#[from] FetchError),
    #[error("persistence failure: {0}")]
    Persistence(StoreError),
}

impl ReleaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReleaseError::Validation(_)
            | ReleaseError::PasteRejected(_)
            | ReleaseError::EmptyRelease => ErrorKind::Validation,
            ReleaseError::Conflict(_) | ReleaseError::UnresolvedRows(_) => ErrorKind::Conflict,
            ReleaseError::NotFound(_) => ErrorKind::NotFound,
            ReleaseError::Upstream(_) => ErrorKind::Fetch,
            ReleaseError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Per-line detail for rejected pastes, empty otherwise.
    pub fn details(&self) -> &[String] {
        match self {
            ReleaseError::PasteRejected(lines) => lines.as_slice(),
            _ => &[],
        }
    }
}

impl From<StoreError> for ReleaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => ReleaseError::Conflict(message),
            StoreError::NotFound(message) => ReleaseError::NotFound(message),
            StoreError::EmptyRelease => ReleaseError::EmptyRelease,
            StoreError::UnresolvedRows(count) => ReleaseError::UnresolvedRows(count),
            other => ReleaseError::Persistence(other),
        }
    }
}

pub type ReleaseResult<T> = Result<T, ReleaseError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseDetail {
    pub release: RankingsRelease,
    pub counts: StagingCounts,
    pub staging_rows: Vec<StagingRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCandidates {
    pub row_id: i64,
    pub name: String,
    pub school: String,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkLookup {
    pub release_id: i64,
    pub weight_class: i32,
    pub rows: Vec<RowCandidates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachItem {
    pub row_id: i64,
    pub external_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachResult {
    pub row_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachReport {
    pub ok: usize,
    pub failed: usize,
    pub results: Vec<AttachResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichFailure {
    pub external_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichReport {
    pub release_id: i64,
    pub season: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<EnrichFailure>,
}

fn required(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn require_weight_class(weight_class: i32) -> ReleaseResult<()> {
    if weight_class <= 0 {
        return Err(ReleaseError::Validation(
            "weightClass must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Season line with empty text and zero counts stored as absent.
pub fn season_record(profile: &FetchedProfile, season: &str) -> WrestlerSeasonRecord {
    let non_empty = |value: &str| required(value).map(str::to_string);
    let non_zero = |value: i32| (value != 0).then_some(value);
    WrestlerSeasonRecord {
        external_id: profile.external_id,
        season: season.to_string(),
        class_year: non_empty(&profile.class_year),
        team: non_empty(&profile.team),
        wins: non_zero(profile.wins),
        losses: non_zero(profile.losses),
    }
}

pub struct ReleaseService {
    store: Arc<dyn ReleaseStore>,
    roster: RosterCache,
}

impl ReleaseService {
    pub fn new(store: Arc<dyn ReleaseStore>, source: Arc<dyn RosterSource>, roster_ttl: Duration) -> Self {
        Self::with_roster_cache(store, RosterCache::new(source, roster_ttl))
    }

    pub fn with_roster_cache(store: Arc<dyn ReleaseStore>, roster: RosterCache) -> Self {
        Self { store, roster }
    }

    async fn load_release(&self, release_id: i64) -> ReleaseResult<RankingsRelease> {
        self.store
            .get_release(release_id)
            .await?
            .ok_or_else(|| ReleaseError::NotFound(format!("release {release_id} not found")))
    }

    async fn draft_release(&self, release_id: i64, refusal: &str) -> ReleaseResult<RankingsRelease> {
        let release = self.load_release(release_id).await?;
        if !release.is_draft() {
            return Err(ReleaseError::Conflict(refusal.to_string()));
        }
        Ok(release)
    }

    pub async fn create_release(
        &self,
        source: &str,
        season: &str,
        week_of: &str,
    ) -> ReleaseResult<ReleaseDetail> {
        let (Some(source), Some(season), Some(week_of)) =
            (required(source), required(season), required(week_of))
        else {
            return Err(ReleaseError::Validation(
                "source, season, and weekOf are required".to_string(),
            ));
        };
        let week_of = NaiveDate::parse_from_str(week_of, "%Y-%m-%d")
            .map_err(|_| ReleaseError::Validation("weekOf must be YYYY-MM-DD".to_string()))?;

        let release = self
            .store
            .create_release(&NewRelease {
                source: source.to_string(),
                season: season.to_string(),
                week_of,
            })
            .await?;
        info!(release_id = release.id, source, season, %week_of, "release created");
        self.release_detail(release.id).await
    }

    pub async fn list_releases(&self) -> ReleaseResult<Vec<ReleaseSummary>> {
        Ok(self.store.list_releases().await?)
    }

    pub async fn release_detail(&self, release_id: i64) -> ReleaseResult<ReleaseDetail> {
        let release = self.load_release(release_id).await?;
        let staging_rows = self.store.staging_rows(release_id).await?;
        Ok(ReleaseDetail {
            counts: StagingCounts::tally(&staging_rows),
            release,
            staging_rows,
        })
    }

    /// Parses and inserts one weight class's paste. Any line error rejects the
    /// whole batch before anything is written.
    pub async fn import_staging(
        &self,
        release_id: i64,
        weight_class: i32,
        raw_text: &str,
    ) -> ReleaseResult<ReleaseDetail> {
        if weight_class <= 0 || raw_text.trim().is_empty() {
            return Err(ReleaseError::Validation(
                "weightClass and rawText are required".to_string(),
            ));
        }
        self.draft_release(release_id, "cannot import into a published release")
            .await?;

        let outcome = parse_rankings_paste(raw_text);
        if !outcome.is_clean() {
            warn!(release_id, weight_class, errors = outcome.errors.len(), "paste rejected");
            return Err(ReleaseError::PasteRejected(outcome.error_messages()));
        }
        if outcome.rows.is_empty() {
            return Err(ReleaseError::Validation("no rows parsed".to_string()));
        }

        let inserted = self
            .store
            .insert_staging_rows(release_id, weight_class, &outcome.rows)
            .await?;
        info!(release_id, weight_class, inserted, "staging rows imported");
        self.release_detail(release_id).await
    }

    pub async fn clear_staging(&self, release_id: i64, weight_class: i32) -> ReleaseResult<u64> {
        require_weight_class(weight_class)?;
        self.draft_release(release_id, "cannot clear staging rows for a published release")
            .await?;
        let deleted = self.store.clear_staging(release_id, weight_class).await?;
        info!(release_id, weight_class, deleted, "staging rows cleared");
        Ok(deleted)
    }

    /// Candidates for every row of `weight_class` still awaiting an external id.
    /// Read-only; the roster is only fetched when such rows exist.
    pub async fn lookup_candidates(
        &self,
        release_id: i64,
        weight_class: i32,
    ) -> ReleaseResult<BulkLookup> {
        require_weight_class(weight_class)?;
        self.draft_release(release_id, "cannot resolve candidates for a published release")
            .await?;

        let pending = self
            .store
            .staging_rows(release_id)
            .await?
            .into_iter()
            .filter(|row| row.weight_class == weight_class && row.awaits_resolution())
            .collect::<Vec<_>>();

        let mut rows = Vec::with_capacity(pending.len());
        if !pending.is_empty() {
            let roster = self.roster.get_roster(weight_class).await?;
            for row in pending {
                rows.push(RowCandidates {
                    candidates: rank_candidates(&row.name, &row.school, &roster),
                    row_id: row.id,
                    name: row.name,
                    school: row.school,
                });
            }
        }

        Ok(BulkLookup {
            release_id,
            weight_class,
            rows,
        })
    }

    /// Free-text lookup against one weight class's roster, outside any release.
    pub async fn find_candidates(
        &self,
        weight_class: i32,
        name: &str,
        school: &str,
    ) -> ReleaseResult<Vec<Candidate>> {
        require_weight_class(weight_class)?;
        let Some(name) = required(name) else {
            return Err(ReleaseError::Validation("name is required".to_string()));
        };
        let roster = self.roster.get_roster(weight_class).await?;
        Ok(rank_candidates(name, school.trim(), &roster))
    }

    /// Applies each pair on its own; one failing item never blocks the rest.
    pub async fn attach(&self, items: &[AttachItem]) -> ReleaseResult<AttachReport> {
        if items.is_empty() {
            return Err(ReleaseError::Validation("items is required".to_string()));
        }
        if items.iter().any(|i| i.row_id <= 0 || i.external_id <= 0) {
            return Err(ReleaseError::Validation(
                "each item must include a positive rowId and externalId".to_string(),
            ));
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let error = match self.store.attach_external_id(item.row_id, item.external_id).await {
                Ok(AttachOutcome::Attached) => None,
                Ok(AttachOutcome::RowNotFound) => {
                    Some(format!("no staging row {}", item.row_id))
                }
                Ok(AttachOutcome::ReleasePublished) => Some("release is published".to_string()),
                Err(err) => {
                    warn!(row_id = item.row_id, error = %err, "attach failed");
                    Some(err.to_string())
                }
            };
            results.push(AttachResult {
                row_id: item.row_id,
                ok: error.is_none(),
                error,
            });
        }

        let ok = results.iter().filter(|r| r.ok).count();
        info!(ok, failed = results.len() - ok, "attach applied");
        Ok(AttachReport {
            ok,
            failed: results.len() - ok,
            results,
        })
    }

    /// Draft -> published, only when at least one row exists and every row is
    /// resolved with an external id. The copy and status flip are one transaction.
    pub async fn publish(&self, release_id: i64) -> ReleaseResult<ReleaseDetail> {
        self.draft_release(release_id, "release is not in draft status")
            .await?;

        let rows = self.store.staging_rows(release_id).await?;
        if rows.is_empty() {
            return Err(ReleaseError::EmptyRelease);
        }
        let unresolved = rows.iter().filter(|r| !r.is_publishable()).count();
        if unresolved > 0 {
            return Err(ReleaseError::UnresolvedRows(unresolved));
        }

        let release = self.store.publish_release(release_id).await?;
        info!(release_id, entries = rows.len(), "release published");

        Ok(ReleaseDetail {
            counts: StagingCounts::tally(&rows),
            release,
            staging_rows: rows,
        })
    }

    /// Fetches and upserts a profile for every distinct resolved wrestler in a
    /// published release. Failures are collected per external id.
    pub async fn enrich(&self, release_id: i64) -> ReleaseResult<EnrichReport> {
        let release = self.load_release(release_id).await?;
        if release.is_draft() {
            return Err(ReleaseError::Conflict(
                "release must be published before enrichment".to_string(),
            ));
        }

        let targets = self.store.enrich_targets(release_id).await?;
        if targets.is_empty() {
            return Err(ReleaseError::Validation(
                "no wrestlers found to enrich for this release".to_string(),
            ));
        }

        let source = self.roster.source();
        let mut failures = Vec::new();
        let mut succeeded = 0;
        for target in &targets {
            let outcome = match source
                .fetch_profile(target.external_id, &target.name_hint, &target.school_hint)
                .await
            {
                Ok(profile) => {
                    let record = WrestlerProfile {
                        external_id: profile.external_id,
                        name: profile.name.clone(),
                    };
                    self.store
                        .upsert_wrestler(&record, &season_record(&profile, &release.season))
                        .await
                        .map_err(|err| err.to_string())
                }
                Err(err) => Err(err.to_string()),
            };

            match outcome {
                Ok(()) => succeeded += 1,
                Err(error) => {
                    warn!(release_id, external_id = target.external_id, %error, "enrichment failed");
                    failures.push(EnrichFailure {
                        external_id: target.external_id,
                        error,
                    });
                }
            }
        }

        info!(release_id, total = targets.len(), succeeded, failed = failures.len(), "enrichment finished");
        Ok(EnrichReport {
            release_id,
            season: release.season,
            total: targets.len(),
            succeeded,
            failed: failures.len(),
            failures,
        })
    }
}
