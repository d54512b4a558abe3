use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use wrank_core::{
    EnrichTarget, NewRelease, PastedRow, PublishedEntry, RankingsRelease, ReleaseStatus,
    ReleaseSummary, RowStatus, StagingCounts, StagingRow, WrestlerProfile, WrestlerSeasonRecord,
};

use crate::{
    release_not_found, AttachOutcome, ReleaseStore, StoreError, DUPLICATE_RANK, RELEASE_PUBLISHED,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_release_id: i64,
    next_row_id: i64,
    releases: BTreeMap<i64, RankingsRelease>,
    rows: BTreeMap<i64, StagingRow>,
    published: Vec<PublishedEntry>,
    profiles: BTreeMap<i64, WrestlerProfile>,
    seasons: BTreeMap<(i64, String), WrestlerSeasonRecord>,
}

impl MemoryState {
    fn draft_release(&self, release_id: i64) -> Result<&RankingsRelease, StoreError> {
        let release = self
            .releases
            .get(&release_id)
            .ok_or_else(|| release_not_found(release_id))?;
        if !release.is_draft() {
            return Err(StoreError::Conflict(RELEASE_PUBLISHED.to_string()));
        }
        Ok(release)
    }

    fn rows_for(&self, release_id: i64) -> Vec<StagingRow> {
        let mut rows = self
            .rows
            .values()
            .filter(|r| r.release_id == release_id)
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by_key(|r| (r.weight_class, r.rank));
        rows
    }
}

/// Process-local gateway with the same transactional contract as Postgres:
/// each write works on a copy of the state and swaps it in only on success.
#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    state: Mutex<MemoryState>,
    fail_publish_copy: AtomicBool,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next publish fail midway through copying entries.
    pub fn fail_next_publish_copy(&self) {
        self.fail_publish_copy.store(true, Ordering::SeqCst);
    }

    pub fn profile(&self, external_id: i64) -> Option<WrestlerProfile> {
        self.lock().ok()?.profiles.get(&external_id).cloned()
    }

    pub fn season_record(&self, external_id: i64, season: &str) -> Option<WrestlerSeasonRecord> {
        self.lock()
            .ok()?
            .seasons
            .get(&(external_id, season.to_string()))
            .cloned()
    }

    pub fn profile_count(&self) -> usize {
        self.lock().map(|s| s.profiles.len()).unwrap_or_default()
    }

    /// Test seam for rows the paste path never produces (e.g. needs_review).
    pub fn set_row_status(&self, row_id: i64, status: RowStatus) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let row = state
            .rows
            .get_mut(&row_id)
            .ok_or_else(|| StoreError::NotFound(format!("staging row {row_id} not found")))?;
        row.status = status;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn create_release(&self, new: &NewRelease) -> Result<RankingsRelease, StoreError> {
        let mut state = self.lock()?;
        let exists = state.releases.values().any(|r| {
            r.source == new.source && r.season == new.season && r.week_of == new.week_of
        });
        if exists {
            return Err(StoreError::Conflict(
                "release already exists for this source/season/weekOf".to_string(),
            ));
        }
        state.next_release_id += 1;
        let release = RankingsRelease {
            id: state.next_release_id,
            source: new.source.clone(),
            season: new.season.clone(),
            week_of: new.week_of,
            status: ReleaseStatus::Draft,
            created_at: Utc::now(),
            published_at: None,
        };
        state.releases.insert(release.id, release.clone());
        Ok(release)
    }

    async fn list_releases(&self) -> Result<Vec<ReleaseSummary>, StoreError> {
        let state = self.lock()?;
        let mut out = state
            .releases
            .values()
            .map(|release| ReleaseSummary {
                release: release.clone(),
                counts: StagingCounts::tally(
                    state.rows.values().filter(|r| r.release_id == release.id),
                ),
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.release
                .week_of
                .cmp(&a.release.week_of)
                .then(b.release.id.cmp(&a.release.id))
        });
        Ok(out)
    }

    async fn get_release(&self, release_id: i64) -> Result<Option<RankingsRelease>, StoreError> {
        Ok(self.lock()?.releases.get(&release_id).cloned())
    }

    async fn staging_rows(&self, release_id: i64) -> Result<Vec<StagingRow>, StoreError> {
        Ok(self.lock()?.rows_for(release_id))
    }

    async fn insert_staging_rows(
        &self,
        release_id: i64,
        weight_class: i32,
        rows: &[PastedRow],
    ) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        state.draft_release(release_id)?;

        let mut working = state.clone();
        let mut taken = working
            .rows
            .values()
            .filter(|r| r.release_id == release_id && r.weight_class == weight_class)
            .map(|r| r.rank)
            .collect::<BTreeSet<_>>();
        let created_at = Utc::now();
        for row in rows {
            if !taken.insert(row.rank) {
                return Err(StoreError::Conflict(DUPLICATE_RANK.to_string()));
            }
            working.next_row_id += 1;
            let id = working.next_row_id;
            working.rows.insert(
                id,
                StagingRow {
                    id,
                    release_id,
                    weight_class,
                    rank: row.rank,
                    name: row.name.clone(),
                    school: row.school.clone(),
                    previous_rank: row.previous_rank,
                    external_id: None,
                    status: RowStatus::Unresolved,
                    created_at,
                },
            );
        }

        *state = working;
        Ok(rows.len())
    }

    async fn clear_staging(&self, release_id: i64, weight_class: i32) -> Result<u64, StoreError> {
        let mut state = self.lock()?;
        state.draft_release(release_id)?;
        let before = state.rows.len();
        state
            .rows
            .retain(|_, r| !(r.release_id == release_id && r.weight_class == weight_class));
        Ok((before - state.rows.len()) as u64)
    }

    async fn attach_external_id(
        &self,
        row_id: i64,
        external_id: i64,
    ) -> Result<AttachOutcome, StoreError> {
        let mut state = self.lock()?;
        let Some(release_id) = state.rows.get(&row_id).map(|r| r.release_id) else {
            return Ok(AttachOutcome::RowNotFound);
        };
        match state.draft_release(release_id) {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => return Ok(AttachOutcome::ReleasePublished),
            Err(StoreError::NotFound(_)) => return Ok(AttachOutcome::RowNotFound),
            Err(err) => return Err(err),
        }
        if let Some(row) = state.rows.get_mut(&row_id) {
            row.external_id = Some(external_id);
            row.status = RowStatus::Resolved;
        }
        Ok(AttachOutcome::Attached)
    }

    async fn publish_release(&self, release_id: i64) -> Result<RankingsRelease, StoreError> {
        let mut state = self.lock()?;
        state.draft_release(release_id)?;

        let rows = state.rows_for(release_id);
        if rows.is_empty() {
            return Err(StoreError::EmptyRelease);
        }
        let unresolved = rows.iter().filter(|r| !r.is_publishable()).count();
        if unresolved > 0 {
            return Err(StoreError::UnresolvedRows(unresolved));
        }

        let mut working = state.clone();
        for row in &rows {
            if self.fail_publish_copy.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend(
                    "injected failure while copying published entries".to_string(),
                ));
            }
            let Some(external_id) = row.external_id else {
                return Err(StoreError::UnresolvedRows(1));
            };
            working.published.push(PublishedEntry {
                release_id,
                weight_class: row.weight_class,
                rank: row.rank,
                previous_rank: row.previous_rank,
                external_id,
            });
        }

        let release = working
            .releases
            .get_mut(&release_id)
            .ok_or_else(|| release_not_found(release_id))?;
        release.status = ReleaseStatus::Published;
        release.published_at = Some(Utc::now());
        let release = release.clone();

        *state = working;
        Ok(release)
    }

    async fn published_entries(&self, release_id: i64) -> Result<Vec<PublishedEntry>, StoreError> {
        let state = self.lock()?;
        let mut entries = state
            .published
            .iter()
            .filter(|e| e.release_id == release_id)
            .cloned()
            .collect::<Vec<_>>();
        entries.sort_by_key(|e| (e.weight_class, e.rank));
        Ok(entries)
    }

    async fn enrich_targets(&self, release_id: i64) -> Result<Vec<EnrichTarget>, StoreError> {
        let state = self.lock()?;
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for row in state.rows_for(release_id) {
            let Some(external_id) = row.external_id.filter(|id| *id > 0) else {
                continue;
            };
            if row.status != RowStatus::Resolved || !seen.insert(external_id) {
                continue;
            }
            out.push(EnrichTarget {
                external_id,
                name_hint: row.name,
                school_hint: row.school,
            });
        }
        out.sort_by_key(|t| t.external_id);
        Ok(out)
    }

    async fn upsert_wrestler(
        &self,
        profile: &WrestlerProfile,
        season: &WrestlerSeasonRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.profiles.insert(profile.external_id, profile.clone());
        state
            .seasons
            .insert((season.external_id, season.season.clone()), season.clone());
        Ok(())
    }
}
