use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use wrank_core::{
    EnrichTarget, NewRelease, PastedRow, PublishedEntry, RankingsRelease, ReleaseStatus,
    ReleaseSummary, RowStatus, StagingCounts, StagingRow, WrestlerProfile, WrestlerSeasonRecord,
};

use crate::{
    release_not_found, AttachOutcome, ReleaseStore, StoreError, DUPLICATE_RANK, RELEASE_PUBLISHED,
};

pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Backend(format!("running migrations: {e}")))?;
    info!("migrations applied");
    Ok(())
}

/// Postgres-backed gateway. All SQL is runtime-checked.
#[derive(Debug, Clone)]
pub struct PgReleaseStore {
    pool: PgPool,
}

impl PgReleaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RELEASE_COLUMNS: &str = "id, source, season, week_of, status, created_at, published_at";

fn release_from_row(row: &PgRow) -> Result<RankingsRelease, StoreError> {
    let status: String = row.try_get("status")?;
    let status = ReleaseStatus::parse(&status)
        .ok_or_else(|| StoreError::Backend(format!("unknown release status {status:?}")))?;
    Ok(RankingsRelease {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        season: row.try_get("season")?,
        week_of: row.try_get("week_of")?,
        status,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn staging_from_row(row: &PgRow) -> Result<StagingRow, StoreError> {
    let status: String = row.try_get("row_status")?;
    Ok(StagingRow {
        id: row.try_get("id")?,
        release_id: row.try_get("release_id")?,
        weight_class: row.try_get("weight_class")?,
        rank: row.try_get("rank")?,
        name: row.try_get("name")?,
        school: row.try_get("school")?,
        previous_rank: row.try_get("previous_rank")?,
        external_id: row.try_get("external_id")?,
        status: RowStatus::from_db(&status),
        created_at: row.try_get("created_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Locks the release row for the rest of the transaction and requires draft.
async fn lock_draft_release(
    tx: &mut Transaction<'_, Postgres>,
    release_id: i64,
    exclusive: bool,
) -> Result<(), StoreError> {
    let sql = if exclusive {
        "SELECT status FROM rankings_releases WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT status FROM rankings_releases WHERE id = $1 FOR SHARE"
    };
    let status: Option<String> = sqlx::query_scalar(sql)
        .bind(release_id)
        .fetch_optional(&mut **tx)
        .await?;
    match status.as_deref().and_then(ReleaseStatus::parse) {
        None => Err(release_not_found(release_id)),
        Some(ReleaseStatus::Published) => Err(StoreError::Conflict(RELEASE_PUBLISHED.to_string())),
        Some(ReleaseStatus::Draft) => Ok(()),
    }
}

#[async_trait]
impl ReleaseStore for PgReleaseStore {
    async fn create_release(&self, new: &NewRelease) -> Result<RankingsRelease, StoreError> {
        let sql = format!(
            "INSERT INTO rankings_releases (source, season, week_of) VALUES ($1, $2, $3) RETURNING {RELEASE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&new.source)
            .bind(&new.season)
            .bind(new.week_of)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Conflict(
                        "release already exists for this source/season/weekOf".to_string(),
                    )
                } else {
                    StoreError::Database(err)
                }
            })?;
        release_from_row(&row)
    }

    async fn list_releases(&self) -> Result<Vec<ReleaseSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.source, r.season, r.week_of, r.status, r.created_at, r.published_at,
                   COUNT(s.id) AS total,
                   COALESCE(SUM(CASE WHEN s.row_status = 'resolved' THEN 1 ELSE 0 END), 0)::BIGINT AS resolved,
                   COALESCE(SUM(CASE WHEN s.row_status = 'needs_review' THEN 1 ELSE 0 END), 0)::BIGINT AS needs_review
              FROM rankings_releases r
              LEFT JOIN rankings_release_staging_rows s ON s.release_id = r.id
             GROUP BY r.id
             ORDER BY r.week_of DESC, r.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ReleaseSummary {
                release: release_from_row(&row)?,
                counts: StagingCounts {
                    total: row.try_get("total")?,
                    resolved: row.try_get("resolved")?,
                    needs_review: row.try_get("needs_review")?,
                },
            });
        }
        Ok(out)
    }

    async fn get_release(&self, release_id: i64) -> Result<Option<RankingsRelease>, StoreError> {
        let sql = format!("SELECT {RELEASE_COLUMNS} FROM rankings_releases WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(release_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(release_from_row).transpose()
    }

    async fn staging_rows(&self, release_id: i64) -> Result<Vec<StagingRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, release_id, weight_class, rank, name, school, previous_rank,
                   external_id, row_status, created_at
              FROM rankings_release_staging_rows
             WHERE release_id = $1
             ORDER BY weight_class ASC, rank ASC
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(staging_from_row).collect()
    }

    async fn insert_staging_rows(
        &self,
        release_id: i64,
        weight_class: i32,
        rows: &[PastedRow],
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_draft_release(&mut tx, release_id, false).await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO rankings_release_staging_rows
                    (release_id, weight_class, rank, name, school, previous_rank, row_status)
                VALUES ($1, $2, $3, $4, $5, $6, 'unresolved')
                "#,
            )
            .bind(release_id)
            .bind(weight_class)
            .bind(row.rank)
            .bind(&row.name)
            .bind(&row.school)
            .bind(row.previous_rank)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::Conflict(DUPLICATE_RANK.to_string())
                } else {
                    StoreError::Database(err)
                }
            })?;
        }

        tx.commit().await?;
        Ok(rows.len())
    }

    async fn clear_staging(&self, release_id: i64, weight_class: i32) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_draft_release(&mut tx, release_id, false).await?;
        let deleted = sqlx::query(
            "DELETE FROM rankings_release_staging_rows WHERE release_id = $1 AND weight_class = $2",
        )
        .bind(release_id)
        .bind(weight_class)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok(deleted)
    }

    async fn attach_external_id(
        &self,
        row_id: i64,
        external_id: i64,
    ) -> Result<AttachOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let release_id: Option<i64> = sqlx::query_scalar(
            "SELECT release_id FROM rankings_release_staging_rows WHERE id = $1",
        )
        .bind(row_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(release_id) = release_id else {
            return Ok(AttachOutcome::RowNotFound);
        };

        match lock_draft_release(&mut tx, release_id, false).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Ok(AttachOutcome::ReleasePublished),
            Err(StoreError::NotFound(_)) => return Ok(AttachOutcome::RowNotFound),
            Err(err) => return Err(err),
        }

        let updated = sqlx::query(
            r#"
            UPDATE rankings_release_staging_rows
               SET external_id = $1,
                   row_status = 'resolved'
             WHERE id = $2
            "#,
        )
        .bind(external_id)
        .bind(row_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(if updated == 0 {
            AttachOutcome::RowNotFound
        } else {
            AttachOutcome::Attached
        })
    }

    async fn publish_release(&self, release_id: i64) -> Result<RankingsRelease, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_draft_release(&mut tx, release_id, true).await?;

        let (total, unresolved): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN external_id IS NULL OR row_status <> 'resolved' THEN 1 ELSE 0 END), 0)::BIGINT
              FROM rankings_release_staging_rows
             WHERE release_id = $1
            "#,
        )
        .bind(release_id)
        .fetch_one(&mut *tx)
        .await?;
        if total == 0 {
            return Err(StoreError::EmptyRelease);
        }
        if unresolved > 0 {
            return Err(StoreError::UnresolvedRows(unresolved as usize));
        }

        sqlx::query(
            r#"
            INSERT INTO rankings_release_entries
                (release_id, weight_class, rank, previous_rank, external_id)
            SELECT release_id, weight_class, rank, previous_rank, external_id
              FROM rankings_release_staging_rows
             WHERE release_id = $1
            "#,
        )
        .bind(release_id)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "UPDATE rankings_releases SET status = 'published', published_at = NOW() WHERE id = $1 RETURNING {RELEASE_COLUMNS}"
        );
        let row = sqlx::query(&sql).bind(release_id).fetch_one(&mut *tx).await?;
        let release = release_from_row(&row)?;

        tx.commit().await?;
        Ok(release)
    }

    async fn published_entries(&self, release_id: i64) -> Result<Vec<PublishedEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT release_id, weight_class, rank, previous_rank, external_id
              FROM rankings_release_entries
             WHERE release_id = $1
             ORDER BY weight_class ASC, rank ASC
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PublishedEntry {
                release_id: row.try_get("release_id")?,
                weight_class: row.try_get("weight_class")?,
                rank: row.try_get("rank")?,
                previous_rank: row.try_get("previous_rank")?,
                external_id: row.try_get("external_id")?,
            });
        }
        Ok(out)
    }

    async fn enrich_targets(&self, release_id: i64) -> Result<Vec<EnrichTarget>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (external_id) external_id, name, school
              FROM rankings_release_staging_rows
             WHERE release_id = $1
               AND external_id IS NOT NULL
               AND external_id > 0
               AND row_status = 'resolved'
             ORDER BY external_id, weight_class, rank
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EnrichTarget {
                external_id: row.try_get("external_id")?,
                name_hint: row.try_get("name")?,
                school_hint: row.try_get("school")?,
            });
        }
        Ok(out)
    }

    async fn upsert_wrestler(
        &self,
        profile: &WrestlerProfile,
        season: &WrestlerSeasonRecord,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO wrestler_profiles (external_id, name, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (external_id)
            DO UPDATE SET name = EXCLUDED.name,
                          updated_at = NOW()
            "#,
        )
        .bind(profile.external_id)
        .bind(&profile.name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO wrestler_seasons
                (external_id, season, class_year, team, wins, losses, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (external_id, season)
            DO UPDATE SET class_year = EXCLUDED.class_year,
                          team = EXCLUDED.team,
                          wins = EXCLUDED.wins,
                          losses = EXCLUDED.losses,
                          updated_at = NOW()
            "#,
        )
        .bind(season.external_id)
        .bind(&season.season)
        .bind(&season.class_year)
        .bind(&season.team)
        .bind(season.wins)
        .bind(season.losses)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
