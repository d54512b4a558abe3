//! Outbound HTTP fetch utilities + the persistence gateway for releases.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use wrank_core::{
    EnrichTarget, NewRelease, PastedRow, PublishedEntry, RankingsRelease, ReleaseSummary,
    StagingRow, WrestlerProfile, WrestlerSeasonRecord,
};

mod memory;
mod pg;

pub use memory::MemoryReleaseStore;
pub use pg::{connect, run_migrations, PgReleaseStore};

pub const CRATE_NAME: &str = "wrank-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_redirects: usize,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            user_agent: None,
            max_redirects: 6,
            global_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub body: String,
}

/// Upstream failures. Every variant means "the roster source is unavailable";
/// none of them are retried here.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not parse {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("fetcher is shutting down")]
    Closed,
}

/// Single shared client: bounded timeout, bounded redirects, capped in-flight requests.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    /// GET a document. Non-2xx responses are errors.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let request_id = Uuid::new_v4();
        let span = info_span!("http_fetch", %request_id, url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                debug!(status = status.as_u16(), "non-success response");
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.text().await?;
            debug!(bytes = body.len(), %final_url, "fetched");
            Ok(FetchedResponse {
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("cannot publish an empty release")]
    EmptyRelease,
    #[error("cannot publish: {0} unresolved staging row(s) remain")]
    UnresolvedRows(usize),
}

/// Result of applying one (row, external id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    RowNotFound,
    ReleasePublished,
}

/// Transactional read/write of releases, staging rows, published entries and
/// wrestler profiles. Every multi-row write is all-or-nothing.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Conflict when (source, season, week_of) already exists.
    async fn create_release(&self, new: &NewRelease) -> Result<RankingsRelease, StoreError>;

    /// Newest week first, with per-release staging counts.
    async fn list_releases(&self) -> Result<Vec<ReleaseSummary>, StoreError>;

    async fn get_release(&self, release_id: i64) -> Result<Option<RankingsRelease>, StoreError>;

    /// Ordered by (weight_class, rank).
    async fn staging_rows(&self, release_id: i64) -> Result<Vec<StagingRow>, StoreError>;

    /// Inserts the whole batch as `unresolved` rows or nothing. A rank that
    /// already exists for (release, weight_class) is a conflict.
    async fn insert_staging_rows(
        &self,
        release_id: i64,
        weight_class: i32,
        rows: &[PastedRow],
    ) -> Result<usize, StoreError>;

    async fn clear_staging(&self, release_id: i64, weight_class: i32) -> Result<u64, StoreError>;

    /// Sets the external id and marks the row resolved. Re-applying the same
    /// pair is a no-op that still reports `Attached`.
    async fn attach_external_id(
        &self,
        row_id: i64,
        external_id: i64,
    ) -> Result<AttachOutcome, StoreError>;

    /// Copies every staging row into published entries and flips the release
    /// to published in one transaction.
    async fn publish_release(&self, release_id: i64) -> Result<RankingsRelease, StoreError>;

    async fn published_entries(&self, release_id: i64) -> Result<Vec<PublishedEntry>, StoreError>;

    /// One target per distinct resolved external id.
    async fn enrich_targets(&self, release_id: i64) -> Result<Vec<EnrichTarget>, StoreError>;

    /// Upserts the profile and its season line together.
    async fn upsert_wrestler(
        &self,
        profile: &WrestlerProfile,
        season: &WrestlerSeasonRecord,
    ) -> Result<(), StoreError>;
}

const RELEASE_PUBLISHED: &str = "release is published";
const DUPLICATE_RANK: &str = "duplicate rank exists for this release/weight class";

fn release_not_found(release_id: i64) -> StoreError {
    StoreError::NotFound(format!("release {release_id} not found"))
}
