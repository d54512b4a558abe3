use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use wrank_adapters::{FetchedProfile, RosterSource};
use wrank_core::{ReleaseStatus, RosterEntry, RowStatus};
use wrank_release::{
    AttachItem, Clock, ErrorKind, ReleaseError, ReleaseService, RosterCache,
};
use wrank_storage::{FetchError, MemoryReleaseStore, ReleaseStore};

#[derive(Default)]
struct FakeSource {
    rosters: HashMap<i32, Vec<RosterEntry>>,
    profiles: HashMap<i64, FetchedProfile>,
    roster_calls: AtomicUsize,
    roster_delay: Option<Duration>,
}

impl FakeSource {
    fn with_roster(mut self, weight_class: i32, entries: &[(i64, &str, &str)]) -> Self {
        self.rosters.insert(
            weight_class,
            entries
                .iter()
                .map(|(id, name, school)| RosterEntry {
                    external_id: *id,
                    name: name.to_string(),
                    school: school.to_string(),
                })
                .collect(),
        );
        self
    }

    fn with_profile(mut self, external_id: i64, name: &str, team: &str) -> Self {
        self.profiles.insert(
            external_id,
            FetchedProfile {
                external_id,
                name: name.to_string(),
                team: team.to_string(),
                class_year: "SR".to_string(),
                wins: 20,
                losses: 0,
                profile_url: format!("fake://wrestler/{external_id}/profile"),
            },
        );
        self
    }

    fn with_roster_delay(mut self, delay: Duration) -> Self {
        self.roster_delay = Some(delay);
        self
    }

    fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RosterSource for FakeSource {
    fn source_id(&self) -> &'static str {
        "fake"
    }

    async fn fetch_roster(&self, weight_class: i32) -> Result<Vec<RosterEntry>, FetchError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.roster_delay {
            tokio::time::sleep(delay).await;
        }
        self.rosters
            .get(&weight_class)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                status: 503,
                url: format!("fake://roster/{weight_class}"),
            })
    }

    async fn fetch_profile(
        &self,
        external_id: i64,
        _name_hint: &str,
        _school_hint: &str,
    ) -> Result<FetchedProfile, FetchError> {
        self.profiles
            .get(&external_id)
            .cloned()
            .ok_or_else(|| FetchError::HttpStatus {
                status: 404,
                url: format!("fake://wrestler/{external_id}/profile"),
            })
    }
}

struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

struct Harness {
    service: ReleaseService,
    store: Arc<MemoryReleaseStore>,
    source: Arc<FakeSource>,
    clock: Arc<ManualClock>,
}

fn harness(source: FakeSource) -> Harness {
    let store = Arc::new(MemoryReleaseStore::new());
    let source = Arc::new(source);
    let clock = Arc::new(ManualClock::new());
    let dyn_store: Arc<dyn ReleaseStore> = store.clone();
    let cache = RosterCache::with_clock(source.clone(), Duration::from_secs(600), clock.clone());
    Harness {
        service: ReleaseService::with_roster_cache(dyn_store, cache),
        store,
        source,
        clock,
    }
}

fn default_source() -> FakeSource {
    FakeSource::default()
        .with_roster(
            125,
            &[
                (78062, "Robinson, Vincent", "NC State"),
                (81234, "Smith, John", "Ohio State"),
                (77001, "Smith, Jon", "Penn State"),
            ],
        )
        .with_profile(78062, "Vincent Robinson", "NC State")
        .with_profile(81234, "John Smith", "Ohio State")
}

async fn draft_with_rows(h: &Harness, paste: &str) -> i64 {
    let detail = h
        .service
        .create_release("flo", "2025-26", "2026-01-05")
        .await
        .unwrap();
    h.service
        .import_staging(detail.release.id, 125, paste)
        .await
        .unwrap();
    detail.release.id
}

async fn resolve_all(h: &Harness, release_id: i64) {
    let detail = h.service.release_detail(release_id).await.unwrap();
    let items = detail
        .staging_rows
        .iter()
        .map(|row| AttachItem {
            row_id: row.id,
            external_id: 1000 + i64::from(row.rank),
        })
        .collect::<Vec<_>>();
    let report = h.service.attach(&items).await.unwrap();
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn create_release_validates_and_rejects_duplicates() {
    let h = harness(default_source());
    let err = h.service.create_release("flo", " ", "2026-01-05").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h.service.create_release("flo", "2025-26", "01/05/2026").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let detail = h
        .service
        .create_release(" flo ", "2025-26", "2026-01-05")
        .await
        .unwrap();
    assert_eq!(detail.release.source, "flo");
    assert_eq!(detail.release.status, ReleaseStatus::Draft);
    assert_eq!(detail.counts.total, 0);

    let err = h
        .service
        .create_release("flo", "2025-26", "2026-01-05")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn publish_requires_rows_and_full_resolution() {
    let h = harness(default_source());

    // zero rows
    let detail = h
        .service
        .create_release("flo", "2025-26", "2026-03-02")
        .await
        .unwrap();
    let err = h.service.publish(detail.release.id).await.unwrap_err();
    assert!(matches!(err, ReleaseError::EmptyRelease));

    // one row, unresolved then resolved
    let one = h
        .service
        .create_release("flo", "2025-26", "2026-01-12")
        .await
        .unwrap()
        .release
        .id;
    h.service
        .import_staging(one, 125, "1\tJohn Smith\tOhio State\tNR")
        .await
        .unwrap();
    let err = h.service.publish(one).await.unwrap_err();
    assert!(matches!(err, ReleaseError::UnresolvedRows(1)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    resolve_all(&h, one).await;
    let published = h.service.publish(one).await.unwrap();
    assert_eq!(published.release.status, ReleaseStatus::Published);
    assert!(published.release.published_at.is_some());

    // N rows, one left behind
    let many = draft_with_rows(
        &h,
        "1\tJohn Smith\tOhio State\t3\n2\tVincent Robinson\tNC State\t1\n3\tJon Smith\tPenn State\tNR",
    )
    .await;
    let rows = h.service.release_detail(many).await.unwrap().staging_rows;
    let items = rows
        .iter()
        .take(2)
        .map(|r| AttachItem {
            row_id: r.id,
            external_id: 500 + r.id,
        })
        .collect::<Vec<_>>();
    h.service.attach(&items).await.unwrap();
    let err = h.service.publish(many).await.unwrap_err();
    assert!(matches!(err, ReleaseError::UnresolvedRows(1)));
    assert!(h.store.published_entries(many).await.unwrap().is_empty());

    resolve_all(&h, many).await;
    h.service.publish(many).await.unwrap();
    let entries = h.store.published_entries(many).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].rank, 1);
    assert_eq!(entries[0].previous_rank, Some(3));

    let err = h.service.publish(many).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn needs_review_rows_block_publish() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;
    let row = h.service.release_detail(release_id).await.unwrap().staging_rows[0].clone();
    h.store.set_row_status(row.id, RowStatus::NeedsReview).unwrap();

    let detail = h.service.release_detail(release_id).await.unwrap();
    assert_eq!(detail.counts.needs_review, 1);
    assert!(matches!(
        h.service.publish(release_id).await.unwrap_err(),
        ReleaseError::UnresolvedRows(1)
    ));
}

#[tokio::test]
async fn failed_publish_copy_keeps_release_draft() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3\n2\tJon Smith\tPenn State\t4").await;
    resolve_all(&h, release_id).await;

    h.store.fail_next_publish_copy();
    let err = h.service.publish(release_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);

    let detail = h.service.release_detail(release_id).await.unwrap();
    assert_eq!(detail.release.status, ReleaseStatus::Draft);
    assert!(detail.release.published_at.is_none());
    assert!(h.store.published_entries(release_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn attach_is_idempotent_and_per_item() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;
    let row_id = h.service.release_detail(release_id).await.unwrap().staging_rows[0].id;

    let items = [
        AttachItem {
            row_id,
            external_id: 81234,
        },
        AttachItem {
            row_id: 999_999,
            external_id: 1,
        },
    ];
    for _ in 0..2 {
        let report = h.service.attach(&items).await.unwrap();
        assert_eq!((report.ok, report.failed), (1, 1));
        assert!(report.results[0].ok);
        assert!(report.results[1].error.is_some());

        let rows = h.service.release_detail(release_id).await.unwrap().staging_rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RowStatus::Resolved);
        assert_eq!(rows[0].external_id, Some(81234));
    }

    let err = h.service.attach(&[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h
        .service
        .attach(&[AttachItem {
            row_id,
            external_id: 0,
        }])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn attach_after_publish_fails_that_item_only() {
    let h = harness(default_source());
    let published = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;
    resolve_all(&h, published).await;
    h.service.publish(published).await.unwrap();
    let published_row = h.service.release_detail(published).await.unwrap().staging_rows[0].id;

    let draft = h
        .service
        .create_release("flo", "2025-26", "2026-02-02")
        .await
        .unwrap()
        .release
        .id;
    h.service
        .import_staging(draft, 125, "1\tJon Smith\tPenn State\tNR")
        .await
        .unwrap();
    let draft_row = h.service.release_detail(draft).await.unwrap().staging_rows[0].id;

    let report = h
        .service
        .attach(&[
            AttachItem {
                row_id: published_row,
                external_id: 5,
            },
            AttachItem {
                row_id: draft_row,
                external_id: 77001,
            },
        ])
        .await
        .unwrap();
    assert_eq!((report.ok, report.failed), (1, 1));
    assert_eq!(report.results[0].error.as_deref(), Some("release is published"));
    assert!(report.results[1].ok);
}

#[tokio::test]
async fn import_rejects_bad_pastes_without_writing() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;

    let err = h
        .service
        .import_staging(release_id, 133, "1\tA B\tIowa\t2\n1\tC D\tIowa\t3\n2\tE F\tIowa\tx")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.details().len(), 2);
    assert_eq!(h.service.release_detail(release_id).await.unwrap().counts.total, 1);

    let err = h
        .service
        .import_staging(release_id, 125, "2\tA B\tIowa\t2\n1\tC D\tIowa\t3")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.service.release_detail(release_id).await.unwrap().counts.total, 1);

    let err = h.service.import_staging(release_id, 0, "1\tA B\tIowa\t2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h.service.import_staging(release_id, 125, "   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h.service.import_staging(404, 125, "1\tA B\tIowa\t2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn clear_staging_only_while_draft() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3\n2\tJon Smith\tPenn State\t4").await;
    h.service
        .import_staging(release_id, 133, "1\tA B\tIowa\t2")
        .await
        .unwrap();

    assert_eq!(h.service.clear_staging(release_id, 125).await.unwrap(), 2);
    let detail = h.service.release_detail(release_id).await.unwrap();
    assert_eq!(detail.counts.total, 1);
    assert_eq!(detail.staging_rows[0].weight_class, 133);

    resolve_all(&h, release_id).await;
    h.service.publish(release_id).await.unwrap();
    let err = h.service.clear_staging(release_id, 133).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn bulk_lookup_scores_pending_rows_only() {
    let h = harness(default_source());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3\n2\tVince Robinson\tNC State\t1").await;

    let lookup = h.service.lookup_candidates(release_id, 125).await.unwrap();
    assert_eq!(lookup.rows.len(), 2);
    let john = &lookup.rows[0];
    assert_eq!(john.name, "John Smith");
    assert_eq!(john.candidates[0].external_id, 81234);
    assert!((john.candidates[0].score - 1.0).abs() < 1e-9);
    assert_eq!(john.candidates[1].external_id, 77001);
    assert_eq!(lookup.rows[1].candidates[0].external_id, 78062);

    h.service
        .attach(&[AttachItem {
            row_id: john.row_id,
            external_id: 81234,
        }])
        .await
        .unwrap();
    let lookup = h.service.lookup_candidates(release_id, 125).await.unwrap();
    assert_eq!(lookup.rows.len(), 1);
    assert_eq!(h.source.roster_calls(), 1);

    let staging = h.service.release_detail(release_id).await.unwrap();
    assert_eq!(staging.counts.resolved, 1);
}

#[tokio::test]
async fn lookup_without_pending_rows_skips_the_fetch() {
    let h = harness(FakeSource::default());
    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;

    let lookup = h.service.lookup_candidates(release_id, 133).await.unwrap();
    assert!(lookup.rows.is_empty());
    assert_eq!(h.source.roster_calls(), 0);

    let err = h.service.lookup_candidates(release_id, 125).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
}

#[tokio::test]
async fn roster_cache_honours_ttl() {
    let h = harness(default_source());

    h.service.find_candidates(125, "John Smith", "").await.unwrap();
    h.clock.advance(Duration::from_secs(599));
    h.service.find_candidates(125, "John Smith", "").await.unwrap();
    assert_eq!(h.source.roster_calls(), 1);

    h.clock.advance(Duration::from_secs(1));
    h.service.find_candidates(125, "John Smith", "").await.unwrap();
    assert_eq!(h.source.roster_calls(), 2);

    // weight classes are cached independently; failures are not cached
    assert!(h.service.find_candidates(133, "John Smith", "").await.is_err());
    assert!(h.service.find_candidates(133, "John Smith", "").await.is_err());
    assert_eq!(h.source.roster_calls(), 4);
}

#[tokio::test]
async fn concurrent_lookups_for_one_weight_class_fetch_once() {
    let source = Arc::new(default_source().with_roster_delay(Duration::from_millis(50)));
    let cache = RosterCache::new(source.clone(), Duration::from_secs(600));

    let (first, second) = tokio::join!(cache.get_roster(125), cache.get_roster(125));
    assert_eq!(first.unwrap().len(), 3);
    assert_eq!(second.unwrap().len(), 3);
    assert_eq!(source.roster_calls(), 1);
}

#[tokio::test]
async fn empty_roster_is_an_upstream_failure() {
    let h = harness(FakeSource::default().with_roster(125, &[]));

    let err = h.service.find_candidates(125, "John Smith", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(matches!(err, ReleaseError::Upstream(FetchError::Parse { .. })));

    let release_id = draft_with_rows(&h, "1\tJohn Smith\tOhio State\t3").await;
    let err = h.service.lookup_candidates(release_id, 125).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert_eq!(h.source.roster_calls(), 2);
}

#[tokio::test]
async fn find_candidates_validates_input() {
    let h = harness(default_source());
    let err = h.service.find_candidates(0, "John Smith", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = h.service.find_candidates(125, "  ", "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let found = h
        .service
        .find_candidates(125, "smith", "ohio state")
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn enrich_collects_failures_per_wrestler() {
    let h = harness(default_source());
    let release_id = draft_with_rows(
        &h,
        "1\tJohn Smith\tOhio State\t3\n2\tVincent Robinson\tNC State\t1\n3\tNobody Known\tIowa\tNR",
    )
    .await;

    let err = h.service.enrich(release_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let rows = h.service.release_detail(release_id).await.unwrap().staging_rows;
    let ids = [81234, 78062, 42];
    let items = rows
        .iter()
        .zip(ids)
        .map(|(row, external_id)| AttachItem {
            row_id: row.id,
            external_id,
        })
        .collect::<Vec<_>>();
    h.service.attach(&items).await.unwrap();
    h.service.publish(release_id).await.unwrap();

    let report = h.service.enrich(release_id).await.unwrap();
    assert_eq!(report.season, "2025-26");
    assert_eq!((report.total, report.succeeded, report.failed), (3, 2, 1));
    assert_eq!(report.failures[0].external_id, 42);

    let profile = h.store.profile(78062).unwrap();
    assert_eq!(profile.name, "Vincent Robinson");
    let season = h.store.season_record(78062, "2025-26").unwrap();
    assert_eq!(season.team.as_deref(), Some("NC State"));
    assert_eq!(season.wins, Some(20));
    assert_eq!(season.losses, None);

    // re-running upserts in place
    h.service.enrich(release_id).await.unwrap();
    assert_eq!(h.store.profile_count(), 2);
}
