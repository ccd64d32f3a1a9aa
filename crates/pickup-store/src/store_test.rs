use super::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::TimeDelta;
use pickup_core::{FetchError, ManualClock, PickupFetcher};
use tokio::sync::Notify;

use crate::refresh::RefreshObserver;
use crate::stats::CleanupPolicy;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T08:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn fast_options() -> StoreOptions {
    StoreOptions {
        write_retry_delay: Duration::ZERO,
        fetch_timeout: Duration::from_secs(2),
        ..StoreOptions::default()
    }
}

fn store_at(dir: &Path) -> (PickupStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let store = PickupStore::with_clock(dir, fast_options(), clock.clone());
    (store, clock)
}

fn pickups(names: &[&str]) -> Vec<PickupRecord> {
    names.iter().map(|n| PickupRecord::new(*n)).collect()
}

/// Answers from a queue of canned results; an optional gate holds every
/// call until it is notified.
#[derive(Default)]
struct FakeFetcher {
    calls: AtomicU32,
    results: std::sync::Mutex<VecDeque<Result<Vec<PickupRecord>, FetchError>>>,
    gate: Option<Arc<Notify>>,
}

impl FakeFetcher {
    fn answering(results: Vec<Result<Vec<PickupRecord>, FetchError>>) -> Self {
        Self {
            results: std::sync::Mutex::new(results.into()),
            ..Self::default()
        }
    }

    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PickupFetcher for FakeFetcher {
    async fn fetch_pickups(&self, product_code: &str) -> Result<Vec<PickupRecord>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(FetchError::Upstream {
                    product_code: product_code.to_string(),
                    reason: "no canned response".to_string(),
                })
            })
    }
}

fn upstream_down(code: &str) -> FetchError {
    FetchError::Upstream {
        product_code: code.to_string(),
        reason: "503 Service Unavailable".to_string(),
    }
}

#[derive(Default)]
struct Recorder(std::sync::Mutex<Vec<String>>);

impl RefreshObserver for Recorder {
    fn pickups_refreshed(&self, file: &ProductPickupFile) {
        self.0.lock().unwrap().push(file.product_code.clone());
    }
}

async fn wait_for_refresh(store: &PickupStore, code: &str) {
    for _ in 0..300 {
        if !store.is_refreshing(code) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("background refresh for {code} never finished");
}

// --- load / save ---

#[tokio::test]
async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());

    let saved = store
        .save("PH1FEA", pickups(&["Mt Tamborine Hotel", "Canungra"]), PickupSource::UpstreamApi)
        .await
        .unwrap();
    assert_eq!(saved.fetched_at, t0());
    assert!(store.has("PH1FEA").await);

    let loaded = store.load("PH1FEA").await.unwrap();
    assert_eq!(loaded.pickups, saved.pickups);
    assert_eq!(loaded.source, PickupSource::UpstreamApi);
    assert_eq!(loaded.access_count, 2);
}

#[tokio::test]
async fn load_missing_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    assert!(store.load("NOPE").await.is_none());
    assert!(!store.has("NOPE").await);
}

#[tokio::test]
async fn load_persists_access_stats() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["Surfers"]), PickupSource::Manual).await.unwrap();

    clock.advance(TimeDelta::minutes(5));
    store.load("GC1").await.unwrap();
    store.load("GC1").await.unwrap();

    let on_disk = store.peek("GC1").await.unwrap();
    assert_eq!(on_disk.access_count, 3);
    assert_eq!(on_disk.last_accessed(), t0() + TimeDelta::minutes(5));
    assert_eq!(on_disk.fetched_at, t0());
}

#[tokio::test]
async fn peek_leaves_access_stats_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    store.save("GC1", pickups(&["Surfers"]), PickupSource::Manual).await.unwrap();

    store.peek("GC1").await.unwrap();
    let file = store.peek("GC1").await.unwrap();
    assert_eq!(file.access_count, 1);
}

#[tokio::test]
async fn empty_pickup_list_is_cached_data() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    store.save("NOPICKUP", Vec::new(), PickupSource::UpstreamApi).await.unwrap();

    let file = store.load("NOPICKUP").await.unwrap();
    assert!(file.pickups.is_empty());
    assert!(!file.has_pickups());
}

#[tokio::test]
async fn corrupt_file_is_removed_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    std::fs::write(store.path_for("BAD"), b"{ not json").unwrap();

    assert!(store.load("BAD").await.is_none());
    assert!(!store.has("BAD").await);
}

#[tokio::test]
async fn mismatched_product_code_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    store.save("AAA", pickups(&["Somewhere"]), PickupSource::Manual).await.unwrap();
    std::fs::copy(store.path_for("AAA"), store.path_for("BBB")).unwrap();

    assert!(store.load("BBB").await.is_none());
    assert!(!store.has("BBB").await);
    assert!(store.has("AAA").await);
}

#[tokio::test]
async fn unusual_product_codes_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    store.save("A/B", pickups(&["x"]), PickupSource::Manual).await.unwrap();
    store.save("A.B", pickups(&["y"]), PickupSource::Manual).await.unwrap();

    assert_eq!(store.peek("A/B").await.unwrap().pickups, pickups(&["x"]));
    assert_eq!(store.peek("A.B").await.unwrap().pickups, pickups(&["y"]));
    assert_eq!(store.list_product_codes().await.unwrap(), vec!["A.B", "A/B"]);
}

#[tokio::test]
async fn write_failure_reports_every_attempt() {
    // The store root is a regular file, so no directory can be created.
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let (store, _clock) = store_at(blocker.path());

    let err = store
        .save("PH1FEA", pickups(&["x"]), PickupSource::Manual)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Write { attempts: 3, .. }), "{err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    store.save("X1", pickups(&["x"]), PickupSource::Manual).await.unwrap();

    store.delete("X1").await.unwrap();
    store.delete("X1").await.unwrap();
    assert!(!store.has("X1").await);
}

#[tokio::test]
async fn list_ignores_temp_files_and_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(&dir.path().join("not-yet"));
    assert!(store.list_product_codes().await.unwrap().is_empty());

    store.save("B2", pickups(&["x"]), PickupSource::Manual).await.unwrap();
    store.save("A1", pickups(&["y"]), PickupSource::Manual).await.unwrap();
    std::fs::write(store.root().join("C3.json.tmp"), b"partial").unwrap();

    assert_eq!(store.list_product_codes().await.unwrap(), vec!["A1", "B2"]);
}

// --- upstream-backed reads ---

#[tokio::test]
async fn get_or_fetch_only_calls_upstream_on_miss() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    let fetcher = FakeFetcher::answering(vec![Ok(pickups(&["Mt Tamborine"]))]);

    let first = store.get_or_fetch("PH1FEA", &fetcher).await.unwrap();
    let second = store.get_or_fetch("PH1FEA", &fetcher).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(store.peek("PH1FEA").await.unwrap().source, PickupSource::UpstreamApi);
}

#[tokio::test]
async fn failed_fetch_on_miss_propagates_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    let fetcher = FakeFetcher::answering(vec![Err(upstream_down("PH1FEA"))]);

    let err = store.get_or_fetch("PH1FEA", &fetcher).await.unwrap_err();
    assert!(matches!(err, StoreError::Fetch(FetchError::Upstream { .. })));
    assert!(!err.is_fatal());
    assert!(!store.has("PH1FEA").await);
    assert_eq!(store.refresh_stats().upstream_failures, 1);
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions {
        fetch_timeout: Duration::from_millis(50),
        ..fast_options()
    };
    let store = PickupStore::new(dir.path(), options);
    // The gate is never opened.
    let fetcher = FakeFetcher::answering(vec![Ok(pickups(&["x"]))]).gated(Arc::new(Notify::new()));

    let err = store.get_or_fetch("SLOW", &fetcher).await.unwrap_err();
    assert!(
        matches!(err, StoreError::Fetch(FetchError::Timeout { timeout_ms: 50, .. })),
        "{err:?}"
    );
    assert!(!store.has("SLOW").await);
}

#[tokio::test]
async fn fresh_file_is_served_without_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(1));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Ok(pickups(&["new"]))]));
    let got = store
        .get_with_background_refresh("GC1", fetcher.clone(), None)
        .await
        .unwrap();

    assert_eq!(got, pickups(&["old"]));
    assert_eq!(fetcher.calls(), 0);
    assert!(!store.is_refreshing("GC1"));
}

#[tokio::test]
async fn stale_file_is_served_then_refreshed_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(13));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Ok(pickups(&["new"]))]));
    let recorder = Arc::new(Recorder::default());
    let got = store
        .get_with_background_refresh("GC1", fetcher.clone(), Some(recorder.clone()))
        .await
        .unwrap();
    assert_eq!(got, pickups(&["old"]));

    wait_for_refresh(&store, "GC1").await;
    assert_eq!(fetcher.calls(), 1);
    let file = store.peek("GC1").await.unwrap();
    assert_eq!(file.pickups, pickups(&["new"]));
    assert_eq!(file.fetched_at, t0() + TimeDelta::hours(13));
    assert_eq!(*recorder.0.lock().unwrap(), vec!["GC1".to_string()]);
}

#[tokio::test]
async fn concurrent_stale_reads_start_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(13));

    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(
        FakeFetcher::answering(vec![Ok(pickups(&["new"]))]).gated(gate.clone()),
    );
    let (a, b) = tokio::join!(
        store.get_with_background_refresh("GC1", fetcher.clone(), None),
        store.get_with_background_refresh("GC1", fetcher.clone(), None),
    );
    assert_eq!(a.unwrap(), pickups(&["old"]));
    assert_eq!(b.unwrap(), pickups(&["old"]));
    assert!(store.is_refreshing("GC1"));

    gate.notify_one();
    wait_for_refresh(&store, "GC1").await;

    assert_eq!(fetcher.calls(), 1);
    let stats = store.refresh_stats();
    assert_eq!(stats.refreshes_started, 1);
    assert_eq!(stats.refreshes_deduped, 1);
    assert_eq!(stats.refreshes_in_flight, 0);
}

#[tokio::test]
async fn failed_background_refresh_keeps_cached_copy() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(13));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Err(upstream_down("GC1"))]));
    store
        .get_with_background_refresh("GC1", fetcher.clone(), None)
        .await
        .unwrap();
    wait_for_refresh(&store, "GC1").await;

    let file = store.peek("GC1").await.unwrap();
    assert_eq!(file.pickups, pickups(&["old"]));
    assert_eq!(file.fetched_at, t0());
}

#[tokio::test]
async fn expired_file_is_refreshed_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(25));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Ok(pickups(&["new"]))]));
    let recorder = Arc::new(Recorder::default());
    let got = store
        .get_with_background_refresh("GC1", fetcher.clone(), Some(recorder.clone()))
        .await
        .unwrap();

    assert_eq!(got, pickups(&["new"]));
    assert!(!store.is_refreshing("GC1"));
    assert_eq!(recorder.0.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn expired_file_survives_failed_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(25));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Err(upstream_down("GC1"))]));
    let got = store
        .get_with_background_refresh("GC1", fetcher.clone(), None)
        .await
        .unwrap();

    assert_eq!(got, pickups(&["old"]));
    assert_eq!(store.peek("GC1").await.unwrap().fetched_at, t0());
}

#[tokio::test]
async fn upstream_refresh_keeps_access_stats() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("GC1", pickups(&["old"]), PickupSource::Manual).await.unwrap();
    for _ in 0..4 {
        store.load("GC1").await.unwrap();
    }
    clock.advance(TimeDelta::hours(25));

    let fetcher = Arc::new(FakeFetcher::answering(vec![Ok(pickups(&["new"]))]));
    store
        .get_with_background_refresh("GC1", fetcher.clone(), None)
        .await
        .unwrap();

    let file = store.peek("GC1").await.unwrap();
    assert_eq!(file.pickups, pickups(&["new"]));
    assert_eq!(file.source, PickupSource::UpstreamApi);
    assert_eq!(file.fetched_at, t0() + TimeDelta::hours(25));
    assert_eq!(file.access_count, 6, "save, four loads and the refreshing read");
    assert_eq!(file.last_accessed_at, Some(t0() + TimeDelta::hours(25)));

    let report = store
        .cleanup(CleanupPolicy {
            max_age: None,
            min_access_count: Some(5),
        })
        .await
        .unwrap();
    assert!(report.removed.is_empty(), "a busy product survives a refresh");
}

#[tokio::test]
async fn fetched_pickups_for_a_new_product_start_at_one_access() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    let file = store
        .save_fetched("NEW", pickups(&["a"]), PickupSource::UpstreamApi)
        .await
        .unwrap();
    assert_eq!(file.access_count, 1);
    assert_eq!(file.last_accessed_at, Some(t0()));
}

#[tokio::test]
async fn product_locks_are_released_after_use() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    for i in 0..20 {
        let code = format!("P{i}");
        store.save(&code, pickups(&["a"]), PickupSource::UpstreamApi).await.unwrap();
        store.load(&code).await.unwrap();
        assert!(store.load("NOPE").await.is_none());
    }
    for i in 0..10 {
        store.delete(&format!("P{i}")).await.unwrap();
    }
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test]
async fn contended_product_lock_outlives_the_first_holder() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let name = format!("v{i}");
                store
                    .save("SHARED", pickups(&[name.as_str()]), PickupSource::UpstreamApi)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(store.peek("SHARED").await.unwrap().pickups.len(), 1);
    assert_eq!(store.held_locks(), 0);
}

#[tokio::test]
async fn missing_file_with_failed_fetch_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());
    let fetcher = Arc::new(FakeFetcher::answering(vec![Err(upstream_down("GC1"))]));

    let result = store
        .get_with_background_refresh("GC1", fetcher.clone(), None)
        .await;
    assert!(matches!(result, Err(StoreError::Fetch(_))));
}

// --- stats / cleanup ---

#[tokio::test]
async fn stats_classify_files_without_touching_them() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("OLD", pickups(&["a"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(12));
    store.save("MID", Vec::new(), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(12));
    store.save("NEW", pickups(&["b"]), PickupSource::UpstreamApi).await.unwrap();
    clock.advance(TimeDelta::hours(1));
    std::fs::write(store.path_for("JUNK"), b"[]").unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.fresh, 1);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.corrupt, 1);
    assert_eq!(stats.without_pickups, 1);
    assert!(stats.total_bytes > 0);
    assert_eq!(stats.oldest_fetch, Some(t0()));
    assert_eq!(stats.newest_fetch, Some(t0() + TimeDelta::hours(24)));

    // Read-only: the corrupt file is still there and nothing was touched.
    assert!(store.has("JUNK").await);
    assert_eq!(store.peek("OLD").await.unwrap().access_count, 1);
}

#[tokio::test]
async fn cleanup_evicts_by_access_count_then_age() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("RARE", pickups(&["a"]), PickupSource::UpstreamApi).await.unwrap();
    store.save("HOT", pickups(&["b"]), PickupSource::UpstreamApi).await.unwrap();
    for _ in 0..3 {
        store.load("HOT").await.unwrap();
    }
    clock.advance(TimeDelta::days(2));

    let report = store
        .cleanup(CleanupPolicy {
            min_access_count: Some(2),
            ..CleanupPolicy::default()
        })
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.removed, vec!["RARE".to_string()]);
    assert!(report.bytes_freed > 0);
    assert!(store.has("HOT").await);

    let report = store
        .cleanup(CleanupPolicy {
            max_age: Some(TimeDelta::days(1)),
            ..CleanupPolicy::default()
        })
        .await
        .unwrap();
    assert_eq!(report.removed, vec!["HOT".to_string()]);
    assert!(store.list_product_codes().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_cleanup_policy_removes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (store, clock) = store_at(dir.path());
    store.save("A1", pickups(&["a"]), PickupSource::Manual).await.unwrap();
    clock.advance(TimeDelta::days(365));

    let report = store.cleanup(CleanupPolicy::default()).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert!(report.removed.is_empty());
}

#[tokio::test]
async fn manual_and_imported_sources_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _clock) = store_at(dir.path());

    store.save_manual("MAN1", pickups(&["Depot"])).await.unwrap();
    let written = store
        .import(vec![
            ("IMP1".to_string(), pickups(&["Hotel A"])),
            ("IMP2".to_string(), Vec::new()),
        ])
        .await
        .unwrap();

    assert_eq!(written, 2);
    assert_eq!(store.peek("MAN1").await.unwrap().source, PickupSource::Manual);
    assert_eq!(store.peek("IMP1").await.unwrap().source, PickupSource::Imported);
    assert!(store.peek("IMP2").await.unwrap().pickups.is_empty());
}
