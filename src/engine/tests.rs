use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::model::*;
use crate::registry::Registry;

use super::*;

fn doc(id: &str, category: &str, capacity: u32, used: u32) -> Resource {
    let mut r = Resource::new(id, category, capacity);
    r.used = used;
    r
}

/// Plain in-memory store. The mutex makes the conditional increment atomic.
struct FakeStore {
    resources: Mutex<Vec<Resource>>,
    reads: AtomicUsize,
    increments: AtomicUsize,
}

impl FakeStore {
    fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources: Mutex::new(resources),
            reads: AtomicUsize::new(0),
            increments: AtomicUsize::new(0),
        }
    }

    fn used(&self, id: &str) -> u32 {
        self.resources.lock().unwrap().iter().find(|r| r.id == id).unwrap().used
    }

    fn fill(&self, id: &str) {
        let mut all = self.resources.lock().unwrap();
        let r = all.iter_mut().find(|r| r.id == id).unwrap();
        r.used = r.capacity;
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn find_by_category(&self, category: &str) -> Result<Vec<Resource>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let all = self.resources.lock().unwrap();
        Ok(all.iter().filter(|r| r.matches_category(category)).cloned().collect())
    }

    async fn conditional_increment(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        self.increments.fetch_add(1, Ordering::SeqCst);
        let mut all = self.resources.lock().unwrap();
        match all.iter_mut().find(|r| r.id == id) {
            Some(r) if r.is_available() => {
                r.used += 1;
                Ok(Some(r.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources.lock().unwrap().clone())
    }
}

/// Returns a candidate snapshot, then lets a competing writer fill `victim`
/// before the engine gets to its conditional increment.
struct RacingStore {
    inner: FakeStore,
    victim: String,
}

#[async_trait]
impl ResourceStore for RacingStore {
    async fn find_by_category(&self, category: &str) -> Result<Vec<Resource>, StoreError> {
        let snapshot = self.inner.find_by_category(category).await?;
        self.inner.fill(&self.victim);
        Ok(snapshot)
    }

    async fn conditional_increment(&self, id: &str) -> Result<Option<Resource>, StoreError> {
        self.inner.conditional_increment(id).await
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        self.inner.read_all().await
    }
}

struct DownStore;

#[async_trait]
impl ResourceStore for DownStore {
    async fn find_by_category(&self, _category: &str) -> Result<Vec<Resource>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn conditional_increment(&self, _id: &str) -> Result<Option<Resource>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Never answers.
struct StalledStore;

#[async_trait]
impl ResourceStore for StalledStore {
    async fn find_by_category(&self, _category: &str) -> Result<Vec<Resource>, StoreError> {
        std::future::pending().await
    }

    async fn conditional_increment(&self, _id: &str) -> Result<Option<Resource>, StoreError> {
        std::future::pending().await
    }

    async fn read_all(&self) -> Result<Vec<Resource>, StoreError> {
        std::future::pending().await
    }
}

// ── Selection policy ─────────────────────────────────────

#[test]
fn select_prefers_lowest_used() {
    let candidates = vec![
        doc("A", "X", 10, 4),
        doc("B", "X", 10, 1),
        doc("C", "X", 10, 2),
    ];
    assert_eq!(select_least_loaded(&candidates).unwrap().id, "B");
}

#[test]
fn select_ties_go_to_smaller_id() {
    let candidates = vec![doc("B", "X", 5, 2), doc("A", "X", 10, 2)];
    assert_eq!(select_least_loaded(&candidates).unwrap().id, "A");
}

#[test]
fn select_tie_break_is_lexical_not_numeric() {
    let candidates = vec![doc("D9", "X", 5, 0), doc("D10", "X", 5, 0)];
    assert_eq!(select_least_loaded(&candidates).unwrap().id, "D10");
}

#[test]
fn select_uses_absolute_load_not_ratio() {
    // 1/1 is full, 3/100 beats 4/5 on absolute count.
    let candidates = vec![
        doc("A", "X", 1, 1),
        doc("B", "X", 5, 4),
        doc("C", "X", 100, 3),
    ];
    assert_eq!(select_least_loaded(&candidates).unwrap().id, "C");
}

#[test]
fn select_skips_full_resources() {
    let candidates = vec![doc("A", "X", 2, 2), doc("B", "X", 3, 2)];
    assert_eq!(select_least_loaded(&candidates).unwrap().id, "B");
}

#[test]
fn select_none_when_all_full() {
    let candidates = vec![doc("A", "X", 2, 2), doc("B", "X", 1, 1)];
    assert!(select_least_loaded(&candidates).is_none());
    assert!(select_least_loaded(&[]).is_none());
}

#[test]
fn select_is_deterministic_across_orderings() {
    let mut candidates = vec![
        doc("C", "X", 10, 1),
        doc("A", "X", 10, 1),
        doc("B", "X", 10, 1),
        doc("D", "X", 10, 3),
    ];
    for _ in 0..4 {
        assert_eq!(select_least_loaded(&candidates).unwrap().id, "A");
        candidates.rotate_left(1);
    }
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn book_blank_category_never_touches_store() {
    let engine = AllocationEngine::new(FakeStore::new(vec![doc("A", "X", 1, 0)]));
    for input in ["", "   ", "\t\n"] {
        let err = engine.book(input).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::InvalidInput);
    }
    assert_eq!(engine.store().reads.load(Ordering::SeqCst), 0);
    assert_eq!(engine.store().increments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn book_unknown_category() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "Cardiology", 5, 0),
        doc("B", "Cardiology", 5, 0),
    ]));
    let err = engine.book("Neurology").await.unwrap_err();
    assert_eq!(err, EngineError::CategoryNotFound("Neurology".into()));
    assert_eq!(engine.store().increments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn book_does_not_substring_match() {
    let engine = AllocationEngine::new(FakeStore::new(vec![doc("A", "Cardiology", 5, 0)]));
    let err = engine.book("Cardio").await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::CategoryNotFound);
}

#[tokio::test]
async fn book_exhausted_reports_total() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "X", 2, 2),
        doc("B", "X", 1, 1),
        doc("C", "Y", 1, 0),
    ]));
    let err = engine.book("X").await.unwrap_err();
    assert_eq!(
        err,
        EngineError::CapacityExhausted { category: "X".into(), total: 2 }
    );
    assert_eq!(engine.store().increments.load(Ordering::SeqCst), 0);
    assert_eq!(engine.store().used("A"), 2);
    assert_eq!(engine.store().used("B"), 1);
}

#[tokio::test]
async fn book_picks_least_loaded_and_increments_once() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "X", 10, 3),
        doc("B", "X", 10, 1),
        doc("C", "X", 10, 2),
    ]));
    let booking = engine.book("X").await.unwrap();
    assert_eq!(
        booking,
        Booking {
            resource_id: "B".into(),
            category: "X".into(),
            used: 2,
            capacity: 10,
        }
    );
    assert_eq!(engine.store().used("A"), 3);
    assert_eq!(engine.store().used("B"), 2);
    assert_eq!(engine.store().used("C"), 2);
}

#[tokio::test]
async fn book_tie_break_by_id() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("dr-zhou", "X", 4, 1),
        doc("dr-adams", "X", 4, 1),
    ]));
    assert_eq!(engine.book("X").await.unwrap().resource_id, "dr-adams");
}

#[tokio::test]
async fn book_same_snapshot_same_choice() {
    for _ in 0..5 {
        let engine = AllocationEngine::new(FakeStore::new(vec![
            doc("C", "X", 10, 0),
            doc("A", "X", 10, 2),
            doc("B", "X", 10, 0),
        ]));
        assert_eq!(engine.book("X").await.unwrap().resource_id, "B");
    }
}

#[tokio::test]
async fn book_matches_case_insensitively_after_trim() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "Cardiology", 2, 0),
        doc("B", "Neurology", 2, 0),
    ]));
    let booking = engine.book("  cARDIOLOGY \n").await.unwrap();
    assert_eq!(booking.resource_id, "A");
    assert_eq!(booking.category, "Cardiology");
}

#[tokio::test]
async fn book_rotates_through_equal_doctors() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "X", 2, 0),
        doc("B", "X", 2, 0),
        doc("C", "X", 2, 0),
    ]));
    let mut order = Vec::new();
    for _ in 0..6 {
        order.push(engine.book("X").await.unwrap().resource_id);
    }
    assert_eq!(order, ["A", "B", "C", "A", "B", "C"]);

    let err = engine.book("X").await.unwrap_err();
    assert_eq!(err, EngineError::CapacityExhausted { category: "X".into(), total: 3 });
}

#[tokio::test]
async fn book_reports_conflict_when_filled_after_selection() {
    let store = RacingStore {
        inner: FakeStore::new(vec![doc("A", "X", 3, 1), doc("B", "X", 3, 2)]),
        victim: "A".into(),
    };
    let engine = AllocationEngine::new(store);

    let err = engine.book("X").await.unwrap_err();
    assert_eq!(err, EngineError::BookingConflict("A".into()));
    assert!(err.reason().is_retryable());

    // The racer's write stands; nothing else moved.
    assert_eq!(engine.store().inner.used("A"), 3);
    assert_eq!(engine.store().inner.used("B"), 2);
}

#[tokio::test]
async fn book_conflict_then_retry_reselects() {
    let inner = FakeStore::new(vec![doc("A", "X", 3, 1), doc("B", "X", 3, 2)]);
    let racing = AllocationEngine::new(RacingStore { inner, victim: "A".into() });
    assert!(racing.book("X").await.is_err());

    // Caller re-issues against fresh state: A is full now, B takes it.
    let RacingStore { inner, .. } = racing.store;
    let engine = AllocationEngine::new(inner);
    let booking = engine.book("X").await.unwrap();
    assert_eq!(booking.resource_id, "B");
    assert_eq!(booking.used, 3);
}

#[tokio::test]
async fn book_store_failure_is_infrastructure() {
    let engine = AllocationEngine::new(DownStore);
    let err = engine.book("X").await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::Infrastructure);
    assert!(matches!(err, EngineError::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn book_store_timeout_surfaces() {
    let engine = AllocationEngine::new(StalledStore).with_store_timeout(Duration::from_millis(50));
    let err = engine.book("X").await.unwrap_err();
    assert_eq!(err, EngineError::Store(StoreError::Timeout));

    let err = engine.summarize().await.unwrap_err();
    assert_eq!(err, EngineError::Store(StoreError::Timeout));
}

// ── Summary ──────────────────────────────────────────────

#[test]
fn summary_aggregates_per_category() {
    let summary = summarize_resources(&[doc("A", "X", 10, 3), doc("B", "X", 5, 5)]);
    assert_eq!(
        summary,
        vec![CategorySummary {
            category: "X".into(),
            total_resources: 2,
            total_used: 8,
            total_capacity: 15,
            available_resources: 1,
        }]
    );
}

#[test]
fn summary_sorted_by_category_name() {
    let summary = summarize_resources(&[
        doc("A", "Pediatrics", 4, 0),
        doc("B", "Cardiology", 2, 1),
        doc("C", "Neurology", 3, 3),
        doc("D", "Cardiology", 2, 0),
    ]);
    let names: Vec<_> = summary.iter().map(|s| s.category.as_str()).collect();
    assert_eq!(names, ["Cardiology", "Neurology", "Pediatrics"]);
    assert_eq!(summary[0].total_resources, 2);
    assert_eq!(summary[1].available_resources, 0);
}

#[test]
fn summary_empty_registry() {
    assert!(summarize_resources(&[]).is_empty());
}

#[tokio::test]
async fn summarize_reads_store_once() {
    let engine = AllocationEngine::new(FakeStore::new(vec![
        doc("A", "X", 10, 3),
        doc("B", "X", 5, 5),
        doc("C", "Y", 1, 0),
    ]));
    let summary = engine.summarize().await.unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[1].category, "Y");
    assert_eq!(engine.store().reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn summarize_store_failure() {
    let engine = AllocationEngine::new(DownStore);
    let err = engine.summarize().await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::Infrastructure);
}

// ── Against the real registry ────────────────────────────

#[tokio::test]
async fn reset_makes_exhausted_category_bookable() {
    let registry = Arc::new(Registry::in_memory());
    registry.create_resource("A", "Cardiology", 1).await.unwrap();
    registry.create_resource("B", "Cardiology", 1).await.unwrap();
    let engine = AllocationEngine::new(registry.clone());

    engine.book("Cardiology").await.unwrap();
    engine.book("Cardiology").await.unwrap();
    let err = engine.book("Cardiology").await.unwrap_err();
    assert_eq!(err.reason(), FailureReason::CapacityExhausted);

    assert_eq!(registry.reset_usage().await.unwrap(), 2);

    let booking = engine.book("Cardiology").await.unwrap();
    assert_eq!(booking.resource_id, "A");
    assert_eq!(booking.used, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_bookings_never_exceed_capacity() {
    let registry = Arc::new(Registry::in_memory());
    for (id, cap) in [("A", 5), ("B", 3), ("C", 7)] {
        registry.create_resource(id, "Cardiology", cap).await.unwrap();
    }
    registry.create_resource("N", "Neurology", 4).await.unwrap();
    let engine = Arc::new(AllocationEngine::new(registry.clone()));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            // Caller-side retry: re-issue the whole call on conflict.
            loop {
                match engine.book("cardiology").await {
                    Ok(_) => return true,
                    Err(e) if e.reason() == FailureReason::BookingConflict => continue,
                    Err(e) => {
                        assert_eq!(e.reason(), FailureReason::CapacityExhausted);
                        return false;
                    }
                }
            }
        }));
    }

    let mut booked = 0;
    for h in handles {
        if h.await.unwrap() {
            booked += 1;
        }
    }
    assert_eq!(booked, 15);

    for r in registry.snapshot().await {
        assert!(r.used <= r.capacity, "{} oversubscribed: {}/{}", r.id, r.used, r.capacity);
        if r.category == "Cardiology" {
            assert_eq!(r.used, r.capacity);
        } else {
            assert_eq!(r.used, 0);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_single_shot_bookings_stay_within_capacity() {
    let registry = Arc::new(Registry::in_memory());
    registry.create_resource("A", "X", 2).await.unwrap();
    registry.create_resource("B", "X", 2).await.unwrap();
    let engine = Arc::new(AllocationEngine::new(registry.clone()));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.book("X").await }));
    }

    let mut booked = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => booked += 1,
            Err(e) => assert!(matches!(
                e.reason(),
                FailureReason::BookingConflict | FailureReason::CapacityExhausted
            )),
        }
    }
    let total_used: u32 = registry.snapshot().await.iter().map(|r| r.used).sum();
    assert_eq!(booked, total_used);
    assert!(total_used <= 4);
}
