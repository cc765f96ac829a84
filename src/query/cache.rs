//! Process-wide query cache.
//!
//! One slot per fingerprint. A slot holds the latest `CacheEntry`, a watch
//! channel that fans the entry out to subscribers, and the handle of the one
//! fetch that may be in flight for it. Entries are replaced, never mutated:
//! every dispatch gets a fresh generation and a response is applied only if
//! its generation is still the slot's current one.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::Config;
use crate::fetch::{ApiRequest, FetchError, Transport};
use crate::logging::{log_dispatch, log_settle, log_superseded};
use crate::query::fingerprint::Fingerprint;

#[derive(Clone, Debug, PartialEq)]
pub enum EntryState {
    Pending,
    Success(Arc<Value>),
    Error(FetchError),
}

#[derive(Debug)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub state: EntryState,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub generation: u64,
}

impl CacheEntry {
    fn pending(fingerprint: Fingerprint, generation: u64) -> Self {
        Self { fingerprint, state: EntryState::Pending, last_fetched_at: None, generation }
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.state {
            EntryState::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match &self.state {
            EntryState::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending)
    }
}

struct Slot {
    request: ApiRequest,
    entry: Arc<CacheEntry>,
    tx: watch::Sender<Arc<CacheEntry>>,
    in_flight: Option<JoinHandle<()>>,
    dispatched_at: Instant,
    subscribers: usize,
    released_at: Option<Instant>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    next_generation: AtomicU64,
    dispatches: AtomicU64,
    gc_window: Duration,
}

/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new(transport: Arc<dyn Transport>, gc_window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                dispatches: AtomicU64::new(0),
                gc_window,
            }),
        }
    }

    pub fn with_config(cfg: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, cfg.gc_window())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.inner.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to the entry for `req`. The first subscriber to a fingerprint
    /// dispatches the fetch; later ones share the existing entry.
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, req: ApiRequest) -> Subscription {
        let fingerprint = Fingerprint::of(&req);
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(&fingerprint) {
            slot.subscribers += 1;
            slot.released_at = None;
            let rx = slot.tx.subscribe();
            return Subscription { cache: self.clone(), fingerprint, rx };
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(CacheEntry::pending(fingerprint.clone(), generation));
        let (tx, rx) = watch::channel(entry.clone());
        let handle = self.dispatch(&fingerprint, &req, generation);
        slots.insert(
            fingerprint.clone(),
            Slot {
                request: req,
                entry,
                tx,
                in_flight: Some(handle),
                dispatched_at: Instant::now(),
                subscribers: 1,
                released_at: None,
            },
        );
        Subscription { cache: self.clone(), fingerprint, rx }
    }

    /// Subscribe to a query whose request can only be formed from a
    /// prerequisite's payload. Nothing is dispatched until the prerequisite
    /// is in SUCCESS and `link` returns a request.
    pub fn subscribe_after<F>(&self, prerequisite: &Subscription, link: F) -> DependentSubscription
    where
        F: Fn(&Value) -> Option<ApiRequest> + Send + Sync + 'static,
    {
        let (tx, rx) =
            watch::channel(Tracked { prerequisite: None, resolution: Resolution::Blocked });
        let mut prereq_rx = prerequisite.rx.clone();
        let cache = self.clone();
        let task = tokio::spawn(async move {
            let mut bound: Option<Subscription> = None;
            loop {
                let prereq = prereq_rx.borrow_and_update().clone();
                let request = prereq.payload().and_then(|payload| link(payload));
                match request {
                    Some(req) => {
                        let fp = Fingerprint::of(&req);
                        if bound.as_ref().map(|b| b.fingerprint != fp).unwrap_or(true) {
                            bound = Some(cache.subscribe(req));
                        }
                    }
                    None => bound = None,
                }
                let resolution = match bound.as_mut() {
                    Some(sub) => Resolution::Bound(sub.rx.borrow_and_update().clone()),
                    None => Resolution::Blocked,
                };
                tx.send_replace(Tracked { prerequisite: Some(prereq), resolution });

                let woke = tokio::select! {
                    r = prereq_rx.changed() => r.is_ok(),
                    r = wait_bound(&mut bound) => r,
                };
                if !woke {
                    break;
                }
            }
        });
        DependentSubscription { rx, task }
    }

    fn dispatch(
        &self,
        fingerprint: &Fingerprint,
        req: &ApiRequest,
        generation: u64,
    ) -> JoinHandle<()> {
        self.inner.dispatches.fetch_add(1, Ordering::SeqCst);
        log_dispatch(fingerprint, generation);
        let inner = self.inner.clone();
        let fingerprint = fingerprint.clone();
        let req = req.clone();
        tokio::spawn(async move {
            let result = inner.transport.send(&req).await;
            settle(&inner, &fingerprint, generation, result);
        })
    }

    /// Force a new generation and fetch, whatever the entry's state. An older
    /// fetch still in flight is aborted; its result could not apply anyway.
    pub fn refetch(&self, fingerprint: &Fingerprint) -> bool {
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(fingerprint) else {
            return false;
        };
        if let Some(old) = slot.in_flight.take() {
            old.abort();
        }
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(CacheEntry::pending(fingerprint.clone(), generation));
        slot.entry = entry.clone();
        slot.dispatched_at = Instant::now();
        slot.in_flight = Some(self.dispatch(fingerprint, &slot.request, generation));
        slot.tx.send_replace(entry);
        true
    }

    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<Arc<CacheEntry>> {
        self.slots().get(fingerprint).map(|s| s.entry.clone())
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total fetches dispatched over the cache's lifetime.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatches.load(Ordering::SeqCst)
    }

    /// Entries still PENDING after `older_than`. Nothing times out on its
    /// own; this only reports.
    pub fn stalled(&self, older_than: Duration) -> Vec<Fingerprint> {
        self.slots()
            .iter()
            .filter(|(_, s)| s.entry.is_pending() && s.dispatched_at.elapsed() >= older_than)
            .map(|(fp, _)| fp.clone())
            .collect()
    }

    /// Evict entries nobody has subscribed to for the GC window.
    pub fn collect_garbage(&self) -> usize {
        let window = self.inner.gc_window;
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| {
            let keep = slot.subscribers > 0
                || slot.released_at.map(|t| t.elapsed() < window).unwrap_or(true);
            if !keep {
                if let Some(handle) = slot.in_flight.take() {
                    handle.abort();
                }
            }
            keep
        });
        before - slots.len()
    }

    fn release(&self, fingerprint: &Fingerprint) {
        if let Some(slot) = self.slots().get_mut(fingerprint) {
            slot.subscribers = slot.subscribers.saturating_sub(1);
            if slot.subscribers == 0 {
                slot.released_at = Some(Instant::now());
            }
        }
    }
}

fn settle(
    inner: &Inner,
    fingerprint: &Fingerprint,
    generation: u64,
    result: Result<Value, FetchError>,
) {
    let mut slots = inner.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(slot) = slots.get_mut(fingerprint) else {
        log_superseded(fingerprint, generation, None);
        return;
    };
    if slot.entry.generation != generation {
        log_superseded(fingerprint, generation, Some(slot.entry.generation));
        return;
    }
    let (state, outcome) = match result {
        Ok(v) => (EntryState::Success(Arc::new(v)), "success"),
        Err(e) => (EntryState::Error(e), "error"),
    };
    let entry = Arc::new(CacheEntry {
        fingerprint: fingerprint.clone(),
        state,
        last_fetched_at: Some(Utc::now()),
        generation,
    });
    slot.entry = entry.clone();
    slot.in_flight = None;
    slot.tx.send_replace(entry);
    log_settle(fingerprint, generation, outcome);
}

async fn wait_bound(bound: &mut Option<Subscription>) -> bool {
    match bound.as_mut() {
        Some(sub) => sub.rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

/// A live view of one cache entry. Dropping it releases the entry for
/// garbage collection.
pub struct Subscription {
    cache: QueryCache,
    fingerprint: Fingerprint,
    rx: watch::Receiver<Arc<CacheEntry>>,
}

impl Subscription {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn current(&self) -> Arc<CacheEntry> {
        self.rx.borrow().clone()
    }

    /// Wait for the next transition. `false` once the entry is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until the entry leaves PENDING.
    pub async fn settled(&mut self) -> Arc<CacheEntry> {
        let settled = match self.rx.wait_for(|e| !e.is_pending()).await {
            Ok(entry) => Some(entry.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.current())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.release(&self.fingerprint);
    }
}

#[derive(Clone, Debug)]
pub enum Resolution {
    /// Prerequisite not in SUCCESS, or its payload does not yield a request.
    Blocked,
    Bound(Arc<CacheEntry>),
}

impl Resolution {
    pub fn entry(&self) -> Option<&Arc<CacheEntry>> {
        match self {
            Resolution::Bound(e) => Some(e),
            Resolution::Blocked => None,
        }
    }
}

/// What the follower task last published: the prerequisite entry it looked
/// at (none before its first pass) and what that led to.
#[derive(Clone, Debug)]
struct Tracked {
    prerequisite: Option<Arc<CacheEntry>>,
    resolution: Resolution,
}

impl Tracked {
    fn is_settled(&self) -> bool {
        match (&self.prerequisite, &self.resolution) {
            (None, _) => false,
            (Some(p), Resolution::Blocked) => !p.is_pending(),
            (Some(_), Resolution::Bound(e)) => !e.is_pending(),
        }
    }
}

/// Gated subscription. Owns the task that follows the prerequisite; dropping
/// it stops the task and releases whatever it had bound.
pub struct DependentSubscription {
    rx: watch::Receiver<Tracked>,
    task: JoinHandle<()>,
}

impl DependentSubscription {
    pub fn resolution(&self) -> Resolution {
        self.rx.borrow().resolution.clone()
    }

    pub fn current(&self) -> Option<Arc<CacheEntry>> {
        self.resolution().entry().cloned()
    }

    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Wait until the link has been evaluated against a settled prerequisite
    /// and, if that bound an entry, the entry has left PENDING. `None` means
    /// the query stayed blocked.
    pub async fn settled(&mut self) -> Option<Arc<CacheEntry>> {
        let ready = match self.rx.wait_for(Tracked::is_settled).await {
            Ok(t) => Some(t.resolution.entry().cloned()),
            Err(_) => None,
        };
        ready.unwrap_or_else(|| self.current())
    }
}

impl Drop for DependentSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::stub::StubTransport;
    use serde_json::json;

    fn cache_with(stub: Arc<StubTransport>) -> QueryCache {
        QueryCache::new(stub, Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_first_subscribe_is_pending_then_success() {
        let stub = Arc::new(StubTransport::new());
        stub.respond("/api/risk/summary", json!({"zones": []}));
        let cache = cache_with(stub.clone());

        let mut sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        assert!(sub.current().is_pending());
        let done = sub.settled().await;
        assert_eq!(done.payload(), Some(&json!({"zones": []})));
        assert!(done.last_fetched_at.is_some());
    }

    #[tokio::test]
    async fn test_resubscribe_shares_entry_and_fetches_once() {
        let stub = Arc::new(StubTransport::new());
        stub.respond("/api/risk/summary", json!({"zones": []}));
        let cache = cache_with(stub.clone());

        let mut a = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        let b = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        assert!(Arc::ptr_eq(&a.current(), &b.current()));
        a.settled().await;
        assert!(Arc::ptr_eq(&a.current(), &b.current()));
        assert_eq!(stub.call_count("/api/risk/summary"), 1);
        assert_eq!(cache.dispatch_count(), 1);
    }

    #[tokio::test]
    async fn test_error_is_terminal_until_refetch() {
        let stub = Arc::new(StubTransport::new());
        stub.fail("/api/risk/summary", 500);
        let cache = cache_with(stub.clone());

        let mut sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        let entry = sub.settled().await;
        assert_eq!(entry.error().and_then(|e| e.status()), Some(500));

        let again = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        assert!(again.current().error().is_some());
        assert_eq!(stub.call_count("/api/risk/summary"), 1);

        stub.respond("/api/risk/summary", json!({"zones": []}));
        assert!(cache.refetch(sub.fingerprint()));
        assert!(sub.current().is_pending());
        let entry = sub.settled().await;
        assert!(entry.payload().is_some());
        assert_eq!(stub.call_count("/api/risk/summary"), 2);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let stub = Arc::new(StubTransport::new());
        let slow = stub.gate("/api/risk/summary");
        let fast = stub.gate("/api/risk/summary");
        let cache = cache_with(stub.clone());

        let mut sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        tokio::task::yield_now().await;
        let first_gen = sub.current().generation;
        cache.refetch(sub.fingerprint());
        tokio::task::yield_now().await;
        let second_gen = sub.current().generation;
        assert!(second_gen > first_gen);

        fast.reply(json!({"fresh": true}));
        let entry = sub.settled().await;
        assert_eq!(entry.payload(), Some(&json!({"fresh": true})));

        // the first request was aborted; even a late reply cannot land
        slow.reply(json!({"fresh": false}));
        tokio::task::yield_now().await;
        assert_eq!(sub.current().payload(), Some(&json!({"fresh": true})));
        assert_eq!(sub.current().generation, second_gen);
    }

    #[tokio::test]
    async fn test_settle_for_old_generation_leaves_entry_alone() {
        let stub = Arc::new(StubTransport::new());
        let _first = stub.gate("/api/risk/summary");
        let _second = stub.gate("/api/risk/summary");
        let cache = cache_with(stub.clone());

        let sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        let fp = sub.fingerprint().clone();
        let old_gen = sub.current().generation;
        cache.refetch(&fp);
        let before = sub.current();
        assert!(before.generation > old_gen);

        settle(&cache.inner, &fp, old_gen, Ok(json!({"late": true})));
        let after = sub.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.is_pending());
        assert_eq!(after.generation, before.generation);
        assert!(Arc::ptr_eq(&cache.peek(&fp).unwrap(), &before));

        settle(&cache.inner, &fp, before.generation, Ok(json!({"late": false})));
        assert_eq!(sub.current().payload(), Some(&json!({"late": false})));
        let late_error = FetchError::Request { status: 500, path: "/api/risk/summary".into() };
        settle(&cache.inner, &fp, old_gen, Err(late_error));
        assert_eq!(sub.current().payload(), Some(&json!({"late": false})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_after_eviction_is_dropped() {
        let stub = Arc::new(StubTransport::new());
        let _held = stub.gate("/api/risk/summary");
        let cache = cache_with(stub.clone());

        let sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        let fp = sub.fingerprint().clone();
        let generation = sub.current().generation;
        drop(sub);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.collect_garbage(), 1);

        settle(&cache.inner, &fp, generation, Ok(json!({"zones": []})));
        assert!(cache.peek(&fp).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_refetch_unknown_fingerprint() {
        let cache = cache_with(Arc::new(StubTransport::new()));
        let fp = Fingerprint::of(&ApiRequest::get("/api/nope"));
        assert!(!cache.refetch(&fp));
    }

    #[tokio::test]
    async fn test_dependent_waits_for_prerequisite() {
        let stub = Arc::new(StubTransport::new());
        let gate = stub.gate("/api/peak/probability");
        stub.respond("/api/peak/dr-value?probability=0.6", json!({"expected_annual_savings": 1.0}));
        let cache = cache_with(stub.clone());

        let prereq = cache.subscribe(ApiRequest::get("/api/peak/probability"));
        let mut dep = cache.subscribe_after(&prereq, |payload| {
            let p = payload.get("probability")?.as_f64()?;
            Some(ApiRequest::get("/api/peak/dr-value").with_query("probability", p.to_string()))
        });
        tokio::task::yield_now().await;
        assert!(matches!(dep.resolution(), Resolution::Blocked));
        assert_eq!(stub.call_count("/api/peak/dr-value?probability=0.6"), 0);

        gate.reply(json!({"probability": 0.6}));
        let entry = dep.settled().await.unwrap();
        assert_eq!(entry.payload(), Some(&json!({"expected_annual_savings": 1.0})));
        assert_eq!(stub.call_count("/api/peak/dr-value?probability=0.6"), 1);
    }

    #[tokio::test]
    async fn test_dependent_stays_blocked_on_error() {
        let stub = Arc::new(StubTransport::new());
        stub.fail("/api/dispatch/scenarios", 503);
        let cache = cache_with(stub.clone());

        let prereq = cache.subscribe(ApiRequest::get("/api/dispatch/scenarios"));
        let mut dep =
            cache.subscribe_after(&prereq, |_| Some(ApiRequest::get("/api/dispatch/simulate/x")));
        assert!(dep.settled().await.is_none());
        assert!(matches!(dep.resolution(), Resolution::Blocked));
        assert_eq!(stub.call_count("/api/dispatch/simulate/x"), 0);
    }

    #[tokio::test]
    async fn test_dependent_blocked_when_link_declines() {
        let stub = Arc::new(StubTransport::new());
        stub.respond("/api/dispatch/scenarios", json!({"scenarios": []}));
        let cache = cache_with(stub.clone());

        let prereq = cache.subscribe(ApiRequest::get("/api/dispatch/scenarios"));
        let mut dep = cache.subscribe_after(&prereq, |_| None);
        assert!(dep.settled().await.is_none());
        assert_eq!(cache.dispatch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_keeps_released_entry_for_window() {
        let stub = Arc::new(StubTransport::new());
        stub.respond("/api/risk/summary", json!({}));
        let cache = cache_with(stub.clone());

        let mut sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        sub.settled().await;
        let fp = sub.fingerprint().clone();
        drop(sub);

        assert_eq!(cache.collect_garbage(), 0);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.peek(&fp).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reports_hung_requests() {
        let stub = Arc::new(StubTransport::new());
        let _held = stub.gate("/api/risk/summary");
        let cache = cache_with(stub.clone());

        let sub = cache.subscribe(ApiRequest::get("/api/risk/summary"));
        tokio::task::yield_now().await;
        assert!(cache.stalled(Duration::from_secs(30)).is_empty());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.stalled(Duration::from_secs(30)), vec![sub.fingerprint().clone()]);
        assert!(sub.current().is_pending());
    }
}
