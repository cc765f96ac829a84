//! Total transforms from cache entries to view inputs.
//!
//! A view never sees a raw entry. `read` folds every entry state (missing,
//! PENDING, ERROR, SUCCESS with a backend fault, SUCCESS) into an
//! `Upstream` that always carries a parsed record; when the entry is not
//! usable the record is the all-absent default, so every figure downstream
//! falls through to a placeholder.

use chrono::{DateTime, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::query::binding::Lookup;
use crate::query::cache::{CacheEntry, EntryState};
use crate::view::schema::{backend_error, parse};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// No query bound: disabled, or waiting on a prerequisite.
    Idle,
    Loading,
    Unavailable,
    Ready,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Upstream<T> {
    pub status: Status,
    pub reason: Option<String>,
    pub data: T,
}

impl<T: Default> Upstream<T> {
    fn empty(status: Status, reason: Option<String>) -> Self {
        Self { status, reason, data: T::default() }
    }
}

impl<T> Upstream<T> {
    pub fn is_ready(&self) -> bool {
        self.status == Status::Ready
    }

    pub fn section<S>(&self, f: impl FnOnce(&T) -> S) -> Section<S> {
        Section { status: self.status, reason: self.reason.clone(), data: f(&self.data) }
    }
}

pub fn read<T: DeserializeOwned + Default>(entry: Option<&CacheEntry>) -> Upstream<T> {
    let Some(entry) = entry else {
        return Upstream::empty(Status::Idle, None);
    };
    match &entry.state {
        EntryState::Pending => Upstream::empty(Status::Loading, None),
        EntryState::Error(e) => Upstream::empty(Status::Unavailable, Some(e.to_string())),
        EntryState::Success(payload) => match backend_error(payload) {
            Some(msg) => Upstream::empty(Status::Unavailable, Some(msg)),
            None => Upstream { status: Status::Ready, reason: None, data: parse(payload) },
        },
    }
}

/// Like `read`, but a binding whose parameters moved since its last sync
/// reads as Loading instead of showing the previous fingerprint's data.
pub fn read_current<T: DeserializeOwned + Default>(lookup: &Lookup) -> Upstream<T> {
    match lookup {
        Lookup::Unbound => Upstream::empty(Status::Idle, None),
        Lookup::Stale => Upstream::empty(Status::Loading, None),
        Lookup::Bound(entry) => read(Some(entry)),
    }
}

/// One block of a rendered page.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Section<T> {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub data: T,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Point<X> {
    pub x: X,
    pub y: Option<f64>,
}

/// Chart series sorted by x. Rows without an x are dropped; a missing y is
/// kept as a gap.
pub fn series<R, X: PartialOrd>(
    rows: &[R],
    x: impl Fn(&R) -> Option<X>,
    y: impl Fn(&R) -> Option<f64>,
) -> Vec<Point<X>> {
    let mut points: Vec<Point<X>> = rows
        .iter()
        .filter_map(|r| x(r).map(|xv| Point { x: xv, y: y(r).filter(|v| v.is_finite()) }))
        .collect();
    points.sort_by(|a, b| a.x.partial_cmp(&b.x).unwrap_or(Ordering::Equal));
    points
}

/// `HH:MM` for the timestamp formats the backend emits.
pub fn time_label(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.format("%H:%M").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.format("%H:%M").to_string());
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .map(|dt| dt.format("%H:%M").to_string())
}

pub fn first_word(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

/// Identity of a derived value's inputs: the exact entries read and the
/// parameter snapshot version. Entries are replaced on every transition,
/// so pointer identity is enough.
#[derive(Clone, Debug, Default)]
pub struct InputKey {
    entries: Vec<Option<Arc<CacheEntry>>>,
    params_version: u64,
}

impl InputKey {
    pub fn new(params_version: u64) -> Self {
        Self { entries: Vec::new(), params_version }
    }

    pub fn entry(mut self, entry: Option<Arc<CacheEntry>>) -> Self {
        self.entries.push(entry);
        self
    }
}

impl PartialEq for InputKey {
    fn eq(&self, other: &Self) -> bool {
        self.params_version == other.params_version
            && self.entries.len() == other.entries.len()
            && self.entries.iter().zip(&other.entries).all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            })
    }
}

/// Last computed value and the inputs it came from.
#[derive(Debug)]
pub struct Memo<V> {
    slot: Option<(InputKey, V)>,
}

impl<V> Default for Memo<V> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<V> Memo<V> {
    pub fn get_or_compute(&mut self, key: InputKey, compute: impl FnOnce() -> V) -> &V {
        match self.slot.take() {
            Some((k, v)) if k == key => &self.slot.insert((k, v)).1,
            _ => &self.slot.insert((key, compute())).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ApiRequest, FetchError};
    use crate::query::fingerprint::Fingerprint;
    use crate::view::schema::VarBundle;
    use serde_json::{json, Value};

    fn entry(state: EntryState) -> CacheEntry {
        CacheEntry {
            fingerprint: Fingerprint::of(&ApiRequest::get("/api/risk/var/HOUSTON")),
            state,
            last_fetched_at: None,
            generation: 1,
        }
    }

    #[test]
    fn test_read_is_total() {
        let idle: Upstream<VarBundle> = read(None);
        assert_eq!(idle.status, Status::Idle);

        let pending: Upstream<VarBundle> = read(Some(&entry(EntryState::Pending)));
        assert_eq!(pending.status, Status::Loading);
        assert_eq!(pending.data, VarBundle::default());

        let failed: Upstream<VarBundle> = read(Some(&entry(EntryState::Error(FetchError::Request {
            status: 502,
            path: "/api/risk/var/HOUSTON".into(),
        }))));
        assert_eq!(failed.status, Status::Unavailable);
        assert_eq!(failed.reason.as_deref(), Some("API Error: 502 on /api/risk/var/HOUSTON"));

        let fault_body = Arc::new(json!({"error": "No price data found"}));
        let fault: Upstream<VarBundle> = read(Some(&entry(EntryState::Success(fault_body))));
        assert_eq!(fault.status, Status::Unavailable);
        assert_eq!(fault.reason.as_deref(), Some("No price data found"));

        let ok: Upstream<VarBundle> =
            read(Some(&entry(EntryState::Success(Arc::new(json!({"position_value": 1e6}))))));
        assert!(ok.is_ready());
        assert_eq!(ok.data.position_value, Some(1e6));
    }

    #[test]
    fn test_stale_lookup_reads_as_loading() {
        let stale: Upstream<VarBundle> = read_current(&Lookup::Stale);
        assert_eq!(stale.status, Status::Loading);
        assert_eq!(stale.data, VarBundle::default());

        let unbound: Upstream<VarBundle> = read_current(&Lookup::Unbound);
        assert_eq!(unbound.status, Status::Idle);

        let bound = Arc::new(entry(EntryState::Success(Arc::new(json!({"position_value": 5.0})))));
        let ok: Upstream<VarBundle> = read_current(&Lookup::Bound(bound));
        assert_eq!(ok.data.position_value, Some(5.0));
    }

    #[test]
    fn test_series_sorted_and_gaps_kept() {
        let rows = vec![
            json!({"x": 3, "y": 1.0}),
            json!({"x": 1}),
            json!({"y": 9.0}),
            json!({"x": 2, "y": 4.0}),
        ];
        let pts = series(&rows, |r: &Value| r.get("x")?.as_f64(), |r: &Value| r.get("y")?.as_f64());
        let xs: Vec<f64> = pts.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(pts[0].y, None);
        assert_eq!(pts[1].y, Some(4.0));
    }

    #[test]
    fn test_time_label() {
        assert_eq!(time_label("2024-08-20 14:00:00").as_deref(), Some("14:00"));
        assert_eq!(time_label("2024-08-20 09:30:00+00:00").as_deref(), Some("09:30"));
        assert_eq!(time_label("2024-08-20T17:45:00Z").as_deref(), Some("17:45"));
        assert_eq!(time_label("yesterday"), None);
    }

    #[test]
    fn test_memo_recomputes_only_on_new_inputs() {
        let e = Arc::new(entry(EntryState::Pending));
        let mut memo = Memo::default();
        let mut calls = 0;
        memo.get_or_compute(InputKey::new(1).entry(Some(e.clone())), || {
            calls += 1;
            1
        });
        memo.get_or_compute(InputKey::new(1).entry(Some(e.clone())), || {
            calls += 1;
            2
        });
        assert_eq!(calls, 1);

        let replaced = Arc::new(entry(EntryState::Pending));
        let v = *memo.get_or_compute(InputKey::new(1).entry(Some(replaced)), || {
            calls += 1;
            3
        });
        assert_eq!((calls, v), (2, 3));
    }

    #[test]
    fn test_first_word() {
        assert_eq!(first_word("Winter Storm Uri"), "Winter");
        assert_eq!(first_word("   "), "");
    }
}
