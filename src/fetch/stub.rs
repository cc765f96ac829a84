//! In-process transport with a scripted route table.
//!
//! Stands in for the analytics backend: fixed replies per request, one-shot
//! gated replies that the caller releases by hand, and a journal of every call.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::{ApiRequest, FetchError, Method, Transport};

type Reply = Result<Value, FetchError>;

#[derive(Default)]
struct StubState {
    routes: HashMap<String, Reply>,
    gated: HashMap<String, VecDeque<oneshot::Receiver<Reply>>>,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct StubTransport {
    state: Mutex<StubState>,
}

/// Releases one held request.
pub struct Gate {
    tx: oneshot::Sender<Reply>,
}

impl Gate {
    pub fn reply(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, err: FetchError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Journal key for a request: method, target and body when present.
pub fn route_key(req: &ApiRequest) -> String {
    route_key_parts(req.method, &req.target(), req.body_text().as_deref())
}

fn route_key_parts(method: Method, target: &str, body: Option<&str>) -> String {
    match body {
        Some(body) => format!("{} {} {}", method.as_str(), target, body),
        None => format!("{} {}", method.as_str(), target),
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Answer every GET of `target` with `value`.
    pub fn respond(&self, target: &str, value: Value) {
        self.lock().routes.insert(route_key_parts(Method::Get, target, None), Ok(value));
    }

    pub fn respond_post(&self, target: &str, body: &Value, value: Value) {
        let key = route_key_parts(Method::Post, target, Some(&body.to_string()));
        self.lock().routes.insert(key, Ok(value));
    }

    /// Answer every GET of `target` with a non-2xx status.
    pub fn fail(&self, target: &str, status: u16) {
        let err = FetchError::Request { status, path: target.to_string() };
        self.lock().routes.insert(route_key_parts(Method::Get, target, None), Err(err));
    }

    /// Hold the next GET of `target` until the returned gate is released.
    /// Gates queue up and are consumed before the fixed route.
    pub fn gate(&self, target: &str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.lock()
            .gated
            .entry(route_key_parts(Method::Get, target, None))
            .or_default()
            .push_back(rx);
        Gate { tx }
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of GETs issued for `target`.
    pub fn call_count(&self, target: &str) -> usize {
        let key = route_key_parts(Method::Get, target, None);
        self.lock().calls.iter().filter(|c| **c == key).count()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, req: &ApiRequest) -> Result<Value, FetchError> {
        let key = route_key(req);
        let held = {
            let mut state = self.lock();
            state.calls.push(key.clone());
            match state.gated.get_mut(&key).and_then(|q| q.pop_front()) {
                Some(rx) => rx,
                None => {
                    return state.routes.get(&key).cloned().unwrap_or_else(|| {
                        Err(FetchError::Request { status: 404, path: req.target() })
                    })
                }
            }
        };
        held.await.unwrap_or_else(|_| {
            Err(FetchError::Transport { path: req.target(), message: "gate dropped".to_string() })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fixed_route_and_journal() {
        let stub = StubTransport::new();
        stub.respond("/api/risk/summary", json!({"zones": []}));
        let v = stub.send(&ApiRequest::get("/api/risk/summary")).await.unwrap();
        assert_eq!(v, json!({"zones": []}));
        assert_eq!(stub.call_count("/api/risk/summary"), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let stub = StubTransport::new();
        let err = stub.send(&ApiRequest::get("/api/nope")).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_gate_holds_until_released() {
        let stub = std::sync::Arc::new(StubTransport::new());
        let gate = stub.gate("/api/dispatch/scenarios");
        let s = stub.clone();
        let handle =
            tokio::spawn(async move { s.send(&ApiRequest::get("/api/dispatch/scenarios")).await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        gate.reply(json!({"scenarios": []}));
        assert_eq!(handle.await.unwrap().unwrap(), json!({"scenarios": []}));
    }

    #[tokio::test]
    async fn test_post_route_matches_body() {
        let stub = StubTransport::new();
        let body = json!({"query": "uri", "limit": 10});
        stub.respond_post("/api/search", &body, json!({"results": []}));
        let ok = stub.send(&ApiRequest::post("/api/search", body)).await;
        assert!(ok.is_ok());
        let miss = stub.send(&ApiRequest::post("/api/search", json!({"query": "x"}))).await;
        assert!(miss.is_err());
    }
}
