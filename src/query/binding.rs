use serde_json::Value;
use std::sync::Arc;

use crate::fetch::ApiRequest;
use crate::params::ParamSet;
use crate::query::cache::{
    CacheEntry, DependentSubscription, QueryCache, Resolution, Subscription,
};
use crate::query::endpoint::Endpoint;
use crate::query::fingerprint::Fingerprint;

/// What a binding holds, judged against a parameter set that may be newer
/// than the one it was last synced with.
#[derive(Clone, Debug)]
pub enum Lookup {
    /// Nothing is bound for these parameters: disabled, or blocked on a
    /// prerequisite.
    Unbound,
    /// The parameters moved since the last sync; the held entry belongs to
    /// another fingerprint.
    Stale,
    Bound(Arc<CacheEntry>),
}

/// Keeps one subscription pointed at whatever the current parameters
/// resolve to. Re-syncing with unchanged parameters is a no-op.
pub struct QueryBinding {
    endpoint: Endpoint,
    enabled: fn(&ParamSet) -> bool,
    sub: Option<Subscription>,
}

fn always(_: &ParamSet) -> bool {
    true
}

impl QueryBinding {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, enabled: always, sub: None }
    }

    /// Only subscribe while `gate` holds for the current parameters.
    pub fn when(mut self, gate: fn(&ParamSet) -> bool) -> Self {
        self.enabled = gate;
        self
    }

    /// Returns true when the binding moved to a different fingerprint.
    pub fn sync(&mut self, cache: &QueryCache, params: &ParamSet) -> bool {
        if !(self.enabled)(params) {
            return self.sub.take().is_some();
        }
        let req = self.endpoint.resolve(params);
        let fp = Fingerprint::of(&req);
        if self.fingerprint() == Some(&fp) {
            return false;
        }
        self.sub = Some(cache.subscribe(req));
        true
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.sub.as_ref().map(|s| s.fingerprint())
    }

    /// The fingerprint `params` resolve to, or `None` while disabled.
    pub fn target(&self, params: &ParamSet) -> Option<Fingerprint> {
        (self.enabled)(params).then(|| Fingerprint::of(&self.endpoint.resolve(params)))
    }

    pub fn lookup(&self, params: &ParamSet) -> Lookup {
        let Some(target) = self.target(params) else {
            return Lookup::Unbound;
        };
        match &self.sub {
            Some(sub) if *sub.fingerprint() == target => Lookup::Bound(sub.current()),
            _ => Lookup::Stale,
        }
    }

    pub fn entry(&self) -> Option<Arc<CacheEntry>> {
        self.sub.as_ref().map(|s| s.current())
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        self.sub.as_ref()
    }

    /// Wait until the bound entry leaves PENDING. Returns immediately when
    /// the binding is disabled.
    pub async fn settled(&mut self) -> Option<Arc<CacheEntry>> {
        match self.sub.as_mut() {
            Some(sub) => Some(sub.settled().await),
            None => None,
        }
    }
}

/// A binding gated on another binding's payload. The link is rebuilt when
/// the prerequisite's fingerprint or the link's own inputs change.
#[derive(Default)]
pub struct DependentBinding {
    key: Option<(Fingerprint, String)>,
    sub: Option<DependentSubscription>,
}

impl DependentBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// `inputs` names everything the link closes over besides the payload.
    pub fn sync<F>(
        &mut self,
        cache: &QueryCache,
        prerequisite: &QueryBinding,
        inputs: String,
        link: F,
    ) -> bool
    where
        F: Fn(&Value) -> Option<ApiRequest> + Send + Sync + 'static,
    {
        let Some(prereq) = prerequisite.subscription() else {
            return self.clear();
        };
        let key = (prereq.fingerprint().clone(), inputs);
        if self.key.as_ref() == Some(&key) {
            return false;
        }
        self.sub = Some(cache.subscribe_after(prereq, link));
        self.key = Some(key);
        true
    }

    /// Drop the link entirely, e.g. when nothing is selected.
    pub fn clear(&mut self) -> bool {
        self.key = None;
        self.sub.take().is_some()
    }

    /// Stale unless the last sync saw the same prerequisite fingerprint and
    /// the same `inputs` that `params` now produce.
    pub fn lookup(&self, prerequisite: &QueryBinding, params: &ParamSet, inputs: &str) -> Lookup {
        let Some(target) = prerequisite.target(params) else {
            return Lookup::Unbound;
        };
        match &self.key {
            Some((fp, linked)) if *fp == target && linked == inputs => {
                self.entry().map(Lookup::Bound).unwrap_or(Lookup::Unbound)
            }
            _ => Lookup::Stale,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.sub.as_ref().map(|s| s.resolution()).unwrap_or(Resolution::Blocked)
    }

    pub fn entry(&self) -> Option<Arc<CacheEntry>> {
        self.sub.as_ref().and_then(|s| s.current())
    }

    pub async fn settled(&mut self) -> Option<Arc<CacheEntry>> {
        match self.sub.as_mut() {
            Some(sub) => sub.settled().await,
            None => None,
        }
    }
}

/// `name=value` pairs for the named parameters, in the order given.
pub fn param_key(params: &ParamSet, names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("{}={}", n, params.value(n).render()))
        .collect::<Vec<_>>()
        .join("&")
}
