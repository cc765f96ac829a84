//! Dashboard views. A query-backed page owns its parameter store, keeps its
//! bindings pointed at the current parameters, and derives a serializable
//! model from whatever the cache holds.

use async_trait::async_trait;
use serde_json::Value;

use crate::query::{Fingerprint, QueryCache};

pub mod assistant;
pub mod dispatch;
pub mod peak;
pub mod risk;
pub mod search;

pub use assistant::AssistantPage;
pub use dispatch::DispatchPage;
pub use peak::PeakPage;
pub use risk::RiskPage;
pub use search::SearchPage;

/// Load zones offered by the zone selectors.
pub const ZONES: [&str; 4] = ["HOUSTON", "NORTH", "SOUTH", "WEST"];

#[async_trait]
pub trait Page: Send {
    fn name(&self) -> &'static str;

    /// Point every binding at the current parameters. Returns true when any
    /// binding moved.
    fn sync(&mut self, cache: &QueryCache) -> bool;

    /// Wait until every bound query has left PENDING, dependents included.
    async fn settle(&mut self);

    /// Fingerprints currently bound, prerequisites first.
    fn fingerprints(&self) -> Vec<Fingerprint>;

    /// The derived model, recomputed only when an input changed.
    fn render(&mut self) -> Value;

    /// Explicit refresh: new generation for every bound query.
    fn refresh(&self, cache: &QueryCache) -> usize {
        self.fingerprints().iter().filter(|fp| cache.refetch(fp)).count()
    }
}
