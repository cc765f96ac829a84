//! Knowledge Search over market news and regulatory filings.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::params::{ParamSet, ParamStore};
use crate::query::{catalog, Fingerprint, QueryBinding, QueryCache};
use crate::view::derive::{read_current, InputKey, Memo, Section, Upstream};
use crate::view::format::Readout;
use crate::view::schema::{SearchHit, SearchResults};

use super::Page;

pub const VIEW: &str = "search";

pub const DEFAULT_LIMIT: f64 = 10.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRow {
    pub title: Readout,
    pub excerpt: Readout,
    pub published: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Results {
    pub count: String,
    pub rows: Vec<ResultRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchView {
    pub query: String,
    pub results: Section<Results>,
}

pub struct SearchPage {
    params: ParamStore,
    search: QueryBinding,
    memo: Memo<SearchView>,
}

fn has_query(params: &ParamSet) -> bool {
    !params.value("query").is_blank()
}

impl Default for SearchPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchPage {
    pub fn new() -> Self {
        let initial = ParamSet::new().with("query", "").with("limit", DEFAULT_LIMIT);
        Self {
            params: ParamStore::new(VIEW, initial),
            search: QueryBinding::new(catalog::knowledge_search()).when(has_query),
            memo: Memo::default(),
        }
    }

    pub fn params(&self) -> Arc<ParamSet> {
        self.params.snapshot()
    }

    pub fn set_query(&mut self, query: &str) {
        self.params.set("query", query);
    }

    pub fn set_limit_input(&mut self, raw: &str) {
        self.params.set_number_input("limit", raw);
    }

    pub fn view(&self) -> SearchView {
        let params = self.params.snapshot();
        derive_view(&params, read_current(&self.search.lookup(&params)))
    }

    pub fn rendered(&mut self) -> &SearchView {
        let key = InputKey::new(self.params.version()).entry(self.search.entry());
        let params = self.params.snapshot();
        let search = &self.search;
        self.memo
            .get_or_compute(key, || derive_view(&params, read_current(&search.lookup(&params))))
    }
}

#[async_trait]
impl Page for SearchPage {
    fn name(&self) -> &'static str {
        VIEW
    }

    fn sync(&mut self, cache: &QueryCache) -> bool {
        let params = self.params.snapshot();
        self.search.sync(cache, &params)
    }

    async fn settle(&mut self) {
        self.search.settled().await;
    }

    fn fingerprints(&self) -> Vec<Fingerprint> {
        self.search.fingerprint().cloned().into_iter().collect()
    }

    fn render(&mut self) -> Value {
        serde_json::to_value(self.rendered()).unwrap_or(Value::Null)
    }
}

fn derive_view(params: &ParamSet, results: Upstream<SearchResults>) -> SearchView {
    SearchView {
        query: params.value("query").as_str().unwrap_or("").to_string(),
        results: results.section(|r| {
            let n = r.total.unwrap_or(r.results.len() as u64);
            Results {
                count: format!("{} result{}", n, if n == 1 { "" } else { "s" }),
                rows: r.results.iter().map(result_row).collect(),
            }
        }),
    }
}

fn result_row(hit: &SearchHit) -> ResultRow {
    ResultRow {
        title: Readout::text(hit.title.as_deref()),
        excerpt: Readout::text(hit.excerpt.as_deref()),
        published: Readout::text(hit.published_date.as_deref()),
    }
}
