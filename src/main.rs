use anyhow::Result;
use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

use gridpulse::config::Config;
use gridpulse::fetch::HttpTransport;
use gridpulse::logging::{log, log_view, obj, v_num, v_str, Domain, Level};
use gridpulse::pages::{AssistantPage, DispatchPage, Page, PeakPage, RiskPage, SearchPage};
use gridpulse::query::QueryCache;

/// How long one pass waits for responses before rendering what it has.
/// Entries still in flight stay PENDING and are picked up next pass.
const SETTLE_BUDGET: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let transport = Arc::new(HttpTransport::new(&cfg.api_base)?);
    let cache = QueryCache::with_config(&cfg, transport);

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("api_base", v_str(&cfg.api_base)),
            ("gc_secs", json!(cfg.gc_secs)),
            ("refresh_secs", json!(cfg.refresh_secs)),
            ("zone", v_str(&cfg.default_zone)),
            ("capacity_mw", v_num(cfg.default_capacity_mw)),
        ]),
    );

    let mut pages: Vec<Box<dyn Page>> = vec![
        Box::new(DispatchPage::new(&cfg)),
        Box::new(RiskPage::new(&cfg)),
        Box::new(PeakPage::new(&cfg)),
        Box::new(SearchPage::new()),
        Box::new(AssistantPage::new()),
    ];

    let mut pass: u64 = 0;
    loop {
        pass += 1;
        if pass > 1 {
            let refreshed: usize = pages.iter().map(|p| p.refresh(&cache)).sum();
            log(Level::Debug, Domain::System, "refresh", obj(&[("entries", json!(refreshed))]));
        }
        for page in pages.iter_mut() {
            page.sync(&cache);
        }

        let settling = join_all(pages.iter_mut().map(|p| p.settle()));
        if timeout(SETTLE_BUDGET, settling).await.is_err() {
            let stalled: Vec<String> = cache
                .stalled(SETTLE_BUDGET)
                .iter()
                .map(|fp| fp.as_str().to_string())
                .collect();
            log(Level::Warn, Domain::Cache, "stalled", obj(&[("fingerprints", json!(stalled))]));
        }

        for page in pages.iter_mut() {
            let model = page.render();
            log_view(page.name(), model);
        }

        let evicted = cache.collect_garbage();
        log(
            Level::Info,
            Domain::System,
            "pass_complete",
            obj(&[
                ("pass", json!(pass)),
                ("entries", json!(cache.len())),
                ("evicted", json!(evicted)),
                ("dispatches", json!(cache.dispatch_count())),
            ]),
        );

        sleep(cfg.refresh_interval()).await;
    }
}
