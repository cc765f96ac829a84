//! End-to-end checks of the parameter → cache → view pipeline, driven
//! through the pages against a scripted backend.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use gridpulse::config::Config;
use gridpulse::fetch::stub::StubTransport;
use gridpulse::fetch::ApiRequest;
use gridpulse::pages::{DispatchPage, Page, RiskPage, ZONES};
use gridpulse::params::ParamSet;
use gridpulse::query::{catalog, Fingerprint, QueryCache};
use gridpulse::view::format::millions;
use gridpulse::view::Status;

const GC: Duration = Duration::from_secs(300);

fn all_target(zone: &str) -> String {
    format!("/api/dispatch/simulate-all?capacity_mw=100&zone={}", zone)
}

fn events_target(zone: &str) -> String {
    format!("/api/dispatch/historical-events?threshold_price=500&zone={}", zone)
}

/// Scenarios and spike history for every zone; simulate-all left to the test.
fn dispatch_backend() -> Arc<StubTransport> {
    let stub = Arc::new(StubTransport::new());
    stub.respond(
        "/api/dispatch/scenarios",
        json!({"scenarios": [{"key": "winter_storm", "name": "Winter Storm"}]}),
    );
    for zone in ZONES {
        stub.respond(&events_target(zone), json!({"event_count": 0, "events": []}));
    }
    stub
}

fn potential(total: f64) -> Value {
    json!({"total_potential_savings": total, "scenarios": []})
}

#[test]
fn test_simulate_all_fingerprint_matches_request() {
    let params = ParamSet::new().with("capacity_mw", 100.0).with("zone", "HOUSTON");
    let req = catalog::dispatch_simulate_all().resolve(&params);
    assert_eq!(req.target(), "/api/dispatch/simulate-all?capacity_mw=100&zone=HOUSTON");

    let north = catalog::dispatch_simulate_all().resolve(&params.clone().with("zone", "NORTH"));
    assert_ne!(Fingerprint::of(&req), Fingerprint::of(&north));
    let by_hand = ApiRequest::get("/api/dispatch/simulate-all")
        .with_query("capacity_mw", "100")
        .with_query("zone", "HOUSTON");
    assert_eq!(Fingerprint::of(&req), Fingerprint::of(&by_hand));
}

#[test]
fn test_millions_formatter() {
    assert_eq!(millions(2_500_000.0, 2), "$2.50M");
}

#[tokio::test]
async fn test_rapid_zone_changes_fetch_once_per_fingerprint() {
    let stub = dispatch_backend();
    let houston = stub.gate(&all_target("HOUSTON"));
    let north = stub.gate(&all_target("NORTH"));
    let south = stub.gate(&all_target("SOUTH"));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut page = DispatchPage::new(&Config::default());

    page.sync(&cache);
    for zone in ["NORTH", "SOUTH", "NORTH", "HOUSTON", "NORTH"] {
        page.set_zone(zone);
        page.sync(&cache);
    }
    tokio::task::yield_now().await;

    // answers arrive out of order
    south.reply(potential(3_000_000.0));
    houston.reply(potential(1_000_000.0));
    assert_eq!(page.view().totals.status, Status::Loading);
    north.reply(potential(2_000_000.0));
    page.settle().await;

    let view = page.view();
    assert_eq!(view.zone, "NORTH");
    assert_eq!(view.totals.data.total_potential.to_string(), "$2.0M");
    for zone in ["HOUSTON", "NORTH", "SOUTH"] {
        assert_eq!(stub.call_count(&all_target(zone)), 1, "{}", zone);
    }
}

#[tokio::test]
async fn test_reselected_zone_is_served_from_cache() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    let north = stub.gate(&all_target("NORTH"));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut page = DispatchPage::new(&Config::default());
    page.sync(&cache);
    page.settle().await;

    page.set_zone("NORTH");
    page.sync(&cache);
    assert_eq!(page.view().totals.status, Status::Loading);

    page.set_zone("HOUSTON");
    page.sync(&cache);
    let view = page.view();
    assert_eq!(view.totals.status, Status::Ready);
    assert_eq!(view.totals.data.total_potential.to_string(), "$1.0M");
    assert_eq!(stub.call_count(&all_target("HOUSTON")), 1);
    drop(north);
}

#[tokio::test]
async fn test_render_between_zone_change_and_sync_never_mixes_zones() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    stub.respond(&all_target("NORTH"), potential(2_000_000.0));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut page = DispatchPage::new(&Config::default());
    page.sync(&cache);
    page.settle().await;
    assert_eq!(page.render()["totals"]["data"]["total_potential"], json!("$1.0M"));

    page.set_zone("NORTH");
    let rendered = page.render();
    assert_eq!(rendered["zone"], json!("NORTH"));
    assert_eq!(rendered["totals"]["status"], json!("loading"));
    assert_eq!(rendered["totals"]["data"]["total_potential"], json!("--"));
    assert_eq!(stub.call_count(&all_target("NORTH")), 0);

    page.sync(&cache);
    page.settle().await;
    let rendered = page.render();
    assert_eq!(rendered["totals"]["status"], json!("ready"));
    assert_eq!(rendered["totals"]["data"]["total_potential"], json!("$2.0M"));
}

#[tokio::test]
async fn test_pages_share_identical_queries() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut a = DispatchPage::new(&Config::default());
    let mut b = DispatchPage::new(&Config::default());
    a.sync(&cache);
    b.sync(&cache);
    a.settle().await;
    b.settle().await;
    assert_eq!(a.fingerprints(), b.fingerprints());
    assert_eq!(stub.call_count(&all_target("HOUSTON")), 1);
    assert_eq!(stub.call_count("/api/dispatch/scenarios"), 1);
}

#[tokio::test]
async fn test_refresh_refetches_bound_queries() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut page = DispatchPage::new(&Config::default());
    page.sync(&cache);
    page.settle().await;

    stub.respond(&all_target("HOUSTON"), potential(5_000_000.0));
    assert_eq!(page.refresh(&cache), 3);
    page.settle().await;
    assert_eq!(page.view().totals.data.total_potential.to_string(), "$5.0M");
    assert_eq!(stub.call_count(&all_target("HOUSTON")), 2);
}

#[tokio::test]
async fn test_one_failing_view_does_not_affect_another() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    stub.fail("/api/risk/summary", 500);
    let cache = QueryCache::new(stub.clone(), GC);
    let mut dispatch = DispatchPage::new(&Config::default());
    let mut risk = RiskPage::new(&Config::default());
    dispatch.sync(&cache);
    risk.sync(&cache);
    dispatch.settle().await;
    risk.settle().await;

    assert_eq!(dispatch.view().totals.status, Status::Ready);
    let risk_view = risk.view();
    assert_eq!(risk_view.zones.status, Status::Unavailable);
    assert_eq!(risk_view.var.status, Status::Unavailable);
    assert_eq!(risk_view.var.data[0].dollar.to_string(), "--");
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_fingerprints_are_collected() {
    let stub = dispatch_backend();
    stub.respond(&all_target("HOUSTON"), potential(1_000_000.0));
    stub.respond(&all_target("WEST"), potential(1_000_000.0));
    let cache = QueryCache::new(stub.clone(), GC);
    let mut page = DispatchPage::new(&Config::default());
    page.sync(&cache);
    page.settle().await;

    page.set_zone("WEST");
    page.sync(&cache);
    page.settle().await;
    assert_eq!(cache.len(), 5);

    tokio::time::advance(GC + Duration::from_secs(1)).await;
    assert_eq!(cache.collect_garbage(), 2);
    assert_eq!(cache.len(), 3);
    assert_eq!(page.view().totals.status, Status::Ready);
}
