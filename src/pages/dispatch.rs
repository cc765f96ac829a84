//! Event Dispatch: stress-test demand-response capacity across price
//! scenarios.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::params::{ParamSet, ParamStore, ParamValue};
use crate::query::{
    catalog, param_key, DependentBinding, Fingerprint, Lookup, QueryBinding, QueryCache,
};
use crate::view::derive::{first_word, read_current, InputKey, Memo, Section, Upstream};
use crate::view::format::{currency, fixed, grouped, millions, round_to, Readout};
use crate::view::schema::{self, HistoricalEvents, ScenarioList, SimulateAll, SimulationResult};

use super::Page;

pub const VIEW: &str = "dispatch";

/// Spike rows shown in the table.
const SPIKE_ROWS: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Totals {
    pub total_potential: Readout,
    pub base_price: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bar {
    pub label: String,
    pub key: Option<String>,
    /// Savings in $M, two decimals.
    pub savings_musd: f64,
    pub tooltip: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioCard {
    pub key: Option<String>,
    pub name: Readout,
    pub description: Readout,
    pub price: Readout,
    pub duration: Readout,
    pub selected: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultPanel {
    pub scenario: Readout,
    pub total_savings: Readout,
    pub savings_per_mw: Readout,
    pub total_energy: Readout,
    pub base_price: Readout,
    pub stress_price: Readout,
    pub duration: Readout,
    pub capacity: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpikeRow {
    pub datetime: Readout,
    pub rt_price: Readout,
    pub da_price: Readout,
    pub spread: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Spikes {
    pub count: Readout,
    pub rows: Vec<SpikeRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchView {
    pub zone: String,
    pub capacity_mw: String,
    pub totals: Section<Totals>,
    pub comparison: Section<Vec<Bar>>,
    pub scenarios: Section<Vec<ScenarioCard>>,
    pub result: Section<ResultPanel>,
    pub spikes: Section<Spikes>,
}

struct Queries {
    scenarios: QueryBinding,
    all: QueryBinding,
    events: QueryBinding,
    simulate: DependentBinding,
}

impl Queries {
    fn view(&self, params: &ParamSet) -> DispatchView {
        let scenarios: Upstream<ScenarioList> = read_current(&self.scenarios.lookup(params));
        let all: Upstream<SimulateAll> = read_current(&self.all.lookup(params));
        let events: Upstream<HistoricalEvents> = read_current(&self.events.lookup(params));
        let simulate = match selected_scenario(params) {
            Some(_) => self.simulate.lookup(&self.scenarios, params, &simulate_inputs(params)),
            None => Lookup::Unbound,
        };
        let result: Upstream<SimulationResult> = read_current(&simulate);
        derive_view(params, &scenarios, &all, &events, &result)
    }
}

fn selected_scenario(params: &ParamSet) -> Option<String> {
    match params.value("scenario") {
        ParamValue::Text(key) if !key.is_empty() => Some(key),
        _ => None,
    }
}

fn simulate_inputs(params: &ParamSet) -> String {
    param_key(params, &["scenario", "capacity_mw", "zone"])
}

pub struct DispatchPage {
    params: ParamStore,
    queries: Queries,
    memo: Memo<DispatchView>,
}

impl DispatchPage {
    pub fn new(cfg: &Config) -> Self {
        let initial = ParamSet::new()
            .with("zone", cfg.default_zone.as_str())
            .with("capacity_mw", cfg.default_capacity_mw)
            .with("scenario", ParamValue::Undefined);
        Self {
            params: ParamStore::new(VIEW, initial),
            queries: Queries {
                scenarios: QueryBinding::new(catalog::dispatch_scenarios()),
                all: QueryBinding::new(catalog::dispatch_simulate_all()),
                events: QueryBinding::new(catalog::dispatch_historical_events()),
                simulate: DependentBinding::new(),
            },
            memo: Memo::default(),
        }
    }

    pub fn params(&self) -> Arc<ParamSet> {
        self.params.snapshot()
    }

    pub fn set_zone(&mut self, zone: &str) {
        self.params.set("zone", zone);
    }

    pub fn set_capacity_input(&mut self, raw: &str) {
        self.params.set_number_input("capacity_mw", raw);
    }

    pub fn select_scenario(&mut self, key: Option<&str>) {
        self.params.set("scenario", key);
    }

    pub fn view(&self) -> DispatchView {
        self.queries.view(&self.params.snapshot())
    }

    pub fn rendered(&mut self) -> &DispatchView {
        let q = &self.queries;
        let key = InputKey::new(self.params.version())
            .entry(q.scenarios.entry())
            .entry(q.all.entry())
            .entry(q.events.entry())
            .entry(q.simulate.entry());
        let params = self.params.snapshot();
        self.memo.get_or_compute(key, || q.view(&params))
    }
}

#[async_trait]
impl Page for DispatchPage {
    fn name(&self) -> &'static str {
        VIEW
    }

    fn sync(&mut self, cache: &QueryCache) -> bool {
        let params = self.params.snapshot();
        let q = &mut self.queries;
        let mut moved = q.scenarios.sync(cache, &params);
        moved |= q.all.sync(cache, &params);
        moved |= q.events.sync(cache, &params);

        moved |= match selected_scenario(&params) {
            Some(key) => {
                let inputs = simulate_inputs(&params);
                let endpoint = catalog::dispatch_simulate();
                let snapshot = params.clone();
                q.simulate.sync(cache, &q.scenarios, inputs, move |payload| {
                    let list: ScenarioList = schema::parse(payload);
                    list.contains(&key).then(|| endpoint.resolve(&snapshot))
                })
            }
            None => q.simulate.clear(),
        };
        moved
    }

    async fn settle(&mut self) {
        let q = &mut self.queries;
        q.scenarios.settled().await;
        q.all.settled().await;
        q.events.settled().await;
        q.simulate.settled().await;
    }

    fn fingerprints(&self) -> Vec<Fingerprint> {
        let q = &self.queries;
        let mut fps: Vec<Fingerprint> = [&q.scenarios, &q.all, &q.events]
            .iter()
            .filter_map(|b| b.fingerprint().cloned())
            .collect();
        fps.extend(q.simulate.entry().map(|e| e.fingerprint.clone()));
        fps
    }

    fn render(&mut self) -> Value {
        serde_json::to_value(self.rendered()).unwrap_or(Value::Null)
    }
}

fn derive_view(
    params: &ParamSet,
    scenarios: &Upstream<ScenarioList>,
    all: &Upstream<SimulateAll>,
    events: &Upstream<HistoricalEvents>,
    result: &Upstream<SimulationResult>,
) -> DispatchView {
    let selected = params.value("scenario");
    let capacity = params.value("capacity_mw").as_f64();

    DispatchView {
        zone: params.value("zone").render(),
        capacity_mw: params.value("capacity_mw").render(),
        totals: all.section(|a| Totals {
            total_potential: Readout::from_value(a.total_potential_savings, |v| millions(v, 1)),
            base_price: Readout::from_value(a.base_price, currency),
        }),
        comparison: all.section(|a| comparison_bars(&a.scenarios)),
        scenarios: scenarios.section(|list| {
            list.scenarios
                .iter()
                .map(|s| ScenarioCard {
                    key: s.key.clone(),
                    name: Readout::text(s.name.as_deref()),
                    description: Readout::text(s.description.as_deref()),
                    price: Readout::from_value(s.price_level, |v| format!("${}", grouped(v, 3))),
                    duration: Readout::from_value(s.duration_hours, |v| format!("{}h", v)),
                    selected: s.key.as_deref().is_some() && selected.as_str() == s.key.as_deref(),
                })
                .collect()
        }),
        result: result.section(|r| result_panel(r, capacity)),
        spikes: events.section(|e| Spikes {
            count: Readout::from_value(e.event_count.map(|c| c as f64), |v| fixed(v, 0)),
            rows: e
                .events
                .iter()
                .take(SPIKE_ROWS)
                .map(|ev| SpikeRow {
                    datetime: Readout::text(ev.datetime.as_deref()),
                    rt_price: Readout::from_value(ev.rt_price, currency),
                    da_price: Readout::from_value(ev.da_price, currency),
                    spread: Readout::from_value(ev.spread, currency),
                })
                .collect(),
        }),
    }
}

/// Bars sorted by savings, largest first. Missing savings count as zero.
fn comparison_bars(results: &[SimulationResult]) -> Vec<Bar> {
    let mut bars: Vec<Bar> = results
        .iter()
        .map(|s| {
            let savings = s.total_savings.filter(|v| v.is_finite()).unwrap_or(0.0) / 1_000_000.0;
            let label = s
                .scenario
                .as_deref()
                .map(first_word)
                .filter(|w| !w.is_empty())
                .unwrap_or("Unknown");
            Bar {
                label: label.to_string(),
                key: s.scenario_key.clone(),
                savings_musd: round_to(savings, 2),
                tooltip: format!("${}M", fixed(savings, 2)),
            }
        })
        .collect();
    bars.sort_by(|a, b| b.savings_musd.total_cmp(&a.savings_musd));
    bars
}

fn result_panel(r: &SimulationResult, capacity_mw: Option<f64>) -> ResultPanel {
    let per_mw = match (r.total_savings, capacity_mw) {
        (Some(s), Some(c)) if c != 0.0 => Some(s / c),
        _ => None,
    };
    ResultPanel {
        scenario: Readout::text(r.scenario.as_deref()),
        total_savings: Readout::from_value(r.total_savings, |v| millions(v, 2)),
        savings_per_mw: Readout::from_value(per_mw, |v| format!("${}", grouped(v, 0))),
        total_energy: Readout::from_value(r.total_mwh, |v| format!("{} MWh", grouped(v, 3))),
        base_price: Readout::from_value(r.base_price, |v| format!("{}/MWh", currency(v))),
        stress_price: Readout::from_value(r.stress_price, |v| format!("${}/MWh", grouped(v, 3))),
        duration: Readout::from_value(r.duration_hours, |v| format!("{} hours", v)),
        capacity: Readout::from_value(r.capacity_mw, |v| format!("{} MW", v)),
    }
}
