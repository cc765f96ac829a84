//! Revenue Risk: VaR, volatility and Monte Carlo projections for one zone.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::params::{ParamSet, ParamStore};
use crate::query::{catalog, Fingerprint, QueryBinding, QueryCache};
use crate::view::derive::{
    read_current, series, time_label, InputKey, Memo, Section, Upstream,
};
use crate::view::format::{currency, fixed, percent, ratio_percent, thousands, Readout};
use crate::view::schema::{
    MonteCarloSummary, RiskSummary, VarBundle, VarMeasure, VolatilityPoint, VolatilityReport,
    ZoneRisk,
};

use super::Page;

pub const VIEW: &str = "risk";

const DEFAULT_POSITION: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ZoneCard {
    pub zone: Readout,
    pub volatility: Readout,
    pub current_price: Readout,
    pub avg_price: Readout,
    pub var_95: Readout,
    pub var_95_pct: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VarCard {
    pub title: &'static str,
    pub dollar: Readout,
    pub percent: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VolatilityChart {
    pub labels: Vec<String>,
    pub historical: Vec<Option<f64>>,
    pub ewma: Vec<Option<f64>>,
    pub garch: Vec<Option<f64>>,
    pub skewness: Readout,
    pub kurtosis: Readout,
    pub mean_return: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MonteCarloPanel {
    pub mean: Readout,
    pub p10: Readout,
    pub p50: Readout,
    pub p90: Readout,
    pub var_95: Readout,
    pub initial_price: Readout,
    pub mean_final: Readout,
    pub p5_final: Readout,
    pub p50_final: Readout,
    pub p95_final: Readout,
    pub max_final: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RiskView {
    pub zone: String,
    pub position_value: String,
    pub zones: Section<Vec<ZoneCard>>,
    pub var: Section<Vec<VarCard>>,
    pub volatility: Section<VolatilityChart>,
    pub monte_carlo: Section<MonteCarloPanel>,
}

struct Queries {
    summary: QueryBinding,
    var: QueryBinding,
    volatility: QueryBinding,
    monte_carlo: QueryBinding,
}

impl Queries {
    fn all(&self) -> [&QueryBinding; 4] {
        [&self.summary, &self.var, &self.volatility, &self.monte_carlo]
    }

    fn view(&self, params: &ParamSet) -> RiskView {
        let summary: Upstream<RiskSummary> = read_current(&self.summary.lookup(params));
        let var: Upstream<VarBundle> = read_current(&self.var.lookup(params));
        let volatility: Upstream<VolatilityReport> =
            read_current(&self.volatility.lookup(params));
        let monte_carlo: Upstream<MonteCarloSummary> =
            read_current(&self.monte_carlo.lookup(params));
        RiskView {
            zone: params.value("zone").render(),
            position_value: params.value("position_value").render(),
            zones: summary.section(|s| s.zones.iter().map(zone_card).collect()),
            var: var.section(var_cards),
            volatility: volatility.section(volatility_chart),
            monte_carlo: monte_carlo.section(monte_carlo_panel),
        }
    }
}

pub struct RiskPage {
    params: ParamStore,
    queries: Queries,
    memo: Memo<RiskView>,
}

impl RiskPage {
    pub fn new(cfg: &Config) -> Self {
        let initial = ParamSet::new()
            .with("zone", cfg.default_zone.as_str())
            .with("position_value", DEFAULT_POSITION)
            .with("capacity_mw", cfg.default_capacity_mw);
        Self {
            params: ParamStore::new(VIEW, initial),
            queries: Queries {
                summary: QueryBinding::new(catalog::risk_summary()),
                var: QueryBinding::new(catalog::risk_var()),
                volatility: QueryBinding::new(catalog::risk_volatility()),
                monte_carlo: QueryBinding::new(catalog::risk_monte_carlo()),
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

    pub fn set_position_input(&mut self, raw: &str) {
        self.params.set_number_input("position_value", raw);
    }

    pub fn set_capacity_input(&mut self, raw: &str) {
        self.params.set_number_input("capacity_mw", raw);
    }

    pub fn view(&self) -> RiskView {
        self.queries.view(&self.params.snapshot())
    }

    pub fn rendered(&mut self) -> &RiskView {
        let q = &self.queries;
        let key = q
            .all()
            .iter()
            .fold(InputKey::new(self.params.version()), |k, b| k.entry(b.entry()));
        let params = self.params.snapshot();
        self.memo.get_or_compute(key, || q.view(&params))
    }
}

#[async_trait]
impl Page for RiskPage {
    fn name(&self) -> &'static str {
        VIEW
    }

    fn sync(&mut self, cache: &QueryCache) -> bool {
        let params = self.params.snapshot();
        let q = &mut self.queries;
        let mut moved = q.summary.sync(cache, &params);
        moved |= q.var.sync(cache, &params);
        moved |= q.volatility.sync(cache, &params);
        moved |= q.monte_carlo.sync(cache, &params);
        moved
    }

    async fn settle(&mut self) {
        let q = &mut self.queries;
        q.summary.settled().await;
        q.var.settled().await;
        q.volatility.settled().await;
        q.monte_carlo.settled().await;
    }

    fn fingerprints(&self) -> Vec<Fingerprint> {
        self.queries.all().iter().filter_map(|b| b.fingerprint().cloned()).collect()
    }

    fn render(&mut self) -> Value {
        serde_json::to_value(self.rendered()).unwrap_or(Value::Null)
    }
}

fn zone_card(z: &ZoneRisk) -> ZoneCard {
    ZoneCard {
        zone: Readout::text(z.zone.as_deref()),
        volatility: Readout::from_value(z.volatility_annualized, |v| {
            format!("{}% vol", fixed(v, 0))
        }),
        current_price: Readout::from_value(z.current_price, currency),
        avg_price: Readout::from_value(z.avg_price, currency),
        var_95: Readout::from_value(z.var_95_dollar, thousands),
        var_95_pct: Readout::from_value(z.var_95_pct, percent),
    }
}

fn var_cards(b: &VarBundle) -> Vec<VarCard> {
    let card = |title: &'static str, m: Option<VarMeasure>| VarCard {
        title,
        dollar: Readout::from_value(m.and_then(|m| m.dollar), thousands),
        percent: Readout::from_value(m.and_then(|m| m.percent), ratio_percent),
    };
    vec![
        card("Parametric VaR", b.parametric_var),
        card("Historical VaR", b.historical_var),
        card("Monte Carlo VaR", b.monte_carlo_var),
        card("Cornish-Fisher VaR", b.cornish_fisher_var),
        card("Expected Shortfall", b.expected_shortfall),
    ]
}

fn volatility_chart(r: &VolatilityReport) -> VolatilityChart {
    let line = |y: fn(&VolatilityPoint) -> Option<f64>| {
        series(&r.volatility_series, |p: &VolatilityPoint| p.datetime.clone(), y)
    };
    let historical = line(|p| p.historical);
    let moments = r.summary.clone().unwrap_or_default();
    VolatilityChart {
        labels: historical.iter().map(|p| time_label(&p.x).unwrap_or_default()).collect(),
        historical: historical.iter().map(|p| p.y).collect(),
        ewma: line(|p| p.ewma).into_iter().map(|p| p.y).collect(),
        garch: line(|p| p.garch).into_iter().map(|p| p.y).collect(),
        skewness: Readout::from_value(moments.skewness, |v| fixed(v, 2)),
        kurtosis: Readout::from_value(moments.kurtosis, |v| fixed(v, 2)),
        mean_return: Readout::from_value(moments.mean_return, |v| {
            format!("{}%", fixed(v * 100.0, 3))
        }),
    }
}

fn monte_carlo_panel(m: &MonteCarloSummary) -> MonteCarloPanel {
    let paths = m.path_stats.clone().unwrap_or_default();
    MonteCarloPanel {
        mean: Readout::from_value(m.mean_revenue, thousands),
        p10: Readout::from_value(m.p10_revenue, thousands),
        p50: Readout::from_value(m.p50_revenue, thousands),
        p90: Readout::from_value(m.p90_revenue, thousands),
        var_95: Readout::from_value(m.var_95, thousands),
        initial_price: Readout::from_value(paths.initial_price, currency),
        mean_final: Readout::from_value(paths.mean_final, currency),
        p5_final: Readout::from_value(paths.p5, currency),
        p50_final: Readout::from_value(paths.p50, currency),
        p95_final: Readout::from_value(paths.p95, currency),
        max_final: Readout::from_value(paths.max, currency),
    }
}
