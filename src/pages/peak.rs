//! Peak Predictor: probability that an hour sets a 4CP transmission peak,
//! and what curtailing through it is worth.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::params::{ParamSet, ParamStore};
use crate::query::{catalog, param_key, DependentBinding, Fingerprint, QueryBinding, QueryCache};
use crate::view::derive::{read_current, InputKey, Memo, Section, Upstream};
use crate::view::format::{fixed, grouped, kilo_mw, round_to, thousands, Readout};
use crate::view::schema::{self, DrValue, PeakProbability, RiskLevel};

use super::Page;

pub const VIEW: &str = "peak";

/// Sent to the DR valuation when the prediction carries no usable probability.
const FALLBACK_PROBABILITY: f64 = 0.5;

const MONTHS: [&str; 13] = [
    "", "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Recent 4CP intervals: (year, month, day, hour, system load MW).
const HISTORICAL_PEAKS: [(u16, usize, u8, u8, f64); 8] = [
    (2024, 6, 26, 17, 74_521.0),
    (2024, 7, 22, 17, 76_234.0),
    (2024, 8, 20, 17, 77_892.0),
    (2024, 9, 5, 16, 73_156.0),
    (2023, 6, 27, 17, 72_891.0),
    (2023, 7, 27, 17, 75_432.0),
    (2023, 8, 10, 17, 85_464.0),
    (2023, 9, 6, 16, 71_234.0),
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Gauge {
    pub percent: Readout,
    /// Bar fill, 0..=100.
    pub fill: f64,
    pub risk_level: RiskLevel,
    pub reason: Readout,
    pub current_load: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactorRow {
    pub label: String,
    pub value: String,
    pub impact: &'static str,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Savings {
    pub expected_annual: Readout,
    pub max_annual: Readout,
    pub per_mw: Readout,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakRow {
    pub year: u16,
    pub month: &'static str,
    pub day: u8,
    pub hour: String,
    pub load_mw: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakView {
    pub gauge: Section<Gauge>,
    pub factors: Section<Vec<FactorRow>>,
    pub savings: Section<Savings>,
    pub historical_peaks: Vec<PeakRow>,
}

struct Queries {
    probability: QueryBinding,
    dr_value: DependentBinding,
}

impl Queries {
    fn view(&self, params: &ParamSet) -> PeakView {
        let prediction: Upstream<PeakProbability> = read_current(&self.probability.lookup(params));
        let dr_value = self.dr_value.lookup(&self.probability, params, &dr_inputs(params));
        let dr: Upstream<DrValue> = read_current(&dr_value);
        PeakView {
            gauge: prediction.section(gauge),
            factors: prediction
                .section(|p| p.factors.iter().map(|(k, v)| factor_row(k, v)).collect()),
            savings: dr.section(|d| Savings {
                expected_annual: Readout::from_value(d.expected_annual_savings, thousands),
                max_annual: Readout::from_value(d.max_annual_savings, thousands),
                per_mw: Readout::from_value(d.savings_per_mw, |v| format!("${}", grouped(v, 0))),
            }),
            historical_peaks: historical_peaks(),
        }
    }
}

pub struct PeakPage {
    params: ParamStore,
    queries: Queries,
    memo: Memo<PeakView>,
}

impl PeakPage {
    pub fn new(cfg: &Config) -> Self {
        let initial = ParamSet::new()
            .with("load_mw", 70_000.0)
            .with("temp_f", 95.0)
            .with("hour", 17.0)
            .with("month", 8.0)
            .with("capacity_mw", cfg.default_capacity_mw);
        Self {
            params: ParamStore::new(VIEW, initial),
            queries: Queries {
                probability: QueryBinding::new(catalog::peak_probability()),
                dr_value: DependentBinding::new(),
            },
            memo: Memo::default(),
        }
    }

    pub fn params(&self) -> Arc<ParamSet> {
        self.params.snapshot()
    }

    /// Numeric inputs: `load_mw`, `temp_f`, `hour`, `month`, `capacity_mw`.
    pub fn set_input(&mut self, name: &str, raw: &str) {
        self.params.set_number_input(name, raw);
    }

    pub fn view(&self) -> PeakView {
        self.queries.view(&self.params.snapshot())
    }

    pub fn rendered(&mut self) -> &PeakView {
        let q = &self.queries;
        let key = InputKey::new(self.params.version())
            .entry(q.probability.entry())
            .entry(q.dr_value.entry());
        let params = self.params.snapshot();
        self.memo.get_or_compute(key, || q.view(&params))
    }
}

fn dr_inputs(params: &ParamSet) -> String {
    param_key(params, &["capacity_mw"])
}

/// The probability the DR valuation is asked about. Any successful
/// prediction links, a backend fault body included; a zero, missing or
/// unparseable probability falls back to even odds.
fn linked_probability(payload: &Value) -> f64 {
    let prediction: PeakProbability = schema::parse(payload);
    prediction
        .probability
        .filter(|p| p.is_finite() && *p != 0.0)
        .unwrap_or(FALLBACK_PROBABILITY)
}

#[async_trait]
impl Page for PeakPage {
    fn name(&self) -> &'static str {
        VIEW
    }

    fn sync(&mut self, cache: &QueryCache) -> bool {
        let params = self.params.snapshot();
        let q = &mut self.queries;
        let mut moved = q.probability.sync(cache, &params);

        let endpoint = catalog::peak_dr_value();
        let snapshot = params.clone();
        moved |= q.dr_value.sync(cache, &q.probability, dr_inputs(&params), move |payload| {
            let p = linked_probability(payload);
            Some(endpoint.resolve(&snapshot.as_ref().clone().with("probability", p)))
        });
        moved
    }

    async fn settle(&mut self) {
        let q = &mut self.queries;
        q.probability.settled().await;
        q.dr_value.settled().await;
    }

    fn fingerprints(&self) -> Vec<Fingerprint> {
        let q = &self.queries;
        let mut fps: Vec<Fingerprint> =
            q.probability.fingerprint().cloned().into_iter().collect();
        fps.extend(q.dr_value.entry().map(|e| e.fingerprint.clone()));
        fps
    }

    fn render(&mut self) -> Value {
        serde_json::to_value(self.rendered()).unwrap_or(Value::Null)
    }
}

fn gauge(p: &PeakProbability) -> Gauge {
    let fill = p
        .probability
        .filter(|v| v.is_finite())
        .map(|v| (v * 100.0).clamp(0.0, 100.0))
        .unwrap_or(0.0);
    Gauge {
        percent: Readout::from_value(p.probability, |v| fixed(v * 100.0, 0)),
        fill: round_to(fill, 1),
        risk_level: p.risk_level.unwrap_or(RiskLevel::Low),
        reason: Readout::text(p.reason.as_deref()),
        current_load: Readout::from_value(p.current_load_mw, kilo_mw),
    }
}

/// `peak_hour` is labelled "PEAK HOUR"; only the first underscore is
/// replaced, so `load_level_x` reads "LOAD LEVEL_X".
fn factor_row(key: &str, value: &str) -> FactorRow {
    FactorRow {
        label: key.replacen('_', " ", 1).to_uppercase(),
        value: value.to_string(),
        impact: "Increases probability",
    }
}

fn historical_peaks() -> Vec<PeakRow> {
    HISTORICAL_PEAKS
        .iter()
        .map(|&(year, month, day, hour, load)| PeakRow {
            year,
            month: MONTHS.get(month).copied().unwrap_or(""),
            day,
            hour: format!("{}:00", hour),
            load_mw: grouped(load, 0),
        })
        .collect()
}
