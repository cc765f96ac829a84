//! Response records for the analytics backend.
//!
//! Every field is optional and every field parses leniently: a missing key,
//! a null, or a value of the wrong type all read as `None` (or an empty
//! list) instead of failing the whole record.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Parse a payload into `T`. Anything that is not an object yields
/// `T::default()`.
pub fn parse<T: DeserializeOwned + Default>(payload: &Value) -> T {
    if !payload.is_object() {
        return T::default();
    }
    T::deserialize(payload).unwrap_or_default()
}

/// The analytics services report failures as `{"error": "..."}` with a 200.
pub fn backend_error(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

mod lenient {
    use super::*;

    pub fn f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => {
                n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            }
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn record<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let v = Value::deserialize(d)?;
        if !v.is_object() {
            return Ok(None);
        }
        Ok(T::deserialize(&v).ok())
    }

    /// Rows that fail to parse are dropped; a non-array is empty.
    pub fn list<'de, D: Deserializer<'de>, T: DeserializeOwned>(d: D) -> Result<Vec<T>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items.iter().filter_map(|v| T::deserialize(v).ok()).collect(),
            _ => Vec::new(),
        })
    }

    /// Factor maps: values are shown as text, whatever their JSON type.
    pub fn text_map<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<(String, String)>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, text)
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn risk_level<'de, D>(d: D) -> Result<Option<super::RiskLevel>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => super::RiskLevel::parse(&s),
            _ => None,
        })
    }
}

// =============================================================================
// Event Dispatch
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default, deserialize_with = "lenient::string")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub price_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub duration_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ScenarioList {
    #[serde(default, deserialize_with = "lenient::list")]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioList {
    pub fn contains(&self, key: &str) -> bool {
        self.scenarios.iter().any(|s| s.key.as_deref() == Some(key))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SimulationResult {
    #[serde(default, deserialize_with = "lenient::string")]
    pub scenario: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub scenario_key: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub total_savings: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub savings_per_mwh: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub base_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub stress_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub duration_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub capacity_mw: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub total_mwh: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SimulateAll {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub capacity_mw: Option<f64>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub base_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub scenarios: Vec<SimulationResult>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub total_potential_savings: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub avg_savings_per_scenario: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SpikeEvent {
    #[serde(default, deserialize_with = "lenient::string")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub rt_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub da_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub spread: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct HistoricalEvents {
    #[serde(default, deserialize_with = "lenient::string")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub event_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub avg_spike_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub max_spike_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub events: Vec<SpikeEvent>,
}

// =============================================================================
// Revenue Risk
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ZoneRisk {
    #[serde(default, deserialize_with = "lenient::string")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub current_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub avg_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub volatility_annualized: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub var_95_dollar: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub var_95_pct: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RiskSummary {
    #[serde(default, deserialize_with = "lenient::list")]
    pub zones: Vec<ZoneRisk>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub analysis_period_days: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct VarMeasure {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub dollar: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub percent: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VarBundle {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub confidence_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub position_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub parametric_var: Option<VarMeasure>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub historical_var: Option<VarMeasure>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub monte_carlo_var: Option<VarMeasure>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub cornish_fisher_var: Option<VarMeasure>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub expected_shortfall: Option<VarMeasure>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VolatilityPoint {
    #[serde(default, deserialize_with = "lenient::string")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub historical: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub ewma: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub garch: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ReturnMoments {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub current_historical: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub current_ewma: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub current_garch: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub mean_return: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub return_std: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub skewness: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub kurtosis: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct VolatilityReport {
    #[serde(default, deserialize_with = "lenient::string")]
    pub zone: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub days_analyzed: Option<u64>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub summary: Option<ReturnMoments>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub volatility_series: Vec<VolatilityPoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PathStats {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub initial_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub mean_final: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub std_final: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p5: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p10: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p25: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p50: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p75: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p90: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p95: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub min: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub max: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct MonteCarloSummary {
    #[serde(default, deserialize_with = "lenient::string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub n_simulations: Option<u64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub mean_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub std_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p5_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p10_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p50_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p90_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub p95_revenue: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub var_95: Option<f64>,
    #[serde(default, deserialize_with = "lenient::record")]
    pub path_stats: Option<PathStats>,
}

// =============================================================================
// Peak Predictor
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    Low,
    Moderate,
    Elevated,
    High,
    Critical,
}

impl RiskLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Some(RiskLevel::None),
            "LOW" => Some(RiskLevel::Low),
            "MODERATE" => Some(RiskLevel::Moderate),
            "ELEVATED" => Some(RiskLevel::Elevated),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::Elevated => "ELEVATED",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct PeakProbability {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub probability: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub probability_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient::risk_level")]
    pub risk_level: Option<RiskLevel>,
    #[serde(default, deserialize_with = "lenient::text_map")]
    pub factors: Vec<(String, String)>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub current_load_mw: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub forecast_temp_f: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DrValue {
    #[serde(default, deserialize_with = "lenient::f64")]
    pub capacity_mw: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub transmission_rate_per_kw_year: Option<f64>,
    #[serde(default, rename = "4cp_probability", deserialize_with = "lenient::f64")]
    pub probability: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub expected_annual_savings: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub max_annual_savings: Option<f64>,
    #[serde(default, deserialize_with = "lenient::f64")]
    pub savings_per_mw: Option<f64>,
}

// =============================================================================
// Knowledge Search
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SearchHit {
    #[serde(default, alias = "TITLE", deserialize_with = "lenient::string")]
    pub title: Option<String>,
    #[serde(default, alias = "EXCERPT", deserialize_with = "lenient::string")]
    pub excerpt: Option<String>,
    #[serde(default, alias = "PUBLISHED_DATE", deserialize_with = "lenient::string")]
    pub published_date: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SearchResults {
    #[serde(default, deserialize_with = "lenient::string")]
    pub query: Option<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub results: Vec<SearchHit>,
    #[serde(default, deserialize_with = "lenient::u64")]
    pub total: Option<u64>,
}
