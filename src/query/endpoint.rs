use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};

use crate::fetch::{ApiRequest, Method};
use crate::params::{ParamSet, ParamValue};

/// Where a query parameter gets its value.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// Read from the parameter set under this name.
    Param(&'static str),
    /// Constant baked into the template.
    Fixed(&'static str),
}

/// Request template. `{name}` segments in `path` and every query/body
/// argument are filled from a parameter set.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub method: Method,
    pub path: &'static str,
    pub query: Vec<(&'static str, Arg)>,
    pub body: Vec<&'static str>,
}

impl Endpoint {
    pub fn get(path: &'static str) -> Self {
        Self { method: Method::Get, path, query: Vec::new(), body: Vec::new() }
    }

    pub fn post(path: &'static str, body: &[&'static str]) -> Self {
        Self { method: Method::Post, path, query: Vec::new(), body: body.to_vec() }
    }

    pub fn param(mut self, name: &'static str) -> Self {
        self.query.push((name, Arg::Param(name)));
        self
    }

    pub fn fixed(mut self, name: &'static str, value: &'static str) -> Self {
        self.query.push((name, Arg::Fixed(value)));
        self
    }

    pub fn resolve(&self, params: &ParamSet) -> ApiRequest {
        let path = fill_path(self.path, params);
        let query = self
            .query
            .iter()
            .map(|(name, arg)| {
                let value = match arg {
                    Arg::Param(p) => params.value(p).render(),
                    Arg::Fixed(v) => v.to_string(),
                };
                (name.to_string(), value)
            })
            .collect();
        let body = match self.method {
            Method::Get => None,
            Method::Post => Some(body_json(&self.body, params)),
        };
        ApiRequest { method: self.method, path, query, body }
    }
}

/// Characters escaped inside one path segment. A space becomes `%20`; `+`
/// stays literal.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn fill_path(template: &str, params: &ParamSet) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else { break };
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..open + close];
        let rendered = params.value(name).render();
        out.extend(utf8_percent_encode(&rendered, SEGMENT));
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

/// Undefined fields are left out, as a JSON serializer drops them.
fn body_json(names: &[&'static str], params: &ParamSet) -> Value {
    let mut map = Map::new();
    for name in names {
        let v = match params.value(name) {
            ParamValue::Text(s) => Value::String(s),
            ParamValue::Number(n) => number_json(n),
            ParamValue::Undefined => continue,
        };
        map.insert(name.to_string(), v);
    }
    Value::Object(map)
}

/// Whole numbers go out as integers, non-finite ones as null.
fn number_json(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Every backend route the pages read.
pub mod catalog {
    use super::Endpoint;

    pub fn dispatch_scenarios() -> Endpoint {
        Endpoint::get("/api/dispatch/scenarios")
    }

    pub fn dispatch_simulate_all() -> Endpoint {
        Endpoint::get("/api/dispatch/simulate-all").param("capacity_mw").param("zone")
    }

    pub fn dispatch_simulate() -> Endpoint {
        Endpoint::get("/api/dispatch/simulate/{scenario}").param("capacity_mw").param("zone")
    }

    pub fn dispatch_historical_events() -> Endpoint {
        Endpoint::get("/api/dispatch/historical-events")
            .fixed("threshold_price", "500")
            .param("zone")
    }

    pub fn risk_summary() -> Endpoint {
        Endpoint::get("/api/risk/summary")
    }

    pub fn risk_var() -> Endpoint {
        Endpoint::get("/api/risk/var/{zone}").param("position_value")
    }

    pub fn risk_volatility() -> Endpoint {
        Endpoint::get("/api/risk/volatility/{zone}")
    }

    pub fn risk_monte_carlo() -> Endpoint {
        Endpoint::get("/api/risk/monte-carlo/{zone}")
            .param("capacity_mw")
            .fixed("hours", "24")
            .fixed("n_paths", "1000")
    }

    pub fn peak_probability() -> Endpoint {
        Endpoint::get("/api/peak/probability")
            .param("load_mw")
            .param("temp_f")
            .param("hour")
            .param("month")
    }

    pub fn peak_dr_value() -> Endpoint {
        Endpoint::get("/api/peak/dr-value").param("capacity_mw").param("probability")
    }

    pub fn knowledge_search() -> Endpoint {
        Endpoint::post("/api/search", &["query", "limit"])
    }
}
