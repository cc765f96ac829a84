use std::sync::Arc;

use crate::logging::log_param_change;

/// A scalar a user can adjust. `Undefined` is what a missing or unselected
/// input looks like; it is passed through, not rejected.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Text(String),
    Number(f64),
    Undefined,
}

impl ParamValue {
    /// Text as it appears in a request path or query string.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Text(s) => s.clone(),
            ParamValue::Number(n) => render_number(*n),
            ParamValue::Undefined => "undefined".to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            ParamValue::Text(s) => s.trim().is_empty(),
            ParamValue::Number(_) => false,
            ParamValue::Undefined => true,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<Option<&str>> for ParamValue {
    fn from(s: Option<&str>) -> Self {
        s.map(ParamValue::from).unwrap_or(ParamValue::Undefined)
    }
}

fn render_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

/// Numeric form-field coercion: blank is 0, garbage is NaN.
pub fn coerce_number(input: &str) -> ParamValue {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return ParamValue::Number(0.0);
    }
    ParamValue::Number(trimmed.parse::<f64>().unwrap_or(f64::NAN))
}

/// Ordered name → value mapping. Insertion order is kept; replacing a value
/// keeps its position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.put(name, value.into());
        self
    }

    fn put(&mut self, name: &str, value: ParamValue) {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Missing names read as `Undefined`.
    pub fn value(&self, name: &str) -> ParamValue {
        self.get(name).cloned().unwrap_or(ParamValue::Undefined)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Per-view parameter state. Each mutation publishes a fresh snapshot;
/// earlier snapshots are never touched.
#[derive(Debug)]
pub struct ParamStore {
    view: String,
    snapshot: Arc<ParamSet>,
    version: u64,
}

impl ParamStore {
    pub fn new(view: &str, initial: ParamSet) -> Self {
        Self { view: view.to_string(), snapshot: Arc::new(initial), version: 0 }
    }

    pub fn snapshot(&self) -> Arc<ParamSet> {
        self.snapshot.clone()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) -> Arc<ParamSet> {
        let value = value.into();
        let mut next = (*self.snapshot).clone();
        log_param_change(&self.view, name, &value.render(), self.version + 1);
        next.put(name, value);
        self.snapshot = Arc::new(next);
        self.version += 1;
        self.snapshot.clone()
    }

    /// Raw text from a numeric input field.
    pub fn set_number_input(&mut self, name: &str, raw: &str) -> Arc<ParamSet> {
        self.set(name, coerce_number(raw))
    }
}
