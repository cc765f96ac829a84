//! Display formatters for summary figures.
//!
//! Rounding is half away from zero at the requested number of places.

use serde::Serialize;
use std::fmt;

/// Shown wherever a figure cannot be computed.
pub const PLACEHOLDER: &str = "--";

/// A formatted figure, or the placeholder when an input is missing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Readout {
    Unavailable,
    Ready(String),
}

impl Readout {
    /// Format `value` with `f`; `None` and non-finite values are unavailable.
    pub fn from_value(value: Option<f64>, f: impl Fn(f64) -> String) -> Self {
        match value {
            Some(v) if v.is_finite() => Readout::Ready(f(v)),
            _ => Readout::Unavailable,
        }
    }

    pub fn text(text: Option<&str>) -> Self {
        match text {
            Some(t) => Readout::Ready(t.to_string()),
            None => Readout::Unavailable,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Readout::Ready(_))
    }
}

impl fmt::Display for Readout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readout::Unavailable => f.write_str(PLACEHOLDER),
            Readout::Ready(s) => f.write_str(s),
        }
    }
}

impl Serialize for Readout {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub fn round_to(v: f64, dp: u32) -> f64 {
    let scale = 10f64.powi(dp as i32);
    (v * scale).round() / scale
}

/// Fixed-point text with exactly `dp` decimals.
pub fn fixed(v: f64, dp: u32) -> String {
    let rounded = round_to(v, dp);
    // keep "-0.00" out of the output
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", dp as usize, rounded)
}

/// Integer part grouped by thousands, at most `max_dp` decimals with
/// trailing zeros dropped: 1234567.8 at 0 is "1,234,568".
pub fn grouped(v: f64, max_dp: u32) -> String {
    let text = fixed(v, max_dp);
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut out = String::with_capacity(text.len() + int_part.len() / 3);
    out.push_str(sign);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac_part.map(|f| f.trim_end_matches('0')).filter(|f| !f.is_empty()) {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// `$X.XXM` at `dp` places; 2_500_000 at 2 is "$2.50M".
pub fn millions(v: f64, dp: u32) -> String {
    format!("${}M", fixed(v / 1_000_000.0, dp))
}

/// `$XK`, whole thousands.
pub fn thousands(v: f64) -> String {
    format!("${}K", fixed(v / 1_000.0, 0))
}

pub fn currency(v: f64) -> String {
    format!("${}", fixed(v, 2))
}

/// A value already expressed in percent, one decimal.
pub fn percent(v: f64) -> String {
    format!("{}%", fixed(v, 1))
}

/// A fraction shown as percent with two decimals: 0.05 is "5.00%".
pub fn ratio_percent(v: f64) -> String {
    format!("{}%", fixed(v * 100.0, 2))
}

/// Megawatts shown in thousands: 55_660 is "55.7k MW".
pub fn kilo_mw(v: f64) -> String {
    format!("{}k MW", fixed(v / 1_000.0, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millions() {
        assert_eq!(millions(2_500_000.0, 2), "$2.50M");
        assert_eq!(millions(12_340_000.0, 1), "$12.3M");
        assert_eq!(millions(0.0, 2), "$0.00M");
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(fixed(0.125, 2), "0.13");
        assert_eq!(fixed(-2.5, 0), "-3");
        assert_eq!(fixed(-0.001, 2), "0.00");
        assert_eq!(round_to(3.14159, 2), 3.14);
    }

    #[test]
    fn test_small_formatters() {
        assert_eq!(thousands(50_000.0), "$50K");
        assert_eq!(thousands(1_499.0), "$1K");
        assert_eq!(currency(42.5), "$42.50");
        assert_eq!(percent(37.25), "37.3%");
        assert_eq!(ratio_percent(0.05), "5.00%");
        assert_eq!(kilo_mw(55_660.0), "55.7k MW");
    }

    #[test]
    fn test_grouped() {
        assert_eq!(grouped(1_234_567.8, 0), "1,234,568");
        assert_eq!(grouped(999.0, 0), "999");
        assert_eq!(grouped(-45_000.5, 1), "-45,000.5");
        assert_eq!(grouped(2_400.0, 3), "2,400");
        assert_eq!(grouped(1_234.25, 3), "1,234.25");
    }

    #[test]
    fn test_readout() {
        assert_eq!(Readout::from_value(None, currency).to_string(), "--");
        assert_eq!(Readout::from_value(Some(f64::NAN), currency), Readout::Unavailable);
        assert_eq!(Readout::from_value(Some(3.0), currency).to_string(), "$3.00");
        assert_eq!(serde_json::to_value(Readout::Unavailable).unwrap(), serde_json::json!("--"));
    }
}
