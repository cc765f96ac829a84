use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    /// Prefix for every request path. Empty means same-origin relative paths.
    pub api_base: String,
    /// How long an unreferenced cache entry survives before garbage collection.
    pub gc_secs: u64,
    pub refresh_secs: u64,
    pub default_zone: String,
    pub default_capacity_mw: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            gc_secs: 300,
            refresh_secs: 60,
            default_zone: "HOUSTON".to_string(),
            default_capacity_mw: 100.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            api_base: normalize_base(&std::env::var("GRID_API_URL").unwrap_or_default()),
            gc_secs: env_or("GRID_GC_SECS", d.gc_secs),
            refresh_secs: env_or("GRID_REFRESH_SECS", d.refresh_secs),
            default_zone: std::env::var("GRID_ZONE").unwrap_or(d.default_zone),
            default_capacity_mw: env_or("GRID_CAPACITY_MW", d.default_capacity_mw),
        }
    }

    pub fn gc_window(&self) -> Duration {
        Duration::from_secs(self.gc_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs.max(1))
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    parse_or(std::env::var(name).ok().as_deref(), default)
}

/// Unset or unparseable values fall back to the default.
fn parse_or<T: FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
