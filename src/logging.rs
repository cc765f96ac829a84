//! Structured logging for the dashboard data layer.
//!
//! Every record is one JSON object per line:
//! 1. Levels (TRACE → ERROR) with a `LOG_LEVEL` floor
//! 2. Domains for filtering via `LOG_DOMAINS`
//! 3. Run id + sequence number so interleaved async logs can be re-ordered
//!
//! Lines go to stderr. With `LOG_DIR` set they are also written under
//! `<LOG_DIR>/<run_id>/`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::query::fingerprint::Fingerprint;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_LEVEL").as_deref().unwrap_or("info"))
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "trace" => Level::Trace,
            "debug" => Level::Debug,
            "warn" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Fetch,    // Network calls and their outcome
    Cache,    // Entry lifecycle: dispatch, settle, supersede, evict
    Params,   // Parameter store mutations
    View,     // Derived aggregates handed to renderers
    Schedule, // Timers owned by views
    System,   // Startup, shutdown, driver loop
    Profile,  // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Fetch => "fetch",
            Domain::Cache => "cache",
            Domain::Params => "params",
            Domain::View => "view",
            Domain::Schedule => "schedule",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        domain_listed(std::env::var("LOG_DOMAINS").ok().as_deref(), self.as_str())
    }
}

fn domain_listed(filter: Option<&str>, name: &str) -> bool {
    match filter {
        None | Some("all") => true,
        Some(domains) => domains.split(',').any(|d| d.trim() == name),
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sink: Option<FileSink>,
}

#[derive(Debug)]
struct FileSink {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl FileSink {
    fn open(base: &str, run_id: &str) -> Option<Self> {
        let mut run_dir = PathBuf::from(base);
        run_dir.push(run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
            return None;
        }
        let events = File::create(run_dir.join("events.jsonl"))
            .map_err(|err| eprintln!("[log] failed to create events log: {}", err))
            .ok()?;
        let trace = File::create(run_dir.join("trace.jsonl"))
            .map_err(|err| eprintln!("[log] failed to create trace log: {}", err))
            .ok()?;
        Some(Self {
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
        })
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sink = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| FileSink::open(&base, &run_id));
        RunContext { run_id, sink }
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "cookie", "Cookie"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["fingerprint", "digest", "endpoint", "view", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain, event, fields);
}

fn build_record(
    run_id: &str,
    level: Level,
    domain: Domain,
    event: &str,
    fields: Map<String, Value>,
) -> Value {
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry)
}

fn emit_record(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let line = build_record(&ctx.run_id, level, domain, event, fields).to_string();
    if let Some(sink) = &ctx.sink {
        match level {
            Level::Trace | Level::Debug => write_line(&sink.trace, &line),
            _ => write_line(&sink.events, &line),
        }
    }
    eprintln!("{}", line);
}

// =============================================================================
// Data-layer events
// =============================================================================

/// Full key plus a short digest that stays greppable when the key carries a
/// long POST body.
fn query_fields(fingerprint: &Fingerprint, generation: u64) -> Map<String, Value> {
    obj(&[
        ("fingerprint", v_str(fingerprint.as_str())),
        ("digest", v_str(&fingerprint.digest())),
        ("generation", json!(generation)),
    ])
}

pub fn log_dispatch(fingerprint: &Fingerprint, generation: u64) {
    log(Level::Debug, Domain::Cache, "dispatch", query_fields(fingerprint, generation));
}

pub fn log_settle(fingerprint: &Fingerprint, generation: u64, outcome: &str) {
    let mut fields = query_fields(fingerprint, generation);
    fields.insert("outcome".to_string(), v_str(outcome));
    log(Level::Debug, Domain::Cache, "settle", fields);
}

/// A response arrived for a generation that is no longer current.
pub fn log_superseded(fingerprint: &Fingerprint, generation: u64, current: Option<u64>) {
    let mut fields = query_fields(fingerprint, generation);
    fields.insert(
        "current_generation".to_string(),
        current.map(|g| json!(g)).unwrap_or(Value::Null),
    );
    log(Level::Debug, Domain::Cache, "superseded", fields);
}

pub fn log_fetch_error(path: &str, error: &str) {
    log(
        Level::Warn,
        Domain::Fetch,
        "request_failed",
        obj(&[("endpoint", v_str(path)), ("error", v_str(error))]),
    );
}

pub fn log_param_change(view: &str, name: &str, value: &str, version: u64) {
    log(
        Level::Trace,
        Domain::Params,
        "set",
        obj(&[
            ("view", v_str(view)),
            ("name", v_str(name)),
            ("value", v_str(value)),
            ("version", json!(version)),
        ]),
    );
}

pub fn log_view(view: &str, rendered: Value) {
    log(Level::Info, Domain::View, "render", obj(&[("view", v_str(view)), ("model", rendered)]));
}

/// Scheduled-task lifecycle: `scheduled`, `fired`, `cancelled`.
pub fn log_timer(task: &str, event: &str, delay_ms: u64) {
    log(
        Level::Debug,
        Domain::Schedule,
        event,
        obj(&[("task", v_str(task)), ("delay_ms", json!(delay_ms))]),
    );
}

// =============================================================================
// Helpers
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn test_level_parse_defaults_to_info() {
        assert_eq!(Level::parse("debug"), Level::Debug);
        assert_eq!(Level::parse("verbose"), Level::Info);
    }

    #[test]
    fn test_domain_filter() {
        assert!(domain_listed(None, "cache"));
        assert!(domain_listed(Some("all"), "cache"));
        assert!(domain_listed(Some("fetch, cache"), "cache"));
        assert!(!domain_listed(Some("fetch,view"), "cache"));
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_record_shape_and_redaction() {
        let rec = build_record(
            "r-test",
            Level::Warn,
            Domain::Fetch,
            "request_failed",
            obj(&[
                ("endpoint", v_str("/api/risk/summary")),
                ("authorization", v_str("Bearer secret")),
                ("status", json!(503)),
            ]),
        );
        assert_eq!(rec["lvl"], "WARN");
        assert_eq!(rec["component"], "fetch");
        assert_eq!(rec["endpoint"], "/api/risk/summary");
        assert_eq!(rec["data"]["authorization"], "[REDACTED]");
        assert_eq!(rec["data"]["status"], 503);
        assert!(rec["data"].get("endpoint").is_none());
    }

    #[test]
    fn test_query_records_carry_digest() {
        let fp = Fingerprint::of(&crate::fetch::ApiRequest::get("/api/risk/summary"));
        let fields = query_fields(&fp, 3);
        let rec = build_record("r-test", Level::Debug, Domain::Cache, "settle", fields);
        assert_eq!(rec["fingerprint"], fp.as_str());
        assert_eq!(rec["digest"], fp.digest().as_str());
        assert_eq!(rec["digest"].as_str().map(str::len), Some(16));
        assert_eq!(rec["data"]["generation"], 3);
    }

    #[test]
    fn test_file_sink_writes_under_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_string_lossy().to_string();
        let sink = FileSink::open(&base, "r-sink").unwrap();
        write_line(&sink.events, "{\"event\":\"x\"}");
        let written =
            std::fs::read_to_string(dir.path().join("r-sink").join("events.jsonl")).unwrap();
        assert_eq!(written.trim(), "{\"event\":\"x\"}");
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
