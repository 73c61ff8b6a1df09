//! JSON-lines logging for the decision core.
//!
//! One record per line on stdout and in `LOG_DIR/<run_id>/events.jsonl`.
//! Correlation ids (`context_id`, `trace_id`, `receipt_id`) are lifted to the
//! top level so a cycle can be followed with a single grep. `LOG_LEVEL` and
//! `LOG_DOMAINS` are read once, on the first record.

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

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Deliberation,
    Vote,
    Constitution,
    Cycle,
    Config,
    Exec,
    Audit,
    System,
    Profile, // timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Deliberation => "deliberation",
            Domain::Vote => "vote",
            Domain::Constitution => "constitution",
            Domain::Cycle => "cycle",
            Domain::Config => "config",
            Domain::Exec => "exec",
            Domain::Audit => "audit",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }
}

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static SINK: OnceLock<Sink> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct Sink {
    run_id: String,
    min_level: Level,
    /// `None` means every domain.
    domains: Option<Vec<String>>,
    file: Option<Mutex<BufWriter<File>>>,
}

impl Sink {
    fn from_env() -> Self {
        let run_id = std::env::var("RUN_ID").unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let min_level = std::env::var("LOG_LEVEL").ok().and_then(|v| Level::parse(&v)).unwrap_or(Level::Info);
        let domains = match std::env::var("LOG_DOMAINS") {
            Ok(list) if list.trim() != "all" => Some(list.split(',').map(|d| d.trim().to_string()).collect()),
            _ => None,
        };

        let dir: PathBuf = [std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string()), run_id.clone()]
            .iter()
            .collect();
        let file = create_dir_all(&dir)
            .and_then(|_| File::create(dir.join("events.jsonl")))
            .map(|f| Mutex::new(BufWriter::new(f)))
            .map_err(|err| eprintln!("[log] no file sink under {}: {}", dir.display(), err))
            .ok();

        Self { run_id, min_level, domains, file }
    }

    fn accepts(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self.domains.as_ref().map_or(true, |list| list.iter().any(|d| d == domain.as_str()))
    }

    fn write(&self, line: &str) {
        if let Some(file) = &self.file {
            let mut w = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
        println!("{}", line);
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["context_id", "trace_id", "receipt_id", "symbol", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit one structured record.
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let sink = SINK.get_or_init(Sink::from_env);
    if !sink.accepts(level, domain) {
        return;
    }

    let (top, data) = split_fields(fields);
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(sink.run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.extend(top);
    entry.insert("data".to_string(), Value::Object(data));
    sink.write(&Value::Object(entry).to_string());
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

/// Outcome of one deliberation session
pub fn log_trace_verdict(trace_id: &str, hypothesis: &str, verdict: &str, score: f64, veto_reason: Option<&str>) {
    let level = if veto_reason.is_some() { Level::Warn } else { Level::Info };
    log(
        level,
        Domain::Deliberation,
        "trace_verdict",
        obj(&[
            ("trace_id", v_str(trace_id)),
            ("hypothesis", v_str(hypothesis)),
            ("verdict", v_str(verdict)),
            ("score", v_num(score)),
            ("veto_reason", veto_reason.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_vote(
    receipt_id: &str,
    verdict: &str,
    net_score: f64,
    mode: &str,
    veto_reason: Option<&str>,
) {
    log(
        Level::Info,
        Domain::Vote,
        "receipt",
        obj(&[
            ("receipt_id", v_str(receipt_id)),
            ("verdict", v_str(verdict)),
            ("net_score", v_num(net_score)),
            ("mode", v_str(mode)),
            ("veto_reason", veto_reason.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_order_verdict(symbol: &str, code: &str, reason: &str, valid: bool) {
    let level = if valid { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Constitution,
        "order_verdict",
        obj(&[
            ("symbol", v_str(symbol)),
            ("code", v_str(code)),
            ("reason", v_str(reason)),
            ("valid", Value::Bool(valid)),
        ]),
    );
}

pub fn log_module_failure(context_id: &str, module: &str, reason: &str) {
    log(
        Level::Error,
        Domain::Cycle,
        "module_failed",
        obj(&[
            ("context_id", v_str(context_id)),
            ("module", v_str(module)),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_config_anomaly(path: &str, reason: &str) {
    log(
        Level::Error,
        Domain::Config,
        "profile_anomaly",
        obj(&[("path", v_str(path)), ("reason", v_str(reason))]),
    );
}

pub fn log_dispatch(symbol: &str, side: &str, qty: &str, price: &str, receipt_id: &str) {
    log(
        Level::Info,
        Domain::Exec,
        "order_dispatch",
        obj(&[
            ("symbol", v_str(symbol)),
            ("side", v_str(side)),
            ("qty", v_str(qty)),
            ("price", v_str(price)),
            ("receipt_id", v_str(receipt_id)),
        ]),
    );
}

// =============================================================================
// Utility Functions
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
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: obj(fields),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Debug, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(Level::parse(" WARN "), Some(Level::Warn));
        assert_eq!(Level::parse("verbose"), None);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_domain_filter() {
        let sink = Sink {
            run_id: "r-test".into(),
            min_level: Level::Warn,
            domains: Some(vec!["vote".into()]),
            file: None,
        };
        assert!(sink.accepts(Level::Error, Domain::Vote));
        assert!(!sink.accepts(Level::Info, Domain::Vote));
        assert!(!sink.accepts(Level::Error, Domain::Cycle));
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_split_fields_lifts_correlation_keys() {
        let fields = obj(&[
            ("context_id", v_str("CTX-1")),
            ("msg", v_str("hello")),
            ("score", v_num(0.5)),
        ]);
        let (top, data) = split_fields(fields);
        assert!(top.contains_key("context_id"));
        assert!(top.contains_key("msg"));
        assert!(data.contains_key("score"));
        assert!(!data.contains_key("context_id"));
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
