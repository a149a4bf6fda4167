//! Structured logging for the playback engine.
//!
//! Every record is one JSON object per line:
//! `{ts, run_id, seq, lvl, component, event, msg, model?, step?, data}`.
//! Records land in `<LOG_DIR>/<RUN_ID>/events.jsonl` (info and above) or
//! `trace.jsonl` (trace/debug) and are echoed to stdout.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

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
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
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
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Playback, // Mode transitions, step resolution
    History,  // Cache puts, eviction, rehydration
    Series,   // Aggregate recording
    Remote,   // Simulation service requests
    Params,   // Run parameter validation
    System,   // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Playback => "playback",
            Domain::History => "history",
            Domain::Series => "series",
            Domain::Remote => "remote",
            Domain::Params => "params",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run log (per-process output directory)
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_LOG: OnceLock<Option<RunLog>> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

/// Output files for one process run.
#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

impl RunLog {
    /// Create `dir/<run_id>/` with a manifest and empty event/trace files.
    pub fn open(base: &Path, run_id: &str) -> io::Result<Self> {
        let dir = base.join(run_id);
        create_dir_all(&dir)?;
        std::fs::write(
            dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": dir.to_string_lossy(),
            })
            .to_string(),
        )?;
        let events = File::create(dir.join("events.jsonl"))?;
        let trace = File::create(dir.join("trace.jsonl"))?;
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
            events: Mutex::new(BufWriter::new(events)),
            trace: Mutex::new(BufWriter::new(trace)),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Route a finished line by level.
    pub fn write(&self, level: Level, line: &str) {
        let writer = match level {
            Level::Trace | Level::Debug => &self.trace,
            _ => &self.events,
        };
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
        }
    }

    pub fn flush(&self) {
        for writer in [&self.events, &self.trace] {
            if let Ok(mut w) = writer.lock() {
                let _ = w.flush();
            }
        }
    }
}

fn run_log() -> Option<&'static RunLog> {
    RUN_LOG
        .get_or_init(|| {
            let run_id = std::env::var("RUN_ID")
                .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
            let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
            match RunLog::open(Path::new(&base), &run_id) {
                Ok(log) => Some(log),
                Err(err) => {
                    eprintln!("[log] failed to open run dir: {}", err);
                    None
                }
            }
        })
        .as_ref()
}

/// Flush buffered records; call before process exit.
pub fn flush() {
    if let Some(log) = run_log() {
        log.flush();
    }
}

fn stdout_enabled() -> bool {
    !matches!(std::env::var("LOG_STDOUT").as_deref(), Ok("0") | Ok("false"))
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
    let line = render_record(level, domain.as_str(), event, fields);
    if let Some(out) = run_log() {
        out.write(level, &line);
    }
    if stdout_enabled() {
        println!("{}", line);
    }
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["model", "step", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn render_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) -> String {
    let (mut top, data) = split_fields(fields);
    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let run_id = run_log().map(|l| l.run_id().to_string()).unwrap_or_default();

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

/// How a step request was satisfied.
pub fn log_step_resolved(model: &str, step: u64, source: &str) {
    log(
        Level::Debug,
        Domain::Playback,
        "step_resolved",
        obj(&[("model", v_str(model)), ("step", json!(step)), ("source", v_str(source))]),
    );
}

pub fn log_fetch(model: &str, step: u64, kind: &str, outcome: &str) {
    log(
        Level::Info,
        Domain::Remote,
        "fetch",
        obj(&[
            ("model", v_str(model)),
            ("step", json!(step)),
            ("kind", v_str(kind)),
            ("outcome", v_str(outcome)),
        ]),
    );
}

pub fn log_eviction(horizon: u64, evicted: usize) {
    log(
        Level::Trace,
        Domain::History,
        "evict",
        obj(&[("horizon", json!(horizon)), ("evicted", json!(evicted))]),
    );
}

pub fn log_mode_change(model: &str, from: &str, to: &str) {
    log(
        Level::Info,
        Domain::Playback,
        "mode",
        obj(&[("model", v_str(model)), ("from", v_str(from)), ("to", v_str(to))]),
    );
}

/// A response that arrived for a step no longer on screen.
pub fn log_stale(model: &str, step: u64, current: u64) {
    log(
        Level::Debug,
        Domain::Playback,
        "stale_response",
        obj(&[("model", v_str(model)), ("step", json!(step)), ("current", json!(current))]),
    );
}

pub fn log_notice(success: bool, message: &str) {
    let level = if success { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Playback,
        "notice",
        obj(&[("success", json!(success)), ("msg", v_str(message))]),
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
// Tests
// =============================================================================
