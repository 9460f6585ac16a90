//! Structured logging for the admin engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL), tunable via LOG_LEVEL
//! 2. Domain categories for filtering (LOG_DOMAINS)
//! 3. JSON-lines output split into an event stream and an audit stream
//! 4. Deterministic ordering via a per-run sequence counter

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
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
    Entity,  // CRUD operations through the engine
    Query,   // Statement construction, pagination
    Audit,   // Audit record emission
    Metrics, // Aggregator and cache activity
    System,  // Startup, shutdown, config
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Entity => "entity",
            Domain::Query => "query",
            Domain::Audit => "audit",
            Domain::Metrics => "metrics",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Mutex<BufWriter<File>>,
    audit: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let base = std::env::var("LOG_DIR").unwrap_or_else(|_| "out/runs".to_string());
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }

        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        );

        let events = File::create(run_dir.join("events.jsonl")).unwrap_or_else(|err| {
            eprintln!("[log] failed to create events log: {}", err);
            File::create("/tmp/gmpanel-events.jsonl").expect("events fallback")
        });
        let audit = File::create(run_dir.join("audit.jsonl")).unwrap_or_else(|err| {
            eprintln!("[log] failed to create audit log: {}", err);
            File::create("/tmp/gmpanel-audit.jsonl").expect("audit fallback")
        });

        RunContext {
            run_id,
            events: Mutex::new(BufWriter::new(events)),
            audit: Mutex::new(BufWriter::new(audit)),
        }
    })
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

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    let ctx = ensure_run_context();
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("data".to_string(), Value::Object(fields));

    let line = Value::Object(entry).to_string();
    if matches!(domain, Domain::Audit) {
        write_line(&ctx.audit, &line);
    }
    write_line(&ctx.events, &line);
    println!("{}", line);
}

// =============================================================================
// Domain-specific helpers
// =============================================================================

/// One line per engine operation, emitted on completion or failure.
pub fn log_operation(entity: &str, op: &str, actor: &str, outcome: &str, target: Option<&str>) {
    log(
        Level::Info,
        Domain::Entity,
        "operation",
        obj(&[
            ("entity", v_str(entity)),
            ("op", v_str(op)),
            ("actor", v_str(actor)),
            ("outcome", v_str(outcome)),
            ("target", target.map(v_str).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_statement(entity: &str, op: &str, sql: &str, param_count: usize) {
    log(
        Level::Debug,
        Domain::Query,
        "statement",
        obj(&[
            ("entity", v_str(entity)),
            ("op", v_str(op)),
            ("sql", v_str(sql)),
            ("params", json!(param_count)),
        ]),
    );
}

pub fn log_audit_append(entity: &str, target_id: &str, op: &str, record_id: &str) {
    log(
        Level::Info,
        Domain::Audit,
        "append",
        obj(&[
            ("entity", v_str(entity)),
            ("target_id", v_str(target_id)),
            ("op", v_str(op)),
            ("record_id", v_str(record_id)),
        ]),
    );
}

pub fn log_audit_failure(entity: &str, target_id: &str, err: &str) {
    log(
        Level::Error,
        Domain::Audit,
        "append_failed",
        obj(&[
            ("entity", v_str(entity)),
            ("target_id", v_str(target_id)),
            ("error", v_str(err)),
        ]),
    );
}

pub fn log_cache(event: &str, key: &str, age_ms: Option<u64>) {
    log(
        Level::Debug,
        Domain::Metrics,
        event,
        obj(&[
            ("key", v_str(key)),
            ("age_ms", age_ms.map(|a| json!(a)).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_storage_error(context: &str, err: &str) {
    log(
        Level::Error,
        Domain::System,
        "storage_error",
        obj(&[("context", v_str(context)), ("error", v_str(err))]),
    );
}

// =============================================================================
// Field builders
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
