//! Line-oriented admin console: one JSON command per stdin line, one JSON
//! response per stdout line. Stands in for the HTTP surface; auth middleware
//! upstream is expected to have verified the actor it names.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use gmpanel::audit::StoreAuditSink;
use gmpanel::cache::{MetricsCache, SystemClock};
use gmpanel::config::Config;
use gmpanel::engine::{Actor, EntityEngine, OperationRequest, Outcome, PageInfo};
use gmpanel::errors::EngineError;
use gmpanel::logging::{log, obj, v_str, Domain, Level};
use gmpanel::metrics::{MetricsAggregator, TimeRange};
use gmpanel::projector::{project_form, project_table, FormMode};
use gmpanel::query::Pagination;
use gmpanel::registry::{Operation, Registry};
use gmpanel::store::{seed_demo, Row, SqliteStore, Storage};

#[derive(Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    Entity {
        entity: String,
        op: String,
        actor: String,
        #[serde(default)]
        permissions: Vec<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        payload: Map<String, Value>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        limit: Option<u32>,
    },
    Form {
        entity: String,
        mode: String,
        #[serde(default)]
        current: Map<String, Value>,
    },
    Dashboard,
    Analytics {
        #[serde(default)]
        range: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let registry = Arc::new(Registry::builtin());
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("sqlite_path", v_str(&cfg.sqlite_path)),
            ("entities", v_str(&registry.entity_names().join(","))),
        ]),
    );
    let store = Arc::new(SqliteStore::open(&cfg.sqlite_path)?);
    store.init(&registry)?;
    if cfg.seed_demo_data {
        seed_demo(&store)?;
        log(Level::Info, Domain::System, "seeded_demo_data", Map::new());
    }

    let store_dyn: Arc<dyn Storage> = store.clone();
    let audit = Arc::new(StoreAuditSink::new(store_dyn.clone()));
    let engine = EntityEngine::new(registry.clone(), store_dyn.clone(), audit);
    let cache = Arc::new(MetricsCache::new(cfg.cache_capacity, Arc::new(SystemClock)));
    let aggregator = MetricsAggregator::new(store_dyn, cache, registry.clone())
        .with_ttls(cfg.dashboard_ttl_ms, cfg.analytics_ttl_ms);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Command>(trimmed) {
            Ok(cmd) => handle(&engine, &aggregator, &registry, &cfg, cmd).await,
            Err(err) => failure("bad_request", &format!("unparseable command: {}", err)),
        };
        println!("{}", response);
    }

    log(Level::Info, Domain::System, "shutdown", Map::new());
    Ok(())
}

async fn handle(
    engine: &EntityEngine,
    aggregator: &MetricsAggregator,
    registry: &Registry,
    cfg: &Config,
    cmd: Command,
) -> Value {
    match cmd {
        Command::Entity { entity, op, actor, permissions, id, payload, page, limit } => {
            let Some(operation) = Operation::parse(&op) else {
                return failure("bad_request", &format!("unknown operation '{}'", op));
            };
            let perms: Vec<&str> = permissions.iter().map(|p| p.as_str()).collect();
            let request = OperationRequest {
                entity: entity.clone(),
                operation,
                actor: Actor::new(&actor, &perms),
                target_id: id,
                payload,
                pagination: cfg.pagination(page, limit),
            };
            let fallback_page = (
                request.pagination.page.max(1),
                request.pagination.limit.clamp(1, Pagination::MAX_LIMIT),
            );
            match engine.perform(request).await {
                Ok(outcome) => success(outcome_json(registry, &entity, outcome)),
                Err(err) if operation == Operation::Read => read_failure(err, fallback_page),
                Err(err) => engine_failure(err),
            }
        }
        Command::Form { entity, mode, current } => {
            let schema = match registry.get(&entity) {
                Ok(s) => s,
                Err(err) => return engine_failure(err),
            };
            let mode = if mode == "update" { FormMode::Update } else { FormMode::Create };
            let fields = project_form(&schema, &current, mode);
            success(json!({ "fields": fields }))
        }
        Command::Dashboard => match aggregator.dashboard_snapshot().await {
            Ok(snapshot) => success(snapshot),
            Err(err) => failure("storage_failure", &err.to_string()),
        },
        Command::Analytics { range } => {
            let range = TimeRange::parse_or_default(range.as_deref().unwrap_or(""));
            match aggregator.analytics(range).await {
                Ok(analytics) => success(analytics),
                Err(err) => failure("storage_failure", &err.to_string()),
            }
        }
    }
}

fn outcome_json(registry: &Registry, entity: &str, outcome: Outcome) -> Value {
    match outcome {
        Outcome::Rows { rows, pagination } => {
            // readers get both raw rows and the projected table
            let table = registry.get(entity).ok().map(|schema| {
                let (columns, formatted) = project_table(&schema, &rows);
                json!({ "columns": columns, "rows": formatted })
            });
            json!({ "rows": rows, "pagination": pagination, "table": table })
        }
        Outcome::Created { row } => json!({ "row": row, "created": true }),
        Outcome::Updated { row } => json!({ "row": row, "updated": true }),
        Outcome::Deleted { id, soft } => json!({ "id": id, "soft": soft, "deleted": true }),
    }
}

fn success(data: Value) -> Value {
    json!({ "success": true, "data": data })
}

fn failure(code: &str, message: &str) -> Value {
    json!({ "success": false, "error": { "code": code, "message": message } })
}

fn engine_failure(err: EngineError) -> Value {
    failure(err.code(), &err.to_string())
}

// The UI layer never sees a torn read: failures still carry zero rows and a
// well-formed empty pagination summary.
fn read_failure(err: EngineError, (page, limit): (u32, u32)) -> Value {
    json!({
        "success": false,
        "error": { "code": err.code(), "message": err.to_string() },
        "data": { "rows": Vec::<Row>::new(), "pagination": PageInfo::empty(page, limit) },
    })
}
