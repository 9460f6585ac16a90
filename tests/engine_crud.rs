//! End-to-end CRUD through the entity engine against a real sqlite file.
//!
//! These are the gate between "modules compile" and "the admin tool works":
//! every error kind, the audit trail, soft-delete policy, and the pagination
//! contract are exercised against actual storage.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use gmpanel::audit::{FailingAuditSink, MemoryAuditSink};
use gmpanel::engine::{Actor, EntityEngine, OperationRequest, Outcome};
use gmpanel::query::Pagination;
use gmpanel::registry::{Operation, Registry};
use gmpanel::store::{seed_demo, SqliteStore, Storage};

struct Harness {
    engine: EntityEngine,
    audit: Arc<MemoryAuditSink>,
    store: Arc<SqliteStore>,
    _dir: TempDir,
}

fn setup() -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let registry = Arc::new(Registry::builtin());
    let store = Arc::new(SqliteStore::open(dir.path().join("admin.sqlite")).expect("open store"));
    store.init(&registry).expect("init tables");
    seed_demo(&store).expect("seed");
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = EntityEngine::new(registry, store.clone(), audit.clone());
    Harness { engine, audit, store, _dir: dir }
}

/// Actor holding every builtin permission token.
fn admin() -> Actor {
    let mut perms = Vec::new();
    for entity in ["players", "merchants", "items", "quests", "skills", "trades"] {
        for op in ["create", "read", "update", "delete"] {
            perms.push(format!("{}.{}", entity, op));
        }
    }
    let refs: Vec<&str> = perms.iter().map(|p| p.as_str()).collect();
    Actor::new("gm-root", &refs)
}

fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn request(entity: &str, op: Operation, actor: Actor, id: Option<&str>, payload: Map<String, Value>) -> OperationRequest {
    OperationRequest {
        entity: entity.to_string(),
        operation: op,
        actor,
        target_id: id.map(|s| s.to_string()),
        payload,
        pagination: Pagination::default(),
    }
}

async fn table_count(store: &SqliteStore, table: &str) -> u64 {
    let stmt = gmpanel::query::Statement {
        sql: format!("SELECT COUNT(*) AS total FROM {}", table),
        params: vec![],
    };
    store.query(&stmt).await.unwrap()[0]["total"].as_u64().unwrap()
}

// ---------------------------------------------------------------------------
// Reads and pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filtered_read_is_case_insensitive_substring() {
    let h = setup();
    let req = request("merchants", Operation::Read, admin(), None, map(&[("district", json!("GANGNAM"))]));
    let Outcome::Rows { rows, pagination } = h.engine.perform(req).await.unwrap() else {
        panic!("expected rows");
    };
    assert_eq!(pagination.page, 1);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["district"].as_str().unwrap().contains("gangnam")));
}

#[tokio::test]
async fn unknown_filter_key_matches_everything() {
    let h = setup();
    let req = request("merchants", Operation::Read, admin(), None, map(&[("star_sign", json!("ox"))]));
    let Outcome::Rows { rows, pagination } = h.engine.perform(req).await.unwrap() else {
        panic!("expected rows");
    };
    assert_eq!(rows.len() as u64, pagination.total);
    assert_eq!(pagination.total, 3);
}

#[tokio::test]
async fn pagination_invariants_hold() {
    let h = setup();
    for (page, limit) in [(1u32, 2u32), (2, 2), (1, 100), (9, 50)] {
        let mut req = request("players", Operation::Read, admin(), None, Map::new());
        req.pagination = Pagination { page, limit };
        let Outcome::Rows { rows, pagination } = h.engine.perform(req).await.unwrap() else {
            panic!("expected rows");
        };
        assert!(rows.len() as u32 <= pagination.limit);
        assert!(pagination.total >= rows.len() as u64);
        assert_eq!(pagination.page, page.max(1));
    }
}

#[tokio::test]
async fn out_of_range_pagination_is_clamped() {
    let h = setup();
    let mut req = request("players", Operation::Read, admin(), None, Map::new());
    req.pagination = Pagination { page: 0, limit: 0 };
    let Outcome::Rows { pagination, .. } = h.engine.perform(req).await.unwrap() else {
        panic!("expected rows");
    };
    assert_eq!(pagination.page, 1);
    assert_eq!(pagination.limit, 1);
}

#[tokio::test]
async fn huge_page_number_reads_empty_without_panicking() {
    let h = setup();
    let mut req = request("players", Operation::Read, admin(), None, Map::new());
    req.pagination = Pagination { page: u32::MAX, limit: 100 };
    let Outcome::Rows { rows, pagination } = h.engine.perform(req).await.unwrap() else {
        panic!("expected rows");
    };
    assert!(rows.is_empty());
    assert_eq!(pagination.page, u32::MAX);
    assert_eq!(pagination.total, 3);
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_generates_id_and_audits() {
    let h = setup();
    let payload = map(&[
        ("name", json!("Sword of Dawn")),
        ("category", json!("arts")),
        ("grade", json!(2)),
        ("base_price", json!(1000)),
    ]);
    let req = request("items", Operation::Create, admin(), None, payload);
    let Outcome::Created { row } = h.engine.perform(req).await.unwrap() else {
        panic!("expected created");
    };
    let id = row["id"].as_str().unwrap();
    assert!(!id.is_empty());
    // new rows start active
    assert_eq!(row["is_active"], json!(1));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, Operation::Create);
    assert!(records[0].before.is_none());
    assert_eq!(records[0].after.as_ref().unwrap()["id"], json!(id));
}

#[tokio::test]
async fn create_missing_required_writes_nothing() {
    let h = setup();
    let before = table_count(&h.store, "items").await;
    let req = request("items", Operation::Create, admin(), None, map(&[("grade", json!(2))]));
    let err = h.engine.perform(req).await.unwrap_err();
    assert_eq!(err.code(), "missing_required_field");
    assert_eq!(table_count(&h.store, "items").await, before);
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn create_rejects_out_of_range_and_bad_enum() {
    let h = setup();
    let req = request(
        "items",
        Operation::Create,
        admin(),
        None,
        map(&[("name", json!("Cursed Blade")), ("grade", json!(12))]),
    );
    let err = h.engine.perform(req).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert!(err.to_string().contains("grade"));

    let req = request(
        "items",
        Operation::Create,
        admin(),
        None,
        map(&[("name", json!("Odd Relic")), ("category", json!("relics"))]),
    );
    let err = h.engine.perform(req).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert!(h.audit.is_empty());
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_audit_captures_before_and_after() {
    let h = setup();
    let req = request("players", Operation::Update, admin(), Some("p-1"), map(&[("level", json!(43))]));
    let Outcome::Updated { row } = h.engine.perform(req).await.unwrap() else {
        panic!("expected updated");
    };
    assert_eq!(row["level"], json!(43.0));

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert_eq!(rec.before.as_ref().unwrap()["level"], json!(42.0));
    assert_eq!(rec.after.as_ref().unwrap()["level"], json!(43.0));
    // untouched fields ride along in both snapshots
    assert_eq!(rec.before.as_ref().unwrap()["name"], rec.after.as_ref().unwrap()["name"]);
}

#[tokio::test]
async fn update_missing_row_is_not_found() {
    let h = setup();
    let req = request("players", Operation::Update, admin(), Some("p-404"), map(&[("level", json!(2))]));
    assert_eq!(h.engine.perform(req).await.unwrap_err().code(), "not_found");
}

#[tokio::test]
async fn update_with_only_readonly_keys_fails() {
    let h = setup();
    let req = request("players", Operation::Update, admin(), Some("p-1"), map(&[("created_at", json!(0))]));
    assert_eq!(h.engine.perform(req).await.unwrap_err().code(), "no_updatable_fields");
    assert!(h.audit.is_empty());
}

#[tokio::test]
async fn update_without_permission_is_denied_and_unaudited() {
    let h = setup();
    let weak = Actor::new("gm-junior", &["quests.read"]);
    let req = request("quests", Operation::Update, weak, Some("q-1"), map(&[("is_active", json!(false))]));
    let err = h.engine.perform(req).await.unwrap_err();
    assert_eq!(err.code(), "permission_denied");
    assert!(err.to_string().contains("quests.update"));
    assert!(h.audit.is_empty());
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn soft_delete_marks_inactive_and_second_delete_is_not_found() {
    let h = setup();
    let req = request("merchants", Operation::Delete, admin(), Some("m-2"), Map::new());
    let Outcome::Deleted { soft, .. } = h.engine.perform(req).await.unwrap() else {
        panic!("expected deleted");
    };
    assert!(soft);
    // row survives, flagged inactive
    assert_eq!(table_count(&h.store, "merchants").await, 3);

    let again = request("merchants", Operation::Delete, admin(), Some("m-2"), Map::new());
    assert_eq!(h.engine.perform(again).await.unwrap_err().code(), "not_found");

    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].after.is_none());
    assert_eq!(records[0].before.as_ref().unwrap()["id"], json!("m-2"));
}

#[tokio::test]
async fn hard_delete_removes_row_when_no_activity_flag() {
    let h = setup();
    let req = request("trades", Operation::Delete, admin(), Some("t-1"), Map::new());
    let Outcome::Deleted { soft, .. } = h.engine.perform(req).await.unwrap() else {
        panic!("expected deleted");
    };
    assert!(!soft);
    assert_eq!(table_count(&h.store, "trades").await, 0);
}

// ---------------------------------------------------------------------------
// Boundary behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_entity_is_typed_failure() {
    let h = setup();
    let req = request("ghosts", Operation::Read, admin(), None, Map::new());
    assert_eq!(h.engine.perform(req).await.unwrap_err().code(), "unknown_entity");
}

#[tokio::test]
async fn audit_sink_failure_does_not_fail_the_mutation() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::builtin());
    let store = Arc::new(SqliteStore::open(dir.path().join("a.sqlite")).unwrap());
    store.init(&registry).unwrap();
    seed_demo(&store).unwrap();
    let engine = EntityEngine::new(registry, store.clone(), Arc::new(FailingAuditSink));

    let req = request("players", Operation::Update, admin(), Some("p-2"), map(&[("gold", json!(9_999))]));
    let Outcome::Updated { row } = engine.perform(req).await.unwrap() else {
        panic!("expected updated");
    };
    assert_eq!(row["gold"], json!(9_999.0));
}

#[tokio::test]
async fn store_audit_sink_appends_to_audit_log() {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(Registry::builtin());
    let store = Arc::new(SqliteStore::open(dir.path().join("a.sqlite")).unwrap());
    store.init(&registry).unwrap();
    seed_demo(&store).unwrap();
    let sink = Arc::new(gmpanel::audit::StoreAuditSink::new(store.clone() as Arc<dyn Storage>));
    let engine = EntityEngine::new(registry, store.clone(), sink);

    let req = request("quests", Operation::Delete, admin(), Some("q-1"), Map::new());
    engine.perform(req).await.unwrap();
    assert_eq!(table_count(&store, "audit_log").await, 1);
}
