//! Storage connector boundary and its sqlite implementation.
//!
//! The engine only ever sees `Storage`: parameterized statements in, rows or
//! affected counts out. Any store that can bind positional parameters can
//! stand behind this trait; `SqliteStore` is the one the admin tool ships.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::query::Statement;
use crate::registry::{FieldKind, Registry};

pub type Row = Map<String, Value>;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>>;
    async fn execute(&self, stmt: &Statement) -> Result<usize>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite at {}", path.as_ref().display()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    /// Creates one table per registered schema plus the append-only audit
    /// log. Idempotent; DDL text comes entirely from the registry.
    pub fn init(&self, registry: &Registry) -> Result<()> {
        let mut ddl = String::from("BEGIN;\n");
        for schema in registry.schemas() {
            let cols: Vec<String> = schema
                .fields
                .iter()
                .map(|f| {
                    let sql_type = match f.kind {
                        FieldKind::Text | FieldKind::Enum | FieldKind::Json => "TEXT",
                        FieldKind::Number => "REAL",
                        FieldKind::Boolean | FieldKind::Datetime => "INTEGER",
                    };
                    if f.name == "id" {
                        format!("{} TEXT PRIMARY KEY", f.name)
                    } else {
                        format!("{} {}", f.name, sql_type)
                    }
                })
                .collect();
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});\n",
                schema.storage_key,
                cols.join(", ")
            ));
        }
        ddl.push_str(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                actor_id TEXT NOT NULL,
                operation TEXT NOT NULL,
                entity TEXT NOT NULL,
                target_id TEXT NOT NULL,
                before_state TEXT,
                after_state TEXT,
                ts INTEGER NOT NULL
            );\n",
        );
        ddl.push_str("COMMIT;");
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        conn.execute_batch(&ddl)?;
        Ok(())
    }

    fn run_query(&self, stmt: &Statement) -> Result<Vec<Row>> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let mut prepared = conn.prepare(&stmt.sql)?;
        let names: Vec<String> = prepared.column_names().iter().map(|s| s.to_string()).collect();
        let params = rusqlite::params_from_iter(stmt.params.iter().map(json_to_sql));
        let mut rows = prepared.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Map::new();
            for (i, name) in names.iter().enumerate() {
                map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn run_execute(&self, stmt: &Statement) -> Result<usize> {
        let conn = self.conn.lock().expect("sqlite lock poisoned");
        let params = rusqlite::params_from_iter(stmt.params.iter().map(json_to_sql));
        Ok(conn.execute(&stmt.sql, params)?)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn query(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.run_query(stmt)
    }

    async fn execute(&self, stmt: &Statement) -> Result<usize> {
        self.run_execute(stmt)
    }
}

fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        // Structured values persist as their JSON text.
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

// =============================================================================
// Demo data
// =============================================================================

/// A small consistent dataset for the binary and integration tests.
/// Tables must already exist via `SqliteStore::init`.
pub fn seed_demo(store: &SqliteStore) -> Result<()> {
    let now = crate::config::now_ts();
    let conn = store.conn.lock().expect("sqlite lock poisoned");
    let players: &[(&str, &str, f64, &str, f64)] = &[
        ("p-1", "Baek Mok", 42.0, "warrior", 15_200.0),
        ("p-2", "Dan Ahyun", 17.0, "mage", 3_050.0),
        ("p-3", "Seo Gwan", 60.0, "ranger", 88_400.0),
    ];
    for (id, name, level, class, gold) in players {
        conn.execute(
            "INSERT OR IGNORE INTO players (id, name, level, class, gold, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            rusqlite::params![id, name, level, class, gold, now as i64],
        )?;
    }
    let merchants: &[(&str, &str, &str, f64)] = &[
        ("m-1", "Gangnam Spice Hall", "gangnam", 81.0),
        ("m-2", "North Gate Smithy", "jongno", 64.0),
        ("m-3", "Gangnam Relic House", "gangnam", 92.0),
    ];
    for (id, name, district, rep) in merchants {
        conn.execute(
            "INSERT OR IGNORE INTO merchants (id, name, district, reputation, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![id, name, district, rep, now as i64],
        )?;
    }
    let items: &[(&str, &str, &str, f64, f64)] = &[
        ("i-1", "Azure Dragon Saber", "weapons", 7.0, 120_000.0),
        ("i-2", "Plum Blossom Manual", "arts", 5.0, 48_000.0),
        ("i-3", "Ginseng Tonic", "consumables", 2.0, 350.0),
    ];
    for (id, name, category, grade, price) in items {
        conn.execute(
            "INSERT OR IGNORE INTO items (id, name, category, grade, base_price, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            rusqlite::params![id, name, category, grade, price, now as i64],
        )?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO quests (id, title, description, reward_exp, min_level, is_active, created_at)
         VALUES ('q-1', 'Clear the River Bandits', 'Escort the salt barge past Mapo.', 4800, 12, 1, ?1)",
        rusqlite::params![now as i64],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO skills (id, name, element, power, is_active, created_at)
         VALUES ('s-1', 'Falling Petal Palm', 'wind', 340, 1, ?1)",
        rusqlite::params![now as i64],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO trades (id, seller_id, buyer_id, item_id, price, created_at)
         VALUES ('t-1', 'p-1', 'p-2', 'i-3', 350, ?1)",
        rusqlite::params![now as i64],
    )?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteStore {
        let s = SqliteStore::open_in_memory().unwrap();
        s.init(&Registry::builtin()).unwrap();
        s
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let s = store();
        s.init(&Registry::builtin()).unwrap();
    }

    #[tokio::test]
    async fn round_trips_params() {
        let s = store();
        let insert = Statement {
            sql: "INSERT INTO players (id, name, level, is_active, created_at) VALUES (?, ?, ?, ?, ?)"
                .to_string(),
            params: vec![json!("p-9"), json!("O'Hara;--"), json!(3), json!(true), json!(1_700_000_000)],
        };
        assert_eq!(s.execute(&insert).await.unwrap(), 1);

        let select = Statement {
            sql: "SELECT id, name, level, is_active FROM players WHERE id = ?".to_string(),
            params: vec![json!("p-9")],
        };
        let rows = s.query(&select).await.unwrap();
        assert_eq!(rows.len(), 1);
        // quoting and comment characters survive as data, not syntax
        assert_eq!(rows[0]["name"], json!("O'Hara;--"));
        assert_eq!(rows[0]["is_active"], json!(1));
    }

    #[tokio::test]
    async fn seed_demo_populates_tables() {
        let s = store();
        seed_demo(&s).unwrap();
        let count = Statement {
            sql: "SELECT COUNT(*) AS total FROM merchants".to_string(),
            params: vec![],
        };
        let rows = s.query(&count).await.unwrap();
        assert_eq!(rows[0]["total"], json!(3));
    }
}
