//! Parameterized statement construction from registry metadata.
//!
//! Column and table names are drawn only from the `EntitySchema` whitelist;
//! caller input flows exclusively into the parameter list. Filter keys that
//! do not name a schema field are silently dropped, by policy.

use serde_json::{Map, Value};

use crate::errors::EngineError;
use crate::registry::{EntitySchema, FieldKind};

/// SQL text plus its positional parameters. Values never appear in the text.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp limit to [1, 100] and page to >= 1. The offset is widened to
    /// u64 before multiplying; page arrives straight off the wire and u32
    /// arithmetic overflows at large page numbers.
    pub fn normalized(&self) -> (u32, u32, u64) {
        let limit = self.limit.clamp(1, Self::MAX_LIMIT);
        let page = self.page.max(1);
        let offset = u64::from(page - 1) * u64::from(limit);
        (page, limit, offset)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

/// A paginated select plus the COUNT sharing its filter clause.
#[derive(Debug, Clone)]
pub struct ReadQuery {
    pub select: Statement,
    pub count: Statement,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct DeleteQuery {
    pub statement: Statement,
    pub soft: bool,
}

/// 16 hex chars, generated when a create payload omits the primary key.
pub fn generate_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn column_list(schema: &EntitySchema) -> String {
    schema.column_names().join(", ")
}

// Filter clause shared by select and count. Walks the schema's field list
// (never the caller's keys) so unknown filter keys simply fall away.
fn filter_clause(schema: &EntitySchema, filters: &Map<String, Value>) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for field in &schema.fields {
        let Some(value) = filters.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if field.is_text_like() {
            clauses.push(format!("LOWER({}) LIKE ?", field.name));
            let needle = match value {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            params.push(Value::String(format!("%{}%", needle)));
        } else {
            clauses.push(format!("{} = ?", field.name));
            params.push(value.clone());
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (where_sql, params)
}

pub fn build_read(schema: &EntitySchema, filters: &Map<String, Value>, pagination: Pagination) -> ReadQuery {
    let (where_sql, params) = filter_clause(schema, filters);
    let (page, limit, offset) = pagination.normalized();

    let mut select_params = params.clone();
    select_params.push(Value::from(limit));
    select_params.push(Value::from(offset));
    let select = Statement {
        sql: format!(
            "SELECT {} FROM {}{} ORDER BY id LIMIT ? OFFSET ?",
            column_list(schema),
            schema.storage_key,
            where_sql
        ),
        params: select_params,
    };
    let count = Statement {
        sql: format!("SELECT COUNT(*) AS total FROM {}{}", schema.storage_key, where_sql),
        params,
    };
    ReadQuery { select, count, page, limit }
}

/// Single-row fetch by primary key. With `only_active`, rows already
/// soft-deleted are invisible, so a repeat delete resolves to NotFound.
pub fn build_fetch(schema: &EntitySchema, id: &str, only_active: bool) -> Statement {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE id = ?",
        column_list(schema),
        schema.storage_key
    );
    let mut params = vec![Value::String(id.to_string())];
    if only_active {
        if let Some(flag) = schema.activity_flag() {
            sql.push_str(&format!(" AND {} = ?", flag.name));
            params.push(Value::Bool(true));
        }
    }
    Statement { sql, params }
}

/// Builds the insert and returns it with the id the row will carry.
/// Fails if any required non-readonly field is absent from the payload.
pub fn build_insert(
    schema: &EntitySchema,
    payload: &Map<String, Value>,
    now_ts: u64,
) -> Result<(Statement, String), EngineError> {
    for field in &schema.fields {
        if field.required && !field.readonly && !payload.contains_key(&field.name) {
            return Err(EngineError::MissingRequiredField(field.name.clone()));
        }
    }

    let id = match payload.get("id").and_then(|v| v.as_str()) {
        Some(given) if !given.is_empty() => given.to_string(),
        _ => generate_id(),
    };

    let mut columns = Vec::new();
    let mut params = Vec::new();
    for field in &schema.fields {
        let value = if field.name == "id" {
            Value::String(id.clone())
        } else if let Some(v) = payload.get(&field.name) {
            v.clone()
        } else if field.name == "created_at" && field.kind == FieldKind::Datetime {
            Value::from(now_ts)
        } else if schema.activity_flag().map(|f| f.name == field.name).unwrap_or(false) {
            // New rows start active unless the payload says otherwise.
            Value::Bool(true)
        } else {
            continue;
        };
        columns.push(field.name.as_str());
        params.push(value);
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema.storage_key,
        columns.join(", "),
        placeholders
    );
    Ok((Statement { sql, params }, id))
}

/// Sparse update. Readonly keys are stripped before the SET clause is built;
/// an empty result is an error, not a no-op write.
pub fn build_update(
    schema: &EntitySchema,
    id: &str,
    payload: &Map<String, Value>,
) -> Result<Statement, EngineError> {
    let mut sets = Vec::new();
    let mut params = Vec::new();
    for field in &schema.fields {
        if field.readonly {
            continue;
        }
        if let Some(value) = payload.get(&field.name) {
            sets.push(format!("{} = ?", field.name));
            params.push(value.clone());
        }
    }
    if sets.is_empty() {
        return Err(EngineError::NoUpdatableFields);
    }
    params.push(Value::String(id.to_string()));
    Ok(Statement {
        sql: format!("UPDATE {} SET {} WHERE id = ?", schema.storage_key, sets.join(", ")),
        params,
    })
}

/// Soft delete when the schema exposes an activity flag, hard delete otherwise.
pub fn build_delete(schema: &EntitySchema, id: &str) -> DeleteQuery {
    match schema.activity_flag() {
        Some(flag) => DeleteQuery {
            statement: Statement {
                sql: format!("UPDATE {} SET {} = ? WHERE id = ?", schema.storage_key, flag.name),
                params: vec![Value::Bool(false), Value::String(id.to_string())],
            },
            soft: true,
        },
        None => DeleteQuery {
            statement: Statement {
                sql: format!("DELETE FROM {} WHERE id = ?", schema.storage_key),
                params: vec![Value::String(id.to_string())],
            },
            soft: false,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
