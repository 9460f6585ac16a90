//! The CRUD orchestrator.
//!
//! A request moves through: schema resolve → authorize → validate → fetch
//! current row (update/delete) → execute → audit → respond. Any step can
//! fail with a typed `EngineError`; there are no retries and no transaction
//! spanning the write and the audit append. Audit emission is best-effort:
//! mutation success is defined solely by the storage write.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::audit::{AuditRecord, AuditSink};
use crate::config::now_ts;
use crate::errors::EngineError;
use crate::logging::{log_audit_append, log_audit_failure, log_operation, log_statement, log_storage_error};
use crate::query::{self, Pagination, Statement};
use crate::registry::{EntitySchema, FieldKind, Operation, Registry};
use crate::store::{Row, Storage};

// =============================================================================
// Request / response shapes
// =============================================================================

/// Verified actor identity, attached upstream by the auth middleware. The
/// engine authorizes it against the registry; it never validates tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub permissions: HashSet<String>,
}

impl Actor {
    pub fn new(id: &str, permissions: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// One inbound operation; lives for the duration of the call.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub entity: String,
    pub operation: Operation,
    pub actor: Actor,
    pub target_id: Option<String>,
    pub payload: Map<String, Value>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl PageInfo {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = total.div_ceil(limit.max(1) as u64);
        Self { page, limit, total, pages }
    }

    /// Well-formed summary for a read that produced nothing.
    pub fn empty(page: u32, limit: u32) -> Self {
        Self::new(page, limit, 0)
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Rows { rows: Vec<Row>, pagination: PageInfo },
    Created { row: Row },
    Updated { row: Row },
    Deleted { id: String, soft: bool },
}

// =============================================================================
// Engine
// =============================================================================

pub struct EntityEngine {
    registry: Arc<Registry>,
    store: Arc<dyn Storage>,
    audit: Arc<dyn AuditSink>,
}

impl EntityEngine {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn Storage>, audit: Arc<dyn AuditSink>) -> Self {
        Self { registry, store, audit }
    }

    pub async fn perform(&self, request: OperationRequest) -> Result<Outcome, EngineError> {
        let result = self.dispatch(&request).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        log_operation(
            &request.entity,
            request.operation.as_str(),
            &request.actor.id,
            outcome,
            request.target_id.as_deref(),
        );
        result
    }

    async fn dispatch(&self, request: &OperationRequest) -> Result<Outcome, EngineError> {
        let schema = self.registry.get(&request.entity)?;
        self.authorize(&schema, request)?;
        match request.operation {
            Operation::Read => self.read(&schema, request).await,
            Operation::Create => self.create(&schema, request).await,
            Operation::Update => self.update(&schema, request).await,
            Operation::Delete => self.delete(&schema, request).await,
        }
    }

    fn authorize(&self, schema: &EntitySchema, request: &OperationRequest) -> Result<(), EngineError> {
        for token in schema.permissions_for(request.operation) {
            if !request.actor.permissions.contains(token) {
                return Err(EngineError::PermissionDenied {
                    actor: request.actor.id.clone(),
                    permission: token.clone(),
                });
            }
        }
        Ok(())
    }

    async fn read(&self, schema: &EntitySchema, request: &OperationRequest) -> Result<Outcome, EngineError> {
        let q = query::build_read(schema, &request.payload, request.pagination);
        log_statement(&schema.name, "read", &q.select.sql, q.select.params.len());
        let rows = self.run_query(&q.select).await?;
        let total = self
            .run_query(&q.count)
            .await?
            .first()
            .and_then(|r| r.get("total"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(Outcome::Rows { rows, pagination: PageInfo::new(q.page, q.limit, total) })
    }

    async fn create(&self, schema: &EntitySchema, request: &OperationRequest) -> Result<Outcome, EngineError> {
        validate_payload(schema, &request.payload)?;
        let (stmt, id) = query::build_insert(schema, &request.payload, now_ts())?;
        log_statement(&schema.name, "create", &stmt.sql, stmt.params.len());
        self.run_execute(&stmt).await?;

        let row = self
            .fetch(schema, &id, false)
            .await?
            .ok_or_else(|| EngineError::storage("inserted row not readable"))?;
        self.emit_audit(schema, request, Operation::Create, &id, None, Some(row.clone())).await;
        Ok(Outcome::Created { row })
    }

    async fn update(&self, schema: &EntitySchema, request: &OperationRequest) -> Result<Outcome, EngineError> {
        let id = required_target(request)?;
        validate_payload(schema, &request.payload)?;
        let before = self
            .fetch(schema, &id, false)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: schema.name.clone(), id: id.clone() })?;

        let stmt = query::build_update(schema, &id, &request.payload)?;
        log_statement(&schema.name, "update", &stmt.sql, stmt.params.len());
        self.run_execute(&stmt).await?;

        let after = self
            .fetch(schema, &id, false)
            .await?
            .ok_or_else(|| EngineError::storage("updated row not readable"))?;
        self.emit_audit(schema, request, Operation::Update, &id, Some(before), Some(after.clone())).await;
        Ok(Outcome::Updated { row: after })
    }

    async fn delete(&self, schema: &EntitySchema, request: &OperationRequest) -> Result<Outcome, EngineError> {
        let id = required_target(request)?;
        // For soft-deletable entities an already-inactive row is invisible
        // here, so deleting twice resolves to NotFound, never a storage error.
        let before = self
            .fetch(schema, &id, true)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: schema.name.clone(), id: id.clone() })?;

        let q = query::build_delete(schema, &id);
        log_statement(&schema.name, "delete", &q.statement.sql, q.statement.params.len());
        self.run_execute(&q.statement).await?;

        self.emit_audit(schema, request, Operation::Delete, &id, Some(before), None).await;
        Ok(Outcome::Deleted { id, soft: q.soft })
    }

    async fn fetch(&self, schema: &EntitySchema, id: &str, only_active: bool) -> Result<Option<Row>, EngineError> {
        let stmt = query::build_fetch(schema, id, only_active);
        Ok(self.run_query(&stmt).await?.into_iter().next())
    }

    async fn run_query(&self, stmt: &Statement) -> Result<Vec<Row>, EngineError> {
        self.store.query(stmt).await.map_err(|err| {
            log_storage_error("query", &err.to_string());
            EngineError::storage(err)
        })
    }

    async fn run_execute(&self, stmt: &Statement) -> Result<usize, EngineError> {
        self.store.execute(stmt).await.map_err(|err| {
            log_storage_error("execute", &err.to_string());
            EngineError::storage(err)
        })
    }

    // Best-effort: an append failure is logged and swallowed. The mutation
    // has already committed and stands on its own.
    async fn emit_audit(
        &self,
        schema: &EntitySchema,
        request: &OperationRequest,
        operation: Operation,
        target_id: &str,
        before: Option<Row>,
        after: Option<Row>,
    ) {
        let record = AuditRecord::new(&request.actor.id, operation, &schema.name, target_id, before, after, now_ts());
        match self.audit.append(&record).await {
            Ok(()) => log_audit_append(&schema.name, target_id, operation.as_str(), &record.id),
            Err(err) => log_audit_failure(&schema.name, target_id, &err.to_string()),
        }
    }
}

fn required_target(request: &OperationRequest) -> Result<String, EngineError> {
    request.target_id.clone().ok_or_else(|| EngineError::NotFound {
        entity: request.entity.clone(),
        id: String::new(),
    })
}

// =============================================================================
// Payload validation
// =============================================================================

// Walks schema order, so the first violation is deterministic. Keys that
// name no schema field are ignored here and dropped by the builders.
fn validate_payload(schema: &EntitySchema, payload: &Map<String, Value>) -> Result<(), EngineError> {
    for field in &schema.fields {
        let Some(value) = payload.get(&field.name) else {
            continue;
        };
        if value.is_null() {
            if field.required {
                return Err(EngineError::validation(&field.name, "must not be null"));
            }
            continue;
        }
        match field.kind {
            FieldKind::Number | FieldKind::Datetime => {
                let Some(n) = value.as_f64() else {
                    return Err(EngineError::validation(&field.name, "expected a number"));
                };
                if let Some(min) = field.min {
                    if n < min {
                        return Err(EngineError::validation(&field.name, format!("below minimum {}", min)));
                    }
                }
                if let Some(max) = field.max {
                    if n > max {
                        return Err(EngineError::validation(&field.name, format!("above maximum {}", max)));
                    }
                }
            }
            FieldKind::Boolean => {
                let ok = value.is_boolean() || matches!(value.as_i64(), Some(0) | Some(1));
                if !ok {
                    return Err(EngineError::validation(&field.name, "expected a boolean"));
                }
            }
            FieldKind::Enum => {
                let Some(s) = value.as_str() else {
                    return Err(EngineError::validation(&field.name, "expected a string"));
                };
                if !field.options.iter().any(|o| o.value == s) {
                    return Err(EngineError::validation(&field.name, format!("'{}' is not an allowed value", s)));
                }
            }
            FieldKind::Text => {
                if !value.is_string() {
                    return Err(EngineError::validation(&field.name, "expected a string"));
                }
            }
            FieldKind::Json => {} // any shape persists as JSON text
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
