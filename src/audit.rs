//! Audit records and sinks.
//!
//! One record per successful mutation, immutable once appended. The engine
//! treats appends as fire-and-forget: a sink failure is logged and the
//! mutation result stands.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::{generate_id, Statement};
use crate::registry::Operation;
use crate::store::{Row, Storage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub actor_id: String,
    pub operation: Operation,
    pub entity: String,
    pub target_id: String,
    /// Row state before the mutation; None for create.
    pub before: Option<Row>,
    /// Row state after the mutation; None for delete.
    pub after: Option<Row>,
    pub ts: u64,
}

impl AuditRecord {
    pub fn new(
        actor_id: &str,
        operation: Operation,
        entity: &str,
        target_id: &str,
        before: Option<Row>,
        after: Option<Row>,
        ts: u64,
    ) -> Self {
        Self {
            id: generate_id(),
            actor_id: actor_id.to_string(),
            operation,
            entity: entity.to_string(),
            target_id: target_id.to_string(),
            before,
            after,
            ts,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Appends to the `audit_log` table through the same storage connector the
/// engine writes entities with. Append-only; nothing here updates or deletes.
pub struct StoreAuditSink {
    store: Arc<dyn Storage>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let stmt = Statement {
            sql: "INSERT INTO audit_log \
                  (id, actor_id, operation, entity, target_id, before_state, after_state, ts) \
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
                .to_string(),
            params: vec![
                Value::String(record.id.clone()),
                Value::String(record.actor_id.clone()),
                Value::String(record.operation.as_str().to_string()),
                Value::String(record.entity.clone()),
                Value::String(record.target_id.clone()),
                record
                    .before
                    .as_ref()
                    .map(|r| Value::String(Value::Object(r.clone()).to_string()))
                    .unwrap_or(Value::Null),
                record
                    .after
                    .as_ref()
                    .map(|r| Value::String(Value::Object(r.clone()).to_string()))
                    .unwrap_or(Value::Null),
                Value::from(record.ts),
            ],
        };
        self.store.execute(&stmt).await?;
        Ok(())
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("audit lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().expect("audit lock poisoned").push(record.clone());
        Ok(())
    }
}

/// A sink that always fails. Exercises the best-effort path in tests.
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn append(&self, _record: &AuditRecord) -> Result<()> {
        anyhow::bail!("audit sink unavailable")
    }
}
