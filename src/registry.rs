//! Entity registry: static metadata describing every manageable entity.
//!
//! Schemas are defined in code and frozen at construction. Everything else
//! (query builder, engine, projector, storage DDL) reads column names and
//! constraints from here and nowhere else, so caller-supplied keys can never
//! reach statement text.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

// =============================================================================
// Field metadata
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    Datetime,
    Enum,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    pub readonly: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Vec<EnumOption>,
}

impl Field {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: default_label(name),
            kind,
            required: false,
            readonly: false,
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldKind::Datetime)
    }

    pub fn json(name: &str) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn enumeration(name: &str, options: &[(&str, &str)]) -> Self {
        let mut f = Self::new(name, FieldKind::Enum);
        f.options = options
            .iter()
            .map(|(value, label)| EnumOption { value: value.to_string(), label: label.to_string() })
            .collect();
        f
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Text-like fields get case-insensitive substring matching on reads.
    pub fn is_text_like(&self) -> bool {
        matches!(self.kind, FieldKind::Text | FieldKind::Enum | FieldKind::Json)
    }
}

// "base_price" -> "Base Price"
fn default_label(name: &str) -> String {
    name.split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// Operations and permissions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Operation::Create),
            "read" => Some(Operation::Read),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }

}

pub const ALL_OPERATIONS: [Operation; 4] =
    [Operation::Create, Operation::Read, Operation::Update, Operation::Delete];

// =============================================================================
// Entity schema
// =============================================================================

#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    /// Underlying table name. Only ever interpolated from this struct.
    pub storage_key: String,
    pub fields: Vec<Field>,
    permissions: HashMap<Operation, Vec<String>>,
}

impl EntitySchema {
    /// Builds a schema with the default `{entity}.{operation}` permission
    /// token per operation. Every schema must carry a readonly `id` field.
    pub fn new(name: &str, storage_key: &str, fields: Vec<Field>) -> Self {
        debug_assert!(fields.iter().any(|f| f.name == "id"), "schema without id field");
        let permissions = ALL_OPERATIONS
            .iter()
            .map(|op| (*op, vec![format!("{}.{}", name, op.as_str())]))
            .collect();
        Self { name: name.to_string(), storage_key: storage_key.to_string(), fields, permissions }
    }

    pub fn with_permissions(mut self, op: Operation, tokens: &[&str]) -> Self {
        self.permissions.insert(op, tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// The boolean field used for soft deletes, when present.
    pub fn activity_flag(&self) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::Boolean && (f.name == "is_active" || f.name == "active"))
    }

    pub fn permissions_for(&self, op: Operation) -> &[String] {
        self.permissions.get(&op).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

// =============================================================================
// Registry
// =============================================================================

pub struct Registry {
    schemas: HashMap<String, Arc<EntitySchema>>,
}

impl Registry {
    pub fn new(schemas: Vec<EntitySchema>) -> Self {
        let schemas = schemas
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        Self { schemas }
    }

    pub fn get(&self, entity: &str) -> Result<Arc<EntitySchema>, EngineError> {
        self.schemas
            .get(entity)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity(entity.to_string()))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.schemas.values()
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// The full set of manageable game entities. Adding one is a code change
    /// and a redeploy, not a runtime call.
    pub fn builtin() -> Self {
        Self::new(vec![
            EntitySchema::new(
                "players",
                "players",
                vec![
                    Field::text("id").readonly(),
                    Field::text("name").required(),
                    Field::number("level").range(1.0, 99.0),
                    Field::enumeration(
                        "class",
                        &[
                            ("warrior", "Warrior"),
                            ("mage", "Mage"),
                            ("ranger", "Ranger"),
                            ("merchant", "Merchant"),
                        ],
                    ),
                    Field::number("gold").range(0.0, 1_000_000_000.0),
                    Field::boolean("is_active"),
                    Field::datetime("created_at").readonly(),
                ],
            ),
            EntitySchema::new(
                "merchants",
                "merchants",
                vec![
                    Field::text("id").readonly(),
                    Field::text("name").required(),
                    Field::text("district"),
                    Field::number("reputation").range(0.0, 100.0),
                    Field::boolean("is_active"),
                    Field::datetime("created_at").readonly(),
                ],
            ),
            EntitySchema::new(
                "items",
                "items",
                vec![
                    Field::text("id").readonly(),
                    Field::text("name").required(),
                    Field::enumeration(
                        "category",
                        &[
                            ("arts", "Martial Arts"),
                            ("weapons", "Weapons"),
                            ("armor", "Armor"),
                            ("consumables", "Consumables"),
                        ],
                    ),
                    Field::number("grade").range(1.0, 9.0),
                    Field::number("base_price").range(0.0, 100_000_000.0),
                    Field::json("attributes"),
                    Field::boolean("is_active"),
                    Field::datetime("created_at").readonly(),
                ],
            ),
            EntitySchema::new(
                "quests",
                "quests",
                vec![
                    Field::text("id").readonly(),
                    Field::text("title").required(),
                    Field::text("description"),
                    Field::number("reward_exp").range(0.0, 10_000_000.0),
                    Field::number("min_level").range(1.0, 99.0),
                    Field::boolean("is_active"),
                    Field::datetime("created_at").readonly(),
                ],
            ),
            EntitySchema::new(
                "skills",
                "skills",
                vec![
                    Field::text("id").readonly(),
                    Field::text("name").required(),
                    Field::enumeration(
                        "element",
                        &[
                            ("fire", "Fire"),
                            ("water", "Water"),
                            ("wind", "Wind"),
                            ("earth", "Earth"),
                        ],
                    ),
                    Field::number("power").range(0.0, 9_999.0),
                    Field::boolean("is_active"),
                    Field::datetime("created_at").readonly(),
                ],
            ),
            // Hard-delete entity: no activity flag on purpose.
            EntitySchema::new(
                "trades",
                "trades",
                vec![
                    Field::text("id").readonly(),
                    Field::text("seller_id").required(),
                    Field::text("buyer_id").required(),
                    Field::text("item_id").required(),
                    Field::number("price").required().range(0.0, 100_000_000.0),
                    Field::datetime("created_at").readonly(),
                ],
            ),
        ])
    }
}

// =============================================================================
// Tests
// =============================================================================
