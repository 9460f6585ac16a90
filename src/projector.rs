//! Schema → UI descriptor projection.
//!
//! Pure functions over registry metadata and row data; no IO, no state.
//! Formatting is total per field kind, so the UI layer never needs a
//! fallback path.

use serde::Serialize;
use serde_json::Value;

use crate::registry::{EntitySchema, EnumOption, Field, FieldKind};
use crate::store::Row;

pub const TRUNCATE_LEN: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormMode {
    Create,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Widget {
    Text,
    Number,
    Checkbox,
    Datetime,
    Select,
    JsonEditor,
}

impl Widget {
    fn for_kind(kind: FieldKind) -> Self {
        match kind {
            FieldKind::Text => Widget::Text,
            FieldKind::Number => Widget::Number,
            FieldKind::Boolean => Widget::Checkbox,
            FieldKind::Datetime => Widget::Datetime,
            FieldKind::Enum => Widget::Select,
            FieldKind::Json => Widget::JsonEditor,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub widget: Widget,
    pub required: bool,
    pub editable: bool,
    pub options: Vec<EnumOption>,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
}

/// Create mode omits readonly fields; update mode includes them as
/// non-editable so the form can show identity and timestamps.
pub fn project_form(schema: &EntitySchema, current: &Row, mode: FormMode) -> Vec<FieldDescriptor> {
    schema
        .fields
        .iter()
        .filter(|f| !(mode == FormMode::Create && f.readonly))
        .map(|f| FieldDescriptor {
            name: f.name.clone(),
            label: f.label.clone(),
            widget: Widget::for_kind(f.kind),
            required: f.required,
            editable: !f.readonly,
            options: f.options.clone(),
            value: current.get(&f.name).cloned().unwrap_or(Value::Null),
        })
        .collect()
}

/// Every schema field becomes a column; every cell is formatted text.
pub fn project_table(schema: &EntitySchema, rows: &[Row]) -> (Vec<ColumnDescriptor>, Vec<Vec<String>>) {
    let columns: Vec<ColumnDescriptor> = schema
        .fields
        .iter()
        .map(|f| ColumnDescriptor { name: f.name.clone(), label: f.label.clone(), kind: f.kind })
        .collect();
    let formatted = rows
        .iter()
        .map(|row| {
            schema
                .fields
                .iter()
                .map(|f| format_value(f, row.get(&f.name).unwrap_or(&Value::Null)))
                .collect()
        })
        .collect();
    (columns, formatted)
}

/// Total formatting per field kind. Booleans arrive as sqlite 0/1 or as
/// JSON booleans; datetimes are epoch seconds.
pub fn format_value(field: &Field, value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    match field.kind {
        FieldKind::Boolean => {
            let truthy = value.as_bool().unwrap_or_else(|| value.as_i64().unwrap_or(0) != 0);
            if truthy { "yes".to_string() } else { "no".to_string() }
        }
        FieldKind::Datetime => match value.as_i64().and_then(|s| chrono::DateTime::from_timestamp(s, 0)) {
            Some(dt) => dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string(),
            None => value.to_string(),
        },
        FieldKind::Enum => {
            let raw = value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string());
            field
                .options
                .iter()
                .find(|o| o.value == raw)
                .map(|o| o.label.clone())
                .unwrap_or(raw)
        }
        FieldKind::Number => match value.as_f64() {
            Some(n) if n.fract() == 0.0 => format!("{}", n as i64),
            Some(n) => format!("{}", n),
            None => value.to_string(),
        },
        FieldKind::Text | FieldKind::Json => {
            let raw = value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string());
            truncate(&raw, TRUNCATE_LEN)
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use serde_json::json;

    fn schema(name: &str) -> std::sync::Arc<EntitySchema> {
        Registry::builtin().get(name).unwrap()
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn create_form_excludes_readonly() {
        let s = schema("players");
        let form = project_form(&s, &Row::new(), FormMode::Create);
        assert!(form.iter().all(|f| f.name != "id" && f.name != "created_at"));
        assert!(form.iter().all(|f| f.editable));
    }

    #[test]
    fn update_form_includes_readonly_non_editable() {
        let s = schema("players");
        let current = row(&[("id", json!("p-1")), ("name", json!("Baek Mok"))]);
        let form = project_form(&s, &current, FormMode::Update);
        let id = form.iter().find(|f| f.name == "id").unwrap();
        assert!(!id.editable);
        assert_eq!(id.value, json!("p-1"));
        let name = form.iter().find(|f| f.name == "name").unwrap();
        assert!(name.editable);
    }

    #[test]
    fn projection_is_deterministic() {
        let s = schema("items");
        let current = row(&[("name", json!("Sword"))]);
        let a = project_form(&s, &current, FormMode::Update);
        let b = project_form(&s, &current, FormMode::Update);
        assert_eq!(serde_json::to_value(&a).unwrap(), serde_json::to_value(&b).unwrap());
    }

    #[test]
    fn enum_widget_carries_options() {
        let s = schema("items");
        let form = project_form(&s, &Row::new(), FormMode::Create);
        let cat = form.iter().find(|f| f.name == "category").unwrap();
        assert_eq!(cat.widget, Widget::Select);
        assert!(cat.options.iter().any(|o| o.value == "arts"));
    }

    #[test]
    fn boolean_formats_yes_no() {
        let f = Field::boolean("is_active");
        assert_eq!(format_value(&f, &json!(true)), "yes");
        assert_eq!(format_value(&f, &json!(1)), "yes");
        assert_eq!(format_value(&f, &json!(0)), "no");
    }

    #[test]
    fn enum_formats_label_or_raw() {
        let s = schema("items");
        let f = s.field("category").unwrap();
        assert_eq!(format_value(f, &json!("arts")), "Martial Arts");
        assert_eq!(format_value(f, &json!("relics")), "relics");
    }

    #[test]
    fn long_text_truncates_with_ellipsis() {
        let f = Field::text("description");
        let long = "a".repeat(100);
        let out = format_value(&f, &json!(long));
        assert_eq!(out.chars().count(), TRUNCATE_LEN + 1);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn null_formats_empty() {
        let f = Field::datetime("created_at");
        assert_eq!(format_value(&f, &Value::Null), "");
    }

    #[test]
    fn table_shape_matches_rows() {
        let s = schema("merchants");
        let rows = vec![
            row(&[("id", json!("m-1")), ("name", json!("Spice Hall")), ("is_active", json!(1))]),
            row(&[("id", json!("m-2")), ("name", json!("Smithy")), ("is_active", json!(0))]),
        ];
        let (cols, formatted) = project_table(&s, &rows);
        assert_eq!(cols.len(), s.fields.len());
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0].len(), cols.len());
        let active_idx = cols.iter().position(|c| c.name == "is_active").unwrap();
        assert_eq!(formatted[0][active_idx], "yes");
        assert_eq!(formatted[1][active_idx], "no");
    }
}
