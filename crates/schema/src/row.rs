use std::collections::BTreeMap;

use serde_json::{json, Map};
use vigil_sqlite::Value;

use crate::column::{ColumnDef, ColumnType, TableSchema};
use crate::error::SchemaError;

/// One typed row: column name → value. A column absent from the map was
/// not observed; an explicit [`Value::Null`] was observed as null. The
/// distinction matters when overlaying a partial update onto a
/// persisted row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlays `other`'s observed columns onto this row.
    pub fn overlay(&mut self, other: &Row) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    /// True iff every primary-key column is present and non-null.
    pub fn has_valid_pk(&self, schema: &TableSchema) -> bool {
        schema
            .primary_keys()
            .iter()
            .all(|c| matches!(self.values.get(&c.name), Some(v) if !v.is_null()))
    }

    /// Primary-key values in key order. Call only after
    /// [`Row::has_valid_pk`].
    pub fn pk_values(&self, schema: &TableSchema) -> Vec<Value> {
        schema
            .primary_keys()
            .iter()
            .map(|c| self.values.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Decodes a JSON object against the schema. Keys that are not
    /// schema columns are ignored; the status column cannot be set from
    /// the outside.
    pub fn from_json(schema: &TableSchema, input: &serde_json::Value) -> Result<Self, SchemaError> {
        let object = input.as_object().ok_or_else(|| SchemaError::Decode {
            column: schema.name.clone(),
            expected: "object",
            found: kind_of(input).to_owned(),
        })?;

        let mut row = Row::new();
        for col in schema.field_columns() {
            if let Some(v) = object.get(&col.name) {
                row.set(col.name.clone(), decode_value(col, v)?);
            }
        }
        Ok(row)
    }

    /// Extracts a row from a query result. `columns` must match the
    /// SELECT list positionally.
    pub fn from_sql_row(columns: &[&ColumnDef], r: &rusqlite::Row) -> Result<Self, SchemaError> {
        use rusqlite::types::ValueRef;

        let mut row = Row::new();
        for (idx, col) in columns.iter().enumerate() {
            let raw = r.get_ref(idx).map_err(vigil_sqlite::DbError::from)?;
            let value = match (raw, col.ty) {
                (ValueRef::Null, _) => Value::Null,
                (ValueRef::Integer(v), ColumnType::Integer) => Value::Integer(v as i32),
                (ValueRef::Integer(v), ColumnType::BigInt) => Value::BigInt(v),
                (ValueRef::Integer(v), ColumnType::UnsignedBigInt) => Value::UnsignedBigInt(v as u64),
                (ValueRef::Integer(v), ColumnType::Double) => Value::Double(v as f64),
                (ValueRef::Real(v), ColumnType::Double) => Value::Double(v),
                (ValueRef::Text(t), ColumnType::Text) => {
                    Value::Text(String::from_utf8_lossy(t).into_owned())
                }
                (ValueRef::Blob(b), ColumnType::Blob) => Value::Blob(b.to_vec()),
                (other, _) => {
                    return Err(SchemaError::Decode {
                        column: col.name.clone(),
                        expected: col.ty.sql_name(),
                        found: format!("{other:?}"),
                    })
                }
            };
            row.set(col.name.clone(), value);
        }
        Ok(row)
    }

    /// Encodes observed, non-null columns as a JSON object, walking the
    /// schema so key order follows the declaration. The status column
    /// is never emitted.
    pub fn to_json(&self, schema: &TableSchema) -> serde_json::Value {
        let mut out = Map::new();
        for col in schema.field_columns() {
            if let Some(v) = self.values.get(&col.name) {
                if !v.is_null() {
                    out.insert(col.name.clone(), value_to_json(v));
                }
            }
        }
        serde_json::Value::Object(out)
    }
}

pub(crate) fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => json!(i),
        Value::BigInt(i) => json!(i),
        Value::UnsignedBigInt(i) => json!(i),
        Value::Double(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => json!(s),
        Value::Blob(b) => json!(hex::encode(b)),
    }
}

fn decode_value(col: &ColumnDef, v: &serde_json::Value) -> Result<Value, SchemaError> {
    use serde_json::Value as J;

    if v.is_null() {
        return Ok(Value::Null);
    }
    let err = || SchemaError::Decode {
        column: col.name.clone(),
        expected: col.ty.sql_name(),
        found: kind_of(v).to_owned(),
    };
    Ok(match col.ty {
        ColumnType::Text => match v {
            J::String(s) => Value::Text(s.clone()),
            J::Number(n) => Value::Text(n.to_string()),
            J::Bool(b) => Value::Text(b.to_string()),
            _ => return Err(err()),
        },
        ColumnType::Integer => {
            let n = integer_of(v).ok_or_else(err)?;
            Value::Integer(i32::try_from(n).map_err(|_| err())?)
        }
        ColumnType::BigInt => Value::BigInt(integer_of(v).ok_or_else(err)?),
        ColumnType::UnsignedBigInt => match v {
            J::Number(n) => Value::UnsignedBigInt(n.as_u64().ok_or_else(err)?),
            J::String(s) => Value::UnsignedBigInt(s.parse().map_err(|_| err())?),
            _ => return Err(err()),
        },
        ColumnType::Double => match v {
            J::Number(n) => Value::Double(n.as_f64().ok_or_else(err)?),
            J::String(s) => Value::Double(s.parse().map_err(|_| err())?),
            _ => return Err(err()),
        },
        ColumnType::Blob => match v {
            J::String(s) => Value::Blob(s.clone().into_bytes()),
            _ => return Err(err()),
        },
    })
}

fn integer_of(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn kind_of(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
