//! Generic rows keyed by column name.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use uuid::Uuid;

use super::{Atom, Value};
use crate::protocol::{OvsdbError, OvsdbResult};
use crate::schema::TableSchema;

/// Column name of the synthetic row identity column.
pub const UUID_COLUMN: &str = "_uuid";
/// Column name of the synthetic row version column.
pub const VERSION_COLUMN: &str = "_version";

/// A row as a mapping from column name to datum.
///
/// Rows carry no identity beyond the `_uuid` column when present. Columns
/// that were not selected or not sent are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.columns.insert(column.into(), value)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// The row's `_uuid`, when the server included it.
    pub fn uuid(&self) -> Option<Uuid> {
        self.get(UUID_COLUMN)
            .and_then(Value::as_atom)
            .and_then(Atom::as_uuid)
    }

    /// Overlay `other` on top of this row (columns in `other` win).
    pub fn merge(&mut self, other: &Row) {
        for (name, value) in other.iter() {
            self.columns.insert(name.clone(), value.clone());
        }
    }

    pub fn to_json(&self) -> Json {
        let map: Map<String, Json> = self
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Json::Object(map)
    }

    /// Decode a row object without schema knowledge.
    pub fn from_json(json: &Json) -> OvsdbResult<Self> {
        let object = json.as_object().ok_or_else(|| OvsdbError::MalformedMessage {
            message: format!("row is not an object: {json}"),
        })?;
        let mut row = Row::new();
        for (name, value) in object {
            row.insert(name.clone(), Value::from_json(value)?);
        }
        Ok(row)
    }

    /// Decode a row object and reshape each known column to its declared kind.
    pub fn from_json_with_schema(json: &Json, table: &TableSchema) -> OvsdbResult<Self> {
        let mut row = Row::from_json(json)?;
        for (name, value) in row.columns.iter_mut() {
            if let Some(column) = table.column(name) {
                let taken = std::mem::replace(value, Value::empty_set());
                *value = taken.normalize(&column.column_type);
            }
        }
        Ok(row)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row {
            columns: iter.into_iter().collect(),
        }
    }
}
