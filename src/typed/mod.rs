//! # Typed Row Binding
//!
//! A [`TableBinding`] describes a table the application knows about at
//! compile time: its name and the columns it uses, each optionally limited to
//! a range of schema versions. A [`TypedRow`] pairs a binding with the live
//! [`TableSchema`] and a generic [`Row`], and checks every access:
//!
//! 1. the live schema version is inside the field's `since..=until` range
//! 2. the column exists in the live schema
//! 3. on writes, the value has exactly the column's shape and base type
//!
//! Failures of (1) and (2) are `SchemaVersionMismatch`; failures of (3) are
//! `TypeMismatch` or `ConstraintViolation`. All are raised before any
//! operation is built.
//!
//! Reads of columns the row does not carry return the column's default
//! (empty set, empty map, or zero value) instead of failing.

pub mod openvswitch;

use std::sync::Arc;

use uuid::Uuid;

use crate::operations::{Condition, Function, Mutation, Mutator, Operation};
use crate::protocol::{OvsdbError, OvsdbResult};
use crate::schema::validator::validate_value;
use crate::schema::{ColumnSchema, DatabaseSchema, SchemaVersion, TableSchema};
use crate::value::row::{UUID_COLUMN, VERSION_COLUMN};
use crate::value::{Row, Value};

/// One column a binding uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub column: &'static str,
    /// First schema version that has the column
    pub since: Option<SchemaVersion>,
    /// Last schema version that has the column
    pub until: Option<SchemaVersion>,
}

impl FieldSpec {
    pub const fn new(column: &'static str) -> Self {
        FieldSpec {
            column,
            since: None,
            until: None,
        }
    }

    pub const fn since(mut self, version: SchemaVersion) -> Self {
        self.since = Some(version);
        self
    }

    pub const fn until(mut self, version: SchemaVersion) -> Self {
        self.until = Some(version);
        self
    }

    /// Check the live schema version against the field's range.
    pub fn check_version(&self, table: &str, live: SchemaVersion) -> OvsdbResult<()> {
        let out_of_range = |detail: String| OvsdbError::SchemaVersionMismatch {
            table: table.to_string(),
            column: Some(self.column.to_string()),
            detail,
        };
        if let Some(since) = self.since {
            if live < since {
                return Err(out_of_range(format!(
                    "requires schema version {since} or later, server has {live}"
                )));
            }
        }
        if let Some(until) = self.until {
            if live > until {
                return Err(out_of_range(format!(
                    "removed after schema version {until}, server has {live}"
                )));
            }
        }
        Ok(())
    }
}

/// Compile-time description of a table.
#[derive(Debug, Clone, Copy)]
pub struct TableBinding {
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
}

impl TableBinding {
    pub fn field(&self, column: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.column == column)
    }
}

/// A row of a bound table with checked accessors.
#[derive(Debug, Clone)]
pub struct TypedRow {
    binding: &'static TableBinding,
    table: Arc<TableSchema>,
    row: Row,
}

impl TypedRow {
    /// Empty row for `binding`. Fails if the live schema has no such table.
    pub fn new(schema: &DatabaseSchema, binding: &'static TableBinding) -> OvsdbResult<Self> {
        Self::from_row(schema, binding, Row::new())
    }

    /// Wrap a row read from the server (select result or monitor update).
    pub fn from_row(
        schema: &DatabaseSchema,
        binding: &'static TableBinding,
        row: Row,
    ) -> OvsdbResult<Self> {
        let table = Arc::clone(schema.lookup_table(binding.table)?);
        Ok(TypedRow {
            binding,
            table,
            row,
        })
    }

    pub fn binding(&self) -> &'static TableBinding {
        self.binding
    }

    pub fn table(&self) -> &Arc<TableSchema> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn into_row(self) -> Row {
        self.row
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.row.uuid()
    }

    /// Resolve `column` against the binding and the live schema.
    pub fn column(&self, column: &str) -> OvsdbResult<&ColumnSchema> {
        if let Some(field) = self.binding.field(column) {
            field.check_version(&self.table.name, self.table.schema_version)?;
        }
        self.table.lookup_column(column)
    }

    /// Whether the live schema supports `column` for this binding.
    pub fn supports(&self, column: &str) -> bool {
        self.column(column).is_ok()
    }

    /// Assign a value. The value must already have the column's shape: a
    /// bare scalar for a set or map column is a type error.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> OvsdbResult<&mut Self> {
        let value = value.into();
        let schema = self.column(column)?;
        validate_value(schema, &value)?;
        let name = schema.name.clone();
        self.row.insert(name, value);
        Ok(self)
    }

    /// Read a column, returning its default when the row does not carry it.
    pub fn get(&self, column: &str) -> OvsdbResult<Value> {
        let schema = self.column(column)?;
        Ok(self
            .row
            .get(column)
            .cloned()
            .unwrap_or_else(|| schema.column_type.default_value()))
    }

    /// String value of a scalar column; `None` when unset.
    pub fn get_str(&self, column: &str) -> OvsdbResult<Option<String>> {
        Ok(self
            .get(column)?
            .as_atom()
            .and_then(|a| a.as_str())
            .map(String::from))
    }

    /// Condition on a column of this table.
    pub fn condition(
        &self,
        column: &str,
        function: Function,
        value: impl Into<Value>,
    ) -> OvsdbResult<Condition> {
        self.column(column)?;
        Condition::new(&self.table, column, function, value)
    }

    /// `column == <this row's value of column>`.
    pub fn where_eq(&self, column: &str) -> OvsdbResult<Condition> {
        let value = self.get(column)?;
        self.condition(column, Function::Equal, value)
    }

    /// Mutation of a column of this table.
    pub fn mutation(
        &self,
        column: &str,
        mutator: Mutator,
        value: impl Into<Value>,
    ) -> OvsdbResult<Mutation> {
        self.column(column)?;
        Mutation::new(&self.table, column, mutator, value)
    }

    /// Mutation using the value currently assigned to `column`.
    pub fn mutation_from(&self, column: &str, mutator: Mutator) -> OvsdbResult<Mutation> {
        let value = self.get(column)?;
        self.mutation(column, mutator, value)
    }

    /// Columns to write, without the synthetic ones.
    fn writable_row(&self) -> Row {
        self.row
            .iter()
            .filter(|(name, _)| name.as_str() != UUID_COLUMN && name.as_str() != VERSION_COLUMN)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Insert of the assigned columns.
    pub fn insert_op(&self) -> OvsdbResult<Operation> {
        Operation::insert(&self.table, self.writable_row())
    }

    /// Update of the assigned columns on rows matching `conditions`.
    pub fn update_op(&self, conditions: Vec<Condition>) -> OvsdbResult<Operation> {
        Operation::update(&self.table, conditions, self.writable_row())
    }
}

/// Implemented by domain wrappers around [`TypedRow`].
pub trait TypedTable: Sized {
    const BINDING: &'static TableBinding;

    fn from_typed(row: TypedRow) -> Self;

    fn typed(&self) -> &TypedRow;

    fn typed_mut(&mut self) -> &mut TypedRow;

    /// Empty row bound to the live schema.
    fn new(schema: &DatabaseSchema) -> OvsdbResult<Self> {
        TypedRow::new(schema, Self::BINDING).map(Self::from_typed)
    }

    /// Wrap a row read from the server.
    fn wrap(schema: &DatabaseSchema, row: Row) -> OvsdbResult<Self> {
        TypedRow::from_row(schema, Self::BINDING, row).map(Self::from_typed)
    }
}
