//! # Operations
//!
//! The primitive database actions a `transact` call carries, plus the
//! condition and mutation clauses they use.
//!
//! | Operation | Wire `op` | Result payload |
//! |-----------|-----------|----------------|
//! | [`Operation::insert`] | `insert` | `uuid` |
//! | [`Operation::select`] | `select` | `rows` |
//! | [`Operation::update`] | `update` | `count` |
//! | [`Operation::mutate`] | `mutate` | `count` |
//! | [`Operation::delete`] | `delete` | `count` |
//! | [`Operation::wait`] | `wait` | none |
//! | [`Operation::commit`] | `commit` | none |
//! | [`Operation::abort`] | `abort` | always an error |
//! | [`Operation::comment`] | `comment` | none |
//! | [`Operation::assert`] | `assert` | error unless the lock is held |
//!
//! Constructors that take a [`TableSchema`] validate every column and value
//! locally and fail with a local validation error before anything is sent.

pub mod result;
pub mod transaction;

pub use result::{OperationResult, ResultSlot, TransactResults};
pub use transaction::{PendingTransaction, TransactionBuilder};

use std::fmt;

use serde_json::{json, Map, Value as Json};
use uuid::Uuid;

use crate::protocol::{OvsdbError, OvsdbResult};
use crate::schema::validator::{coerce_elements, validate_atom};
use crate::schema::{AtomicType, BaseType, ColumnKind, ColumnSchema, RowValidator, TableSchema};
use crate::value::row::UUID_COLUMN;
use crate::value::{Atom, Row, Value};

// ============================================================================
// Conditions
// ============================================================================

/// Comparison function in a `where` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    GreaterThan,
    Includes,
    Excludes,
}

impl Function {
    pub fn as_str(&self) -> &'static str {
        match self {
            Function::LessThan => "<",
            Function::LessThanOrEqual => "<=",
            Function::Equal => "==",
            Function::NotEqual => "!=",
            Function::GreaterThanOrEqual => ">=",
            Function::GreaterThan => ">",
            Function::Includes => "includes",
            Function::Excludes => "excludes",
        }
    }

    /// `<`, `<=`, `>=`, `>` only apply to scalar integers and reals.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Function::LessThan
                | Function::LessThanOrEqual
                | Function::GreaterThanOrEqual
                | Function::GreaterThan
        )
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[column, function, value]` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: Function,
    pub value: Value,
}

impl Condition {
    /// Validated condition on a column of `table`.
    pub fn new(
        table: &TableSchema,
        column: &str,
        function: Function,
        value: impl Into<Value>,
    ) -> OvsdbResult<Self> {
        let schema = table.lookup_column(column)?;
        if function.is_ordering() && !is_numeric_scalar(schema) {
            return Err(OvsdbError::TypeMismatch {
                column: column.to_string(),
                expected: "integer or real scalar".to_string(),
                got: schema.column_type.to_string(),
            });
        }
        Ok(Condition {
            column: column.to_string(),
            function,
            value: coerce_elements(schema, value.into())?,
        })
    }

    /// `column == value`
    pub fn equals(table: &TableSchema, column: &str, value: impl Into<Value>) -> OvsdbResult<Self> {
        Condition::new(table, column, Function::Equal, value)
    }

    /// `_uuid == uuid`; valid on every table.
    pub fn uuid_equals(uuid: Uuid) -> Self {
        Condition {
            column: UUID_COLUMN.to_string(),
            function: Function::Equal,
            value: Value::from(uuid),
        }
    }

    pub fn to_json(&self) -> Json {
        json!([self.column, self.function.as_str(), self.value.to_json()])
    }
}

fn is_numeric_scalar(column: &ColumnSchema) -> bool {
    matches!(column.kind(), ColumnKind::Atomic { .. })
        && matches!(
            column.column_type.key.atomic,
            AtomicType::Integer | AtomicType::Real
        )
}

// ============================================================================
// Mutations
// ============================================================================

/// Mutator in a `mutate` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Insert,
    Delete,
}

impl Mutator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mutator::Add => "+=",
            Mutator::Subtract => "-=",
            Mutator::Multiply => "*=",
            Mutator::Divide => "/=",
            Mutator::Modulo => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, Mutator::Insert | Mutator::Delete)
    }
}

impl fmt::Display for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `[column, mutator, value]` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub column: String,
    pub mutator: Mutator,
    pub value: Value,
}

impl Mutation {
    /// Validated mutation of a column of `table`.
    ///
    /// `insert`/`delete` need a set or map column; arithmetic needs an
    /// integer or real column that is not a map. Deleting from a map accepts
    /// either a map or a set of keys.
    pub fn new(
        table: &TableSchema,
        column: &str,
        mutator: Mutator,
        value: impl Into<Value>,
    ) -> OvsdbResult<Self> {
        let schema = table.lookup_column(column)?;
        if !schema.mutable {
            return Err(OvsdbError::ConstraintViolation {
                column: column.to_string(),
                message: format!("column is immutable in table '{}'", table.name),
            });
        }
        let value = value.into();
        let kind = schema.kind();

        let value = if mutator.is_arithmetic() {
            let atomic = schema.column_type.key.atomic;
            let numeric = match mutator {
                Mutator::Modulo => atomic == AtomicType::Integer,
                _ => matches!(atomic, AtomicType::Integer | AtomicType::Real),
            };
            if !numeric || kind == ColumnKind::Map {
                return Err(OvsdbError::TypeMismatch {
                    column: column.to_string(),
                    expected: format!("numeric column for '{mutator}'"),
                    got: schema.column_type.to_string(),
                });
            }
            let Value::Atom(atom) = &value else {
                return Err(OvsdbError::TypeMismatch {
                    column: column.to_string(),
                    expected: format!("scalar {atomic} operand"),
                    got: value.shape().to_string(),
                });
            };
            validate_atom(schema, &BaseType::new(atomic), atom)?;
            value
        } else {
            match kind {
                ColumnKind::Atomic { optional: false } => {
                    return Err(OvsdbError::TypeMismatch {
                        column: column.to_string(),
                        expected: format!("set or map column for '{mutator}'"),
                        got: schema.column_type.to_string(),
                    });
                }
                ColumnKind::Map if mutator == Mutator::Delete && !matches!(value, Value::Map(_)) => {
                    let keys = match value {
                        Value::Atom(a) => Value::set([a]),
                        other => other,
                    };
                    for key in keys.atoms() {
                        validate_atom(schema, &schema.column_type.key, key)?;
                    }
                    keys
                }
                ColumnKind::Atomic { optional: true } => {
                    let set = match value {
                        Value::Atom(a) => Value::set([a]),
                        other => other,
                    };
                    for atom in set.atoms() {
                        validate_atom(schema, &schema.column_type.key, atom)?;
                    }
                    set
                }
                _ => coerce_elements(schema, value)?,
            }
        };

        Ok(Mutation {
            column: column.to_string(),
            mutator,
            value,
        })
    }

    pub fn to_json(&self) -> Json {
        json!([self.column, self.mutator.as_str(), self.value.to_json()])
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Condition for the `until` member of a `wait` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Equal,
    NotEqual,
}

impl WaitUntil {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Equal => "==",
            WaitUntil::NotEqual => "!=",
        }
    }
}

/// One primitive action inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        row: Row,
        uuid_name: Option<String>,
    },
    Select {
        table: String,
        conditions: Vec<Condition>,
        columns: Option<Vec<String>>,
    },
    Update {
        table: String,
        conditions: Vec<Condition>,
        row: Row,
    },
    Mutate {
        table: String,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Wait {
        table: String,
        conditions: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
        timeout_ms: Option<u64>,
    },
    Commit {
        durable: bool,
    },
    Abort,
    Comment {
        comment: String,
    },
    Assert {
        lock: String,
    },
}

impl Operation {
    /// Insert `row` into `table`. Columns are reshaped to their declared kind
    /// and validated; the first violation is returned.
    pub fn insert(table: &TableSchema, row: Row) -> OvsdbResult<Self> {
        let row = RowValidator::for_insert()
            .coerce_row(table, row)
            .map_err(first_violation)?;
        Ok(Operation::Insert {
            table: table.name.clone(),
            row,
            uuid_name: None,
        })
    }

    /// Attach a `uuid-name` to an insert so later operations in the same
    /// transaction can reference the new row. No effect on other operations.
    pub fn with_uuid_name(mut self, name: impl Into<String>) -> Self {
        if let Operation::Insert { uuid_name, .. } = &mut self {
            *uuid_name = Some(name.into());
        }
        self
    }

    pub fn select(table: &TableSchema, conditions: Vec<Condition>) -> Self {
        Operation::Select {
            table: table.name.clone(),
            conditions,
            columns: None,
        }
    }

    /// Select with a column projection.
    pub fn select_columns(
        table: &TableSchema,
        conditions: Vec<Condition>,
        columns: &[&str],
    ) -> OvsdbResult<Self> {
        let columns = project(table, columns)?;
        Ok(Operation::Select {
            table: table.name.clone(),
            conditions,
            columns: Some(columns),
        })
    }

    /// Update matching rows with the columns in `row`. Immutable columns are rejected.
    pub fn update(table: &TableSchema, conditions: Vec<Condition>, row: Row) -> OvsdbResult<Self> {
        let row = RowValidator::for_update()
            .coerce_row(table, row)
            .map_err(first_violation)?;
        Ok(Operation::Update {
            table: table.name.clone(),
            conditions,
            row,
        })
    }

    pub fn mutate(table: &TableSchema, conditions: Vec<Condition>, mutations: Vec<Mutation>) -> Self {
        Operation::Mutate {
            table: table.name.clone(),
            conditions,
            mutations,
        }
    }

    pub fn delete(table: &TableSchema, conditions: Vec<Condition>) -> Self {
        Operation::Delete {
            table: table.name.clone(),
            conditions,
        }
    }

    /// Wait until the projection of matching rows onto `columns` equals (or
    /// differs from) `rows`.
    pub fn wait(
        table: &TableSchema,
        conditions: Vec<Condition>,
        columns: &[&str],
        until: WaitUntil,
        rows: Vec<Row>,
        timeout_ms: Option<u64>,
    ) -> OvsdbResult<Self> {
        let columns = project(table, columns)?;
        let rows = rows
            .into_iter()
            .map(|r| {
                RowValidator::for_insert()
                    .coerce_row(table, r)
                    .map_err(first_violation)
            })
            .collect::<OvsdbResult<Vec<_>>>()?;
        Ok(Operation::Wait {
            table: table.name.clone(),
            conditions,
            columns,
            until,
            rows,
            timeout_ms,
        })
    }

    pub fn commit(durable: bool) -> Self {
        Operation::Commit { durable }
    }

    pub fn abort() -> Self {
        Operation::Abort
    }

    pub fn comment(comment: impl Into<String>) -> Self {
        Operation::Comment {
            comment: comment.into(),
        }
    }

    /// Succeeds only while this connection holds `lock`.
    pub fn assert(lock: impl Into<String>) -> Self {
        Operation::Assert { lock: lock.into() }
    }

    /// Wire name of the operation.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Select { .. } => "select",
            Operation::Update { .. } => "update",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Wait { .. } => "wait",
            Operation::Commit { .. } => "commit",
            Operation::Abort => "abort",
            Operation::Comment { .. } => "comment",
            Operation::Assert { .. } => "assert",
        }
    }

    /// Table the operation targets, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::Insert { table, .. }
            | Operation::Select { table, .. }
            | Operation::Update { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Wait { table, .. } => Some(table),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        object.insert("op".into(), json!(self.name()));
        if let Some(table) = self.table() {
            object.insert("table".into(), json!(table));
        }
        match self {
            Operation::Insert { row, uuid_name, .. } => {
                object.insert("row".into(), row.to_json());
                if let Some(name) = uuid_name {
                    object.insert("uuid-name".into(), json!(name));
                }
            }
            Operation::Select {
                conditions,
                columns,
                ..
            } => {
                object.insert("where".into(), conditions_json(conditions));
                if let Some(columns) = columns {
                    object.insert("columns".into(), json!(columns));
                }
            }
            Operation::Update { conditions, row, .. } => {
                object.insert("where".into(), conditions_json(conditions));
                object.insert("row".into(), row.to_json());
            }
            Operation::Mutate {
                conditions,
                mutations,
                ..
            } => {
                object.insert("where".into(), conditions_json(conditions));
                object.insert(
                    "mutations".into(),
                    Json::Array(mutations.iter().map(Mutation::to_json).collect()),
                );
            }
            Operation::Delete { conditions, .. } => {
                object.insert("where".into(), conditions_json(conditions));
            }
            Operation::Wait {
                conditions,
                columns,
                until,
                rows,
                timeout_ms,
                ..
            } => {
                object.insert("where".into(), conditions_json(conditions));
                object.insert("columns".into(), json!(columns));
                object.insert("until".into(), json!(until.as_str()));
                object.insert(
                    "rows".into(),
                    Json::Array(rows.iter().map(Row::to_json).collect()),
                );
                if let Some(timeout) = timeout_ms {
                    object.insert("timeout".into(), json!(timeout));
                }
            }
            Operation::Commit { durable } => {
                object.insert("durable".into(), json!(durable));
            }
            Operation::Abort => {}
            Operation::Comment { comment } => {
                object.insert("comment".into(), json!(comment));
            }
            Operation::Assert { lock } => {
                object.insert("lock".into(), json!(lock));
            }
        }
        Json::Object(object)
    }
}

fn conditions_json(conditions: &[Condition]) -> Json {
    Json::Array(conditions.iter().map(Condition::to_json).collect())
}

fn project(table: &TableSchema, columns: &[&str]) -> OvsdbResult<Vec<String>> {
    columns
        .iter()
        .map(|c| table.lookup_column(c).map(|col| col.name.clone()))
        .collect()
}

fn first_violation(violations: Vec<crate::schema::Violation>) -> OvsdbError {
    violations
        .into_iter()
        .next()
        .map_or_else(
            || OvsdbError::InvalidSchema {
                message: "row rejected without a reported violation".to_string(),
            },
            crate::schema::Violation::into_error,
        )
}

/// Atom helper for referencing a row inserted earlier in the same transaction.
pub fn named_ref(uuid_name: &str) -> Atom {
    Atom::named_uuid(uuid_name)
}
