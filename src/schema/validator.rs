//! # Datum Validation
//!
//! Client-side checks of values against column types:
//! - Shape checking (scalar vs set vs map)
//! - Base type checking (integer, real, boolean, string, uuid)
//! - Constraint checking (enum, numeric ranges, string length, cardinality)
//! - Whole-row checks with violation reporting
//!
//! Everything here runs before a value is accepted into an operation, so a
//! failure never costs a round trip.

use std::fmt;

use super::{BaseType, ColumnKind, ColumnSchema, TableSchema};
use crate::protocol::{OvsdbError, OvsdbResult};
use crate::value::{Atom, Row, Value};

/// A single validation failure within a row
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// Column that failed validation
    pub column: String,
    /// Type of violation
    pub violation_type: ViolationType,
    /// Underlying error
    pub error: OvsdbError,
}

impl Violation {
    pub fn new(column: impl Into<String>, violation_type: ViolationType, error: OvsdbError) -> Self {
        Violation {
            column: column.into(),
            violation_type,
            error,
        }
    }

    fn from_error(column: &str, error: OvsdbError) -> Self {
        let violation_type = match &error {
            OvsdbError::SchemaVersionMismatch { .. } => ViolationType::UnknownColumn,
            OvsdbError::TypeMismatch { .. } => ViolationType::TypeMismatch,
            _ => ViolationType::ConstraintViolation,
        };
        Violation::new(column, violation_type, error)
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    pub fn into_error(self) -> OvsdbError {
        self.error
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}' - {} ({})",
            self.column, self.violation_type, self.error
        )
    }
}

/// Types of validation violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationType {
    /// Column not present in the schema
    UnknownColumn,
    /// Value has the wrong shape or base type
    TypeMismatch,
    /// Value violates an enum, range, length, or cardinality constraint
    ConstraintViolation,
    /// Column is immutable and cannot be updated
    Immutable,
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationType::UnknownColumn => write!(f, "UNKNOWN_COLUMN"),
            ViolationType::TypeMismatch => write!(f, "TYPE_MISMATCH"),
            ViolationType::ConstraintViolation => write!(f, "CONSTRAINT_VIOLATION"),
            ViolationType::Immutable => write!(f, "IMMUTABLE"),
        }
    }
}

/// Check that `value` has exactly the shape the column declares.
///
/// This is the strict check used by typed rows: a scalar assigned to a set or
/// map column is a type error even though the wire format would accept it.
pub fn validate_value(column: &ColumnSchema, value: &Value) -> OvsdbResult<()> {
    let ty = &column.column_type;
    match (column.kind(), value) {
        (ColumnKind::Atomic { .. }, Value::Atom(atom)) => validate_atom(column, &ty.key, atom),
        (ColumnKind::Atomic { optional: true }, Value::Set(set)) if set.is_empty() => Ok(()),
        (ColumnKind::Set, Value::Set(set)) => {
            validate_cardinality(column, set.len())?;
            set.iter()
                .try_for_each(|atom| validate_atom(column, &ty.key, atom))
        }
        (ColumnKind::Map, Value::Map(map)) => {
            validate_cardinality(column, map.len())?;
            let value_type = ty.value.as_ref().ok_or_else(|| type_mismatch(column, value))?;
            map.iter().try_for_each(|(k, v)| {
                validate_atom(column, &ty.key, k)?;
                validate_atom(column, value_type, v)
            })
        }
        _ => Err(type_mismatch(column, value)),
    }
}

/// Wire-lenient check: reshape `value` to the column kind first (a bare atom
/// for a set column becomes a one-element set), then validate strictly.
pub fn coerce_value(column: &ColumnSchema, value: Value) -> OvsdbResult<Value> {
    let value = value.normalize(&column.column_type);
    validate_value(column, &value)?;
    Ok(value)
}

/// Like [`coerce_value`] but without the cardinality check, for condition
/// operands and mutation arguments that name only part of a column's value.
pub fn coerce_elements(column: &ColumnSchema, value: Value) -> OvsdbResult<Value> {
    let ty = &column.column_type;
    let value = value.normalize(ty);
    match (column.kind(), &value) {
        (ColumnKind::Atomic { .. }, Value::Atom(atom)) => validate_atom(column, &ty.key, atom)?,
        (ColumnKind::Atomic { optional: true }, Value::Set(set)) if set.is_empty() => {}
        (ColumnKind::Set, Value::Set(set)) => {
            for atom in set {
                validate_atom(column, &ty.key, atom)?;
            }
        }
        (ColumnKind::Map, Value::Map(map)) => {
            let value_type = ty.value.as_ref().ok_or_else(|| type_mismatch(column, &value))?;
            for (k, v) in map {
                validate_atom(column, &ty.key, k)?;
                validate_atom(column, value_type, v)?;
            }
        }
        _ => return Err(type_mismatch(column, &value)),
    }
    Ok(value)
}

/// Check a single atom against a base type and its constraints.
pub fn validate_atom(column: &ColumnSchema, base: &BaseType, atom: &Atom) -> OvsdbResult<()> {
    let matches = match (base.atomic, atom) {
        (super::AtomicType::Real, Atom::Integer(_)) => true,
        (expected, atom) => atom.atomic_type() == expected,
    };
    if !matches {
        return Err(OvsdbError::TypeMismatch {
            column: column.name.clone(),
            expected: base.atomic.to_string(),
            got: atom.atomic_type().to_string(),
        });
    }

    if let Some(allowed) = &base.enum_values {
        if !allowed.contains(atom) {
            return Err(constraint(
                column,
                format!("{atom} is not one of the allowed values"),
            ));
        }
    }

    match atom {
        Atom::Integer(v) => {
            if base.min_integer.is_some_and(|min| *v < min)
                || base.max_integer.is_some_and(|max| *v > max)
            {
                return Err(constraint(
                    column,
                    format!(
                        "{v} outside [{}, {}]",
                        base.min_integer.map_or("-inf".into(), |m| m.to_string()),
                        base.max_integer.map_or("inf".into(), |m| m.to_string())
                    ),
                ));
            }
        }
        Atom::Real(v) => {
            if base.min_real.is_some_and(|min| *v < min) || base.max_real.is_some_and(|max| *v > max)
            {
                return Err(constraint(column, format!("{v} outside allowed range")));
            }
        }
        Atom::String(s) => {
            let len = s.chars().count();
            if base.min_length.is_some_and(|min| len < min)
                || base.max_length.is_some_and(|max| len > max)
            {
                return Err(constraint(
                    column,
                    format!("string length {len} outside allowed range"),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_cardinality(column: &ColumnSchema, n: usize) -> OvsdbResult<()> {
    let ty = &column.column_type;
    if (n as u64) < ty.min || !ty.max.allows(n) {
        return Err(constraint(
            column,
            format!("{n} element(s) violates cardinality of {}", ty),
        ));
    }
    Ok(())
}

fn type_mismatch(column: &ColumnSchema, value: &Value) -> OvsdbError {
    OvsdbError::TypeMismatch {
        column: column.name.clone(),
        expected: format!("{} ({})", column.kind(), column.column_type),
        got: value.shape().to_string(),
    }
}

fn constraint(column: &ColumnSchema, message: String) -> OvsdbError {
    OvsdbError::ConstraintViolation {
        column: column.name.clone(),
        message,
    }
}

/// Validates whole rows against a table schema
#[derive(Debug, Clone, Copy, Default)]
pub struct RowValidator {
    /// Reject writes to columns the schema marks immutable
    pub reject_immutable: bool,
}

impl RowValidator {
    /// Validator for insert rows (immutable columns may be set on insert)
    pub fn for_insert() -> Self {
        RowValidator {
            reject_immutable: false,
        }
    }

    /// Validator for update rows
    pub fn for_update() -> Self {
        RowValidator {
            reject_immutable: true,
        }
    }

    /// Validate every column in `row`, collecting all violations.
    pub fn validate_row(&self, table: &TableSchema, row: &Row) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for (name, value) in row.iter() {
            if let Err(v) = self.check_column(table, name, value) {
                violations.push(v);
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Reshape each column to its declared kind, then validate.
    pub fn coerce_row(&self, table: &TableSchema, row: Row) -> Result<Row, Vec<Violation>> {
        let mut violations = Vec::new();
        let mut coerced = Row::new();
        for (name, value) in row.iter() {
            let value = match table.column(name) {
                Some(column) => value.clone().normalize(&column.column_type),
                None => value.clone(),
            };
            match self.check_column(table, name, &value) {
                Ok(()) => {
                    coerced.insert(name.clone(), value);
                }
                Err(v) => violations.push(v),
            }
        }
        if violations.is_empty() {
            Ok(coerced)
        } else {
            Err(violations)
        }
    }

    fn check_column(&self, table: &TableSchema, name: &str, value: &Value) -> Result<(), Violation> {
        let column = table
            .lookup_column(name)
            .map_err(|e| Violation::from_error(name, e))?;
        if self.reject_immutable && !column.mutable {
            return Err(Violation::new(
                name,
                ViolationType::Immutable,
                OvsdbError::ConstraintViolation {
                    column: name.to_string(),
                    message: format!("column is immutable in table '{}'", table.name),
                },
            ));
        }
        validate_value(column, value).map_err(|e| Violation::from_error(name, e))
    }
}
