//! # Schema Model
//!
//! In-memory model of a remote database schema as returned by `get_schema`.
//!
//! ## Example Schema Document
//!
//! ```json
//! {
//!   "name": "Open_vSwitch",
//!   "version": "7.6.0",
//!   "tables": {
//!     "Bridge": {
//!       "columns": {
//!         "name": {"type": "string", "mutable": false},
//!         "ports": {"type": {"key": {"type": "uuid", "refTable": "Port"},
//!                            "min": 0, "max": "unlimited"}},
//!         "fail_mode": {"type": {"key": {"type": "string",
//!                                        "enum": ["set", ["standalone", "secure"]]},
//!                                "min": 0, "max": 1}}
//!       },
//!       "isRoot": true
//!     }
//!   }
//! }
//! ```
//!
//! A parsed [`DatabaseSchema`] is immutable and shared behind an `Arc`, so it
//! is safe for unsynchronized concurrent reads. Every table gets the
//! synthetic `_uuid` and `_version` columns.

pub mod catalog;
pub mod validator;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::protocol::{OvsdbError, OvsdbResult};
use crate::value::row::{UUID_COLUMN, VERSION_COLUMN};
use crate::value::{Atom, Value};

pub use catalog::SchemaCatalog;
pub use validator::{RowValidator, Violation, ViolationType};

/// The five OVSDB atomic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl AtomicType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomicType::Integer => "integer",
            AtomicType::Real => "real",
            AtomicType::Boolean => "boolean",
            AtomicType::String => "string",
            AtomicType::Uuid => "uuid",
        }
    }
}

impl FromStr for AtomicType {
    type Err = OvsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "integer" => Ok(AtomicType::Integer),
            "real" => Ok(AtomicType::Real),
            "boolean" => Ok(AtomicType::Boolean),
            "string" => Ok(AtomicType::String),
            "uuid" => Ok(AtomicType::Uuid),
            other => Err(invalid(format!("unknown atomic type '{other}'"))),
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength of a UUID reference to another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefType {
    #[default]
    Strong,
    Weak,
}

/// An atomic type plus its optional constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    pub atomic: AtomicType,
    /// Allowed values, when the column is an enumeration
    pub enum_values: Option<Vec<Atom>>,
    pub min_integer: Option<i64>,
    pub max_integer: Option<i64>,
    pub min_real: Option<f64>,
    pub max_real: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub ref_table: Option<String>,
    pub ref_type: RefType,
}

impl BaseType {
    pub fn new(atomic: AtomicType) -> Self {
        BaseType {
            atomic,
            enum_values: None,
            min_integer: None,
            max_integer: None,
            min_real: None,
            max_real: None,
            min_length: None,
            max_length: None,
            ref_table: None,
            ref_type: RefType::Strong,
        }
    }

    fn from_json(json: &Json) -> OvsdbResult<Self> {
        match json {
            Json::String(s) => Ok(BaseType::new(s.parse()?)),
            Json::Object(o) => {
                let atomic: AtomicType = o
                    .get("type")
                    .and_then(Json::as_str)
                    .ok_or_else(|| invalid(format!("base type without 'type': {json}")))?
                    .parse()?;
                let mut base = BaseType::new(atomic);
                if let Some(e) = o.get("enum") {
                    let values = Value::from_json(e)
                        .map_err(|err| invalid(format!("bad enum {e}: {err}")))?;
                    base.enum_values = Some(values.atoms().cloned().collect());
                }
                base.min_integer = o.get("minInteger").and_then(Json::as_i64);
                base.max_integer = o.get("maxInteger").and_then(Json::as_i64);
                base.min_real = o.get("minReal").and_then(Json::as_f64);
                base.max_real = o.get("maxReal").and_then(Json::as_f64);
                base.min_length = o.get("minLength").and_then(Json::as_u64).map(|v| v as usize);
                base.max_length = o.get("maxLength").and_then(Json::as_u64).map(|v| v as usize);
                base.ref_table = o.get("refTable").and_then(Json::as_str).map(String::from);
                if o.get("refType").and_then(Json::as_str) == Some("weak") {
                    base.ref_type = RefType::Weak;
                }
                Ok(base)
            }
            _ => Err(invalid(format!("invalid base type: {json}"))),
        }
    }
}

/// Upper bound on the number of elements in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxElements {
    Limited(u64),
    Unlimited,
}

impl MaxElements {
    pub fn allows(&self, n: usize) -> bool {
        match self {
            MaxElements::Limited(max) => n as u64 <= *max,
            MaxElements::Unlimited => true,
        }
    }
}

/// Value kind of a column, derived from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Exactly one value, or at most one when `optional`
    /// (optional columns default to the empty set)
    Atomic { optional: bool },
    /// Multi-valued set of atoms
    Set,
    /// Key to value map
    Map,
}

impl ColumnKind {
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, ColumnKind::Set | ColumnKind::Map)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Atomic { optional: false } => write!(f, "scalar"),
            ColumnKind::Atomic { optional: true } => write!(f, "optional scalar"),
            ColumnKind::Set => write!(f, "set"),
            ColumnKind::Map => write!(f, "map"),
        }
    }
}

/// Full OVSDB column type: key type, optional value type, and cardinality.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    pub key: BaseType,
    pub value: Option<BaseType>,
    pub min: u64,
    pub max: MaxElements,
}

impl ColumnType {
    /// Exactly one atom of the given type.
    pub fn scalar(atomic: AtomicType) -> Self {
        ColumnType {
            key: BaseType::new(atomic),
            value: None,
            min: 1,
            max: MaxElements::Limited(1),
        }
    }

    /// Zero or one atom.
    pub fn optional(atomic: AtomicType) -> Self {
        ColumnType {
            min: 0,
            ..ColumnType::scalar(atomic)
        }
    }

    /// Unbounded set of atoms.
    pub fn set_of(atomic: AtomicType) -> Self {
        ColumnType {
            key: BaseType::new(atomic),
            value: None,
            min: 0,
            max: MaxElements::Unlimited,
        }
    }

    /// Unbounded map.
    pub fn map_of(key: AtomicType, value: AtomicType) -> Self {
        ColumnType {
            key: BaseType::new(key),
            value: Some(BaseType::new(value)),
            min: 0,
            max: MaxElements::Unlimited,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        if self.value.is_some() {
            ColumnKind::Map
        } else if self.max == MaxElements::Limited(1) {
            ColumnKind::Atomic {
                optional: self.min == 0,
            }
        } else {
            ColumnKind::Set
        }
    }

    /// The value a column takes when nothing was assigned.
    pub fn default_value(&self) -> Value {
        match self.kind() {
            ColumnKind::Map => Value::empty_map(),
            ColumnKind::Set | ColumnKind::Atomic { optional: true } => Value::empty_set(),
            ColumnKind::Atomic { optional: false } => Value::Atom(match self.key.atomic {
                AtomicType::Integer => Atom::Integer(0),
                AtomicType::Real => Atom::Real(0.0),
                AtomicType::Boolean => Atom::Boolean(false),
                AtomicType::String => Atom::String(String::new()),
                AtomicType::Uuid => Atom::Uuid(uuid::Uuid::nil()),
            }),
        }
    }

    fn from_json(json: &Json) -> OvsdbResult<Self> {
        match json {
            Json::String(_) => Ok(ColumnType {
                key: BaseType::from_json(json)?,
                value: None,
                min: 1,
                max: MaxElements::Limited(1),
            }),
            Json::Object(o) => {
                let key = o
                    .get("key")
                    .ok_or_else(|| invalid(format!("column type without 'key': {json}")))?;
                let value = o.get("value").map(BaseType::from_json).transpose()?;
                let min = o.get("min").and_then(Json::as_u64).unwrap_or(1);
                let max = match o.get("max") {
                    None => MaxElements::Limited(1),
                    Some(Json::String(s)) if s == "unlimited" => MaxElements::Unlimited,
                    Some(m) => MaxElements::Limited(
                        m.as_u64()
                            .ok_or_else(|| invalid(format!("invalid max: {m}")))?,
                    ),
                };
                Ok(ColumnType {
                    key: BaseType::from_json(key)?,
                    value,
                    min,
                    max,
                })
            }
            _ => Err(invalid(format!("invalid column type: {json}"))),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.value, self.kind()) {
            (Some(v), _) => write!(f, "map<{}, {}>", self.key.atomic, v.atomic),
            (None, ColumnKind::Set) => write!(f, "set<{}>", self.key.atomic),
            (None, ColumnKind::Atomic { optional: true }) => write!(f, "{}?", self.key.atomic),
            (None, _) => write!(f, "{}", self.key.atomic),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub ephemeral: bool,
    pub mutable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnSchema {
            name: name.into(),
            column_type,
            ephemeral: false,
            mutable: true,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }
}

/// A named table with its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnSchema>,
    pub max_rows: Option<u64>,
    pub is_root: bool,
    pub indexes: Vec<Vec<String>>,
    /// Version of the database schema this table belongs to
    pub schema_version: SchemaVersion,
}

impl TableSchema {
    /// Build a table from columns, adding the synthetic `_uuid`/`_version` columns.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnSchema>,
        schema_version: SchemaVersion,
    ) -> Self {
        let mut columns: BTreeMap<String, ColumnSchema> = columns
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        for synthetic in [UUID_COLUMN, VERSION_COLUMN] {
            columns.entry(synthetic.to_string()).or_insert_with(|| ColumnSchema {
                name: synthetic.to_string(),
                column_type: ColumnType::scalar(AtomicType::Uuid),
                ephemeral: false,
                mutable: false,
            });
        }
        TableSchema {
            name: name.into(),
            columns,
            max_rows: None,
            is_root: false,
            indexes: Vec::new(),
            schema_version,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Look up a column, failing with `SchemaVersionMismatch` if the live schema lacks it.
    pub fn lookup_column(&self, name: &str) -> OvsdbResult<&ColumnSchema> {
        self.columns.get(name).ok_or_else(|| {
            OvsdbError::missing_column(&self.name, name, &self.schema_version.to_string())
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names excluding the synthetic ones.
    pub fn user_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .keys()
            .map(String::as_str)
            .filter(|c| !c.starts_with('_'))
    }
}

/// Semantic version of a database schema (`major.minor.patch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        SchemaVersion {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for SchemaVersion {
    type Err = OvsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(invalid(format!("version '{s}' is not major.minor.patch")));
        };
        let num = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| invalid(format!("version '{s}' has non-numeric part '{p}'")))
        };
        Ok(SchemaVersion::new(num(*major)?, num(*minor)?, num(*patch)?))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Schema of one named database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub name: String,
    pub version: SchemaVersion,
    pub cksum: Option<String>,
    pub tables: BTreeMap<String, Arc<TableSchema>>,
}

#[derive(Deserialize)]
struct RawDatabaseSchema {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    cksum: Option<String>,
    tables: BTreeMap<String, RawTableSchema>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTableSchema {
    columns: BTreeMap<String, RawColumnSchema>,
    #[serde(default)]
    max_rows: Option<u64>,
    #[serde(default)]
    is_root: bool,
    #[serde(default)]
    indexes: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct RawColumnSchema {
    #[serde(rename = "type")]
    column_type: Json,
    #[serde(default)]
    ephemeral: bool,
    #[serde(default = "default_mutable")]
    mutable: bool,
}

fn default_mutable() -> bool {
    true
}

impl DatabaseSchema {
    /// Parse the result of a `get_schema` call.
    pub fn from_json(json: &Json) -> OvsdbResult<Self> {
        let raw: RawDatabaseSchema = serde_json::from_value(json.clone())
            .map_err(|e| invalid(format!("schema document: {e}")))?;
        let version = match raw.version.as_deref() {
            Some(v) => v.parse()?,
            None => SchemaVersion::default(),
        };
        let mut tables = BTreeMap::new();
        for (table_name, raw_table) in raw.tables {
            let mut columns = Vec::with_capacity(raw_table.columns.len());
            for (column_name, raw_column) in raw_table.columns {
                let column_type = ColumnType::from_json(&raw_column.column_type).map_err(|e| {
                    invalid(format!("column '{table_name}.{column_name}': {e}"))
                })?;
                columns.push(ColumnSchema {
                    name: column_name,
                    column_type,
                    ephemeral: raw_column.ephemeral,
                    mutable: raw_column.mutable,
                });
            }
            let mut table = TableSchema::new(table_name.clone(), columns, version);
            table.max_rows = raw_table.max_rows;
            table.is_root = raw_table.is_root;
            table.indexes = raw_table.indexes;
            tables.insert(table_name, Arc::new(table));
        }
        Ok(DatabaseSchema {
            name: raw.name,
            version,
            cksum: raw.cksum,
            tables,
        })
    }

    pub fn table(&self, name: &str) -> Option<&Arc<TableSchema>> {
        self.tables.get(name)
    }

    /// Look up a table, failing with `SchemaVersionMismatch` if the live schema lacks it.
    pub fn lookup_table(&self, name: &str) -> OvsdbResult<&Arc<TableSchema>> {
        self.tables
            .get(name)
            .ok_or_else(|| OvsdbError::missing_table(name, &self.version.to_string()))
    }

    /// Look up `table.column` in one step.
    pub fn lookup_column(&self, table: &str, column: &str) -> OvsdbResult<&ColumnSchema> {
        self.lookup_table(table)?.lookup_column(column)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

fn invalid(message: String) -> OvsdbError {
    OvsdbError::InvalidSchema { message }
}
