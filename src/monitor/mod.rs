//! # Monitor
//!
//! Standing subscriptions to table changes, and the lock-token protocol that
//! shares the same server-push channel.
//!
//! ## Wire Format
//!
//! ```text
//! monitor        [db, monitor_id, {table: {"columns": [..], "select": {..}}}]
//!   -> reply     {table: {uuid: {"new": row}}}                (initial contents)
//! update         [monitor_id, {table: {uuid: {"old": row?, "new": row?}}}]
//! monitor_cancel [monitor_id]
//! ```
//!
//! A row update without `old` is an insertion, without `new` a deletion, and
//! with both a modification.

pub mod lock;
pub mod session;

pub use lock::{LockCallback, LockManager};
pub use session::{MonitorCallback, MonitorHandle, MonitorRegistry, MonitorState};

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};
use uuid::Uuid;

use crate::protocol::{OvsdbError, OvsdbResult};
use crate::schema::{DatabaseSchema, TableSchema};
use crate::value::Row;

/// Which kinds of change a monitor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MonitorSelect {
    pub initial: bool,
    pub insert: bool,
    pub delete: bool,
    pub modify: bool,
}

impl MonitorSelect {
    pub const fn all() -> Self {
        MonitorSelect {
            initial: true,
            insert: true,
            delete: true,
            modify: true,
        }
    }

    pub fn to_json(&self) -> Json {
        json!({
            "initial": self.initial,
            "insert": self.insert,
            "delete": self.delete,
            "modify": self.modify,
        })
    }
}

impl Default for MonitorSelect {
    fn default() -> Self {
        MonitorSelect::all()
    }
}

/// Subscription to one table.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorRequest {
    pub table: String,
    /// `None` monitors every column
    pub columns: Option<Vec<String>>,
    pub select: MonitorSelect,
}

impl MonitorRequest {
    /// Monitor every column of `table`.
    pub fn all_columns(table: &TableSchema, select: MonitorSelect) -> Self {
        MonitorRequest {
            table: table.name.clone(),
            columns: None,
            select,
        }
    }

    /// Monitor selected columns, each checked against the schema.
    pub fn with_columns(
        table: &TableSchema,
        columns: &[&str],
        select: MonitorSelect,
    ) -> OvsdbResult<Self> {
        let columns = columns
            .iter()
            .map(|c| table.lookup_column(c).map(|col| col.name.clone()))
            .collect::<OvsdbResult<Vec<_>>>()?;
        Ok(MonitorRequest {
            table: table.name.clone(),
            columns: Some(columns),
            select,
        })
    }

    /// Re-check the request against a (possibly newer) schema.
    pub fn validate(&self, schema: &DatabaseSchema) -> OvsdbResult<()> {
        let table = schema.lookup_table(&self.table)?;
        for column in self.columns.iter().flatten() {
            table.lookup_column(column)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Json {
        let mut object = Map::new();
        if let Some(columns) = &self.columns {
            object.insert("columns".into(), json!(columns));
        }
        object.insert("select".into(), self.select.to_json());
        Json::Object(object)
    }
}

/// `{table: request}` member of a `monitor` call. Later requests for the
/// same table replace earlier ones.
pub fn requests_json(requests: &[MonitorRequest]) -> Json {
    let object: Map<String, Json> = requests
        .iter()
        .map(|r| (r.table.clone(), r.to_json()))
        .collect();
    Json::Object(object)
}

/// Kind of a single row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Insert,
    Modify,
    Delete,
}

/// Old and new contents of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub old: Option<Row>,
    pub new: Option<Row>,
}

impl RowUpdate {
    pub fn kind(&self) -> UpdateKind {
        match (&self.old, &self.new) {
            (None, _) => UpdateKind::Insert,
            (Some(_), Some(_)) => UpdateKind::Modify,
            (Some(_), None) => UpdateKind::Delete,
        }
    }
}

/// Changes to one table, keyed by row uuid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUpdate {
    pub rows: BTreeMap<Uuid, RowUpdate>,
}

impl TableUpdate {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&RowUpdate> {
        self.rows.get(uuid)
    }
}

/// Changes to a database, keyed by table name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUpdates {
    pub tables: BTreeMap<String, TableUpdate>,
}

impl TableUpdates {
    /// Decode a `table-updates` object. Rows of known tables are reshaped
    /// against the schema.
    pub fn from_json(json: &Json, schema: &DatabaseSchema) -> OvsdbResult<Self> {
        let object = json.as_object().ok_or_else(|| malformed(format!("table updates is not an object: {json}")))?;
        let mut tables = BTreeMap::new();
        for (table_name, rows) in object {
            let table = schema.table(table_name);
            let rows = rows
                .as_object()
                .ok_or_else(|| malformed(format!("updates for '{table_name}' is not an object")))?;
            let mut update = TableUpdate::default();
            for (uuid, change) in rows {
                let uuid = Uuid::parse_str(uuid)
                    .map_err(|e| malformed(format!("row id '{uuid}' in '{table_name}': {e}")))?;
                let decode = |member: &str| -> OvsdbResult<Option<Row>> {
                    match change.get(member) {
                        None | Some(Json::Null) => Ok(None),
                        Some(row) => match table {
                            Some(t) => Row::from_json_with_schema(row, t).map(Some),
                            None => Row::from_json(row).map(Some),
                        },
                    }
                };
                let row_update = RowUpdate {
                    old: decode("old")?,
                    new: decode("new")?,
                };
                if row_update.old.is_none() && row_update.new.is_none() {
                    return Err(malformed(format!(
                        "row update {uuid} in '{table_name}' has neither old nor new"
                    )));
                }
                update.rows.insert(uuid, row_update);
            }
            tables.insert(table_name.clone(), update);
        }
        Ok(TableUpdates { tables })
    }

    pub fn table(&self, name: &str) -> Option<&TableUpdate> {
        self.tables.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableUpdate::is_empty)
    }

    /// Total row changes across all tables.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(TableUpdate::len).sum()
    }
}

fn malformed(message: String) -> OvsdbError {
    OvsdbError::MalformedMessage { message }
}

/// Local copy of the monitored rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableMirror {
    tables: BTreeMap<String, BTreeMap<Uuid, Row>>,
}

impl TableMirror {
    pub fn new() -> Self {
        TableMirror::default()
    }

    /// Fold a batch of changes into the mirror.
    pub fn apply(&mut self, updates: &TableUpdates) {
        for (table_name, update) in &updates.tables {
            let table = self.tables.entry(table_name.clone()).or_default();
            for (uuid, change) in &update.rows {
                match (&change.old, &change.new) {
                    (_, Some(new)) => {
                        table.insert(*uuid, new.clone());
                    }
                    (Some(_), None) => {
                        table.remove(uuid);
                    }
                    (None, None) => {}
                }
            }
        }
    }

    pub fn get(&self, table: &str, uuid: &Uuid) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(uuid))
    }

    pub fn rows(&self, table: &str) -> impl Iterator<Item = (&Uuid, &Row)> {
        self.tables.get(table).into_iter().flat_map(|rows| rows.iter())
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    /// First row in `table` whose `column` equals `value`.
    pub fn find(&self, table: &str, column: &str, value: &crate::value::Value) -> Option<(&Uuid, &Row)> {
        self.rows(table).find(|(_, row)| row.get(column) == Some(value))
    }
}
