//! In-process OVSDB server for integration tests.
//!
//! Speaks JSON-RPC over `tokio::io::duplex` pipes and keeps one database,
//! `Open_vSwitch`, shared by every connection it hands out. Transactions are
//! applied all-or-nothing with named-uuid resolution; results after the
//! first error are `null`. Committed changes are pushed to monitors as
//! `update` notifications after the transaction's reply.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value as Json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use uuid::Uuid;

use ovsdb_client::config::ConnectionConfig;
use ovsdb_client::protocol::JsonFramer;
use ovsdb_client::{LockCallback, MonitorCallback, OvsdbClient, OvsdbError, TableUpdates};

pub const DB: &str = "Open_vSwitch";

type Table = BTreeMap<Uuid, Map<String, Json>>;
type Tables = BTreeMap<String, Table>;
type OpError = (String, String);

enum Outbound {
    Message(String),
    Close,
}

struct MonitorSpec {
    columns: Option<Vec<String>>,
    initial: bool,
    insert: bool,
    delete: bool,
    modify: bool,
}

struct MonitorSub {
    conn: usize,
    id: Json,
    tables: BTreeMap<String, MonitorSpec>,
}

#[derive(Default)]
struct LockState {
    owner: Option<usize>,
    waiting: VecDeque<usize>,
}

struct ServerState {
    schema: Json,
    tables: Tables,
    monitors: Vec<MonitorSub>,
    locks: BTreeMap<String, LockState>,
    connections: BTreeMap<usize, mpsc::UnboundedSender<Outbound>>,
    next_conn: usize,
    stalled: bool,
    hang_up_after_monitor: bool,
    transactions: usize,
}

/// Handle to the fake server. Clones share the database.
#[derive(Clone)]
pub struct FakeOvsdb {
    state: Arc<Mutex<ServerState>>,
}

impl FakeOvsdb {
    pub fn new() -> Self {
        FakeOvsdb::with_version("8.3.0")
    }

    /// Server whose schema reports `version`.
    pub fn with_version(version: &str) -> Self {
        let schema = schema_json(version);
        let mut tables: Tables = BTreeMap::new();
        if let Some(names) = schema["tables"].as_object() {
            for name in names.keys() {
                tables.insert(name.clone(), BTreeMap::new());
            }
        }
        let root = Uuid::new_v4();
        let mut row = Map::new();
        row.insert("bridges".into(), json!(["set", []]));
        row.insert("ovs_version".into(), json!("3.1.0"));
        row.insert("_uuid".into(), json!(["uuid", root.to_string()]));
        tables.entry("Open_vSwitch".into()).or_default().insert(root, row);

        FakeOvsdb {
            state: Arc::new(Mutex::new(ServerState {
                schema,
                tables,
                monitors: Vec::new(),
                locks: BTreeMap::new(),
                connections: BTreeMap::new(),
                next_conn: 0,
                stalled: false,
                hang_up_after_monitor: false,
                transactions: 0,
            })),
        }
    }

    /// New client connection with default settings.
    pub fn connect(&self) -> OvsdbClient {
        self.connect_with(&ConnectionConfig::default())
    }

    pub fn connect_with(&self, config: &ConnectionConfig) -> OvsdbClient {
        let (client_end, server_end) = tokio::io::duplex(1 << 16);
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = {
            let mut state = self.state.lock();
            let conn = state.next_conn;
            state.next_conn += 1;
            state.connections.insert(conn, tx);
            conn
        };
        tokio::spawn(serve(Arc::clone(&self.state), conn, server_end, rx));
        OvsdbClient::from_stream(client_end, config)
    }

    /// Drop every connection after flushing what was already queued.
    pub fn disconnect_all(&self) {
        for tx in self.state.lock().connections.values() {
            let _ = tx.send(Outbound::Close);
        }
    }

    /// While stalled, `transact` requests are swallowed without a reply.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Close a connection right after answering its next `monitor` request.
    pub fn set_hang_up_after_monitor(&self, hang_up: bool) {
        self.state.lock().hang_up_after_monitor = hang_up;
    }

    /// Send a raw message to every connection.
    pub fn push_raw(&self, message: Json) {
        for tx in self.state.lock().connections.values() {
            let _ = tx.send(Outbound::Message(message.to_string()));
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Map<String, Json>> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// First row of `table` whose `column` is exactly `value`.
    pub fn find_row(&self, table: &str, column: &str, value: &Json) -> Option<(Uuid, Map<String, Json>)> {
        self.state.lock().tables.get(table).and_then(|rows| {
            rows.iter()
                .find(|(_, row)| row.get(column) == Some(value))
                .map(|(id, row)| (*id, row.clone()))
        })
    }

    /// Atoms of a set column, or the single atom of a scalar one.
    pub fn column_atoms(&self, table: &str, column: &str, key: (&str, &Json)) -> Vec<Json> {
        self.find_row(table, key.0, key.1)
            .and_then(|(_, row)| row.get(column).map(atoms))
            .unwrap_or_default()
    }

    pub fn root_uuid(&self) -> Uuid {
        self.state.lock().tables["Open_vSwitch"]
            .keys()
            .next()
            .copied()
            .unwrap_or_else(Uuid::nil)
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions
    }

    pub fn monitor_count(&self) -> usize {
        self.state.lock().monitors.len()
    }
}

async fn serve(
    state: Arc<Mutex<ServerState>>,
    conn: usize,
    stream: DuplexStream,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut framer = JsonFramer::new(16 * 1024 * 1024);
    let mut buf = vec![0u8; 8192];
    'conn: loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Message(text)) => {
                    if writer.write_all(text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    framer.push(&buf[..n]);
                    loop {
                        match framer.next_message() {
                            Ok(Some(message)) => state.lock().handle(conn, message),
                            Ok(None) => break,
                            Err(_) => break 'conn,
                        }
                    }
                }
            }
        }
    }
    state.lock().drop_connection(conn);
}

impl ServerState {
    fn send(&self, conn: usize, message: Json) {
        if let Some(tx) = self.connections.get(&conn) {
            let _ = tx.send(Outbound::Message(message.to_string()));
        }
    }

    fn notify(&self, conn: usize, method: &str, params: Json) {
        self.send(conn, json!({"method": method, "params": params, "id": null}));
    }

    fn reply(&self, conn: usize, id: Json, outcome: Result<Json, Json>) {
        let message = match outcome {
            Ok(result) => json!({"id": id, "result": result, "error": null}),
            Err(error) => json!({"id": id, "result": null, "error": error}),
        };
        self.send(conn, message);
    }

    fn handle(&mut self, conn: usize, message: Json) {
        let Some(method) = message.get("method").and_then(Json::as_str).map(String::from) else {
            return;
        };
        let id = message.get("id").cloned().unwrap_or(Json::Null);
        if id.is_null() {
            return;
        }
        let params = message.get("params").cloned().unwrap_or_else(|| json!([]));
        let outcome = match method.as_str() {
            "list_dbs" => Ok(json!([DB])),
            "get_schema" => {
                if params[0] == DB {
                    Ok(self.schema.clone())
                } else {
                    Err(json!("unknown database"))
                }
            }
            "echo" => Ok(params),
            "transact" => {
                if !self.stalled {
                    self.transact(conn, id, &params);
                }
                return;
            }
            "monitor" => self.monitor(conn, &params),
            "monitor_cancel" => self.monitor_cancel(conn, &params),
            "lock" => self.lock(conn, &params, false),
            "steal" => self.lock(conn, &params, true),
            "unlock" => self.unlock(conn, &params),
            other => Err(json!(format!("unknown method {other}"))),
        };
        self.reply(conn, id, outcome);
        if method == "monitor" && self.hang_up_after_monitor {
            if let Some(tx) = self.connections.get(&conn) {
                let _ = tx.send(Outbound::Close);
            }
        }
    }

    fn drop_connection(&mut self, conn: usize) {
        self.connections.remove(&conn);
        self.monitors.retain(|m| m.conn != conn);
        let mut granted = Vec::new();
        for (name, lock) in &mut self.locks {
            lock.waiting.retain(|c| *c != conn);
            if lock.owner == Some(conn) {
                lock.owner = lock.waiting.pop_front();
                if let Some(next) = lock.owner {
                    granted.push((next, name.clone()));
                }
            }
        }
        for (next, name) in granted {
            self.notify(next, "locked", json!([name]));
        }
    }

    fn lock(&mut self, conn: usize, params: &Json, steal: bool) -> Result<Json, Json> {
        let name = params[0].as_str().ok_or_else(|| json!("lock name missing"))?.to_string();
        let lock = self.locks.entry(name.clone()).or_default();
        let mut stolen_from = None;
        let granted = if steal {
            if let Some(previous) = lock.owner.filter(|c| *c != conn) {
                stolen_from = Some(previous);
            }
            lock.waiting.retain(|c| *c != conn);
            lock.owner = Some(conn);
            true
        } else if lock.owner.is_none() || lock.owner == Some(conn) {
            lock.owner = Some(conn);
            true
        } else {
            if !lock.waiting.contains(&conn) {
                lock.waiting.push_back(conn);
            }
            false
        };
        if let Some(previous) = stolen_from {
            self.notify(previous, "stolen", json!([name]));
        }
        Ok(json!({"locked": granted}))
    }

    fn unlock(&mut self, conn: usize, params: &Json) -> Result<Json, Json> {
        let name = params[0].as_str().ok_or_else(|| json!("lock name missing"))?.to_string();
        let mut granted = None;
        if let Some(lock) = self.locks.get_mut(&name) {
            if lock.owner == Some(conn) {
                lock.owner = lock.waiting.pop_front();
                granted = lock.owner;
            } else {
                lock.waiting.retain(|c| *c != conn);
            }
        }
        if let Some(next) = granted {
            self.notify(next, "locked", json!([name]));
        }
        Ok(json!({}))
    }

    fn monitor(&mut self, conn: usize, params: &Json) -> Result<Json, Json> {
        if params[0] != DB {
            return Err(json!("unknown database"));
        }
        let id = params[1].clone();
        if self.monitors.iter().any(|m| m.conn == conn && m.id == id) {
            return Err(json!("duplicate monitor ID"));
        }
        let requests = params[2].as_object().ok_or_else(|| json!("bad monitor requests"))?;
        let mut tables = BTreeMap::new();
        let mut initial = Map::new();
        for (table, request) in requests {
            let rows = self.tables.get(table).ok_or_else(|| json!(format!("unknown table {table}")))?;
            let flag = |name: &str| request["select"].get(name).and_then(Json::as_bool).unwrap_or(true);
            let spec = MonitorSpec {
                columns: request.get("columns").and_then(Json::as_array).map(|cols| {
                    cols.iter().filter_map(Json::as_str).map(String::from).collect()
                }),
                initial: flag("initial"),
                insert: flag("insert"),
                delete: flag("delete"),
                modify: flag("modify"),
            };
            if spec.initial && !rows.is_empty() {
                let contents: Map<String, Json> = rows
                    .iter()
                    .map(|(uuid, row)| (uuid.to_string(), json!({"new": project(row, &spec.columns)})))
                    .collect();
                initial.insert(table.clone(), Json::Object(contents));
            }
            tables.insert(table.clone(), spec);
        }
        self.monitors.push(MonitorSub { conn, id, tables });
        Ok(Json::Object(initial))
    }

    fn monitor_cancel(&mut self, conn: usize, params: &Json) -> Result<Json, Json> {
        let before = self.monitors.len();
        self.monitors.retain(|m| !(m.conn == conn && m.id == params[0]));
        if self.monitors.len() == before {
            Err(json!("unknown monitor"))
        } else {
            Ok(json!({}))
        }
    }

    fn transact(&mut self, conn: usize, id: Json, params: &Json) {
        self.transactions += 1;
        let Some(items) = params.as_array() else {
            self.reply(conn, id, Err(json!("bad transact params")));
            return;
        };
        if items.first() != Some(&json!(DB)) {
            self.reply(conn, id, Err(json!("unknown database")));
            return;
        }
        let ops = &items[1..];

        let mut named = HashMap::new();
        for op in ops {
            if op["op"] == "insert" {
                if let Some(name) = op.get("uuid-name").and_then(Json::as_str) {
                    named.insert(name.to_string(), Uuid::new_v4());
                }
            }
        }

        let mut working = self.tables.clone();
        let mut results = Vec::with_capacity(ops.len());
        let mut failed = false;
        for op in ops {
            if failed {
                results.push(Json::Null);
                continue;
            }
            match self.apply(conn, &mut working, &named, op) {
                Ok(result) => results.push(result),
                Err((error, details)) => {
                    results.push(json!({"error": error, "details": details}));
                    failed = true;
                }
            }
        }
        self.reply(conn, id, Ok(Json::Array(results)));
        if !failed {
            let old = std::mem::replace(&mut self.tables, working);
            self.publish(&old);
        }
    }

    fn apply(
        &self,
        conn: usize,
        working: &mut Tables,
        named: &HashMap<String, Uuid>,
        op: &Json,
    ) -> Result<Json, OpError> {
        let kind = op["op"].as_str().unwrap_or_default();
        match kind {
            "insert" => {
                let mut row = match resolve(&op["row"], named)? {
                    Json::Object(row) => row,
                    _ => Map::new(),
                };
                let columns = &self.schema["tables"][op["table"].as_str().unwrap_or_default()]["columns"];
                for (name, column) in columns.as_object().into_iter().flatten() {
                    row.entry(name.clone()).or_insert_with(|| default_datum(column));
                }
                let uuid = op
                    .get("uuid-name")
                    .and_then(Json::as_str)
                    .and_then(|n| named.get(n).copied())
                    .unwrap_or_else(Uuid::new_v4);
                row.insert("_uuid".into(), json!(["uuid", uuid.to_string()]));
                table_mut(working, op)?.insert(uuid, row);
                Ok(json!({"uuid": ["uuid", uuid.to_string()]}))
            }
            "select" => {
                let conditions = resolve(&op["where"], named)?;
                let columns = column_list(op);
                let rows: Vec<Json> = table_mut(working, op)?
                    .values()
                    .filter(|row| matches(row, &conditions))
                    .map(|row| match &columns {
                        Some(cols) => Json::Object(
                            row.iter()
                                .filter(|(k, _)| cols.contains(k))
                                .map(|(k, v)| (k.clone(), v.clone()))
                                .collect(),
                        ),
                        None => Json::Object(row.clone()),
                    })
                    .collect();
                Ok(json!({"rows": rows}))
            }
            "update" => {
                let conditions = resolve(&op["where"], named)?;
                let patch = resolve(&op["row"], named)?;
                let mut count = 0;
                for row in table_mut(working, op)?.values_mut().filter(|row| matches(row, &conditions)) {
                    if let Some(patch) = patch.as_object() {
                        for (k, v) in patch {
                            row.insert(k.clone(), v.clone());
                        }
                    }
                    count += 1;
                }
                Ok(json!({"count": count}))
            }
            "mutate" => {
                let conditions = resolve(&op["where"], named)?;
                let mutations = resolve(&op["mutations"], named)?;
                let mut count = 0;
                for row in table_mut(working, op)?.values_mut().filter(|row| matches(row, &conditions)) {
                    for mutation in mutations.as_array().into_iter().flatten() {
                        let column = mutation[0].as_str().unwrap_or_default();
                        let mutator = mutation[1].as_str().unwrap_or_default();
                        mutate(row, column, mutator, &mutation[2])?;
                    }
                    count += 1;
                }
                Ok(json!({"count": count}))
            }
            "delete" => {
                let conditions = resolve(&op["where"], named)?;
                let rows = table_mut(working, op)?;
                let before = rows.len();
                rows.retain(|_, row| !matches(row, &conditions));
                Ok(json!({"count": before - rows.len()}))
            }
            "wait" => {
                let conditions = resolve(&op["where"], named)?;
                let expected = resolve(&op["rows"], named)?;
                let columns = column_list(op).unwrap_or_default();
                let canonical = |row: &Map<String, Json>| {
                    columns
                        .iter()
                        .map(|c| sorted_atoms(row.get(c).map(atoms).unwrap_or_default()))
                        .collect::<Vec<_>>()
                };
                let mut actual: Vec<_> = table_mut(working, op)?
                    .values()
                    .filter(|row| matches(row, &conditions))
                    .map(canonical)
                    .collect();
                let mut wanted: Vec<_> = expected
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Json::as_object)
                    .map(canonical)
                    .collect();
                actual.sort();
                wanted.sort();
                let equal = actual == wanted;
                let satisfied = if op["until"] == "==" { equal } else { !equal };
                if satisfied {
                    Ok(json!({}))
                } else {
                    Err(("timed out".into(), "wait condition not satisfied".into()))
                }
            }
            "commit" | "comment" => Ok(json!({})),
            "abort" => Err(("aborted".into(), "aborted by request".into())),
            "assert" => {
                let lock = op["lock"].as_str().unwrap_or_default();
                let owned = self.locks.get(lock).is_some_and(|l| l.owner == Some(conn));
                if owned {
                    Ok(json!({}))
                } else {
                    Err(("not owner".into(), format!("lock {lock} is not held")))
                }
            }
            other => Err(("unknown operation".into(), other.to_string())),
        }
    }

    fn publish(&self, old: &Tables) {
        let empty = Table::new();
        for sub in &self.monitors {
            let mut updates = Map::new();
            for (table, spec) in &sub.tables {
                let before = old.get(table).unwrap_or(&empty);
                let after = self.tables.get(table).unwrap_or(&empty);
                let mut rows = Map::new();
                for (uuid, new_row) in after {
                    match before.get(uuid) {
                        None if spec.insert => {
                            rows.insert(uuid.to_string(), json!({"new": project(new_row, &spec.columns)}));
                        }
                        Some(old_row) if spec.modify && old_row != new_row => {
                            let new_proj = project(new_row, &spec.columns);
                            let changed: Map<String, Json> = project(old_row, &spec.columns)
                                .into_iter()
                                .filter(|(k, v)| new_proj.get(k) != Some(v))
                                .collect();
                            if !changed.is_empty() {
                                rows.insert(uuid.to_string(), json!({"old": changed, "new": new_proj}));
                            }
                        }
                        _ => {}
                    }
                }
                if spec.delete {
                    for (uuid, old_row) in before {
                        if !after.contains_key(uuid) {
                            rows.insert(uuid.to_string(), json!({"old": project(old_row, &spec.columns)}));
                        }
                    }
                }
                if !rows.is_empty() {
                    updates.insert(table.clone(), Json::Object(rows));
                }
            }
            if !updates.is_empty() {
                self.notify(sub.conn, "update", json!([sub.id, updates]));
            }
        }
    }
}

fn table_mut<'a>(working: &'a mut Tables, op: &Json) -> Result<&'a mut Table, OpError> {
    let name = op["table"].as_str().unwrap_or_default();
    working
        .get_mut(name)
        .ok_or_else(|| ("unknown table".to_string(), name.to_string()))
}

fn column_list(op: &Json) -> Option<Vec<String>> {
    op.get("columns")
        .and_then(Json::as_array)
        .map(|cols| cols.iter().filter_map(Json::as_str).map(String::from).collect())
}

fn project(row: &Map<String, Json>, columns: &Option<Vec<String>>) -> Map<String, Json> {
    row.iter()
        .filter(|(k, _)| k.as_str() != "_uuid" && k.as_str() != "_version")
        .filter(|(k, _)| columns.as_ref().is_none_or(|cols| cols.contains(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Value a column takes when an insert leaves it out.
fn default_datum(column: &Json) -> Json {
    let ty = &column["type"];
    if ty.is_string() {
        return scalar_default(ty);
    }
    if ty.get("value").is_some() {
        return json!(["map", []]);
    }
    let min = ty.get("min").and_then(Json::as_u64).unwrap_or(1);
    let max = ty.get("max").map_or(Some(1), Json::as_u64);
    if min == 0 || max != Some(1) {
        return json!(["set", []]);
    }
    scalar_default(&ty["key"])
}

fn scalar_default(key: &Json) -> Json {
    let atomic = key.as_str().or_else(|| key["type"].as_str()).unwrap_or("string");
    match atomic {
        "integer" => json!(0),
        "real" => json!(0.0),
        "boolean" => json!(false),
        "uuid" => json!(["uuid", Uuid::nil().to_string()]),
        _ => json!(""),
    }
}

/// Replace every `["named-uuid", n]` with the uuid bound to `n`.
fn resolve(value: &Json, named: &HashMap<String, Uuid>) -> Result<Json, OpError> {
    match value {
        Json::Array(items) if items.len() == 2 && items[0] == "named-uuid" => {
            let name = items[1].as_str().unwrap_or_default();
            named
                .get(name)
                .map(|id| json!(["uuid", id.to_string()]))
                .ok_or_else(|| ("referential integrity violation".into(), format!("unknown named-uuid {name}")))
        }
        Json::Array(items) => items
            .iter()
            .map(|item| resolve(item, named))
            .collect::<Result<Vec<_>, _>>()
            .map(Json::Array),
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| resolve(v, named).map(|v| (k.clone(), v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Json::Object),
        other => Ok(other.clone()),
    }
}

/// Atoms of a datum: set members, map pairs, or the atom itself.
fn atoms(value: &Json) -> Vec<Json> {
    match value.as_array().map(Vec::as_slice) {
        Some([tag, Json::Array(items)]) if tag == "set" || tag == "map" => items.clone(),
        _ => vec![value.clone()],
    }
}

fn is_map(value: &Json) -> bool {
    value.get(0).is_some_and(|tag| tag == "map")
}

fn sorted_atoms(atoms: Vec<Json>) -> Vec<String> {
    let mut keys: Vec<String> = atoms.iter().map(Json::to_string).collect();
    keys.sort();
    keys
}

fn matches(row: &Map<String, Json>, conditions: &Json) -> bool {
    conditions.as_array().into_iter().flatten().all(|condition| {
        let actual = row.get(condition[0].as_str().unwrap_or_default()).map(atoms).unwrap_or_default();
        let wanted = atoms(&condition[2]);
        let number = |atoms: &[Json]| atoms.first().and_then(Json::as_f64);
        match condition[1].as_str().unwrap_or_default() {
            "==" => sorted_atoms(actual) == sorted_atoms(wanted),
            "!=" => sorted_atoms(actual) != sorted_atoms(wanted),
            "includes" => wanted.iter().all(|w| actual.contains(w)),
            "excludes" => wanted.iter().all(|w| !actual.contains(w)),
            ordering => match (number(actual.as_slice()), number(wanted.as_slice())) {
                (Some(a), Some(b)) => match ordering {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    ">=" => a >= b,
                    _ => false,
                },
                _ => false,
            },
        }
    })
}

fn mutate(row: &mut Map<String, Json>, column: &str, mutator: &str, value: &Json) -> Result<(), OpError> {
    let current = row.get(column).cloned().unwrap_or_else(|| json!(["set", []]));
    let map_column = is_map(&current) || is_map(value);
    let multi_valued = map_column || current.get(0).is_some_and(|tag| tag == "set");
    let mut items = atoms(&current);
    let operands = atoms(value);
    match mutator {
        "insert" => {
            for operand in operands {
                let present = if map_column {
                    items.iter().any(|pair| pair[0] == operand[0])
                } else {
                    items.contains(&operand)
                };
                if !present {
                    items.push(operand);
                }
            }
        }
        "delete" => {
            if map_column && !is_map(value) {
                items.retain(|pair| !operands.contains(&pair[0]));
            } else {
                items.retain(|item| !operands.contains(item));
            }
        }
        arithmetic => {
            let operand = value
                .as_i64()
                .ok_or_else(|| ("constraint violation".to_string(), "non-integer operand".to_string()))?;
            for item in &mut items {
                let Some(n) = item.as_i64() else { continue };
                let result = match arithmetic {
                    "+=" => n.checked_add(operand),
                    "-=" => n.checked_sub(operand),
                    "*=" => n.checked_mul(operand),
                    "/=" => n.checked_div(operand),
                    "%=" => n.checked_rem(operand),
                    _ => None,
                };
                let result = result.ok_or_else(|| ("domain error".to_string(), arithmetic.to_string()))?;
                *item = json!(result);
            }
            if !multi_valued {
                if let Some(first) = items.into_iter().next() {
                    row.insert(column.to_string(), first);
                }
                return Ok(());
            }
        }
    }
    let tag = if map_column { "map" } else { "set" };
    row.insert(column.to_string(), json!([tag, items]));
    Ok(())
}

fn schema_json(version: &str) -> Json {
    let string_map = json!({"key": "string", "value": "string", "min": 0, "max": "unlimited"});
    json!({
        "name": DB,
        "version": version,
        "cksum": "12345 678",
        "tables": {
            "Open_vSwitch": {
                "isRoot": true,
                "maxRows": 1,
                "columns": {
                    "bridges": {"type": {"key": {"type": "uuid", "refTable": "Bridge"},
                                         "min": 0, "max": "unlimited"}},
                    "ovs_version": {"type": {"key": "string", "min": 0, "max": 1}},
                    "external_ids": {"type": string_map}
                }
            },
            "Bridge": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "ports": {"type": {"key": {"type": "uuid", "refTable": "Port"},
                                       "min": 0, "max": "unlimited"}},
                    "protocols": {"type": {"key": {"type": "string", "enum": ["set", [
                        "OpenFlow10", "OpenFlow11", "OpenFlow12",
                        "OpenFlow13", "OpenFlow14", "OpenFlow15"]]},
                        "min": 0, "max": "unlimited"}},
                    "fail_mode": {"type": {"key": {"type": "string",
                        "enum": ["set", ["secure", "standalone"]]}, "min": 0, "max": 1}},
                    "flood_vlans": {"type": {"key": {"type": "integer",
                        "minInteger": 0, "maxInteger": 4095}, "min": 0, "max": 4096}},
                    "datapath_type": {"type": "string"},
                    "external_ids": {"type": string_map}
                },
                "indexes": [["name"]]
            },
            "Port": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "interfaces": {"type": {"key": {"type": "uuid", "refTable": "Interface"},
                                            "min": 1, "max": "unlimited"}},
                    "external_ids": {"type": string_map}
                },
                "indexes": [["name"]]
            },
            "Interface": {
                "columns": {
                    "name": {"type": "string", "mutable": false},
                    "type": {"type": "string"},
                    "ofport": {"type": {"key": "integer", "min": 0, "max": 1}},
                    "ofport_request": {"type": {"key": {"type": "integer",
                        "minInteger": 1, "maxInteger": 65279}, "min": 0, "max": 1}},
                    "options": {"type": string_map},
                    "external_ids": {"type": string_map}
                },
                "indexes": [["name"]]
            }
        }
    })
}

/// What a monitor callback saw.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Update(TableUpdates),
    Exception(OvsdbError),
}

/// Monitor callback that forwards everything to a channel.
pub struct UpdateRecorder {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl UpdateRecorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(UpdateRecorder { tx }), rx)
    }
}

impl MonitorCallback for UpdateRecorder {
    fn update(&self, updates: &TableUpdates) {
        let _ = self.tx.send(MonitorEvent::Update(updates.clone()));
    }

    fn exception(&self, error: &OvsdbError) {
        let _ = self.tx.send(MonitorEvent::Exception(error.clone()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Locked(String),
    Stolen(String),
}

/// Lock callback that forwards everything to a channel.
pub struct LockRecorder {
    tx: mpsc::UnboundedSender<LockEvent>,
}

impl LockRecorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<LockEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(LockRecorder { tx }), rx)
    }
}

impl LockCallback for LockRecorder {
    fn locked(&self, lock: &str) {
        let _ = self.tx.send(LockEvent::Locked(lock.to_string()));
    }

    fn stolen(&self, lock: &str) {
        let _ = self.tx.send(LockEvent::Stolen(lock.to_string()));
    }
}

/// Next item from `rx`, failing the test after five seconds.
pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Next monitor update, skipping updates that carry no rows.
pub async fn next_update(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) -> TableUpdates {
    loop {
        match next_event(rx).await {
            MonitorEvent::Update(updates) if !updates.is_empty() => return updates,
            MonitorEvent::Update(_) => continue,
            MonitorEvent::Exception(e) => panic!("unexpected monitor exception: {e}"),
        }
    }
}

/// Assert nothing arrives on `rx` for a short while.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}
