//! In-memory [`ObservedState`], either filled by hand or derived from a
//! monitor mirror of the `Bridge`, `Port` and `Interface` tables.

use std::collections::BTreeMap;

use uuid::Uuid;

use super::{
    BridgeEntry, ConfigEntry, EntryPath, ObservedState, ProtocolEntry, TerminationPointEntry,
};
use crate::monitor::TableMirror;
use crate::value::{Atom, Row, Value};

/// Point-in-time copy of observed entries.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    entries: BTreeMap<EntryPath, ConfigEntry>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        StateSnapshot::default()
    }

    pub fn insert(&mut self, entry: ConfigEntry) -> &mut Self {
        self.entries.insert(entry.path(), entry);
        self
    }

    pub fn remove(&mut self, path: &EntryPath) -> Option<ConfigEntry> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntryPath, &ConfigEntry)> {
        self.entries.iter()
    }

    /// Rebuild bridges, their protocols and their single-interface ports
    /// from mirrored rows. Ports whose interface is not mirrored are left out.
    pub fn from_mirror(mirror: &TableMirror) -> Self {
        let mut snapshot = StateSnapshot::new();
        for (uuid, row) in mirror.rows("Bridge") {
            let Some(name) = string(row, "name") else {
                continue;
            };
            snapshot.insert(ConfigEntry::Bridge(BridgeEntry {
                name: name.clone(),
                fail_mode: string(row, "fail_mode"),
                flood_vlans: atoms(row, "flood_vlans").filter_map(Atom::as_i64).collect(),
                datapath_type: string(row, "datapath_type"),
                external_ids: string_map(row, "external_ids"),
                uuid: Some(*uuid),
            }));
            for protocol in atoms(row, "protocols").filter_map(Atom::as_str) {
                snapshot.insert(ConfigEntry::Protocol(ProtocolEntry::new(name.clone(), protocol)));
            }
            for port_uuid in atoms(row, "ports").filter_map(Atom::as_uuid) {
                if let Some(tp) = termination_point(mirror, &name, port_uuid) {
                    snapshot.insert(ConfigEntry::TerminationPoint(tp));
                }
            }
        }
        snapshot
    }
}

impl ObservedState for StateSnapshot {
    fn get_entry_by_path(&self, path: &EntryPath) -> Option<ConfigEntry> {
        self.entries.get(path).cloned()
    }
}

fn termination_point(
    mirror: &TableMirror,
    bridge: &str,
    port_uuid: Uuid,
) -> Option<TerminationPointEntry> {
    let port = mirror.get("Port", &port_uuid)?;
    let name = string(port, "name")?;
    let interface = atoms(port, "interfaces")
        .filter_map(Atom::as_uuid)
        .find_map(|id| mirror.get("Interface", &id))?;
    Some(TerminationPointEntry {
        bridge: bridge.to_string(),
        name,
        interface_type: string(interface, "type").filter(|t| !t.is_empty()),
        ofport: integer(interface, "ofport"),
        ofport_request: integer(interface, "ofport_request"),
        options: string_map(interface, "options")
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect(),
        uuid: Some(port_uuid),
    })
}

fn atoms<'a>(row: &'a Row, column: &str) -> Box<dyn Iterator<Item = &'a Atom> + 'a> {
    match row.get(column) {
        Some(value) => value.atoms(),
        None => Box::new(std::iter::empty()),
    }
}

fn string(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .and_then(Value::as_atom)
        .and_then(Atom::as_str)
        .map(String::from)
}

fn integer(row: &Row, column: &str) -> Option<i64> {
    row.get(column).and_then(Value::as_atom).and_then(Atom::as_i64)
}

fn string_map(row: &Row, column: &str) -> BTreeMap<String, String> {
    row.get(column)
        .and_then(Value::as_map)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
