//! OpenFlow protocol versions enabled on a bridge (`Bridge.protocols`).
//!
//! Each version is a separate entry and maps to a single set mutation, so
//! adding one version never rewrites the others.

use std::sync::Arc;

use super::{append_entry, CommandReport, ConfigEntry, DesiredStateDelta, ObservedState, ProtocolEntry};
use crate::operations::{Mutator, Operation, TransactionBuilder};
use crate::protocol::OvsdbResult;
use crate::schema::DatabaseSchema;
use crate::typed::openvswitch::Bridge;
use crate::typed::TypedTable;

const IDENTITY_PREFIXES: [&str; 2] = ["ovsdb-bridge-protocol-openflow-", "openflow-"];

/// Name stored in `Bridge.protocols` for `protocol`.
///
/// `ovsdb-bridge-protocol-openflow-13` and `openflow-13` both become
/// `OpenFlow13`; anything else is passed through and left to the schema's
/// enum check.
pub fn protocol_name(protocol: &str) -> String {
    let lower = protocol.to_ascii_lowercase();
    let version = IDENTITY_PREFIXES
        .iter()
        .find_map(|prefix| lower.strip_prefix(prefix));
    match version {
        Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => format!("OpenFlow{v}"),
        _ => protocol.to_string(),
    }
}

pub(super) fn update(
    txn: &mut TransactionBuilder,
    observed: &dyn ObservedState,
    delta: &DesiredStateDelta,
) -> CommandReport {
    let mut report = CommandReport::default();
    let schema = Arc::clone(txn.schema());
    for (path, entry) in delta.created_or_updated() {
        let ConfigEntry::Protocol(desired) = entry else {
            continue;
        };
        if observed.get_entry_by_path(path).is_some() {
            report.converged(path);
            continue;
        }
        let Some(bridge) = path.bridge_path() else {
            continue;
        };
        if observed.get_entry_by_path(&bridge).is_none() && !delta.provides(&bridge) {
            report.missing_parent(path, bridge);
            continue;
        }
        append_entry(
            txn,
            &mut report,
            path,
            protocol_ops(&schema, desired, Mutator::Insert),
        );
    }
    report
}

pub(super) fn remove(
    txn: &mut TransactionBuilder,
    observed: &dyn ObservedState,
    delta: &DesiredStateDelta,
) -> CommandReport {
    let mut report = CommandReport::default();
    let schema = Arc::clone(txn.schema());
    for (path, entry) in &delta.deleted {
        let ConfigEntry::Protocol(removed) = entry else {
            continue;
        };
        if observed.get_entry_by_path(path).is_none() {
            report.converged(path);
            continue;
        }
        append_entry(
            txn,
            &mut report,
            path,
            protocol_ops(&schema, removed, Mutator::Delete),
        );
    }
    report
}

fn protocol_ops(
    schema: &DatabaseSchema,
    entry: &ProtocolEntry,
    mutator: Mutator,
) -> OvsdbResult<Vec<Operation>> {
    let mut bridge = Bridge::named(schema, &entry.bridge)?;
    let condition = bridge.typed().where_eq("name")?;
    bridge.set_protocols([entry.protocol.as_str()])?;
    let mutation = bridge.typed().mutation_from("protocols", mutator)?;
    Ok(vec![Operation::mutate(
        bridge.typed().table(),
        vec![condition],
        vec![mutation],
    )])
}
