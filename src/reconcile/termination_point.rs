//! Termination points: a `Port` with a single `Interface`, attached to a
//! bridge.
//!
//! Creation chains three operations through named-uuids:
//!
//! ```text
//! insert Interface   uuid-name Interface_<tp>
//! insert Port        uuid-name Port_<tp>, interfaces = {Interface_<tp>}
//! mutate Bridge      ports insert {Port_<tp>} where name == <bridge>
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::bridge::uuid_name;
use super::{
    append_entry, CommandReport, ConfigEntry, DesiredStateDelta, EntryPath, ObservedState,
    TerminationPointEntry,
};
use crate::operations::{named_ref, Mutator, Operation, TransactionBuilder};
use crate::protocol::OvsdbResult;
use crate::schema::DatabaseSchema;
use crate::typed::openvswitch::{Bridge, Interface, Port};
use crate::typed::TypedTable;
use crate::value::Value;

/// Parse `key=value` option strings. Malformed entries are logged and
/// dropped.
pub fn parse_options(options: &[String]) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    for option in options {
        match option.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => warn!(option = %option, "termination_point_option_invalid"),
        }
    }
    parsed
}

pub(super) fn create(
    txn: &mut TransactionBuilder,
    observed: &dyn ObservedState,
    delta: &DesiredStateDelta,
) -> CommandReport {
    let mut report = CommandReport::default();
    let schema = Arc::clone(txn.schema());
    for (path, entry) in delta.created_or_updated() {
        let ConfigEntry::TerminationPoint(desired) = entry else {
            continue;
        };
        let built = match observed.get_entry_by_path(path) {
            Some(ConfigEntry::TerminationPoint(current)) if desired.satisfied_by(&current) => {
                report.converged(path);
                continue;
            }
            Some(ConfigEntry::TerminationPoint(current)) => {
                update_ops(&schema, desired, &current)
            }
            _ => {
                let bridge = EntryPath::bridge(&desired.bridge);
                if observed.get_entry_by_path(&bridge).is_none() && !delta.provides(&bridge) {
                    report.missing_parent(path, bridge);
                    continue;
                }
                create_ops(&schema, desired)
            }
        };
        append_entry(txn, &mut report, path, built);
    }
    report
}

pub(super) fn delete(
    txn: &mut TransactionBuilder,
    observed: &dyn ObservedState,
    delta: &DesiredStateDelta,
) -> CommandReport {
    let mut report = CommandReport::default();
    let schema = Arc::clone(txn.schema());
    for (path, entry) in &delta.deleted {
        if !matches!(entry, ConfigEntry::TerminationPoint(_)) {
            continue;
        }
        let Some(ConfigEntry::TerminationPoint(current)) = observed.get_entry_by_path(path) else {
            report.converged(path);
            continue;
        };
        append_entry(txn, &mut report, path, delete_ops(&schema, &current));
    }
    report
}

fn create_ops(
    schema: &DatabaseSchema,
    desired: &TerminationPointEntry,
) -> OvsdbResult<Vec<Operation>> {
    let interface_token = uuid_name("Interface", &desired.name);
    let port_token = uuid_name("Port", &desired.name);

    let mut interface = Interface::new(schema)?;
    interface.set_name(&desired.name)?;
    if let Some(interface_type) = &desired.interface_type {
        interface.set_type(interface_type)?;
    }
    if let Some(ofport) = desired.ofport {
        interface.set_ofport(ofport)?;
    }
    if let Some(ofport_request) = desired.ofport_request {
        interface.set_ofport_request(ofport_request)?;
    }
    let options = parse_options(&desired.options);
    if !options.is_empty() {
        interface.set_options(&options)?;
    }

    let mut port = Port::new(schema)?;
    port.set_name(&desired.name)?
        .set_interfaces([named_ref(&interface_token)])?;

    let bridge = Bridge::named(schema, &desired.bridge)?;
    let attach = bridge
        .typed()
        .mutation("ports", Mutator::Insert, Value::set([named_ref(&port_token)]))?;

    Ok(vec![
        interface.typed().insert_op()?.with_uuid_name(interface_token),
        port.typed().insert_op()?.with_uuid_name(port_token),
        Operation::mutate(
            bridge.typed().table(),
            vec![bridge.typed().where_eq("name")?],
            vec![attach],
        ),
    ])
}

fn update_ops(
    schema: &DatabaseSchema,
    desired: &TerminationPointEntry,
    current: &TerminationPointEntry,
) -> OvsdbResult<Vec<Operation>> {
    let mut target = Interface::new(schema)?;
    target.set_name(&desired.name)?;

    let mut changes = Interface::new(schema)?;
    if let Some(interface_type) = &desired.interface_type {
        if current.interface_type.as_ref() != Some(interface_type) {
            changes.set_type(interface_type)?;
        }
    }
    if let Some(ofport_request) = desired.ofport_request {
        if current.ofport_request != Some(ofport_request) {
            changes.set_ofport_request(ofport_request)?;
        }
    }
    let options = parse_options(&desired.options);
    if options != parse_options(&current.options) {
        changes.set_options(&options)?;
    }
    if changes.typed().row().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![changes
        .typed()
        .update_op(vec![target.typed().where_eq("name")?])?])
}

fn delete_ops(
    schema: &DatabaseSchema,
    current: &TerminationPointEntry,
) -> OvsdbResult<Vec<Operation>> {
    let mut port = Port::new(schema)?;
    port.set_name(&current.name)?;
    let mut interface = Interface::new(schema)?;
    interface.set_name(&current.name)?;

    let mut ops = Vec::with_capacity(3);
    if let Some(uuid) = current.uuid {
        let bridge = Bridge::named(schema, &current.bridge)?;
        let detach = bridge
            .typed()
            .mutation("ports", Mutator::Delete, Value::set([uuid]))?;
        ops.push(Operation::mutate(
            bridge.typed().table(),
            vec![bridge.typed().where_eq("name")?],
            vec![detach],
        ));
    }
    ops.push(Operation::delete(
        port.typed().table(),
        vec![port.typed().where_eq("name")?],
    ));
    ops.push(Operation::delete(
        interface.typed().table(),
        vec![interface.typed().where_eq("name")?],
    ));
    Ok(ops)
}
