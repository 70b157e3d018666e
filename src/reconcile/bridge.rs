//! Bridge create/update/remove.
//!
//! A new bridge is inserted under a named-uuid and attached to the root
//! `Open_vSwitch` row in the same transaction. An existing bridge that drifted
//! gets an update of only the columns that differ.

use std::sync::Arc;

use super::{append_entry, BridgeEntry, CommandReport, ConfigEntry, DesiredStateDelta, ObservedState};
use crate::operations::{named_ref, Condition, Mutator, Operation, TransactionBuilder};
use crate::protocol::OvsdbResult;
use crate::schema::DatabaseSchema;
use crate::typed::openvswitch::{Bridge, OpenVSwitch};
use crate::typed::TypedTable;
use crate::value::Value;

/// Named-uuid token for a row created by this pass. Tokens must be
/// identifiers, so anything else in the name becomes `_`.
pub(crate) fn uuid_name(prefix: &str, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{prefix}_{cleaned}")
}

pub(super) fn update(
    txn: &mut TransactionBuilder,
    observed: &dyn ObservedState,
    delta: &DesiredStateDelta,
) -> CommandReport {
    let mut report = CommandReport::default();
    let schema = Arc::clone(txn.schema());
    for (path, entry) in delta.created_or_updated() {
        let ConfigEntry::Bridge(desired) = entry else {
            continue;
        };
        let built = match observed.get_entry_by_path(path) {
            Some(ConfigEntry::Bridge(current)) if desired.satisfied_by(&current) => {
                report.converged(path);
                continue;
            }
            Some(ConfigEntry::Bridge(current)) => update_ops(&schema, desired, &current),
            _ => create_ops(&schema, desired),
        };
        append_entry(txn, &mut report, path, built);
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
        if !matches!(entry, ConfigEntry::Bridge(_)) {
            continue;
        }
        let Some(ConfigEntry::Bridge(current)) = observed.get_entry_by_path(path) else {
            report.converged(path);
            continue;
        };
        append_entry(txn, &mut report, path, remove_ops(&schema, &current));
    }
    report
}

fn create_ops(schema: &DatabaseSchema, desired: &BridgeEntry) -> OvsdbResult<Vec<Operation>> {
    let token = uuid_name("Bridge", &desired.name);
    let mut bridge = Bridge::named(schema, &desired.name)?;
    if desired.fail_mode.is_some() {
        bridge.set_fail_mode(desired.fail_mode.as_deref())?;
    }
    if !desired.flood_vlans.is_empty() {
        bridge.set_flood_vlans(desired.flood_vlans.iter().copied())?;
    }
    if let Some(datapath_type) = &desired.datapath_type {
        bridge.set_datapath_type(datapath_type)?;
    }
    if !desired.external_ids.is_empty() {
        bridge.set_external_ids(
            desired
                .external_ids
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
    }
    let insert = bridge.typed().insert_op()?.with_uuid_name(token.clone());

    let root = OpenVSwitch::new(schema)?;
    let attach = root
        .typed()
        .mutation("bridges", Mutator::Insert, Value::set([named_ref(&token)]))?;
    Ok(vec![
        insert,
        Operation::mutate(root.typed().table(), Vec::new(), vec![attach]),
    ])
}

fn update_ops(
    schema: &DatabaseSchema,
    desired: &BridgeEntry,
    current: &BridgeEntry,
) -> OvsdbResult<Vec<Operation>> {
    let target = Bridge::named(schema, &desired.name)?;
    let mut changes = Bridge::new(schema)?;
    if desired.fail_mode != current.fail_mode {
        changes.set_fail_mode(desired.fail_mode.as_deref())?;
    }
    if desired.flood_vlans != current.flood_vlans {
        changes.set_flood_vlans(desired.flood_vlans.iter().copied())?;
    }
    if let Some(datapath_type) = &desired.datapath_type {
        if current.datapath_type.as_ref() != Some(datapath_type) {
            changes.set_datapath_type(datapath_type)?;
        }
    }
    if desired.external_ids != current.external_ids {
        changes.set_external_ids(
            desired
                .external_ids
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
    }
    if changes.typed().row().is_empty() {
        return Ok(Vec::new());
    }
    let condition = match current.uuid {
        Some(uuid) => Condition::uuid_equals(uuid),
        None => target.typed().where_eq("name")?,
    };
    Ok(vec![changes.typed().update_op(vec![condition])?])
}

fn remove_ops(schema: &DatabaseSchema, current: &BridgeEntry) -> OvsdbResult<Vec<Operation>> {
    let target = Bridge::named(schema, &current.name)?;
    let Some(uuid) = current.uuid else {
        return Ok(vec![Operation::delete(
            target.typed().table(),
            vec![target.typed().where_eq("name")?],
        )]);
    };
    let root = OpenVSwitch::new(schema)?;
    let detach = root
        .typed()
        .mutation("bridges", Mutator::Delete, Value::set([uuid]))?;
    Ok(vec![
        Operation::mutate(root.typed().table(), Vec::new(), vec![detach]),
        Operation::delete(target.typed().table(), vec![Condition::uuid_equals(uuid)]),
    ])
}
