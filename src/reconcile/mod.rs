//! # Reconciliation Commands
//!
//! Converge the switch toward a desired configuration.
//!
//! An external orchestrator supplies two things: a [`DesiredStateDelta`]
//! (entries created, updated and deleted since the last pass, keyed by
//! [`EntryPath`]) and an [`ObservedState`] it can query by path. Each
//! [`TransactCommand`] handles one entity class. For every relevant entry it
//! asks the observed state whether the change is already in place and, if
//! not, appends the operations that make it so to a shared
//! [`TransactionBuilder`].
//!
//! ## Pass Order
//!
//! [`ConvergencePass`] runs the commands in a fixed order:
//!
//! ```text
//! BridgeUpdate -> ProtocolUpdate -> TerminationPointCreate
//!              -> ProtocolRemoved -> TerminationPointDelete -> BridgeRemoved
//! ```
//!
//! Bridges exist before anything attaches to them, and within
//! `TerminationPointCreate` the interface insert precedes the port that
//! names it, which precedes the bridge mutation that names the port.
//!
//! ## Partial Failure
//!
//! An entry's operations are built completely before any is appended. An
//! entry that fails to build is logged and skipped while the rest of the
//! pass proceeds: schema drift (`SchemaVersionMismatch`) at `warn`, any other
//! local error at `error`.

pub mod bridge;
pub mod observed;
pub mod protocol;
pub mod termination_point;

pub use observed::StateSnapshot;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, error, info, warn};

use crate::client::OvsdbClient;
use crate::operations::{Operation, TransactResults, TransactionBuilder};
use crate::protocol::{OvsdbError, OvsdbResult};

/// Stable identifier of a configuration entry, e.g.
/// `bridge/br0/termination-point/tap0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryPath(Vec<String>);

const BRIDGE_SEGMENT: &str = "bridge";
const TERMINATION_POINT_SEGMENT: &str = "termination-point";
const PROTOCOL_SEGMENT: &str = "protocol";

impl EntryPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EntryPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn bridge(bridge: &str) -> Self {
        EntryPath::new([BRIDGE_SEGMENT, bridge])
    }

    pub fn termination_point(bridge: &str, name: &str) -> Self {
        EntryPath::new([BRIDGE_SEGMENT, bridge, TERMINATION_POINT_SEGMENT, name])
    }

    pub fn protocol(bridge: &str, protocol: &str) -> Self {
        EntryPath::new([BRIDGE_SEGMENT, bridge, PROTOCOL_SEGMENT, protocol])
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Path of the bridge this entry lives under.
    pub fn bridge_path(&self) -> Option<EntryPath> {
        match self.0.as_slice() {
            [kind, name, ..] if kind == BRIDGE_SEGMENT => Some(EntryPath::bridge(name)),
            _ => None,
        }
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Desired bridge configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeEntry {
    pub name: String,
    pub fail_mode: Option<String>,
    pub flood_vlans: BTreeSet<i64>,
    /// `None` leaves the server's datapath type alone
    pub datapath_type: Option<String>,
    pub external_ids: BTreeMap<String, String>,
    /// Row id, known only for observed entries
    pub uuid: Option<uuid::Uuid>,
}

impl BridgeEntry {
    pub fn new(name: impl Into<String>) -> Self {
        BridgeEntry {
            name: name.into(),
            ..BridgeEntry::default()
        }
    }

    /// Whether `observed` already has everything this entry asks for.
    pub fn satisfied_by(&self, observed: &BridgeEntry) -> bool {
        self.name == observed.name
            && self.fail_mode == observed.fail_mode
            && self.flood_vlans == observed.flood_vlans
            && self.external_ids == observed.external_ids
            && self
                .datapath_type
                .as_ref()
                .is_none_or(|dt| observed.datapath_type.as_ref() == Some(dt))
    }
}

/// Desired port with its single interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationPointEntry {
    pub bridge: String,
    pub name: String,
    pub interface_type: Option<String>,
    pub ofport: Option<i64>,
    pub ofport_request: Option<i64>,
    /// Interface options as `key=value` strings
    pub options: Vec<String>,
    /// Port row id, known only for observed entries
    pub uuid: Option<uuid::Uuid>,
}

impl TerminationPointEntry {
    pub fn new(bridge: impl Into<String>, name: impl Into<String>) -> Self {
        TerminationPointEntry {
            bridge: bridge.into(),
            name: name.into(),
            ..TerminationPointEntry::default()
        }
    }

    pub fn satisfied_by(&self, observed: &TerminationPointEntry) -> bool {
        fn wanted<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
            desired.is_none() || desired == observed
        }
        self.bridge == observed.bridge
            && self.name == observed.name
            && wanted(&self.interface_type, &observed.interface_type)
            && wanted(&self.ofport_request, &observed.ofport_request)
            && termination_point::parse_options(&self.options)
                == termination_point::parse_options(&observed.options)
    }
}

/// One OpenFlow version enabled on a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEntry {
    pub bridge: String,
    /// Name as stored in `Bridge.protocols`, e.g. `OpenFlow13`
    pub protocol: String,
}

impl ProtocolEntry {
    /// Accepts either the stored name or the identity form
    /// `ovsdb-bridge-protocol-openflow-13`.
    pub fn new(bridge: impl Into<String>, protocol: &str) -> Self {
        ProtocolEntry {
            bridge: bridge.into(),
            protocol: protocol::protocol_name(protocol),
        }
    }
}

/// A configuration entry, desired or observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEntry {
    Bridge(BridgeEntry),
    TerminationPoint(TerminationPointEntry),
    Protocol(ProtocolEntry),
}

impl ConfigEntry {
    pub fn path(&self) -> EntryPath {
        match self {
            ConfigEntry::Bridge(b) => EntryPath::bridge(&b.name),
            ConfigEntry::TerminationPoint(tp) => EntryPath::termination_point(&tp.bridge, &tp.name),
            ConfigEntry::Protocol(p) => EntryPath::protocol(&p.bridge, &p.protocol),
        }
    }
}

/// Query surface over what the switch currently has.
pub trait ObservedState {
    fn get_entry_by_path(&self, path: &EntryPath) -> Option<ConfigEntry>;
}

/// Changes to the desired configuration since the last pass.
#[derive(Debug, Clone, Default)]
pub struct DesiredStateDelta {
    pub created: BTreeMap<EntryPath, ConfigEntry>,
    pub updated: BTreeMap<EntryPath, ConfigEntry>,
    pub deleted: BTreeMap<EntryPath, ConfigEntry>,
}

impl DesiredStateDelta {
    pub fn new() -> Self {
        DesiredStateDelta::default()
    }

    pub fn create(&mut self, entry: ConfigEntry) -> &mut Self {
        self.created.insert(entry.path(), entry);
        self
    }

    pub fn update(&mut self, entry: ConfigEntry) -> &mut Self {
        self.updated.insert(entry.path(), entry);
        self
    }

    pub fn delete(&mut self, entry: ConfigEntry) -> &mut Self {
        self.deleted.insert(entry.path(), entry);
        self
    }

    /// Entries that should exist after the pass.
    pub fn created_or_updated(&self) -> impl Iterator<Item = (&EntryPath, &ConfigEntry)> {
        self.created.iter().chain(self.updated.iter())
    }

    /// Whether the delta itself brings `path` into existence.
    pub fn provides(&self, path: &EntryPath) -> bool {
        self.created.contains_key(path) || self.updated.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Why an entry produced no operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The live schema lacks a table or column the entry needs
    SchemaVersionMismatch(OvsdbError),
    /// The entry's values failed local validation
    Invalid(OvsdbError),
    /// The bridge the entry belongs to is neither observed nor desired
    MissingParent(EntryPath),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub path: EntryPath,
    pub reason: SkipReason,
}

/// What a command (or a whole pass) did with each entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandReport {
    /// Entries whose operations were appended
    pub applied: Vec<EntryPath>,
    /// Entries already reflected in the observed state
    pub converged: Vec<EntryPath>,
    pub skipped: Vec<SkippedEntry>,
    /// Operations appended to the transaction
    pub operations: usize,
}

impl CommandReport {
    pub fn merge(&mut self, other: CommandReport) {
        self.applied.extend(other.applied);
        self.converged.extend(other.converged);
        self.skipped.extend(other.skipped);
        self.operations += other.operations;
    }

    fn converged(&mut self, path: &EntryPath) {
        debug!(path = %path, "reconcile_entry_converged");
        self.converged.push(path.clone());
    }

    fn missing_parent(&mut self, path: &EntryPath, parent: EntryPath) {
        warn!(path = %path, parent = %parent, "reconcile_entry_missing_parent");
        self.skipped.push(SkippedEntry {
            path: path.clone(),
            reason: SkipReason::MissingParent(parent),
        });
    }
}

/// Append an entry's operations, or record why it was skipped.
fn append_entry(
    txn: &mut TransactionBuilder,
    report: &mut CommandReport,
    path: &EntryPath,
    built: OvsdbResult<Vec<Operation>>,
) {
    match built {
        Ok(ops) if ops.is_empty() => report.converged(path),
        Ok(ops) => {
            debug!(path = %path, operations = ops.len(), "reconcile_entry_applied");
            report.operations += ops.len();
            txn.extend(ops);
            report.applied.push(path.clone());
        }
        Err(e @ OvsdbError::SchemaVersionMismatch { .. }) => {
            warn!(path = %path, error = %e, "reconcile_entry_skipped");
            report.skipped.push(SkippedEntry {
                path: path.clone(),
                reason: SkipReason::SchemaVersionMismatch(e),
            });
        }
        Err(e) => {
            error!(path = %path, error = %e, "reconcile_entry_failed");
            report.skipped.push(SkippedEntry {
                path: path.clone(),
                reason: SkipReason::Invalid(e),
            });
        }
    }
}

/// The closed set of reconciliation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactCommand {
    BridgeUpdate,
    BridgeRemoved,
    TerminationPointCreate,
    TerminationPointDelete,
    ProtocolUpdate,
    ProtocolRemoved,
}

impl TransactCommand {
    pub fn name(&self) -> &'static str {
        match self {
            TransactCommand::BridgeUpdate => "bridge_update",
            TransactCommand::BridgeRemoved => "bridge_removed",
            TransactCommand::TerminationPointCreate => "termination_point_create",
            TransactCommand::TerminationPointDelete => "termination_point_delete",
            TransactCommand::ProtocolUpdate => "protocol_update",
            TransactCommand::ProtocolRemoved => "protocol_removed",
        }
    }

    /// Append the operations this command needs to `txn`.
    pub fn execute(
        &self,
        txn: &mut TransactionBuilder,
        observed: &dyn ObservedState,
        delta: &DesiredStateDelta,
    ) -> CommandReport {
        let report = match self {
            TransactCommand::BridgeUpdate => bridge::update(txn, observed, delta),
            TransactCommand::BridgeRemoved => bridge::remove(txn, observed, delta),
            TransactCommand::TerminationPointCreate => termination_point::create(txn, observed, delta),
            TransactCommand::TerminationPointDelete => termination_point::delete(txn, observed, delta),
            TransactCommand::ProtocolUpdate => protocol::update(txn, observed, delta),
            TransactCommand::ProtocolRemoved => protocol::remove(txn, observed, delta),
        };
        debug!(
            command = self.name(),
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            operations = report.operations,
            "reconcile_command_done"
        );
        report
    }
}

/// Result of running a pass against a server.
#[derive(Debug)]
pub struct PassOutcome {
    pub report: CommandReport,
    /// `None` when the pass produced no operations and nothing was sent
    pub results: Option<TransactResults>,
}

/// One convergence pass: every command, in dependency order, into one
/// transaction.
#[derive(Debug, Clone)]
pub struct ConvergencePass {
    commands: Vec<TransactCommand>,
}

impl Default for ConvergencePass {
    fn default() -> Self {
        ConvergencePass {
            commands: vec![
                TransactCommand::BridgeUpdate,
                TransactCommand::ProtocolUpdate,
                TransactCommand::TerminationPointCreate,
                TransactCommand::ProtocolRemoved,
                TransactCommand::TerminationPointDelete,
                TransactCommand::BridgeRemoved,
            ],
        }
    }
}

impl ConvergencePass {
    pub fn new() -> Self {
        ConvergencePass::default()
    }

    pub fn commands(&self) -> &[TransactCommand] {
        &self.commands
    }

    /// Run every command against `txn` without sending anything.
    pub fn build(
        &self,
        txn: &mut TransactionBuilder,
        observed: &dyn ObservedState,
        delta: &DesiredStateDelta,
    ) -> CommandReport {
        let mut report = CommandReport::default();
        for command in &self.commands {
            report.merge(command.execute(txn, observed, delta));
        }
        report
    }

    /// Build a transaction on `database` and submit it. Nothing is sent when
    /// every entry is already converged or skipped.
    pub async fn run(
        &self,
        client: &OvsdbClient,
        database: &str,
        observed: &dyn ObservedState,
        delta: &DesiredStateDelta,
    ) -> OvsdbResult<PassOutcome> {
        let mut txn = client.transact_builder(database).await?;
        let report = self.build(&mut txn, observed, delta);
        if txn.is_empty() {
            info!(
                converged = report.converged.len(),
                skipped = report.skipped.len(),
                "convergence_pass_noop"
            );
            return Ok(PassOutcome {
                report,
                results: None,
            });
        }

        let results = txn.execute().await?;
        match results.first_error() {
            Some((index, failed)) => warn!(
                index,
                error = failed.error.as_deref().unwrap_or(""),
                details = failed.details.as_deref().unwrap_or(""),
                "convergence_pass_failed"
            ),
            None => info!(
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                operations = report.operations,
                "convergence_pass_committed"
            ),
        }
        Ok(PassOutcome {
            report,
            results: Some(results),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_paths() {
        let tp = EntryPath::termination_point("br0", "tap0");
        assert_eq!(tp.to_string(), "bridge/br0/termination-point/tap0");
        assert_eq!(tp.bridge_path(), Some(EntryPath::bridge("br0")));
        assert_eq!(EntryPath::new(["node", "x"]).bridge_path(), None);
    }

    #[test]
    fn test_protocol_entry_normalizes_name() {
        let entry = ProtocolEntry::new("br0", "ovsdb-bridge-protocol-openflow-13");
        assert_eq!(entry.protocol, "OpenFlow13");
        assert_eq!(
            ConfigEntry::Protocol(entry).path(),
            EntryPath::protocol("br0", "OpenFlow13")
        );
    }

    #[test]
    fn test_bridge_satisfied_by_ignores_uuid_and_unset_datapath() {
        let mut desired = BridgeEntry::new("br0");
        desired.fail_mode = Some("secure".into());
        let mut observed = desired.clone();
        observed.uuid = Some(uuid::Uuid::new_v4());
        observed.datapath_type = Some("system".into());
        assert!(desired.satisfied_by(&observed));

        desired.datapath_type = Some("netdev".into());
        assert!(!desired.satisfied_by(&observed));
    }

    #[test]
    fn test_default_pass_order() {
        let pass = ConvergencePass::new();
        let names: Vec<_> = pass.commands().iter().map(TransactCommand::name).collect();
        assert_eq!(
            names,
            vec![
                "bridge_update",
                "protocol_update",
                "termination_point_create",
                "protocol_removed",
                "termination_point_delete",
                "bridge_removed",
            ]
        );
    }

    #[test]
    fn test_delta_provides() {
        let mut delta = DesiredStateDelta::new();
        delta.create(ConfigEntry::Bridge(BridgeEntry::new("br0")));
        assert!(delta.provides(&EntryPath::bridge("br0")));
        assert!(!delta.provides(&EntryPath::bridge("br1")));
        assert_eq!(delta.created_or_updated().count(), 1);
    }
}
