//! # OVSDB Client
//!
//! Client for the OVSDB management protocol (RFC 7047): schema-checked typed
//! rows, atomic multi-operation transactions, change monitors with a local
//! mirror, the lock-token protocol, and reconciliation commands that converge
//! an Open vSwitch configuration toward a desired state.
//!
//! ## Architecture
//!
//! ```text
//! desired-state delta
//!     ↓
//! [reconcile]    ConvergencePass → TransactCommand (bridges, ports, protocols)
//!     ↓
//! [typed]        TypedRow bindings, checked against the live schema
//!     ↓
//! [operations]   Operation / TransactionBuilder → TransactResults
//!     ↓
//! [protocol]     RpcTransport (JSON-RPC 1.0, id correlation, server pushes)
//!     ↓
//! ovsdb-server
//!     ↓ update / locked / stolen
//! [monitor]      MonitorRegistry → per-session dispatch → MonitorCallback
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ovsdb_client::{Config, OvsdbClient, Operation};
//! use ovsdb_client::typed::{openvswitch::Bridge, TypedTable};
//!
//! let config = Config::load()?;
//! let client = OvsdbClient::connect(&config).await?;
//! let schema = client.get_schema("Open_vSwitch").await?;
//!
//! let bridge = Bridge::named(&schema, "br-test")?;
//! let mut txn = client.transact_builder("Open_vSwitch").await?;
//! txn.add(bridge.typed().insert_op()?.with_uuid_name("br_test"));
//! let results = txn.execute().await?;
//! if results.is_truncated() {
//!     // an operation failed; later ones never ran
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Atoms, sets, maps, rows |
//! | `schema` | Schema model, catalog, client-side validation |
//! | `typed` | Typed row bindings with version ranges |
//! | `protocol` | Errors, wire messages, framing, transport |
//! | `operations` | Operations, transaction builder, results |
//! | `monitor` | Monitor sessions, table mirror, locks |
//! | `client` | Connection façade |
//! | `reconcile` | Reconciliation commands and convergence pass |
//! | `config` / `logging` | Configuration and tracing setup |

pub mod client;
pub mod config;
pub mod logging;
pub mod monitor;
pub mod operations;
pub mod protocol;
pub mod reconcile;
pub mod schema;
pub mod typed;
pub mod value;

pub use client::OvsdbClient;
pub use config::Config;
pub use monitor::{
    LockCallback, MonitorCallback, MonitorHandle, MonitorRequest, MonitorSelect, MonitorState,
    TableMirror, TableUpdates,
};
pub use operations::{
    named_ref, Condition, Function, Mutation, Mutator, Operation, OperationResult, ResultSlot,
    TransactResults, TransactionBuilder,
};
pub use protocol::{OvsdbError, OvsdbResult, RpcTransport};
pub use reconcile::{
    ConfigEntry, ConvergencePass, DesiredStateDelta, EntryPath, ObservedState, TransactCommand,
};
pub use schema::{DatabaseSchema, SchemaVersion, TableSchema};
pub use value::{Atom, Row, Value};
