//! # OVSDB Client
//!
//! One connection to an OVSDB server with everything layered on it: the
//! JSON-RPC transport, the schema cache, monitor routing and lock tracking.
//!
//! ## Example
//!
//! ```no_run
//! use ovsdb_client::{Config, OvsdbClient};
//!
//! # async fn run() -> ovsdb_client::OvsdbResult<()> {
//! let client = OvsdbClient::connect(&Config::default()).await?;
//! let dbs = client.list_databases().await?;
//! let mut txn = client.transact_builder("Open_vSwitch").await?;
//! txn.add(ovsdb_client::Operation::comment("hello"));
//! let results = txn.execute().await?;
//! assert!(results.is_success());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::monitor::session;
use crate::monitor::{
    LockCallback, LockManager, MonitorCallback, MonitorHandle, MonitorRegistry, MonitorRequest,
    MonitorSelect,
};
use crate::operations::TransactionBuilder;
use crate::protocol::{methods, OvsdbError, OvsdbResult, RpcTransport, TransportState};
use crate::schema::{DatabaseSchema, SchemaCatalog};

/// Client for one OVSDB connection.
///
/// Cloning is cheap; clones share the connection.
#[derive(Debug, Clone)]
pub struct OvsdbClient {
    transport: RpcTransport,
    catalog: Arc<SchemaCatalog>,
    monitors: Arc<MonitorRegistry>,
    locks: Arc<LockManager>,
    default_database: String,
    default_select: MonitorSelect,
}

impl OvsdbClient {
    /// Open a TCP connection to `config.connection.address`.
    pub async fn connect(config: &Config) -> OvsdbResult<Self> {
        let connection = &config.connection;
        let failed = |reason: String| OvsdbError::ConnectionFailed {
            address: connection.address.clone(),
            reason,
        };
        let stream = tokio::time::timeout(
            connection.connect_timeout(),
            TcpStream::connect(&connection.address),
        )
        .await
        .map_err(|_| {
            failed(format!(
                "timed out after {}ms",
                connection.connect_timeout_ms
            ))
        })?
        .map_err(|e| failed(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(address = %connection.address, error = %e, "tcp_nodelay_failed");
        }

        info!(address = %connection.address, "connected");
        let mut client = Self::from_stream(stream, connection);
        client.default_select = config.monitor.default_select;
        Ok(client)
    }

    /// Run the protocol over an already established stream (TLS, unix
    /// socket, or an in-memory pipe in tests).
    pub fn from_stream<S>(stream: S, connection: &ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let transport = RpcTransport::start(stream, connection.transport_options());
        OvsdbClient {
            monitors: MonitorRegistry::install(&transport),
            locks: LockManager::install(&transport),
            catalog: Arc::new(SchemaCatalog::new()),
            transport,
            default_database: connection.database.clone(),
            default_select: MonitorSelect::all(),
        }
    }

    pub fn transport(&self) -> &RpcTransport {
        &self.transport
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Database named in the configuration.
    pub fn default_database(&self) -> &str {
        &self.default_database
    }

    /// Change kinds used by [`MonitorRequest`]s built through this client.
    pub fn default_select(&self) -> MonitorSelect {
        self.default_select
    }

    /// Names of the databases the server hosts.
    pub async fn list_databases(&self) -> OvsdbResult<Vec<String>> {
        let reply = self.transport.call(methods::LIST_DBS, json!([])).await?;
        let names = reply.as_array().ok_or_else(|| OvsdbError::MalformedMessage {
            message: format!("list_dbs reply is not an array: {reply}"),
        })?;
        names
            .iter()
            .map(|name| {
                name.as_str()
                    .map(String::from)
                    .ok_or_else(|| OvsdbError::MalformedMessage {
                        message: format!("list_dbs entry is not a string: {name}"),
                    })
            })
            .collect()
    }

    /// Schema of `database`, fetched once per connection.
    pub async fn get_schema(&self, database: &str) -> OvsdbResult<Arc<DatabaseSchema>> {
        self.catalog.get_or_fetch(&self.transport, database).await
    }

    /// Fetch the schema of `database` again, replacing the cached copy.
    pub async fn refresh_schema(&self, database: &str) -> OvsdbResult<Arc<DatabaseSchema>> {
        self.catalog.refresh(&self.transport, database).await
    }

    /// Empty transaction against `database`.
    pub async fn transact_builder(&self, database: &str) -> OvsdbResult<TransactionBuilder> {
        if self.transport.is_closed() {
            return Err(OvsdbError::TransportClosed);
        }
        let schema = self.get_schema(database).await?;
        Ok(TransactionBuilder::new(self.transport.clone(), schema))
    }

    /// Subscribe to `requests` on `database`.
    pub async fn monitor(
        &self,
        database: &str,
        requests: &[MonitorRequest],
        callback: Arc<dyn MonitorCallback>,
    ) -> OvsdbResult<MonitorHandle> {
        let schema = self.get_schema(database).await?;
        session::start(&self.transport, &self.monitors, schema, requests, callback).await
    }

    /// Subscribe to every column of `tables` with the configured change kinds.
    pub async fn monitor_tables(
        &self,
        database: &str,
        tables: &[&str],
        callback: Arc<dyn MonitorCallback>,
    ) -> OvsdbResult<MonitorHandle> {
        let schema = self.get_schema(database).await?;
        let requests = tables
            .iter()
            .map(|table| {
                schema
                    .lookup_table(table)
                    .map(|t| MonitorRequest::all_columns(t, self.default_select))
            })
            .collect::<OvsdbResult<Vec<_>>>()?;
        session::start(&self.transport, &self.monitors, schema, &requests, callback).await
    }

    /// Number of live monitor sessions.
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Request a named lock; see [`LockManager::lock`].
    pub async fn lock(&self, lock: &str, callback: Arc<dyn LockCallback>) -> OvsdbResult<bool> {
        self.locks.lock(lock, callback).await
    }

    /// Take a named lock from its owner; see [`LockManager::steal`].
    pub async fn steal(&self, lock: &str, callback: Arc<dyn LockCallback>) -> OvsdbResult<bool> {
        self.locks.steal(lock, callback).await
    }

    pub async fn unlock(&self, lock: &str) -> OvsdbResult<()> {
        self.locks.unlock(lock).await
    }

    pub fn is_lock_held(&self, lock: &str) -> bool {
        self.locks.is_held(lock)
    }

    /// Round-trip an `echo` to check liveness.
    pub async fn echo(&self) -> OvsdbResult<()> {
        let payload = json!(["ovsdb-client"]);
        let reply = self.transport.echo(payload.clone()).await?;
        if reply != payload {
            return Err(OvsdbError::MalformedMessage {
                message: format!("echo returned {reply}"),
            });
        }
        debug!("echo_ok");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Wait until the connection closes and return the reason.
    pub async fn closed(&self) -> String {
        let mut state = self.transport.subscribe_state();
        let closed = state
            .wait_for(|s| matches!(s, TransportState::Closed { .. }))
            .await
            .map(|s| match &*s {
                TransportState::Closed { reason } => reason.clone(),
                TransportState::Open => String::new(),
            });
        closed.unwrap_or_else(|_| "transport dropped".to_string())
    }

    /// Close the connection. Pending calls fail with `ConnectionLost` and
    /// monitors go stale.
    pub fn close(&self) {
        self.transport.close();
        self.catalog.invalidate_all();
    }
}
