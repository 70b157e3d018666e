//! Transaction builder.
//!
//! Operations accumulate synchronously in call order; [`TransactionBuilder::execute`]
//! sends them as one `transact` call so the server applies them atomically.
//! Named UUIDs are passed through untouched: the server resolves them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value as Json;
use tracing::debug;

use super::result::TransactResults;
use super::Operation;
use crate::protocol::{methods, OvsdbError, OvsdbResult, PendingCall, RpcTransport};
use crate::schema::{DatabaseSchema, TableSchema};
use crate::value::Row;

/// Accumulates operations for one atomic `transact` call.
#[derive(Debug)]
pub struct TransactionBuilder {
    transport: RpcTransport,
    schema: Arc<DatabaseSchema>,
    operations: Vec<Operation>,
}

impl TransactionBuilder {
    pub fn new(transport: RpcTransport, schema: Arc<DatabaseSchema>) -> Self {
        TransactionBuilder {
            transport,
            schema,
            operations: Vec::new(),
        }
    }

    /// Append one operation.
    pub fn add(&mut self, operation: Operation) -> &mut Self {
        self.operations.push(operation);
        self
    }

    /// Append several operations, preserving their order.
    pub fn extend(&mut self, operations: impl IntoIterator<Item = Operation>) -> &mut Self {
        self.operations.extend(operations);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn schema(&self) -> &Arc<DatabaseSchema> {
        &self.schema
    }

    pub fn database(&self) -> &str {
        &self.schema.name
    }

    /// Table schema lookup against the schema this transaction was built for.
    pub fn table(&self, name: &str) -> OvsdbResult<&Arc<TableSchema>> {
        self.schema.lookup_table(name)
    }

    /// `transact` params: the database name followed by each operation.
    pub fn params(&self) -> Json {
        let mut params = Vec::with_capacity(self.operations.len() + 1);
        params.push(Json::String(self.schema.name.clone()));
        params.extend(self.operations.iter().map(Operation::to_json));
        Json::Array(params)
    }

    /// Send the transaction now and return a future for its results.
    ///
    /// Dropping the future discards local interest only. The server still
    /// runs and commits the transaction; there is no remote cancel.
    pub fn execute(self) -> PendingTransaction {
        let params = self.params();
        debug!(
            database = %self.schema.name,
            operations = self.operations.len(),
            "transact_submit"
        );
        let select_tables = self
            .operations
            .iter()
            .map(|op| match op {
                Operation::Select { table, .. } => self.schema.table(table).cloned(),
                _ => None,
            })
            .collect();
        PendingTransaction {
            call: self.transport.submit(methods::TRANSACT, params),
            operation_count: self.operations.len(),
            select_tables,
        }
    }
}

/// Reply future of an executed transaction.
#[derive(Debug)]
pub struct PendingTransaction {
    call: PendingCall,
    operation_count: usize,
    /// Table schema per operation index, for reshaping select rows
    select_tables: Vec<Option<Arc<TableSchema>>>,
}

impl PendingTransaction {
    /// Request id the transaction was sent under.
    pub fn request_id(&self) -> u64 {
        self.call.id()
    }

    fn interpret(&self, reply: &Json) -> OvsdbResult<TransactResults> {
        let mut results = TransactResults::from_reply(reply, self.operation_count)?;
        for (result, table) in results.results.iter_mut().zip(&self.select_tables) {
            if let (Some(rows), Some(table)) = (result.rows.as_mut(), table) {
                for row in rows.iter_mut() {
                    *row = normalize_row(std::mem::take(row), table);
                }
            }
        }
        Ok(results)
    }
}

fn normalize_row(row: Row, table: &TableSchema) -> Row {
    row.iter()
        .map(|(name, value)| {
            let value = match table.column(name) {
                Some(column) => value.clone().normalize(&column.column_type),
                None => value.clone(),
            };
            (name.clone(), value)
        })
        .collect()
}

impl Future for PendingTransaction {
    type Output = OvsdbResult<TransactResults>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let reply = match Pin::new(&mut self.call).poll(cx) {
            Poll::Ready(reply) => reply,
            Poll::Pending => return Poll::Pending,
        };
        Poll::Ready(reply.and_then(|json| {
            self.interpret(&json).map_err(|e| match e {
                OvsdbError::MalformedMessage { message } => OvsdbError::MalformedMessage {
                    message: format!("transact reply: {message}"),
                },
                other => other,
            })
        }))
    }
}
