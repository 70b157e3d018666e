//! Interpretation of `transact` replies.
//!
//! The reply is positionally aligned with the submitted operations, but only
//! up to and including the first operation that failed. Entries after a
//! failure are `null` (or missing) and mean "not executed". If every
//! operation succeeded but the commit itself failed, the server appends one
//! extra error entry beyond the operation count.

use serde_json::Value as Json;
use uuid::Uuid;

use crate::protocol::{OvsdbError, OvsdbResult};
use crate::value::{Atom, Row, Value};

/// Outcome of one executed operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    /// Rows touched by update, mutate, delete
    pub count: Option<u64>,
    /// Identifier generated by insert
    pub uuid: Option<Uuid>,
    /// Rows returned by select
    pub rows: Option<Vec<Row>>,
    /// Error code, e.g. `constraint violation`, `aborted`, `not owner`
    pub error: Option<String>,
    pub details: Option<String>,
}

impl OperationResult {
    pub fn from_json(json: &Json) -> OvsdbResult<Self> {
        let object = json.as_object().ok_or_else(|| OvsdbError::MalformedMessage {
            message: format!("operation result is not an object: {json}"),
        })?;

        let uuid = match object.get("uuid") {
            Some(u) => match Value::from_json(u)?.as_atom() {
                Some(Atom::Uuid(id)) => Some(*id),
                _ => {
                    return Err(OvsdbError::MalformedMessage {
                        message: format!("insert result uuid is not a uuid: {u}"),
                    })
                }
            },
            None => None,
        };

        let rows = match object.get("rows") {
            Some(Json::Array(rows)) => Some(
                rows.iter()
                    .map(Row::from_json)
                    .collect::<OvsdbResult<Vec<Row>>>()?,
            ),
            Some(other) => {
                return Err(OvsdbError::MalformedMessage {
                    message: format!("select rows is not an array: {other}"),
                })
            }
            None => None,
        };

        Ok(OperationResult {
            count: object.get("count").and_then(Json::as_u64),
            uuid,
            rows,
            error: object.get("error").and_then(Json::as_str).map(String::from),
            details: object.get("details").and_then(Json::as_str).map(String::from),
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Position of an operation in a reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultSlot<'a> {
    Executed(&'a OperationResult),
    /// The operation came after a failure and was never run
    NotExecuted,
}

/// Results of one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactResults {
    /// Results up to and including the first error
    pub results: Vec<OperationResult>,
    /// Number of operations submitted
    pub operation_count: usize,
    /// Failure reported after all operations succeeded (e.g. a durable
    /// commit that could not be written)
    pub commit_error: Option<OperationResult>,
}

impl TransactResults {
    pub fn from_reply(reply: &Json, operation_count: usize) -> OvsdbResult<Self> {
        let entries = reply.as_array().ok_or_else(|| OvsdbError::MalformedMessage {
            message: format!("transact reply is not an array: {reply}"),
        })?;

        let mut results = Vec::with_capacity(entries.len().min(operation_count));
        let mut failed = false;
        for entry in entries.iter().take(operation_count) {
            if entry.is_null() || failed {
                break;
            }
            let result = OperationResult::from_json(entry)?;
            failed = result.is_error();
            results.push(result);
        }

        let commit_error = if results.len() == operation_count && !failed {
            entries
                .get(operation_count)
                .filter(|e| !e.is_null())
                .map(OperationResult::from_json)
                .transpose()?
        } else {
            None
        };

        Ok(TransactResults {
            results,
            operation_count,
            commit_error,
        })
    }

    /// Number of executed operations.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&OperationResult> {
        self.results.get(index)
    }

    pub fn slot(&self, index: usize) -> ResultSlot<'_> {
        match self.results.get(index) {
            Some(result) => ResultSlot::Executed(result),
            None => ResultSlot::NotExecuted,
        }
    }

    /// Fewer results than operations: something failed before the end.
    pub fn is_truncated(&self) -> bool {
        self.results.len() < self.operation_count
    }

    /// Every operation ran without error and the commit succeeded.
    pub fn is_success(&self) -> bool {
        self.results.len() == self.operation_count
            && self.commit_error.is_none()
            && !self.results.iter().any(OperationResult::is_error)
    }

    /// Index and result of the failing operation, if any.
    pub fn first_error(&self) -> Option<(usize, &OperationResult)> {
        self.results
            .iter()
            .enumerate()
            .find(|(_, r)| r.is_error())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter()
    }
}
