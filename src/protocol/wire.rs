//! Wire Format Types
//!
//! JSON-RPC 1.0 messages as OVSDB uses them. Every message is a JSON object:
//!
//! | Kind | Shape |
//! |------|-------|
//! | request | `{"method": m, "params": [..], "id": <non-null>}` |
//! | notification | `{"method": m, "params": [..], "id": null}` |
//! | response | `{"result": r, "error": null, "id": <id>}` or `{"result": null, "error": e, "id": <id>}` |

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::error::{OvsdbError, OvsdbResult};

/// Method names used on the wire.
pub mod methods {
    // Client to server
    pub const LIST_DBS: &str = "list_dbs";
    pub const GET_SCHEMA: &str = "get_schema";
    pub const TRANSACT: &str = "transact";
    pub const MONITOR: &str = "monitor";
    pub const MONITOR_CANCEL: &str = "monitor_cancel";
    pub const LOCK: &str = "lock";
    pub const STEAL: &str = "steal";
    pub const UNLOCK: &str = "unlock";

    // Either direction
    pub const ECHO: &str = "echo";

    // Server to client
    pub const UPDATE: &str = "update";
    pub const LOCKED: &str = "locked";
    pub const STOLEN: &str = "stolen";
}

// ============================================================================
// Outbound
// ============================================================================

/// A request or notification. Notifications carry `id: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub params: Json,
    pub id: Json,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Json, id: u64) -> Self {
        Request {
            method: method.into(),
            params,
            id: Json::from(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Json) -> Self {
        Request {
            method: method.into(),
            params,
            id: Json::Null,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_null()
    }
}

/// A response to a request. Exactly one of `result`/`error` is non-null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: Json,
    pub error: Json,
    pub id: Json,
}

impl Response {
    pub fn success(id: Json, result: Json) -> Self {
        Response {
            result,
            error: Json::Null,
            id,
        }
    }

    pub fn failure(id: Json, error: impl Into<String>) -> Self {
        Response {
            result: Json::Null,
            error: Json::String(error.into()),
            id,
        }
    }

    /// Turn the response into the call's outcome.
    ///
    /// Servers send the error either as a bare string or as an object with
    /// `error` and optional `details` members.
    pub fn into_result(self, method: &str) -> OvsdbResult<Json> {
        if self.error.is_null() {
            return Ok(self.result);
        }
        let (error, details) = match &self.error {
            Json::String(s) => (s.clone(), None),
            Json::Object(o) => (
                o.get("error")
                    .and_then(Json::as_str)
                    .map_or_else(|| self.error.to_string(), String::from),
                o.get("details").and_then(Json::as_str).map(String::from),
            ),
            other => (other.to_string(), None),
        };
        Err(OvsdbError::Rpc {
            method: method.to_string(),
            error,
            details,
        })
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Classification of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to one of our calls
    Response(Response),
    /// Server-initiated call that expects an answer
    Request { id: Json, method: String, params: Json },
    /// Server-initiated call with `id: null`
    Notification { method: String, params: Json },
}

impl Incoming {
    /// Classify a decoded JSON value. Anything that is not a recognizable
    /// JSON-RPC 1.0 message is a `MalformedMessage`.
    pub fn classify(message: Json) -> OvsdbResult<Self> {
        let Json::Object(mut object) = message else {
            return Err(malformed(format!("message is not an object: {message}")));
        };

        if let Some(method) = object.remove("method") {
            let Json::String(method) = method else {
                return Err(malformed(format!("method is not a string: {method}")));
            };
            let params = object.remove("params").unwrap_or(Json::Null);
            let id = object.remove("id").unwrap_or(Json::Null);
            return Ok(if id.is_null() {
                Incoming::Notification { method, params }
            } else {
                Incoming::Request { id, method, params }
            });
        }

        if object.contains_key("result") || object.contains_key("error") {
            let id = object.remove("id").unwrap_or(Json::Null);
            if id.is_null() {
                return Err(malformed("response without id".to_string()));
            }
            return Ok(Incoming::Response(Response {
                result: object.remove("result").unwrap_or(Json::Null),
                error: object.remove("error").unwrap_or(Json::Null),
                id,
            }));
        }

        Err(malformed(format!(
            "neither request nor response: {}",
            Json::Object(object)
        )))
    }
}

fn malformed(message: String) -> OvsdbError {
    OvsdbError::MalformedMessage { message }
}
