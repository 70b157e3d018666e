//! OVSDB Protocol
//!
//! JSON-RPC 1.0 plumbing between the client and an OVSDB server.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                      RpcTransport                           |
//! +-------------------------------------------------------------+
//! |  Outbound: request {method, params, id} -> writer task      |
//! |  Inbound:  reader task -> JsonFramer -> dispatch            |
//! |              response     -> pending call (by id)           |
//! |              notification -> registered handler (by method) |
//! |              echo request -> answered in place              |
//! +-------------------------------------------------------------+
//! |  Framing: concatenated JSON values, no delimiter            |
//! |  Stream:  any AsyncRead + AsyncWrite (TCP, unix, duplex)    |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Module Structure
//!
//! - `wire` - JSON-RPC message types and method names
//! - `codec` - Incremental framing of concatenated JSON values
//! - `transport` - Connection tasks, call correlation, notification routing
//! - `error` - Client error types

pub mod codec;
pub mod error;
pub mod transport;
pub mod wire;

// Re-export error types
pub use error::{OvsdbError, OvsdbResult};

pub use codec::JsonFramer;
pub use transport::{NotificationHandler, PendingCall, RpcTransport, TransportOptions, TransportState};
pub use wire::{methods, Incoming, Request, Response};

// Protocol Constants
/// IANA-assigned OVSDB port
pub const DEFAULT_PORT: u16 = 6640;

/// Default per-call timeout in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Maximum size of a single inbound message (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
