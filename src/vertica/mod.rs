//! Vertica wire protocol client.
//!
//! Vertica speaks a dialect of the PostgreSQL v3 frontend/backend protocol.
//! This module implements the client side of its simple query cycle:
//! - Plain TCP or TLS-upgraded transport
//! - Startup handshake with trust or cleartext password authentication
//! - Text queries returning raw, undecoded column values
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding and framing
//! - `connection`: Connection state machine and management
//! - `config`: Connection configuration and URL parsing
//! - `resultset`: Query output
//! - `stream`: TCP/TLS transport
//! - `sink`: Diagnostic hook for protocol traffic

pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod resultset;
pub mod sink;
pub mod stream;


pub use config::{native_tls_config, ConnectionConfig, DEFAULT_PORT};
pub use connection::Connection;
pub use error::{DecodeError, ServerError, VerticaError, VerticaResult};
pub use protocol::{
    AuthMethod, BackendMessage, FieldDescription, Format, FrontendMessage, TransactionStatus,
};
pub use resultset::{Field, Resultset, Row};
pub use sink::{MessageSink, TracingSink};
