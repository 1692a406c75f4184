//! Error types for the Vertica protocol implementation.

use std::collections::HashMap;
use std::fmt;
use std::io;

use thiserror::Error;

/// Result type for Vertica operations.
pub type VerticaResult<T> = Result<T, VerticaError>;

/// Failures while turning a frame into a typed message.
///
/// Every variant is fatal to the connection: once a frame cannot be decoded
/// the framing of the rest of the stream cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A field needs more bytes than the frame body has left.
    #[error("truncated buffer: needed {needed} bytes, {remaining} remaining")]
    TruncatedBuffer { needed: usize, remaining: usize },

    /// A null-terminated string has no terminator within the body.
    #[error("missing null terminator in string")]
    MissingTerminator,

    /// The tag byte is not one the client understands.
    #[error("unknown message type: 0x{0:02x}")]
    UnknownTag(u8),

    /// The declared frame length is smaller than the length field itself,
    /// or larger than the client accepts.
    #[error("invalid message length: {0}")]
    InvalidLength(u32),
}

/// Errors that can occur during Vertica operations.
#[derive(Error, Debug)]
pub enum VerticaError {
    /// I/O error during communication (dial, short read, aborted write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    Tls(String),

    /// A frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A message arrived that is not valid in the current phase.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server reported an error.
    #[error("{0}")]
    Server(ServerError),

    /// TLS was requested but the server refused the upgrade.
    #[error("SSL not available on this server")]
    SslNotSupported,

    /// The server asked for an authentication method the client lacks.
    #[error("Authentication method not supported: {}", auth_method_name(.0))]
    UnsupportedAuthMethod(u32),

    /// Connection is closed.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Invalid connection configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VerticaError {
    /// Whether the connection must be torn down after this error.
    ///
    /// Only server-reported errors leave the protocol stream in a known
    /// state; everything else poisons the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VerticaError::Server(_))
    }

    /// The SQL state code when this is a server error.
    pub fn code(&self) -> Option<&str> {
        match self {
            VerticaError::Server(e) => Some(e.code()),
            _ => None,
        }
    }

    /// The server error, if this is one.
    pub fn as_server_error(&self) -> Option<&ServerError> {
        match self {
            VerticaError::Server(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServerError> for VerticaError {
    fn from(e: ServerError) -> Self {
        VerticaError::Server(e)
    }
}

fn auth_method_name(code: &u32) -> String {
    use super::protocol::AuthMethod;
    format!("{:?} ({})", AuthMethod::from(*code), code)
}

/// Message used for the empty-query pseudo error.
pub const EMPTY_QUERY_MESSAGE: &str = "the query string was empty";

/// Error field codes sent in ErrorResponse messages.
pub mod field {
    pub const SEVERITY: u8 = b'S';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
}

/// An error reported by the server, either as an ErrorResponse or as the
/// EmptyQueryResponse to a blank query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    fields: HashMap<u8, String>,
}

impl ServerError {
    /// Build from the raw field map of an ErrorResponse.
    pub fn from_fields(fields: HashMap<u8, String>) -> Self {
        Self { fields }
    }

    /// The error returned when the server answers a blank query.
    pub fn empty_query() -> Self {
        let mut fields = HashMap::with_capacity(3);
        fields.insert(field::SEVERITY, "ERROR".to_string());
        fields.insert(field::CODE, String::new());
        fields.insert(field::MESSAGE, EMPTY_QUERY_MESSAGE.to_string());
        Self { fields }
    }

    fn get(&self, code: u8) -> &str {
        self.fields.get(&code).map(String::as_str).unwrap_or("")
    }

    /// SQL state code (e.g. "42601"); empty when the server sent none.
    pub fn code(&self) -> &str {
        self.get(field::CODE)
    }

    pub fn severity(&self) -> &str {
        self.get(field::SEVERITY)
    }

    pub fn message(&self) -> &str {
        self.get(field::MESSAGE)
    }

    pub fn detail(&self) -> Option<&str> {
        self.fields.get(&field::DETAIL).map(String::as_str)
    }

    pub fn hint(&self) -> Option<&str> {
        self.fields.get(&field::HINT).map(String::as_str)
    }

    /// Every field the server sent, keyed by field code.
    pub fn fields(&self) -> &HashMap<u8, String> {
        &self.fields
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vertica {} {}: {}",
            self.severity(),
            self.code(),
            self.message()
        )?;
        if let Some(d) = self.detail() {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = self.hint() {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}
